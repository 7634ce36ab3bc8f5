//! Memento file persistence
//!
//! Handles saving and loading control files and snapshot slots to/from the
//! filesystem. Uses atomic writes (write to temp file, sync, then rename) so
//! no file is ever left in a partially-written state.
//!
//! Storage location: `~/.local/share/memento/` (configurable via `Config`)
//!
//! Files per memento directory:
//! - `control.json` - The control metadata
//! - `<slot>.txt` / `<slot>.enc` - Plaintext or encrypted snapshot slots

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::Config;
use crate::error::{MementoError, MementoResult};
use crate::models::{ControlMetadata, DocumentId, Snapshot};

const PLAINTEXT_EXTENSION: &str = "txt";
const ENCRYPTED_EXTENSION: &str = "enc";

/// Persistence layer for memento directories
///
/// Knows the on-disk layout but nothing about ring buffer semantics.
#[derive(Debug, Clone)]
pub struct DocumentPersistence {
    config: Config,
}

impl DocumentPersistence {
    /// Create a new persistence handler with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Check if a memento has a control file on disk
    pub fn exists(&self, id: DocumentId) -> bool {
        self.config.control_path(id).exists()
    }

    /// Ids of all mementos with a control file, ascending
    pub fn list_ids(&self) -> MementoResult<Vec<DocumentId>> {
        let data_dir = &self.config.data_dir;
        if !data_dir.exists() {
            return Ok(Vec::new());
        }

        let entries =
            fs::read_dir(data_dir).map_err(|e| MementoError::from_read(e, data_dir.clone()))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MementoError::from_read(e, data_dir.clone()))?;
            let Some(id) = parse_document_dir(&entry.path()) else {
                continue;
            };
            if self.exists(id) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Reserve the next free id by creating its directory
    ///
    /// Directory creation is exclusive, so two concurrent callers never get
    /// the same id.
    pub fn allocate_id(&self) -> MementoResult<DocumentId> {
        let data_dir = &self.config.data_dir;
        fs::create_dir_all(data_dir).map_err(|e| MementoError::CreateDirectory {
            path: data_dir.clone(),
            source: e,
        })?;

        let mut candidate = self
            .highest_dir_id()?
            .map(|id| id.next())
            .unwrap_or(DocumentId(0));

        loop {
            let dir = self.config.document_dir(candidate);
            match fs::create_dir(&dir) {
                Ok(()) => {
                    debug!("Allocated memento id {}", candidate);
                    return Ok(candidate);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    candidate = candidate.next();
                }
                Err(e) => {
                    return Err(MementoError::CreateDirectory {
                        path: dir,
                        source: e,
                    })
                }
            }
        }
    }

    /// Highest numeric directory name, including directories without a control file
    fn highest_dir_id(&self) -> MementoResult<Option<DocumentId>> {
        let data_dir = &self.config.data_dir;
        let entries =
            fs::read_dir(data_dir).map_err(|e| MementoError::from_read(e, data_dir.clone()))?;

        let mut highest = None;
        for entry in entries.flatten() {
            if let Some(id) = parse_document_dir(&entry.path()) {
                highest = highest.max(Some(id));
            }
        }
        Ok(highest)
    }

    /// Load the control metadata of a memento
    ///
    /// A missing file is `NotFound`; an unparsable or invalid one is
    /// `CorruptMetadata`. Neither is ever replaced with defaults.
    pub fn load_metadata(&self, id: DocumentId) -> MementoResult<ControlMetadata> {
        let path = self.config.control_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MementoError::NotFound { id });
            }
            Err(e) => return Err(MementoError::from_read(e, path)),
        };

        let metadata: ControlMetadata =
            serde_json::from_str(&content).map_err(|e| MementoError::CorruptMetadata {
                path: path.clone(),
                details: e.to_string(),
            })?;

        metadata
            .validate()
            .map_err(|details| MementoError::CorruptMetadata { path, details })?;

        Ok(metadata)
    }

    /// Save the control metadata of a memento atomically
    pub fn save_metadata(&self, id: DocumentId, metadata: &ControlMetadata) -> MementoResult<()> {
        let json = serde_json::to_vec_pretty(metadata)?;
        atomic_write(&self.config.control_path(id), &json)
    }

    /// Path of a slot file
    pub fn slot_path(&self, id: DocumentId, index: usize, encrypted: bool) -> PathBuf {
        let extension = if encrypted {
            ENCRYPTED_EXTENSION
        } else {
            PLAINTEXT_EXTENSION
        };
        self.config
            .document_dir(id)
            .join(format!("{}.{}", index, extension))
    }

    /// Durably write a slot, replacing whatever the slot held before
    ///
    /// The new file is flushed and renamed into place before the file with the
    /// other extension is removed, so a crash leaves at least one copy.
    pub fn write_slot(
        &self,
        id: DocumentId,
        index: usize,
        payload: &[u8],
        encrypted: bool,
    ) -> MementoResult<()> {
        atomic_write(&self.slot_path(id, index, encrypted), payload)?;
        remove_if_exists(&self.slot_path(id, index, !encrypted))
    }

    /// Read a slot, or `None` if it was never written
    ///
    /// If both a plaintext and an encrypted file exist (interrupted
    /// rewrite), the most recently modified one wins.
    pub fn read_slot(&self, id: DocumentId, index: usize) -> MementoResult<Option<Snapshot>> {
        let plain = self.slot_file(id, index, false)?;
        let sealed = self.slot_file(id, index, true)?;

        let (path, encrypted, modified) = match (plain, sealed) {
            (None, None) => return Ok(None),
            (Some((path, modified)), None) => (path, false, modified),
            (None, Some((path, modified))) => (path, true, modified),
            (Some((plain_path, plain_time)), Some((sealed_path, sealed_time))) => {
                if sealed_time >= plain_time {
                    (sealed_path, true, sealed_time)
                } else {
                    (plain_path, false, plain_time)
                }
            }
        };

        let payload = fs::read(&path).map_err(|e| MementoError::from_read(e, path.clone()))?;
        Ok(Some(Snapshot {
            index,
            timestamp: modified,
            payload,
            encrypted,
        }))
    }

    fn slot_file(
        &self,
        id: DocumentId,
        index: usize,
        encrypted: bool,
    ) -> MementoResult<Option<(PathBuf, DateTime<Utc>)>> {
        let path = self.slot_path(id, index, encrypted);
        match fs::metadata(&path) {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Ok(Some((path, modified)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MementoError::from_read(e, path)),
        }
    }

    /// Remove both files of a slot
    pub fn remove_slot(&self, id: DocumentId, index: usize) -> MementoResult<()> {
        remove_if_exists(&self.slot_path(id, index, false))?;
        remove_if_exists(&self.slot_path(id, index, true))
    }

    /// Indices of every slot file present on disk, ascending and deduplicated
    pub fn slot_indices(&self, id: DocumentId) -> MementoResult<Vec<usize>> {
        let dir = self.config.document_dir(id);
        let entries = fs::read_dir(&dir).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => MementoError::NotFound { id },
            _ => MementoError::from_read(e, dir.clone()),
        })?;

        let mut indices = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_slot = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some(PLAINTEXT_EXTENSION) | Some(ENCRYPTED_EXTENSION)
            );
            if !is_slot {
                continue;
            }
            if let Some(index) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<usize>().ok())
            {
                indices.push(index);
            }
        }

        indices.sort_unstable();
        indices.dedup();
        Ok(indices)
    }

    /// Copy a memento directory into the backups directory
    pub fn backup(&self, id: DocumentId, label: &str) -> MementoResult<PathBuf> {
        let source = self.config.document_dir(id);
        let target = self
            .config
            .backups_dir()
            .join(format!("memento_{}_{}", id, label));

        copy_dir(&source, &target)?;
        debug!("Backed up memento {} to {:?}", id, target);
        Ok(target)
    }
}

/// Parse a numeric directory name into a document id
fn parse_document_dir(path: &Path) -> Option<DocumentId> {
    if !path.is_dir() {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok().map(DocumentId)
}

/// Remove a file, treating a missing file as success
fn remove_if_exists(path: &Path) -> MementoResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MementoError::from_io(e, path.to_path_buf())),
    }
}

/// Copy the files of a flat directory
fn copy_dir(source: &Path, target: &Path) -> MementoResult<()> {
    fs::create_dir_all(target).map_err(|e| MementoError::CreateDirectory {
        path: target.to_path_buf(),
        source: e,
    })?;

    let entries =
        fs::read_dir(source).map_err(|e| MementoError::from_read(e, source.to_path_buf()))?;
    for entry in entries {
        let entry = entry.map_err(|e| MementoError::from_read(e, source.to_path_buf()))?;
        let path = entry.path();
        if path.is_file() {
            let dest = target.join(entry.file_name());
            fs::copy(&path, &dest).map_err(|e| MementoError::from_io(e, dest.clone()))?;
        }
    }
    Ok(())
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// This ensures the target file is never left in a partially-written state.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> MementoResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| MementoError::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    // Keep the original extension in the temp name so `3.txt` and `3.enc`
    // never share a temp file
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let mut file =
        File::create(&temp_path).map_err(|e| MementoError::from_io(e, temp_path.clone()))?;

    file.write_all(data)
        .map_err(|e| MementoError::from_io(e, temp_path.clone()))?;

    // Sync to disk before rename
    file.sync_all()
        .map_err(|e| MementoError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|e| MementoError::AtomicWriteFailed {
        from: temp_path.clone(),
        to: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}
