//! Ring buffer of snapshots
//!
//! Every write stores the full text of a memento in the next slot of a
//! fixed-size ring. The ring size follows the content length: small notes keep
//! up to [`MAX_BUFFER_SIZE`] versions, large ones as few as
//! [`MIN_BUFFER_SIZE`].
//!
//! Write order is slot first, then `control.json`, then removal of slots that
//! fell outside a shrunken ring. Crashing at any point leaves the previous
//! latest snapshot readable.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::locks::DocumentLocks;
use super::persistence::DocumentPersistence;
use crate::config::Config;
use crate::crypto::{self, SymmetricKey};
use crate::error::{MementoError, MementoResult};
use crate::models::{
    ControlMetadata, DocumentId, DocumentSummary, HistoryEntry, Snapshot, MAX_BUFFER_SIZE,
    MIN_BUFFER_SIZE,
};
use crate::vault::{KeyMaterial, KeyRing, KeyVault};

/// Content length (bytes) at and below which a memento keeps the most versions
const SIZING_FLOOR: usize = 1024;

/// Total bytes of history a memento aims to keep
const SIZING_BUDGET: usize = 1024 * 1024;

/// Preview shown for encrypted mementos that are not unlocked
const LOCKED_PREVIEW: &str = "[Encrypted]";

/// Ring size for content of `content_len` bytes
///
/// Non-increasing in the length and always within
/// `[MIN_BUFFER_SIZE, MAX_BUFFER_SIZE]`.
pub fn buffer_size_for(content_len: usize) -> usize {
    (SIZING_BUDGET / content_len.max(SIZING_FLOOR)).clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
}

/// Local backend: one directory of snapshot slots per memento
#[derive(Debug)]
pub struct RingBufferStore {
    persistence: DocumentPersistence,
    vault: KeyVault,
    locks: DocumentLocks,
    keys: KeyRing,
}

impl RingBufferStore {
    pub fn new(config: Config) -> Self {
        Self {
            vault: KeyVault::new(config.clone()),
            persistence: DocumentPersistence::new(config),
            locks: DocumentLocks::new(),
            keys: KeyRing::new(),
        }
    }

    pub fn config(&self) -> &Config {
        self.persistence.config()
    }

    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    /// Create a memento whose first snapshot is `initial`
    pub fn create(&self, initial: &str) -> MementoResult<DocumentId> {
        let id = self.persistence.allocate_id()?;
        self.locks.with(id, || {
            let mut metadata = ControlMetadata::new(buffer_size_for(initial.len()));
            self.persistence
                .write_slot(id, 0, initial.as_bytes(), false)?;
            metadata.write_cursor = 1 % metadata.buffer_size;
            self.persistence.save_metadata(id, &metadata)
        })?;

        info!("Created memento {}", id);
        Ok(id)
    }

    /// Append a new version of a memento
    pub fn write(&self, id: DocumentId, content: &str) -> MementoResult<()> {
        self.locks.with(id, || self.write_locked(id, content))
    }

    fn write_locked(&self, id: DocumentId, content: &str) -> MementoResult<()> {
        let mut metadata = self.persistence.load_metadata(id)?;

        let (payload, encrypted) = if metadata.encryption_enabled {
            let key = self.key_for(id)?;
            (crypto::encrypt_text(content, &key)?, true)
        } else {
            (content.as_bytes().to_vec(), false)
        };

        let new_size = buffer_size_for(content.len());
        if new_size != metadata.buffer_size {
            debug!(
                "Resizing memento {} ring from {} to {} slots",
                id, metadata.buffer_size, new_size
            );
            metadata.write_cursor = metadata.write_cursor.min(new_size - 1);
            metadata.buffer_size = new_size;
        }

        let index = metadata.write_cursor;
        self.persistence.write_slot(id, index, &payload, encrypted)?;

        metadata.write_cursor = (index + 1) % metadata.buffer_size;
        metadata.last_modified = Utc::now();
        self.persistence.save_metadata(id, &metadata)?;

        self.discard_outside_ring(id, metadata.buffer_size)
    }

    /// Remove slot files whose index no longer fits the ring
    fn discard_outside_ring(&self, id: DocumentId, buffer_size: usize) -> MementoResult<()> {
        for index in self.persistence.slot_indices(id)? {
            if index >= buffer_size {
                self.persistence.remove_slot(id, index)?;
            }
        }
        Ok(())
    }

    /// Latest content of a memento
    pub fn read_latest(&self, id: DocumentId) -> MementoResult<String> {
        self.read_snapshot(id, 0)?
            .ok_or_else(|| MementoError::NotFound { id })
    }

    /// Content at `offset` from the latest (0 = latest, -1 = previous, ...)
    ///
    /// `None` when that slot was never written. Offsets wrap around the ring.
    pub fn read_snapshot(&self, id: DocumentId, offset: i64) -> MementoResult<Option<String>> {
        self.locks.with(id, || self.read_snapshot_locked(id, offset))
    }

    fn read_snapshot_locked(&self, id: DocumentId, offset: i64) -> MementoResult<Option<String>> {
        let metadata = self.persistence.load_metadata(id)?;
        let index = metadata.index_at_offset(offset);
        match self.persistence.read_slot(id, index)? {
            Some(snapshot) => self.decode(id, &snapshot).map(Some),
            None if offset == 0 => Err(MementoError::SlotNotFound { id, index }),
            None => Ok(None),
        }
    }

    /// Every retained version, latest first
    pub fn history(&self, id: DocumentId) -> MementoResult<Vec<HistoryEntry>> {
        self.locks.with(id, || {
            let metadata = self.persistence.load_metadata(id)?;
            let mut entries = Vec::new();

            for step in 0..metadata.buffer_size as i64 {
                let offset = -step;
                let index = metadata.index_at_offset(offset);
                let Some(snapshot) = self.persistence.read_slot(id, index)? else {
                    continue;
                };
                entries.push(HistoryEntry {
                    offset,
                    index,
                    timestamp: snapshot.timestamp,
                    encrypted: snapshot.encrypted,
                    content: self.decode(id, &snapshot)?,
                });
            }

            Ok(entries)
        })
    }

    /// Ids of every memento, ascending
    pub fn list(&self) -> MementoResult<Vec<DocumentId>> {
        self.persistence.list_ids()
    }

    pub fn load_metadata(&self, id: DocumentId) -> MementoResult<ControlMetadata> {
        self.persistence.load_metadata(id)
    }

    /// Slot indices currently holding a snapshot
    pub fn retained_slots(&self, id: DocumentId) -> MementoResult<Vec<usize>> {
        self.persistence.slot_indices(id)
    }

    /// Slots whose file extension disagrees with what their bytes look like
    ///
    /// A `.txt` slot holding what looks like ciphertext, or an `.enc` slot
    /// holding readable text, points at a file renamed or copied by hand.
    pub fn mislabeled_slots(&self, id: DocumentId) -> MementoResult<Vec<usize>> {
        self.locks.with(id, || {
            let mut mislabeled = Vec::new();
            for index in self.persistence.slot_indices(id)? {
                let Some(snapshot) = self.persistence.read_slot(id, index)? else {
                    continue;
                };
                if snapshot.encrypted != crypto::looks_encrypted(&snapshot.payload) {
                    warn!(
                        "Memento {} slot {} is stored as {} but does not look it",
                        id,
                        index,
                        if snapshot.encrypted { "ciphertext" } else { "plaintext" }
                    );
                    mislabeled.push(index);
                }
            }
            Ok(mislabeled)
        })
    }

    /// Preview of every memento, most recently modified first
    ///
    /// Encrypted mementos that are not unlocked show a placeholder instead of
    /// their first line.
    pub fn summaries(&self) -> MementoResult<Vec<DocumentSummary>> {
        let mut summaries = Vec::new();

        for id in self.list()? {
            let metadata = match self.persistence.load_metadata(id) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping memento {}: {}", id, e);
                    continue;
                }
            };

            let first_line = match self.read_latest(id) {
                Ok(content) => DocumentSummary::preview(&content),
                Err(MementoError::Locked { .. }) => LOCKED_PREVIEW.to_string(),
                Err(e) => {
                    warn!("Could not read memento {}: {}", id, e);
                    DocumentSummary::preview("")
                }
            };

            summaries.push(DocumentSummary {
                id,
                first_line,
                last_modified: metadata.last_modified,
                encrypted: metadata.encryption_enabled,
                migrated: metadata.is_migrated(),
            });
        }

        summaries.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(summaries)
    }

    /// Turn on encryption for future writes
    ///
    /// Existing plaintext slots stay as they are until
    /// [`RingBufferStore::seal_plaintext_slots`] runs. The memento is left
    /// unlocked for this session.
    pub fn enable_encryption(&self, id: DocumentId, passphrase: &str) -> MementoResult<KeyMaterial> {
        self.locks.with(id, || {
            let mut metadata = self.persistence.load_metadata(id)?;
            if metadata.encryption_enabled {
                return Err(MementoError::EncryptionAlreadyEnabled { id });
            }

            let (material, key) = self.vault.create_key_material(passphrase)?;
            self.vault.save(id, &material)?;

            metadata.encryption_enabled = true;
            metadata.key_reference = Some(material.key_id);
            self.persistence.save_metadata(id, &metadata)?;

            self.keys.insert(id, key);
            info!("Enabled encryption for memento {}", id);
            Ok(material)
        })
    }

    /// Key material of an encrypted memento
    pub fn key_material(&self, id: DocumentId) -> MementoResult<KeyMaterial> {
        let metadata = self.persistence.load_metadata(id)?;
        if !metadata.encryption_enabled {
            return Err(MementoError::EncryptionNotEnabled { id });
        }
        let material = self
            .vault
            .load(id)?
            .ok_or_else(|| MementoError::CorruptMetadata {
                path: self.config().key_path(id),
                details: "encryption is enabled but the key file is missing".to_string(),
            })?;

        if metadata.key_reference != Some(material.key_id) {
            return Err(MementoError::CorruptMetadata {
                path: self.config().key_path(id),
                details: format!(
                    "key file {} does not match the control file reference",
                    material.key_id
                ),
            });
        }
        Ok(material)
    }

    /// Derive and cache the content key of an encrypted memento
    pub fn unlock(&self, id: DocumentId, passphrase: &str) -> MementoResult<()> {
        let material = self.key_material(id)?;
        let key = self.vault.content_key(&material, passphrase)?;
        self.keys.insert(id, key);
        debug!("Unlocked memento {}", id);
        Ok(())
    }

    /// Forget the cached content key of a memento
    pub fn lock(&self, id: DocumentId) {
        self.keys.remove(id);
    }

    pub fn is_unlocked(&self, id: DocumentId) -> bool {
        self.keys.contains(id)
    }

    /// Cached content key, or `Locked`
    pub(crate) fn key_for(&self, id: DocumentId) -> MementoResult<SymmetricKey> {
        self.keys.get(id).ok_or(MementoError::Locked { id })
    }

    /// Re-write every plaintext slot of an encrypted memento as ciphertext
    ///
    /// Returns how many slots were sealed.
    pub fn seal_plaintext_slots(&self, id: DocumentId) -> MementoResult<usize> {
        self.locks.with(id, || self.seal_plaintext_slots_locked(id))
    }

    fn seal_plaintext_slots_locked(&self, id: DocumentId) -> MementoResult<usize> {
        let metadata = self.persistence.load_metadata(id)?;
        if !metadata.encryption_enabled {
            return Err(MementoError::EncryptionNotEnabled { id });
        }
        let key = self.key_for(id)?;

        let mut sealed = 0;
        for index in self.persistence.slot_indices(id)? {
            let Some(snapshot) = self.persistence.read_slot(id, index)? else {
                continue;
            };
            if snapshot.encrypted {
                continue;
            }
            let blob = crypto::encrypt(&snapshot.payload, &key)?;
            self.persistence.write_slot(id, index, &blob, true)?;
            sealed += 1;
        }

        if sealed > 0 {
            debug!("Sealed {} plaintext slots of memento {}", sealed, id);
        }
        Ok(sealed)
    }

    /// Finish a migration locally
    ///
    /// Copies the memento directory to `backups/`, seals any remaining
    /// plaintext slots and records `migrated_at`. Returns the backup path.
    ///
    /// `verified_content` is the text that was confirmed remotely. If the
    /// latest local version no longer matches it, nothing is archived and
    /// `MigrationVerificationFailure` is returned.
    pub fn archive(
        &self,
        id: DocumentId,
        migrated_at: DateTime<Utc>,
        verified_content: &str,
    ) -> MementoResult<PathBuf> {
        self.locks.with(id, || {
            let latest = self.read_snapshot_locked(id, 0)?.unwrap_or_default();
            if latest != verified_content {
                return Err(MementoError::MigrationVerificationFailure {
                    id,
                    details: "memento changed after its content was verified".to_string(),
                });
            }

            let label = format!("{}_pre_migration", migrated_at.timestamp());
            let backup = self.persistence.backup(id, &label)?;

            self.seal_plaintext_slots_locked(id)?;

            let mut metadata = self.persistence.load_metadata(id)?;
            metadata.migrated_at = Some(migrated_at);
            self.persistence.save_metadata(id, &metadata)?;

            info!("Archived memento {} (backup at {:?})", id, backup);
            Ok(backup)
        })
    }

    fn decode(&self, id: DocumentId, snapshot: &Snapshot) -> MementoResult<String> {
        if snapshot.encrypted {
            let key = self.key_for(id)?;
            return crypto::decrypt_text(&snapshot.payload, &key);
        }

        String::from_utf8(snapshot.payload.clone()).map_err(|e| MementoError::InvalidText {
            encoding: "utf-8".to_string(),
            details: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn test_store(temp_dir: &TempDir) -> RingBufferStore {
        let mut config = Config::with_data_dir(temp_dir.path());
        config.kdf_iterations = 1000;
        RingBufferStore::new(config)
    }

    #[test]
    fn test_buffer_size_bounds() {
        assert_eq!(buffer_size_for(0), MAX_BUFFER_SIZE);
        assert_eq!(buffer_size_for(5), MAX_BUFFER_SIZE);
        assert_eq!(buffer_size_for(1024), MAX_BUFFER_SIZE);
        assert_eq!(buffer_size_for(20_971), MAX_BUFFER_SIZE);
        assert_eq!(buffer_size_for(20_972), 49);
        assert_eq!(buffer_size_for(104_858), 9);
        assert_eq!(buffer_size_for(400_000), MIN_BUFFER_SIZE);
        assert_eq!(buffer_size_for(usize::MAX), MIN_BUFFER_SIZE);
    }

    #[test]
    fn test_buffer_size_is_non_increasing() {
        let mut previous = buffer_size_for(0);
        for len in (0..600_000).step_by(997) {
            let size = buffer_size_for(len);
            assert!(size <= previous, "size grew at length {}", len);
            assert!((MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&size));
            previous = size;
        }
    }

    #[test]
    fn test_create_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        let id = store.create("hello").unwrap();
        assert_eq!(id, DocumentId(0));
        assert_eq!(store.read_latest(id).unwrap(), "hello");

        let metadata = store.load_metadata(id).unwrap();
        assert_eq!(metadata.buffer_size, MAX_BUFFER_SIZE);
        assert_eq!(metadata.write_cursor, 1);
        assert!(!metadata.encryption_enabled);
    }

    #[test]
    fn test_ids_are_sequential() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        let a = store.create("a").unwrap();
        let b = store.create("b").unwrap();
        assert_eq!(b, a.next());
        assert_eq!(store.list().unwrap(), vec![a, b]);
    }

    #[test]
    fn test_write_then_read_latest() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("").unwrap();

        store.write(id, "first").unwrap();
        store.write(id, "second").unwrap();

        assert_eq!(store.read_latest(id).unwrap(), "second");
        assert_eq!(store.read_snapshot(id, -1).unwrap().unwrap(), "first");
        assert_eq!(store.read_snapshot(id, -2).unwrap().unwrap(), "");
        assert_eq!(store.read_snapshot(id, -3).unwrap(), None);
    }

    #[test]
    fn test_missing_document() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        assert!(matches!(
            store.read_latest(DocumentId(7)),
            Err(MementoError::NotFound { .. })
        ));
        assert!(matches!(
            store.write(DocumentId(7), "x"),
            Err(MementoError::NotFound { .. })
        ));
    }

    #[test]
    fn test_ring_wraps_and_evicts_oldest() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("v0").unwrap();

        for i in 1..=60 {
            store.write(id, &format!("v{}", i)).unwrap();
        }

        let metadata = store.load_metadata(id).unwrap();
        assert_eq!(metadata.buffer_size, MAX_BUFFER_SIZE);
        assert_eq!(metadata.write_cursor, 61 % MAX_BUFFER_SIZE);

        let history = store.history(id).unwrap();
        assert_eq!(history.len(), MAX_BUFFER_SIZE);
        assert_eq!(history[0].content, "v60");
        assert_eq!(history[0].offset, 0);
        assert_eq!(history.last().unwrap().content, "v11");

        // Offsets wrap around the ring
        assert_eq!(
            store.read_snapshot(id, -(MAX_BUFFER_SIZE as i64)).unwrap().unwrap(),
            "v60"
        );
    }

    #[test]
    fn test_growing_content_shrinks_ring() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("hello").unwrap();
        assert_eq!(store.load_metadata(id).unwrap().buffer_size, 50);

        let chunk = "x".repeat(45 * 50);
        let mut content = "hello".to_string();
        while content.len() <= 20_971 {
            content.push_str(&chunk);
            store.write(id, &content).unwrap();
        }

        let metadata = store.load_metadata(id).unwrap();
        assert!(metadata.buffer_size < 50);
        assert_eq!(metadata.buffer_size, buffer_size_for(content.len()));
        assert_eq!(store.read_latest(id).unwrap(), content);

        // Push far past the minimum size
        let big = "y".repeat(500_000);
        store.write(id, &big).unwrap();
        store.write(id, &big).unwrap();

        let metadata = store.load_metadata(id).unwrap();
        assert_eq!(metadata.buffer_size, MIN_BUFFER_SIZE);
        assert!(metadata.write_cursor < MIN_BUFFER_SIZE);

        let retained = store.retained_slots(id).unwrap();
        assert!(retained.len() <= MIN_BUFFER_SIZE);
        assert!(retained.iter().all(|index| *index < MIN_BUFFER_SIZE));
        assert_eq!(store.read_latest(id).unwrap(), big);
    }

    #[test]
    fn test_retained_slots_never_exceed_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("start").unwrap();

        let sizes = [10, 300_000, 50, 120_000, 5, 450_000, 1];
        for (round, size) in sizes.iter().cycle().take(30).enumerate() {
            let content = format!("{}{}", round, "z".repeat(*size));
            store.write(id, &content).unwrap();

            let metadata = store.load_metadata(id).unwrap();
            let retained = store.retained_slots(id).unwrap();
            assert!(retained.len() <= metadata.buffer_size);
            assert!(metadata.write_cursor < metadata.buffer_size);
            assert_eq!(store.read_latest(id).unwrap(), content);
        }
    }

    #[test]
    fn test_summaries_sorted_with_preview() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);

        let empty = store.create("").unwrap();
        let titled = store.create("Shopping\nmilk").unwrap();
        let blank_first = store.create("\nbody").unwrap();
        store.write(titled, "Groceries\nmilk\neggs").unwrap();

        let summaries = store.summaries().unwrap();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].id, titled);
        assert_eq!(summaries[0].first_line, "Groceries");

        let by_id = |id| summaries.iter().find(|s| s.id == id).unwrap();
        assert_eq!(by_id(empty).first_line, "[Empty memento]");
        assert_eq!(by_id(blank_first).first_line, "[Untitled]");
    }

    #[test]
    fn test_encrypted_write_and_unlock() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("").unwrap();

        store.enable_encryption(id, "correct-horse").unwrap();
        store.write(id, "secret note").unwrap();
        assert_eq!(store.read_latest(id).unwrap(), "secret note");

        // Stored bytes are not the plaintext
        let index = store.load_metadata(id).unwrap().latest_index();
        let raw = fs::read(temp_dir.path().join("0").join(format!("{}.enc", index))).unwrap();
        assert!(!raw.windows(6).any(|w| w == b"secret"));

        // A fresh store over the same directory starts locked
        let reopened = test_store(&temp_dir);
        assert!(matches!(
            reopened.read_latest(id),
            Err(MementoError::Locked { .. })
        ));
        assert!(reopened
            .unlock(id, "wrong-pass")
            .unwrap_err()
            .is_authentication_failure());

        reopened.unlock(id, "correct-horse").unwrap();
        assert_eq!(reopened.read_latest(id).unwrap(), "secret note");

        reopened.lock(id);
        assert!(!reopened.is_unlocked(id));
    }

    #[test]
    fn test_enable_encryption_twice_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("x").unwrap();

        store.enable_encryption(id, "pass").unwrap();
        assert!(matches!(
            store.enable_encryption(id, "pass"),
            Err(MementoError::EncryptionAlreadyEnabled { .. })
        ));
    }

    #[test]
    fn test_unlock_plaintext_document_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("x").unwrap();

        assert!(matches!(
            store.unlock(id, "pass"),
            Err(MementoError::EncryptionNotEnabled { .. })
        ));
    }

    #[test]
    fn test_locked_summary_hides_content() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("").unwrap();
        store.enable_encryption(id, "pass").unwrap();
        store.write(id, "Diary\ndear diary").unwrap();

        let reopened = test_store(&temp_dir);
        let summaries = reopened.summaries().unwrap();
        assert_eq!(summaries[0].first_line, LOCKED_PREVIEW);
        assert!(summaries[0].encrypted);
    }

    #[test]
    fn test_seal_plaintext_slots() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("plain one").unwrap();
        store.write(id, "plain two").unwrap();

        store.enable_encryption(id, "pass").unwrap();
        store.write(id, "sealed three").unwrap();

        assert_eq!(store.seal_plaintext_slots(id).unwrap(), 2);
        assert_eq!(store.seal_plaintext_slots(id).unwrap(), 0);

        let history = store.history(id).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|entry| entry.encrypted));
        assert_eq!(history[2].content, "plain one");

        let dir = temp_dir.path().join("0");
        assert!(!dir.join("0.txt").exists());
        assert!(dir.join("0.enc").exists());
    }

    #[test]
    fn test_archive_backs_up_and_marks_migrated() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("keep me safe").unwrap();
        store.enable_encryption(id, "pass").unwrap();

        let when = Utc::now();
        let backup = store.archive(id, when, "keep me safe").unwrap();

        assert!(backup.starts_with(temp_dir.path().join("backups")));
        assert_eq!(fs::read(backup.join("0.txt")).unwrap(), b"keep me safe");

        let metadata = store.load_metadata(id).unwrap();
        assert_eq!(metadata.migrated_at, Some(when));
        assert!(!temp_dir.path().join("0").join("0.txt").exists());
        assert_eq!(store.read_latest(id).unwrap(), "keep me safe");
    }

    #[test]
    fn test_archive_refuses_content_changed_since_verification() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("verified").unwrap();
        store.enable_encryption(id, "pass").unwrap();
        store.write(id, "edited later").unwrap();

        assert!(matches!(
            store.archive(id, Utc::now(), "verified"),
            Err(MementoError::MigrationVerificationFailure { .. })
        ));

        assert!(!store.load_metadata(id).unwrap().is_migrated());
        assert!(!temp_dir.path().join("backups").exists());
        assert!(temp_dir.path().join("0").join("0.txt").exists());
    }

    #[test]
    fn test_mislabeled_slots() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("a readable first version of the note").unwrap();
        store.enable_encryption(id, "pass").unwrap();
        store.write(id, "a sealed second version of the note").unwrap();
        store.write(id, "a sealed third version of the note").unwrap();
        assert!(store.mislabeled_slots(id).unwrap().is_empty());

        let dir = temp_dir.path().join("0");
        // Ciphertext stored under a plaintext name
        fs::rename(dir.join("1.enc"), dir.join("1.txt")).unwrap();
        // Readable text stored under a ciphertext name
        fs::rename(dir.join("0.txt"), dir.join("0.enc")).unwrap();

        assert_eq!(store.mislabeled_slots(id).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_corrupt_control_file_is_not_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let store = test_store(&temp_dir);
        let id = store.create("data").unwrap();

        let control = temp_dir.path().join("0").join("control.json");
        fs::write(&control, b"garbage").unwrap();

        assert!(matches!(
            store.write(id, "more"),
            Err(MementoError::CorruptMetadata { .. })
        ));
        assert_eq!(fs::read(&control).unwrap(), b"garbage");
    }

    #[test]
    fn test_concurrent_writes_keep_metadata_consistent() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(test_store(&temp_dir));
        let id = store.create("").unwrap();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..10 {
                        store.write(id, &format!("w{}-{}", worker, i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let metadata = store.load_metadata(id).unwrap();
        assert_eq!(metadata.write_cursor, 41 % MAX_BUFFER_SIZE);
        assert_eq!(store.history(id).unwrap().len(), 41);
    }
}
