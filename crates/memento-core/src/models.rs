//! Data models for Memento
//!
//! Defines the core data structures: document ids, the per-document control
//! metadata, snapshots and the summaries shown by document pickers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Smallest ring buffer a document can have
pub const MIN_BUFFER_SIZE: usize = 3;

/// Largest ring buffer a document can have
pub const MAX_BUFFER_SIZE: usize = 50;

/// Integer identifier of a memento
///
/// Ids are allocated sequentially starting at 0 and double as the name of the
/// document's directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl DocumentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The id that follows this one
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(Self)
    }
}

impl From<u64> for DocumentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Per-document descriptor stored in `control.json`
///
/// `write_cursor` is the slot the next snapshot goes to, so the most recent
/// snapshot sits one slot behind it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlMetadata {
    /// Number of slots in the ring buffer
    pub buffer_size: usize,
    /// Slot index the next write lands in
    pub write_cursor: usize,
    /// Whether new snapshots are encrypted
    #[serde(default)]
    pub encryption_enabled: bool,
    /// Identifier of the active key material
    #[serde(default)]
    pub key_reference: Option<Uuid>,
    /// When the document was created
    pub created_at: DateTime<Utc>,
    /// When the last snapshot was written
    pub last_modified: DateTime<Utc>,
    /// Set once the document has been promoted to remote storage
    #[serde(default)]
    pub migrated_at: Option<DateTime<Utc>>,
}

impl ControlMetadata {
    /// Metadata for a fresh document with the given buffer size
    pub fn new(buffer_size: usize) -> Self {
        let now = Utc::now();
        Self {
            buffer_size: buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE),
            write_cursor: 0,
            encryption_enabled: false,
            key_reference: None,
            created_at: now,
            last_modified: now,
            migrated_at: None,
        }
    }

    /// Slot index holding the most recent snapshot
    pub fn latest_index(&self) -> usize {
        (self.write_cursor + self.buffer_size - 1) % self.buffer_size
    }

    /// Slot index at `offset` from the latest (0 = latest, -1 = previous)
    pub fn index_at_offset(&self, offset: i64) -> usize {
        let size = self.buffer_size as i64;
        (self.latest_index() as i64 + offset).rem_euclid(size) as usize
    }

    /// Check the invariants a loaded control file must satisfy
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(format!(
                "buffer_size {} outside [{}, {}]",
                self.buffer_size, MIN_BUFFER_SIZE, MAX_BUFFER_SIZE
            ));
        }
        if self.write_cursor >= self.buffer_size {
            return Err(format!(
                "write_cursor {} not below buffer_size {}",
                self.write_cursor, self.buffer_size
            ));
        }
        if self.encryption_enabled && self.key_reference.is_none() {
            return Err("encryption enabled without a key reference".to_string());
        }
        Ok(())
    }

    /// Whether the document has completed migration
    pub fn is_migrated(&self) -> bool {
        self.migrated_at.is_some()
    }
}

/// One ring buffer slot
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Slot index
    pub index: usize,
    /// When the slot was last written
    pub timestamp: DateTime<Utc>,
    /// Raw slot bytes (plaintext or `nonce || ciphertext`)
    pub payload: Vec<u8>,
    /// Whether `payload` is ciphertext
    pub encrypted: bool,
}

/// A decoded entry of a document's version history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Offset from the latest snapshot (0, -1, -2, ...)
    pub offset: i64,
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub encrypted: bool,
    pub content: String,
}

/// Information about a memento for display in a picker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub first_line: String,
    pub last_modified: DateTime<Utc>,
    pub encrypted: bool,
    pub migrated: bool,
}

impl DocumentSummary {
    /// Preview line for a document's latest content
    pub fn preview(content: &str) -> String {
        if content.is_empty() {
            return "[Empty memento]".to_string();
        }
        let first_line = content.lines().next().unwrap_or("").trim();
        if first_line.is_empty() {
            "[Untitled]".to_string()
        } else {
            first_line.to_string()
        }
    }
}

/// Migration progress of a single document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationState {
    /// Exists only in the local backend
    LocalOnly,
    /// Key material is being created
    EncryptionPending,
    /// Encrypted content is being sent to the remote backend
    Uploading,
    /// Remote content was read back and decrypted successfully
    Verified,
    /// Local plaintext archived, migration complete
    LocalArchived,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationState::LocalOnly => "local-only",
            MigrationState::EncryptionPending => "encryption-pending",
            MigrationState::Uploading => "uploading",
            MigrationState::Verified => "verified",
            MigrationState::LocalArchived => "local-archived",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_parse_and_display() {
        let id: DocumentId = "#42".parse().unwrap();
        assert_eq!(id, DocumentId(42));
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.next(), DocumentId(43));
        assert!("abc".parse::<DocumentId>().is_err());
    }

    #[test]
    fn test_new_metadata_clamps_buffer_size() {
        assert_eq!(ControlMetadata::new(1).buffer_size, MIN_BUFFER_SIZE);
        assert_eq!(ControlMetadata::new(500).buffer_size, MAX_BUFFER_SIZE);
        assert_eq!(ControlMetadata::new(10).buffer_size, 10);
    }

    #[test]
    fn test_latest_index_wraps() {
        let mut meta = ControlMetadata::new(5);
        meta.write_cursor = 0;
        assert_eq!(meta.latest_index(), 4);
        meta.write_cursor = 3;
        assert_eq!(meta.latest_index(), 2);
    }

    #[test]
    fn test_index_at_offset() {
        let mut meta = ControlMetadata::new(5);
        meta.write_cursor = 1;
        assert_eq!(meta.index_at_offset(0), 0);
        assert_eq!(meta.index_at_offset(-1), 4);
        assert_eq!(meta.index_at_offset(-6), 4);
        assert_eq!(meta.index_at_offset(1), 1);
    }

    #[test]
    fn test_validate_rejects_bad_cursor() {
        let mut meta = ControlMetadata::new(5);
        assert!(meta.validate().is_ok());

        meta.write_cursor = 5;
        assert!(meta.validate().is_err());

        meta.write_cursor = 0;
        meta.buffer_size = 2;
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_validate_requires_key_reference() {
        let mut meta = ControlMetadata::new(5);
        meta.encryption_enabled = true;
        assert!(meta.validate().is_err());

        meta.key_reference = Some(Uuid::new_v4());
        assert!(meta.validate().is_ok());
    }

    #[test]
    fn test_metadata_serialization() {
        let meta = ControlMetadata::new(12);
        let json = serde_json::to_string_pretty(&meta).unwrap();
        assert!(json.contains("buffer_size"));
        assert!(json.contains("write_cursor"));

        let parsed: ControlMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_preview() {
        assert_eq!(DocumentSummary::preview(""), "[Empty memento]");
        assert_eq!(DocumentSummary::preview("\n\nbody"), "[Untitled]");
        assert_eq!(DocumentSummary::preview("  Title  \nbody"), "Title");
    }
}
