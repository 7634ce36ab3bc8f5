//! Remote storage
//!
//! A remote backend keeps encrypted snapshots and key material for mementos
//! that were migrated off the local disk. Records are append-only; the latest
//! content of a memento is the record with the newest timestamp, and uploading
//! a blob that is already stored only refreshes that record's timestamp.
//!
//! Only ciphertext ever reaches a remote store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::crypto::MAX_ENCRYPTED_SIZE;
use crate::error::{MementoError, MementoResult};
use crate::models::DocumentId;
use crate::vault::KeyMaterial;

pub mod memory;
pub mod mongo;

pub use memory::MemoryRemoteStore;
pub use mongo::{MongoRemoteStore, RemoteConnection};

/// Record type of an encrypted snapshot
pub const CONTENT_TYPE: &str = "content";

/// Record type of a memento's key material
pub const KEY_TYPE: &str = "encryption_key";

/// An encrypted snapshot held by a remote backend
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteContent {
    pub document_id: DocumentId,
    /// `nonce || ciphertext`, as produced by `crypto::encrypt`
    pub blob: Vec<u8>,
    /// Hex SHA-256 of `blob`
    pub digest: String,
    pub timestamp: DateTime<Utc>,
}

impl RemoteContent {
    pub fn new(document_id: DocumentId, blob: Vec<u8>, timestamp: DateTime<Utc>) -> Self {
        Self {
            document_id,
            digest: content_digest(&blob),
            blob,
            timestamp,
        }
    }
}

/// Hex SHA-256 digest used to deduplicate uploads
pub fn content_digest(blob: &[u8]) -> String {
    hex::encode(Sha256::digest(blob))
}

/// Reject blobs the remote backend would refuse
pub(crate) fn check_blob_size(blob: &[u8]) -> MementoResult<()> {
    if blob.len() > MAX_ENCRYPTED_SIZE {
        return Err(MementoError::SizeLimitExceeded {
            stage: "Encrypted",
            size: blob.len(),
            limit: MAX_ENCRYPTED_SIZE,
        });
    }
    Ok(())
}

/// Remote backend for migrated mementos
///
/// Fallible methods report `BackendUnavailable` when the backend cannot be
/// reached; callers fall back to local-only operation.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store an encrypted snapshot taken at `timestamp`
    ///
    /// Returns `true` if a new record was created, `false` if an identical
    /// blob was already stored (its timestamp is refreshed).
    async fn put_content(
        &self,
        id: DocumentId,
        blob: &[u8],
        timestamp: DateTime<Utc>,
    ) -> MementoResult<bool>;

    /// Newest encrypted snapshot of a memento
    async fn get_latest_content(&self, id: DocumentId) -> MementoResult<Option<RemoteContent>>;

    /// Store (or replace) the key material of a memento
    async fn put_key(&self, id: DocumentId, material: &KeyMaterial) -> MementoResult<()>;

    /// Key material of a memento
    async fn get_key(&self, id: DocumentId) -> MementoResult<Option<KeyMaterial>>;

    /// Number of content records stored for a memento
    async fn content_count(&self, id: DocumentId) -> MementoResult<usize>;

    /// Whether the backend answers right now
    async fn is_available(&self) -> bool;

    /// Short name for logs and status output
    fn name(&self) -> &'static str;
}
