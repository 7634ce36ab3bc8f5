//! In-process remote store
//!
//! Test double for the remote backend; the CLI never selects it. Availability
//! can be switched off to simulate an unreachable backend, and reads can be
//! corrupted to exercise verification failures.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{check_blob_size, content_digest, RemoteContent, RemoteStore};
use crate::error::{MementoError, MementoResult};
use crate::models::DocumentId;
use crate::vault::KeyMaterial;

#[derive(Debug)]
struct MemoryState {
    available: bool,
    corrupt_reads: bool,
    contents: Vec<RemoteContent>,
    keys: HashMap<DocumentId, KeyMaterial>,
}

/// Remote store kept in memory
#[derive(Debug)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                available: true,
                corrupt_reads: false,
                contents: Vec::new(),
                keys: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate the backend going down or coming back
    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    /// Flip a byte in every blob returned from now on
    pub fn set_corrupt_reads(&self, corrupt: bool) {
        self.state().corrupt_reads = corrupt;
    }

    /// Whether any stored blob contains `needle` verbatim
    pub fn contains_bytes(&self, needle: &[u8]) -> bool {
        if needle.is_empty() {
            return false;
        }
        self.state()
            .contents
            .iter()
            .any(|c| c.blob.windows(needle.len()).any(|w| w == needle))
    }

    fn ensure_available(state: &MemoryState) -> MementoResult<()> {
        if state.available {
            Ok(())
        } else {
            Err(MementoError::BackendUnavailable(
                "memory backend switched off".to_string(),
            ))
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn put_content(
        &self,
        id: DocumentId,
        blob: &[u8],
        timestamp: DateTime<Utc>,
    ) -> MementoResult<bool> {
        check_blob_size(blob)?;
        let mut state = self.state();
        Self::ensure_available(&state)?;

        let digest = content_digest(blob);
        if let Some(existing) = state
            .contents
            .iter_mut()
            .find(|c| c.document_id == id && c.digest == digest)
        {
            existing.timestamp = existing.timestamp.max(timestamp);
            return Ok(false);
        }

        state
            .contents
            .push(RemoteContent::new(id, blob.to_vec(), timestamp));
        Ok(true)
    }

    async fn get_latest_content(&self, id: DocumentId) -> MementoResult<Option<RemoteContent>> {
        let state = self.state();
        Self::ensure_available(&state)?;

        // Later records win ties
        let latest = state
            .contents
            .iter()
            .filter(|c| c.document_id == id)
            .fold(None::<&RemoteContent>, |best, c| match best {
                Some(b) if b.timestamp > c.timestamp => Some(b),
                _ => Some(c),
            })
            .cloned();

        Ok(latest.map(|mut content| {
            if state.corrupt_reads {
                if let Some(byte) = content.blob.last_mut() {
                    *byte ^= 0xFF;
                }
            }
            content
        }))
    }

    async fn put_key(&self, id: DocumentId, material: &KeyMaterial) -> MementoResult<()> {
        let mut state = self.state();
        Self::ensure_available(&state)?;
        state.keys.insert(id, material.clone());
        Ok(())
    }

    async fn get_key(&self, id: DocumentId) -> MementoResult<Option<KeyMaterial>> {
        let state = self.state();
        Self::ensure_available(&state)?;
        Ok(state.keys.get(&id).cloned())
    }

    async fn content_count(&self, id: DocumentId) -> MementoResult<usize> {
        let state = self.state();
        Self::ensure_available(&state)?;
        Ok(state
            .contents
            .iter()
            .filter(|c| c.document_id == id)
            .count())
    }

    async fn is_available(&self) -> bool {
        self.state().available
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
