//! Per-document locking
//!
//! Serializes the read-modify-write of a document's control file and slots.
//! Different documents never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::models::DocumentId;

/// Registry of one mutex per document
#[derive(Debug, Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<DocumentId, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock of `id`
    ///
    /// Not reentrant: `f` must not take the same document's lock again.
    pub fn with<T>(&self, id: DocumentId, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(id);
        // A panic in another writer leaves no half-state behind thanks to
        // atomic writes, so a poisoned lock is still usable
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    fn lock_for(&self, id: DocumentId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_same_document_is_serialized() {
        let locks = Arc::new(DocumentLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..50 {
                        locks.with(DocumentId(1), || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_documents_do_not_block() {
        let locks = DocumentLocks::new();
        let value = locks.with(DocumentId(1), || locks.with(DocumentId(2), || 7));
        assert_eq!(value, 7);
    }
}
