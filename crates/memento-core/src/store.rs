//! Unified storage interface
//!
//! The `MementoStore` is what editors and the CLI talk to. It coordinates:
//! - The local ring buffer store (source of truth for every memento)
//! - An optional remote store that migrated mementos are promoted to
//!
//! ## Usage
//!
//! ```ignore
//! let store = MementoStore::open()?;
//!
//! let id = store.create_document("Shopping\nmilk")?;
//! store.write_snapshot(id, "Shopping\nmilk\neggs")?;
//!
//! let latest = store.read_latest(id)?;
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{MementoError, MementoResult};
use crate::import::decode_text;
use crate::migration::{MigrationCoordinator, MigrationOutcome, MigrationReport, PassphraseProvider};
use crate::models::{ControlMetadata, DocumentId, DocumentSummary, HistoryEntry};
use crate::remote::{MongoRemoteStore, RemoteStore};
use crate::storage::RingBufferStore;
use crate::vault::KeyMaterial;

/// Reachability of the configured remote backend
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RemoteStatus {
    pub backend: Option<&'static str>,
    pub available: bool,
}

/// Main store interface
pub struct MementoStore {
    local: Arc<RingBufferStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    config: Config,
}

impl MementoStore {
    /// Open the store with the configuration from disk and environment
    pub fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config)
    }

    /// Open the store with a specific configuration
    ///
    /// Uses MongoDB as the remote backend when `remote_uri` is set; otherwise
    /// the store is local-only.
    pub fn open_with_config(config: Config) -> Result<Self> {
        config
            .ensure_data_dir()
            .context("Failed to create data directory")?;

        let remote: Option<Arc<dyn RemoteStore>> = if config.remote_enabled() {
            let mongo = MongoRemoteStore::from_config(&config)
                .context("Failed to configure remote store")?;
            Some(Arc::new(mongo))
        } else {
            debug!("No remote URI configured, running local-only");
            None
        };

        Ok(Self::with_remote(config, remote))
    }

    /// Build a store around an explicit remote backend (or none)
    pub fn with_remote(config: Config, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self {
            local: Arc::new(RingBufferStore::new(config.clone())),
            remote,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The local backend
    pub fn local(&self) -> &RingBufferStore {
        &self.local
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.remote.as_ref()
    }

    // ==================== Documents ====================

    pub fn create_document(&self, initial_content: &str) -> MementoResult<DocumentId> {
        self.local.create(initial_content)
    }

    pub fn load_document(&self, id: DocumentId) -> MementoResult<ControlMetadata> {
        self.local.load_metadata(id)
    }

    pub fn write_snapshot(&self, id: DocumentId, content: &str) -> MementoResult<()> {
        self.local.write(id, content)
    }

    pub fn read_latest(&self, id: DocumentId) -> MementoResult<String> {
        self.local.read_latest(id)
    }

    /// Content at `offset` from the latest version (0, -1, -2, ...)
    pub fn read_snapshot(&self, id: DocumentId, offset: i64) -> MementoResult<Option<String>> {
        self.local.read_snapshot(id, offset)
    }

    pub fn history(&self, id: DocumentId) -> MementoResult<Vec<HistoryEntry>> {
        self.local.history(id)
    }

    /// Slot indices whose extension disagrees with their content
    pub fn mislabeled_slots(&self, id: DocumentId) -> MementoResult<Vec<usize>> {
        self.local.mislabeled_slots(id)
    }

    /// Ids of all local mementos; never triggers a migration
    pub fn list_documents(&self) -> MementoResult<Vec<DocumentId>> {
        self.local.list()
    }

    pub fn document_summaries(&self) -> MementoResult<Vec<DocumentSummary>> {
        self.local.summaries()
    }

    /// Decode external text and store it as a new memento
    ///
    /// With a passphrase the memento is encrypted before the text is written,
    /// so the imported text never lands on disk in plaintext.
    pub fn import_external_text(
        &self,
        raw: &[u8],
        detected_encoding: &str,
        passphrase: Option<&str>,
    ) -> MementoResult<DocumentId> {
        let text = decode_text(raw, detected_encoding)?;

        match passphrase {
            Some(passphrase) => {
                let id = self.local.create("")?;
                self.local.enable_encryption(id, passphrase)?;
                self.local.write(id, &text)?;
                Ok(id)
            }
            None => self.local.create(&text),
        }
    }

    // ==================== Encryption ====================

    pub fn enable_encryption(&self, id: DocumentId, passphrase: &str) -> MementoResult<KeyMaterial> {
        self.local.enable_encryption(id, passphrase)
    }

    /// Re-write older plaintext versions of an encrypted memento
    pub fn seal_plaintext_slots(&self, id: DocumentId) -> MementoResult<usize> {
        self.local.seal_plaintext_slots(id)
    }

    pub fn unlock(&self, id: DocumentId, passphrase: &str) -> MementoResult<()> {
        self.local.unlock(id, passphrase)
    }

    pub fn lock(&self, id: DocumentId) {
        self.local.lock(id)
    }

    /// Check a passphrase against a memento's key material without unlocking it
    pub fn verify_passphrase(&self, id: DocumentId, passphrase: &str) -> MementoResult<bool> {
        let material = self.local.key_material(id)?;
        Ok(self.local.vault().verify_passphrase(&material, passphrase))
    }

    // ==================== Migration ====================

    fn coordinator(&self) -> MementoResult<MigrationCoordinator> {
        let remote = self.remote.clone().ok_or_else(|| {
            MementoError::BackendUnavailable("no remote backend configured".to_string())
        })?;
        Ok(MigrationCoordinator::new(self.local.clone(), remote))
    }

    pub fn scan_for_migration_candidates(&self) -> MementoResult<Vec<DocumentId>> {
        MigrationCoordinator::scan(&self.local)
    }

    pub async fn migrate_document(
        &self,
        id: DocumentId,
        passphrases: &dyn PassphraseProvider,
    ) -> MementoResult<MigrationOutcome> {
        self.coordinator()?.migrate_document(id, passphrases).await
    }

    /// Migrate every candidate; local-only stores report the remote as unavailable
    pub async fn migrate_all(
        &self,
        passphrases: &dyn PassphraseProvider,
    ) -> MementoResult<MigrationReport> {
        match self.coordinator() {
            Ok(coordinator) => coordinator.migrate_all(passphrases).await,
            Err(_) => Ok(MigrationReport {
                remote_unavailable: true,
                ..MigrationReport::default()
            }),
        }
    }

    /// List mementos after running a migration pass
    ///
    /// Migration problems are logged and never fail the listing.
    pub async fn list_and_migrate(
        &self,
        passphrases: &dyn PassphraseProvider,
    ) -> MementoResult<Vec<DocumentId>> {
        match self.migrate_all(passphrases).await {
            Ok(report) if !report.is_clean() => {
                warn!(
                    "Migration pass incomplete: {} failed, remote unavailable: {}",
                    report.failed.len(),
                    report.remote_unavailable
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Migration pass failed: {}", e),
        }
        self.list_documents()
    }

    pub async fn remote_status(&self) -> RemoteStatus {
        match &self.remote {
            Some(remote) => RemoteStatus {
                backend: Some(remote.name()),
                available: remote.is_available().await,
            },
            None => RemoteStatus {
                backend: None,
                available: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::with_data_dir(temp_dir.path());
        config.kdf_iterations = 1000;
        config
    }

    fn store_with_memory_remote(temp_dir: &TempDir) -> (MementoStore, Arc<MemoryRemoteStore>) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let shared: Arc<dyn RemoteStore> = remote.clone();
        let store = MementoStore::with_remote(test_config(temp_dir), Some(shared));
        (store, remote)
    }

    fn passphrase(_: DocumentId) -> Option<String> {
        Some("correct-horse".to_string())
    }

    #[test]
    fn test_open_local_only() {
        let temp_dir = TempDir::new().unwrap();
        let store = MementoStore::open_with_config(test_config(&temp_dir)).unwrap();

        assert!(store.remote().is_none());
        assert!(store.list_documents().unwrap().is_empty());
    }

    #[test]
    fn test_document_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let store = MementoStore::open_with_config(test_config(&temp_dir)).unwrap();

        let id = store.create_document("hello").unwrap();
        assert_eq!(store.load_document(id).unwrap().buffer_size, 50);

        store.write_snapshot(id, "hello world").unwrap();
        assert_eq!(store.read_latest(id).unwrap(), "hello world");
        assert_eq!(store.read_snapshot(id, -1).unwrap().unwrap(), "hello");
        assert_eq!(store.history(id).unwrap().len(), 2);
        assert_eq!(store.list_documents().unwrap(), vec![id]);
    }

    #[test]
    fn test_encryption_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let id = {
            let store = MementoStore::open_with_config(test_config(&temp_dir)).unwrap();
            let id = store.create_document("").unwrap();
            store.enable_encryption(id, "correct-horse").unwrap();
            store.write_snapshot(id, "secret note").unwrap();
            id
        };

        let store = MementoStore::open_with_config(test_config(&temp_dir)).unwrap();
        assert!(store.verify_passphrase(id, "correct-horse").unwrap());
        assert!(!store.verify_passphrase(id, "wrong-pass").unwrap());

        let err = store.unlock(id, "wrong-pass").unwrap_err();
        assert!(matches!(err, MementoError::AuthenticationFailure));

        store.unlock(id, "correct-horse").unwrap();
        assert_eq!(store.read_latest(id).unwrap(), "secret note");
    }

    #[test]
    fn test_import_plain_text() {
        let temp_dir = TempDir::new().unwrap();
        let store = MementoStore::open_with_config(test_config(&temp_dir)).unwrap();

        let raw = [0x63, 0x61, 0x66, 0xE9];
        let id = store.import_external_text(&raw, "latin-1", None).unwrap();
        assert_eq!(store.read_latest(id).unwrap(), "café");
    }

    #[test]
    fn test_import_encrypted_leaves_no_plaintext() {
        let temp_dir = TempDir::new().unwrap();
        let store = MementoStore::open_with_config(test_config(&temp_dir)).unwrap();

        let id = store
            .import_external_text(b"imported secret", "utf-8", Some("correct-horse"))
            .unwrap();
        assert_eq!(store.read_latest(id).unwrap(), "imported secret");

        let dir = temp_dir.path().join(id.to_string());
        for entry in std::fs::read_dir(&dir).unwrap() {
            let bytes = std::fs::read(entry.unwrap().path()).unwrap();
            assert!(!bytes.windows(8).any(|w| w == b"imported"));
        }
    }

    #[test]
    fn test_import_rejects_unknown_encoding() {
        let temp_dir = TempDir::new().unwrap();
        let store = MementoStore::open_with_config(test_config(&temp_dir)).unwrap();

        assert!(matches!(
            store.import_external_text(b"x", "ebcdic", None),
            Err(MementoError::UnsupportedEncoding(_))
        ));
        assert!(store.list_documents().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listing_has_no_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let (store, remote) = store_with_memory_remote(&temp_dir);

        let id = store.create_document("note").unwrap();
        store.list_documents().unwrap();
        store.document_summaries().unwrap();

        assert!(!store.load_document(id).unwrap().encryption_enabled);
        assert_eq!(remote.content_count(id).await.unwrap(), 0);
        assert_eq!(store.scan_for_migration_candidates().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_list_and_migrate() {
        let temp_dir = TempDir::new().unwrap();
        let (store, remote) = store_with_memory_remote(&temp_dir);

        let id = store.create_document("note").unwrap();
        let ids = store.list_and_migrate(&passphrase).await.unwrap();

        assert_eq!(ids, vec![id]);
        assert!(store.load_document(id).unwrap().is_migrated());
        assert_eq!(remote.content_count(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_local_only_migration_reports_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let store = MementoStore::with_remote(test_config(&temp_dir), None);
        let id = store.create_document("note").unwrap();

        let report = store.migrate_all(&passphrase).await.unwrap();
        assert!(report.remote_unavailable);

        assert!(matches!(
            store.migrate_document(id, &passphrase).await,
            Err(MementoError::BackendUnavailable(_))
        ));
        assert_eq!(store.list_and_migrate(&passphrase).await.unwrap(), vec![id]);

        let status = store.remote_status().await;
        assert_eq!(status.backend, None);
        assert!(!status.available);
    }

    #[tokio::test]
    async fn test_remote_status() {
        let temp_dir = TempDir::new().unwrap();
        let (store, remote) = store_with_memory_remote(&temp_dir);

        assert_eq!(
            store.remote_status().await,
            RemoteStatus {
                backend: Some("memory"),
                available: true
            }
        );

        remote.set_available(false);
        assert!(!store.remote_status().await.available);
    }
}
