//! Migration of local mementos to remote storage
//!
//! A memento moves through these states, and falls back to local-only on any
//! failure before verification:
//!
//! ```text
//! LocalOnly -> EncryptionPending -> Uploading -> Verified -> LocalArchived
//! ```
//!
//! Local plaintext is only archived after the uploaded ciphertext has been
//! read back, decrypted and compared with the local content.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::{MementoError, MementoResult};
use crate::models::{DocumentId, MigrationState};
use crate::remote::RemoteStore;
use crate::storage::RingBufferStore;
use crate::vault::KeyMaterial;

/// Source of passphrases for mementos being encrypted or unlocked
///
/// Returning `None` skips the memento.
pub trait PassphraseProvider: Send + Sync {
    fn passphrase_for(&self, id: DocumentId) -> Option<String>;
}

impl<F> PassphraseProvider for F
where
    F: Fn(DocumentId) -> Option<String> + Send + Sync,
{
    fn passphrase_for(&self, id: DocumentId) -> Option<String> {
        self(id)
    }
}

/// Result of migrating one memento
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// Verified remotely and archived locally
    Migrated {
        backup: PathBuf,
        /// `false` when matching content was already stored remotely
        uploaded: bool,
    },
    /// Archived by an earlier run
    AlreadyMigrated,
    /// Left untouched
    Skipped { reason: String },
}

/// A memento that was skipped or failed, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentNote {
    pub id: DocumentId,
    pub reason: String,
}

/// Summary of a migration run over all candidates
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub migrated: Vec<DocumentId>,
    pub skipped: Vec<DocumentNote>,
    pub failed: Vec<DocumentNote>,
    /// The remote backend could not be reached, nothing was attempted
    pub remote_unavailable: bool,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.remote_unavailable
    }
}

/// Promotes local mementos to the remote store
pub struct MigrationCoordinator {
    local: Arc<RingBufferStore>,
    remote: Arc<dyn RemoteStore>,
}

impl MigrationCoordinator {
    pub fn new(local: Arc<RingBufferStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self { local, remote }
    }

    /// Mementos that still need migrating
    ///
    /// Not yet archived, with non-empty latest content. Encrypted mementos
    /// that are locked count as candidates since their content cannot be
    /// inspected.
    pub fn scan_for_migration_candidates(&self) -> MementoResult<Vec<DocumentId>> {
        Self::scan(&self.local)
    }

    /// Candidate scan over a local store, usable without a remote backend
    pub fn scan(local: &RingBufferStore) -> MementoResult<Vec<DocumentId>> {
        let mut candidates = Vec::new();

        for id in local.list()? {
            let metadata = match local.load_metadata(id) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping memento {} during scan: {}", id, e);
                    continue;
                }
            };
            if metadata.is_migrated() {
                continue;
            }

            let has_content = match local.read_latest(id) {
                Ok(content) => !content.is_empty(),
                Err(MementoError::Locked { .. }) => true,
                Err(e) => {
                    warn!("Skipping memento {} during scan: {}", id, e);
                    false
                }
            };
            if has_content {
                candidates.push(id);
            }
        }

        debug!("Found {} migration candidates", candidates.len());
        Ok(candidates)
    }

    /// Migrate one memento
    pub async fn migrate_document(
        &self,
        id: DocumentId,
        passphrases: &dyn PassphraseProvider,
    ) -> MementoResult<MigrationOutcome> {
        let metadata = self.local.load_metadata(id)?;
        if metadata.is_migrated() {
            return Ok(MigrationOutcome::AlreadyMigrated);
        }

        if !self.remote.is_available().await {
            return Err(MementoError::BackendUnavailable(format!(
                "{} backend is not reachable",
                self.remote.name()
            )));
        }

        let mut state = MigrationState::LocalOnly;

        let needs_passphrase = !(metadata.encryption_enabled && self.local.is_unlocked(id));
        if needs_passphrase {
            let Some(passphrase) = passphrases.passphrase_for(id).map(Zeroizing::new) else {
                return Ok(MigrationOutcome::Skipped {
                    reason: "no passphrase provided".to_string(),
                });
            };

            advance(id, &mut state, MigrationState::EncryptionPending);
            if metadata.encryption_enabled {
                self.local.unlock(id, &passphrase)?;
            } else {
                self.local.enable_encryption(id, &passphrase)?;
            }
        } else {
            advance(id, &mut state, MigrationState::EncryptionPending);
        }

        let material = self.local.key_material(id)?;
        let key = self.local.key_for(id)?;
        let content = self.local.read_latest(id)?;

        advance(id, &mut state, MigrationState::Uploading);
        let needs_upload = match self.remote.get_latest_content(id).await? {
            None => true,
            Some(existing) => match crypto::decrypt_text(&existing.blob, &key) {
                Ok(text) => text != content,
                Err(e) => {
                    return Err(MementoError::MigrationVerificationFailure {
                        id,
                        details: format!("existing remote content does not decrypt: {}", e),
                    })
                }
            },
        };

        self.remote.put_key(id, &material).await?;
        if needs_upload {
            let blob = crypto::encrypt_text(&content, &key)?;
            self.remote.put_content(id, &blob, Utc::now()).await?;
        } else {
            debug!("Memento {} already stored remotely, skipping upload", id);
        }

        self.verify(id, &content, &key, &material).await?;
        advance(id, &mut state, MigrationState::Verified);

        let backup = self.local.archive(id, Utc::now(), &content)?;
        advance(id, &mut state, MigrationState::LocalArchived);

        info!("Migrated memento {}", id);
        Ok(MigrationOutcome::Migrated {
            backup,
            uploaded: needs_upload,
        })
    }

    /// Read back what the remote holds and compare it with local state
    async fn verify(
        &self,
        id: DocumentId,
        content: &str,
        key: &crypto::SymmetricKey,
        material: &KeyMaterial,
    ) -> MementoResult<()> {
        let failure = |details: String| MementoError::MigrationVerificationFailure { id, details };

        let stored = self
            .remote
            .get_latest_content(id)
            .await?
            .ok_or_else(|| failure("no remote content after upload".to_string()))?;
        let text = crypto::decrypt_text(&stored.blob, key)
            .map_err(|e| failure(format!("remote content does not decrypt: {}", e)))?;
        if text != content {
            return Err(failure("remote content differs from local content".to_string()));
        }

        let stored_key = self
            .remote
            .get_key(id)
            .await?
            .ok_or_else(|| failure("no remote key material after upload".to_string()))?;
        if stored_key.key_id != material.key_id {
            return Err(failure(format!(
                "remote key {} does not match local key {}",
                stored_key.key_id, material.key_id
            )));
        }

        Ok(())
    }

    /// Migrate every candidate, one memento at a time
    ///
    /// Failures are collected per memento. An unreachable backend skips the
    /// whole run.
    pub async fn migrate_all(
        &self,
        passphrases: &dyn PassphraseProvider,
    ) -> MementoResult<MigrationReport> {
        let mut report = MigrationReport::default();

        if !self.remote.is_available().await {
            warn!(
                "Remote backend {} unavailable, staying local-only",
                self.remote.name()
            );
            report.remote_unavailable = true;
            return Ok(report);
        }

        for id in self.scan_for_migration_candidates()? {
            match self.migrate_document(id, passphrases).await {
                Ok(MigrationOutcome::Migrated { .. }) => report.migrated.push(id),
                Ok(MigrationOutcome::AlreadyMigrated) => report.skipped.push(DocumentNote {
                    id,
                    reason: "already migrated".to_string(),
                }),
                Ok(MigrationOutcome::Skipped { reason }) => {
                    report.skipped.push(DocumentNote { id, reason })
                }
                Err(e) => {
                    warn!("Migration of memento {} failed: {}", id, e);
                    report.failed.push(DocumentNote {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Migration run: {} migrated, {} skipped, {} failed",
            report.migrated.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

fn advance(id: DocumentId, state: &mut MigrationState, next: MigrationState) {
    debug!("Memento {}: {} -> {}", id, state, next);
    *state = next;
}
