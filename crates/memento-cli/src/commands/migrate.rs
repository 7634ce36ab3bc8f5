//! Migrate command handler

use anyhow::{Context, Result};

use memento_core::{DocumentId, MementoError, MementoStore};

use crate::commands::document::parse_id;
use crate::output::Output;
use crate::prompt::PassphraseSource;

/// Promote one memento, or every candidate, to remote storage
pub async fn migrate(
    store: &MementoStore,
    id: Option<String>,
    passphrases: &PassphraseSource,
    output: &Output,
) -> Result<()> {
    let provider = |id: DocumentId| passphrases.for_document(id);

    match id {
        Some(id) => {
            let id = parse_id(&id)?;
            match store.migrate_document(id, &provider).await {
                Ok(outcome) => output.print_outcome(id, &outcome),
                // Not archived; the memento stays a candidate for the next run
                Err(MementoError::BackendUnavailable(reason)) => {
                    output.message(&format!(
                        "⚠ Remote storage unavailable ({}), memento {} stays local",
                        reason, id
                    ));
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to migrate memento {}", id))
                }
            }
        }
        None => {
            let report = store
                .migrate_all(&provider)
                .await
                .context("Migration pass failed")?;
            output.print_report(&report);
            if !report.failed.is_empty() {
                anyhow::bail!("Migration incomplete: {} failed", report.failed.len());
            }
        }
    }

    Ok(())
}
