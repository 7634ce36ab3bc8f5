//! Status command handler

use anyhow::Result;

use memento_core::MementoStore;

use crate::output::{print_json, Output, OutputFormat};

/// Show status information
pub async fn show(store: &MementoStore, output: &Output) -> Result<()> {
    let config = store.config();
    let summaries = store.document_summaries()?;
    let candidates = store.scan_for_migration_candidates()?;
    let remote = store.remote_status().await;

    let mut mislabeled = Vec::new();
    for summary in &summaries {
        let slots = store.mislabeled_slots(summary.id)?;
        if !slots.is_empty() {
            mislabeled.push((summary.id, slots));
        }
    }

    let encrypted = summaries.iter().filter(|s| s.encrypted).count();
    let migrated = summaries.iter().filter(|s| s.migrated).count();
    let remote_count = match store.remote() {
        Some(backend) if remote.available => {
            let mut total = 0;
            for summary in summaries.iter().filter(|s| s.migrated) {
                total += backend.content_count(summary.id).await.unwrap_or(0);
            }
            Some(total)
        }
        _ => None,
    };

    match output.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "data_dir": config.data_dir,
            "remote": {
                "backend": remote.backend,
                "available": remote.available,
                "database": config.remote_database,
                "collection": config.remote_collection,
                "content_records": remote_count
            },
            "counts": {
                "mementos": summaries.len(),
                "encrypted": encrypted,
                "migrated": migrated,
                "pending_migration": candidates.len()
            },
            "mislabeled_slots": mislabeled
                .iter()
                .map(|(id, slots)| serde_json::json!({ "id": id, "slots": slots }))
                .collect::<Vec<_>>()
        })),
        OutputFormat::Quiet => {
            println!("{}", if remote.available { "online" } else { "offline" });
        }
        OutputFormat::Human => {
            println!("Memento Status");
            println!("==============");
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            println!();
            println!("Remote:");
            match remote.backend {
                Some(backend) => {
                    println!("  Backend:  {}", backend);
                    println!(
                        "  Status:   {}",
                        if remote.available {
                            "available"
                        } else {
                            "unavailable"
                        }
                    );
                    println!(
                        "  Target:   {}/{}",
                        config.remote_database, config.remote_collection
                    );
                    if let Some(count) = remote_count {
                        println!("  Records:  {}", count);
                    }
                }
                None => println!("  Not configured (local-only)"),
            }
            println!();
            println!("Contents:");
            println!("  Mementos:          {}", summaries.len());
            println!("  Encrypted:         {}", encrypted);
            println!("  Migrated:          {}", migrated);
            println!("  Pending migration: {}", candidates.len());
            if !mislabeled.is_empty() {
                println!();
                println!("⚠ Slots whose extension does not match their content:");
                for (id, slots) in &mislabeled {
                    let slots: Vec<String> = slots.iter().map(|s| s.to_string()).collect();
                    println!("  memento {}: slot(s) {}", id, slots.join(", "));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memento_core::Config;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_status_local_only() {
        let temp_dir = TempDir::new().unwrap();
        let store = MementoStore::with_remote(Config::with_data_dir(temp_dir.path()), None);
        store.create_document("one").unwrap();

        let status = store.remote_status().await;
        assert!(status.backend.is_none());
        show(&store, &Output::new(OutputFormat::Quiet)).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_reports_renamed_ciphertext() {
        let temp_dir = TempDir::new().unwrap();
        let store = MementoStore::with_remote(Config::with_data_dir(temp_dir.path()), None);
        let id = store.create_document("a plain first draft").unwrap();
        store.enable_encryption(id, "hunter2").unwrap();
        store.write_snapshot(id, "a sealed second draft").unwrap();
        assert!(store.mislabeled_slots(id).unwrap().is_empty());

        let dir = store.config().document_dir(id);
        std::fs::rename(dir.join("1.enc"), dir.join("1.txt")).unwrap();

        assert_eq!(store.mislabeled_slots(id).unwrap(), vec![1]);
        show(&store, &Output::new(OutputFormat::Human)).await.unwrap();
        show(&store, &Output::new(OutputFormat::Json)).await.unwrap();
    }
}
