//! Memento command handlers

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use memento_core::{DocumentId, MementoStore};

use crate::output::{Output, OutputFormat};
use crate::prompt::PassphraseSource;

/// Create a new memento
pub fn create(
    store: &MementoStore,
    content: Option<String>,
    file: Option<PathBuf>,
    encrypt: bool,
    passphrases: &PassphraseSource,
    output: &Output,
) -> Result<()> {
    let content = read_content(content, file.as_deref())?;

    let id = if encrypt {
        let passphrase = passphrases.require("New passphrase: ")?;
        create_encrypted(store, &content, &passphrase)?
    } else {
        store
            .create_document(&content)
            .context("Failed to create memento")?
    };

    print_id(output, id, &format!("Created memento {}", id));
    Ok(())
}

/// Store a new version of a memento
pub fn write(
    store: &MementoStore,
    id: String,
    content: Option<String>,
    file: Option<PathBuf>,
    passphrases: &PassphraseSource,
    output: &Output,
) -> Result<()> {
    let id = parse_id(&id)?;
    let content = read_content(content, file.as_deref())?;

    unlock_if_encrypted(store, id, passphrases)?;
    store
        .write_snapshot(id, &content)
        .with_context(|| format!("Failed to write memento {}", id))?;

    output.success(&format!("Saved memento {}", id));
    Ok(())
}

/// Print one version of a memento
pub fn show(
    store: &MementoStore,
    id: String,
    offset: i64,
    passphrases: &PassphraseSource,
    output: &Output,
) -> Result<()> {
    let id = parse_id(&id)?;
    unlock_if_encrypted(store, id, passphrases)?;

    let content = store
        .read_snapshot(id, offset)
        .with_context(|| format!("Failed to read memento {}", id))?
        .ok_or_else(|| anyhow::anyhow!("Memento {} has no version at offset {}", id, offset))?;

    output.print_content(id, offset, &content);
    Ok(())
}

/// List mementos, most recently modified first
///
/// Runs a migration pass first when `migrate` is set or `auto_migrate` is
/// configured.
pub async fn list(
    store: &MementoStore,
    migrate: bool,
    passphrases: &PassphraseSource,
    output: &Output,
) -> Result<()> {
    if migrate || store.config().auto_migrate {
        let provider = |id: DocumentId| passphrases.for_document(id);
        store.list_and_migrate(&provider).await?;
    }

    let summaries = store
        .document_summaries()
        .context("Failed to list mementos")?;
    output.print_summaries(&summaries);
    Ok(())
}

/// Print every retained version of a memento
pub fn history(
    store: &MementoStore,
    id: String,
    passphrases: &PassphraseSource,
    output: &Output,
) -> Result<()> {
    let id = parse_id(&id)?;
    unlock_if_encrypted(store, id, passphrases)?;

    let entries = store
        .history(id)
        .with_context(|| format!("Failed to read history of memento {}", id))?;
    output.print_history(id, &entries);
    Ok(())
}

/// Turn on encryption for a memento
pub fn encrypt(
    store: &MementoStore,
    id: String,
    seal: bool,
    passphrases: &PassphraseSource,
    output: &Output,
) -> Result<()> {
    let id = parse_id(&id)?;
    let passphrase = passphrases.require("New passphrase: ")?;

    let material = store
        .enable_encryption(id, &passphrase)
        .with_context(|| format!("Failed to enable encryption for memento {}", id))?;

    let sealed = if seal {
        store
            .seal_plaintext_slots(id)
            .with_context(|| format!("Failed to seal memento {}", id))?
    } else {
        0
    };

    match output.format {
        OutputFormat::Json => crate::output::print_json(&serde_json::json!({
            "id": id,
            "key_id": material.key_id,
            "sealed_slots": sealed
        })),
        OutputFormat::Quiet => {}
        OutputFormat::Human => {
            println!("✓ Encryption enabled for memento {}", id);
            if seal {
                println!("  Sealed {} older version(s)", sealed);
            } else {
                println!("  Older versions stay in plaintext until sealed (--seal)");
            }
        }
    }
    Ok(())
}

/// Import a text file produced elsewhere as a new memento
pub fn import(
    store: &MementoStore,
    path: PathBuf,
    encoding: String,
    encrypt: bool,
    passphrases: &PassphraseSource,
    output: &Output,
) -> Result<()> {
    let raw = std::fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;

    let passphrase = if encrypt {
        Some(passphrases.require("New passphrase: ")?)
    } else {
        None
    };

    let id = store
        .import_external_text(&raw, &encoding, passphrase.as_deref())
        .with_context(|| format!("Failed to import {:?}", path))?;

    print_id(output, id, &format!("Imported {} as memento {}", path.display(), id));
    Ok(())
}

/// Parse a memento id as typed by the user (`7` or `#7`)
pub fn parse_id(id: &str) -> Result<DocumentId> {
    id.parse()
        .map_err(|_| anyhow::anyhow!("Invalid memento id: '{}'", id))
}

/// Unlock an encrypted memento for this invocation
pub fn unlock_if_encrypted(
    store: &MementoStore,
    id: DocumentId,
    passphrases: &PassphraseSource,
) -> Result<()> {
    let metadata = store
        .load_document(id)
        .with_context(|| format!("Failed to open memento {}", id))?;

    if !metadata.encryption_enabled || store.local().is_unlocked(id) {
        return Ok(());
    }

    let passphrase = passphrases.require(&format!("Passphrase for memento {}: ", id))?;
    store
        .unlock(id, &passphrase)
        .with_context(|| format!("Failed to unlock memento {}", id))
}

/// Create a memento whose first real version is already encrypted
fn create_encrypted(store: &MementoStore, content: &str, passphrase: &str) -> Result<DocumentId> {
    let id = store
        .create_document("")
        .context("Failed to create memento")?;
    store
        .enable_encryption(id, passphrase)
        .with_context(|| format!("Failed to enable encryption for memento {}", id))?;
    store
        .write_snapshot(id, content)
        .with_context(|| format!("Failed to write memento {}", id))?;
    Ok(id)
}

/// Content from the argument, a file, or stdin
fn read_content(content: Option<String>, file: Option<&Path>) -> Result<String> {
    match (content, file) {
        (Some(_), Some(_)) => bail!("Give the content either inline or with --file, not both"),
        (Some(content), None) => Ok(content),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path)),
        (None, None) => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("Failed to read content from stdin")?;
            Ok(content)
        }
    }
}

fn print_id(output: &Output, id: DocumentId, message: &str) {
    match output.format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "id": id })),
        OutputFormat::Quiet => println!("{}", id),
        OutputFormat::Human => println!("✓ {}", message),
    }
}
