//! Passphrase resolution
//!
//! A passphrase is taken from, in order:
//! 1. The `--passphrase` flag
//! 2. The `MEMENTO_PASSPHRASE` environment variable
//! 3. An interactive prompt, only when stdin is a terminal

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

use memento_core::DocumentId;

/// Environment variable holding a passphrase for non-interactive use
pub const PASSPHRASE_ENV: &str = "MEMENTO_PASSPHRASE";

/// Where passphrases for this invocation come from
pub struct PassphraseSource {
    flag: Option<String>,
    interactive: bool,
}

impl PassphraseSource {
    pub fn new(flag: Option<String>) -> Self {
        Self {
            flag,
            interactive: atty::is(atty::Stream::Stdin),
        }
    }

    /// Never prompt, even on a terminal
    pub fn non_interactive(flag: Option<String>) -> Self {
        Self {
            flag,
            interactive: false,
        }
    }

    /// Resolve a passphrase, prompting with `prompt` as a last resort
    ///
    /// `Ok(None)` means no passphrase is available without user input.
    pub fn resolve(&self, prompt: &str) -> Result<Option<String>> {
        if let Some(passphrase) = pick(self.flag.as_deref(), std::env::var(PASSPHRASE_ENV).ok()) {
            return Ok(Some(passphrase));
        }

        if !self.interactive {
            return Ok(None);
        }

        let stdin = io::stdin();
        read_passphrase(prompt, &mut stdin.lock())
    }

    /// Resolve a passphrase or fail with a hint on how to supply one
    pub fn require(&self, prompt: &str) -> Result<String> {
        self.resolve(prompt)?.ok_or_else(|| {
            anyhow::anyhow!(
                "A passphrase is required. Pass --passphrase or set {}.",
                PASSPHRASE_ENV
            )
        })
    }

    /// Passphrase for a memento during a migration pass
    ///
    /// Failures to read are treated as "no passphrase" so the memento is skipped.
    pub fn for_document(&self, id: DocumentId) -> Option<String> {
        self.resolve(&format!("Passphrase for memento {}: ", id))
            .ok()
            .flatten()
    }
}

/// First non-empty value of the flag, then the environment
fn pick(flag: Option<&str>, env: Option<String>) -> Option<String> {
    flag.map(str::to_string)
        .filter(|p| !p.is_empty())
        .or_else(|| env.filter(|p| !p.is_empty()))
}

/// Prompt on stderr and read one line from `input`
fn read_passphrase(prompt: &str, input: &mut impl BufRead) -> Result<Option<String>> {
    eprint!("{}", prompt);
    io::stderr().flush()?;

    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("Failed to read passphrase")?;

    let passphrase = line.trim_end_matches(['\r', '\n']);
    if passphrase.is_empty() {
        Ok(None)
    } else {
        Ok(Some(passphrase.to_string()))
    }
}
