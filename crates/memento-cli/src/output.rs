//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use memento_core::{
    DocumentId, DocumentSummary, HistoryEntry, MigrationOutcome, MigrationReport,
};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print the content of one version of a memento
    pub fn print_content(&self, id: DocumentId, offset: i64, content: &str) {
        match self.format {
            OutputFormat::Human | OutputFormat::Quiet => {
                // Content goes out untouched so it can be piped
                print!("{}", content);
                if !content.is_empty() && !content.ends_with('\n') {
                    println!();
                }
            }
            OutputFormat::Json => print_json(&serde_json::json!({
                "id": id,
                "offset": offset,
                "content": content
            })),
        }
    }

    /// Print the memento picker listing
    pub fn print_summaries(&self, summaries: &[DocumentSummary]) {
        match self.format {
            OutputFormat::Human => {
                if summaries.is_empty() {
                    println!("No mementos found.");
                    return;
                }
                for summary in summaries {
                    println!(
                        "{:>5} | {} | {}{}",
                        summary.id,
                        summary.last_modified.format("%Y-%m-%d %H:%M"),
                        truncate(&summary.first_line, 50),
                        flags(summary)
                    );
                }
                println!("\n{} memento(s)", summaries.len());
            }
            OutputFormat::Json => print_json(&summaries),
            OutputFormat::Quiet => {
                for summary in summaries {
                    println!("{}", summary.id);
                }
            }
        }
    }

    /// Print every retained version of a memento, latest first
    pub fn print_history(&self, id: DocumentId, entries: &[HistoryEntry]) {
        match self.format {
            OutputFormat::Human => {
                println!("History of memento {}", id);
                println!();
                for entry in entries {
                    println!(
                        "{:>4} | slot {:>2} | {} | {}{}",
                        entry.offset,
                        entry.index,
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        truncate_line(&entry.content, 50),
                        if entry.encrypted { " [enc]" } else { "" }
                    );
                }
                println!("\n{} version(s)", entries.len());
            }
            OutputFormat::Json => print_json(&entries),
            OutputFormat::Quiet => {
                for entry in entries {
                    println!("{}", entry.offset);
                }
            }
        }
    }

    /// Print the result of migrating a single memento
    pub fn print_outcome(&self, id: DocumentId, outcome: &MigrationOutcome) {
        match self.format {
            OutputFormat::Human => match outcome {
                MigrationOutcome::Migrated { backup, uploaded } => {
                    println!("✓ Migrated memento {}", id);
                    if !uploaded {
                        println!("  Remote already held this content");
                    }
                    println!("  Backup: {}", backup.display());
                }
                MigrationOutcome::AlreadyMigrated => {
                    println!("Memento {} was already migrated", id)
                }
                MigrationOutcome::Skipped { reason } => {
                    println!("Skipped memento {}: {}", id, reason)
                }
            },
            OutputFormat::Json => print_json(&serde_json::json!({
                "id": id,
                "result": outcome
            })),
            OutputFormat::Quiet => {}
        }
    }

    /// Print the summary of a migration pass
    pub fn print_report(&self, report: &MigrationReport) {
        match self.format {
            OutputFormat::Human => {
                if report.remote_unavailable {
                    println!("⚠ Remote storage unavailable, nothing was migrated");
                    return;
                }
                println!("Migrated: {}", report.migrated.len());
                for id in &report.migrated {
                    println!("  {}", id);
                }
                println!("Skipped:  {}", report.skipped.len());
                for note in &report.skipped {
                    println!("  {}: {}", note.id, note.reason);
                }
                println!("Failed:   {}", report.failed.len());
                for note in &report.failed {
                    println!("  {}: {}", note.id, note.reason);
                }
            }
            OutputFormat::Json => print_json(report),
            OutputFormat::Quiet => {
                for id in &report.migrated {
                    println!("{}", id);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Pretty-print a value as JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

fn flags(summary: &DocumentSummary) -> &'static str {
    match (summary.encrypted, summary.migrated) {
        (true, true) => " [enc, migrated]",
        (true, false) => " [enc]",
        (false, true) => " [migrated]",
        (false, false) => "",
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}
