//! Memento CLI
//!
//! Command-line interface for Memento - versioned text notes with encryption
//! and remote migration.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use memento_core::{Config, MementoStore};

mod commands;
mod output;
mod prompt;

use output::{Output, OutputFormat};
use prompt::PassphraseSource;

#[derive(Parser)]
#[command(name = "memento")]
#[command(about = "Memento - Versioned text notes with encryption and remote migration")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug output to stderr (or the configured log file)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to an alternative config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Passphrase for encrypted mementos (or set MEMENTO_PASSPHRASE)
    #[arg(long, global = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new memento
    #[command(alias = "create")]
    New {
        /// Initial content (read from stdin if omitted)
        content: Option<String>,
        /// Read the initial content from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Encrypt the memento from its first version
        #[arg(short, long)]
        encrypt: bool,
    },
    /// Save a new version of a memento
    Write {
        /// Memento ID
        id: String,
        /// New content (read from stdin if omitted)
        content: Option<String>,
        /// Read the new content from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Print a version of a memento
    Show {
        /// Memento ID
        id: String,
        /// Version offset from the latest (0, -1, -2, ...)
        #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i64,
    },
    /// List mementos, most recently modified first
    #[command(alias = "ls")]
    List {
        /// Run a migration pass before listing
        #[arg(long)]
        migrate: bool,
    },
    /// Show every retained version of a memento
    History {
        /// Memento ID
        id: String,
    },
    /// Enable encryption for a memento
    Encrypt {
        /// Memento ID
        id: String,
        /// Also re-write older plaintext versions encrypted
        #[arg(long)]
        seal: bool,
    },
    /// Import a text file as a new memento
    Import {
        /// File to import
        path: PathBuf,
        /// Encoding of the file (utf-8, utf-16, utf-16le, utf-16be, latin-1, ascii)
        #[arg(long, default_value = "utf-8")]
        encoding: String,
        /// Encrypt the imported memento
        #[arg(short, long)]
        encrypt: bool,
    },
    /// Migrate mementos to remote storage
    Migrate {
        /// Memento ID (all candidates if omitted)
        id: Option<String>,
    },
    /// Show status (storage, remote, counts)
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, remote_uri, auto_migrate, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands work even when the configured data dir is unusable
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config, cli.verbose);

    let store = MementoStore::open_with_config(config)?;
    let passphrases = PassphraseSource::new(cli.passphrase);
    debug!("Opened store at {:?}", store.config().data_dir);

    match cli.command {
        Commands::New {
            content,
            file,
            encrypt,
        } => commands::document::create(&store, content, file, encrypt, &passphrases, &output),
        Commands::Write { id, content, file } => {
            commands::document::write(&store, id, content, file, &passphrases, &output)
        }
        Commands::Show { id, offset } => {
            commands::document::show(&store, id, offset, &passphrases, &output)
        }
        Commands::List { migrate } => {
            commands::document::list(&store, migrate, &passphrases, &output).await
        }
        Commands::History { id } => {
            commands::document::history(&store, id, &passphrases, &output)
        }
        Commands::Encrypt { id, seal } => {
            commands::document::encrypt(&store, id, seal, &passphrases, &output)
        }
        Commands::Import {
            path,
            encoding,
            encrypt,
        } => commands::document::import(&store, path, encoding, encrypt, &passphrases, &output),
        Commands::Migrate { id } => {
            commands::migrate::migrate(&store, id, &passphrases, &output).await
        }
        Commands::Status => commands::status::show(&store, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Initialize logging
///
/// Warnings and errors by default, debug with `--verbose`; `RUST_LOG`
/// overrides both. Logs go to `log_file` when configured, stderr otherwise.
fn init_logging(config: &Config, verbose: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "memento_core={},memento_cli={}",
            log_level, log_level
        ))
    });

    let Some(log_path) = &config.log_file else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_show_accepts_negative_offset() {
        let cli = Cli::try_parse_from(["memento", "show", "3", "--offset", "-2"]).unwrap();
        match cli.command {
            Commands::Show { id, offset } => {
                assert_eq!(id, "3");
                assert_eq!(offset, -2);
            }
            _ => panic!("expected show"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["memento", "list", "--json", "--passphrase", "pw"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.passphrase.as_deref(), Some("pw"));
        assert!(matches!(cli.command, Commands::List { migrate: false }));
    }

    #[test]
    fn test_import_defaults_to_utf8() {
        let cli = Cli::try_parse_from(["memento", "import", "notes.txt"]).unwrap();
        match cli.command {
            Commands::Import {
                encoding, encrypt, ..
            } => {
                assert_eq!(encoding, "utf-8");
                assert!(!encrypt);
            }
            _ => panic!("expected import"),
        }
    }
}
