//! Memento Core Library
//!
//! This crate provides the core functionality for Memento, a store for
//! versioned text documents ("mementos") with optional encryption at rest and
//! migration to a remote document database.
//!
//! # Architecture
//!
//! - **Ring buffer**: every write stores a full snapshot in the next slot of a
//!   per-document ring whose size shrinks as the content grows
//! - **Encryption**: zstd + ChaCha20-Poly1305 with passphrase-derived keys
//! - **Remote**: encrypted snapshots are promoted to MongoDB once verified
//!
//! # Quick Start
//!
//! ```text
//! let store = MementoStore::open()?;
//!
//! let id = store.create_document("Shopping\nmilk")?;
//! store.enable_encryption(id, "correct-horse")?;
//! store.write_snapshot(id, "Shopping\nmilk\neggs")?;
//!
//! let summaries = store.document_summaries()?;
//! ```
//!
//! # Modules
//!
//! - `store`: Unified storage interface (main entry point)
//! - `storage`: Local ring buffer persistence
//! - `crypto`: Compression, encryption and key derivation
//! - `vault`: Key pairs and per-document key material
//! - `remote`: Remote backends (MongoDB and in-memory)
//! - `migration`: Local to remote promotion
//! - `import`: Decoding of externally produced text
//! - `config`: Application configuration

pub mod config;
pub mod crypto;
pub mod error;
pub mod import;
pub mod migration;
pub mod models;
pub mod remote;
pub mod storage;
pub mod store;
pub mod vault;

pub use config::Config;
pub use error::{MementoError, MementoResult};
pub use migration::{
    DocumentNote, MigrationCoordinator, MigrationOutcome, MigrationReport, PassphraseProvider,
};
pub use models::{
    ControlMetadata, DocumentId, DocumentSummary, HistoryEntry, MigrationState, Snapshot,
};
pub use remote::{MemoryRemoteStore, MongoRemoteStore, RemoteConnection, RemoteStore};
pub use storage::{buffer_size_for, RingBufferStore};
pub use store::{MementoStore, RemoteStatus};
pub use vault::{KeyMaterial, KeyPair, KeyVault};
