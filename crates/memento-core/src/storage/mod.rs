//! Storage layer
//!
//! Local backend for mementos: a directory per memento holding a ring buffer
//! of snapshot slots and its `control.json`.
//!
//! ## Architecture
//!
//! - **Persistence**: On-disk layout and atomic file writes
//! - **Ring buffer**: Slot rotation, dynamic sizing and encryption at rest
//! - **Locks**: One lock per memento so concurrent writers never interleave

pub mod locks;
pub mod persistence;
pub mod ring_buffer;

pub use locks::DocumentLocks;
pub use persistence::DocumentPersistence;
pub use ring_buffer::{buffer_size_for, RingBufferStore};
