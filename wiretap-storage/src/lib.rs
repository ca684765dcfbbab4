//! Persistent scalar storage for the Wiretap engine.
//!
//! The engine persists a handful of typed values between runs: the current
//! session, the cached ingest config and its download time, and a few
//! bookkeeping timestamps. This crate provides the [`KeyValueStore`]
//! abstraction over that persistence, two backends ([`MemoryStore`] and
//! [`JsonFileStore`]), the typed [`Storage`] layer on top, and the one-time
//! [migration](migrate_legacy_store) from the legacy key namespace.

#![warn(missing_docs)]

mod kv;
mod migration;
mod storage;

pub use kv::*;
pub use migration::*;
pub use storage::*;

/// Errors raised by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("failed to access storage: {0}")]
    Io(#[from] std::io::Error),

    /// The backing document could not be parsed.
    #[error("failed to parse storage document: {0}")]
    Parse(#[from] serde_json::Error),
}
