//! # Conduit Storage
//!
//! File-backed record logs that one process writes and another reads.
//!
//! ## Features
//!
//! - **RingLogStore**: fixed-capacity circular log in one pre-allocated file,
//!   read incrementally with a [`Cursor`](conduit_core::Cursor)
//! - **AppendLogStore**: unbounded append-only log, drained by its reader
//! - **Coordinator**: cross-process write/read scopes; [`FileLockCoordinator`]
//!   uses advisory locks
//! - **ChangeNotifier**: "new data" signal sent after each publish
//! - **MailboxWriter / MailboxReader**: the above wired together, including
//!   the reader's clear-on-corruption recovery
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use conduit_storage::{FileLockCoordinator, MailboxReader, MailboxWriter, RingLogStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RingLogStore::new("/tmp/conduit/info.ring");
//!     let coordinator = Arc::new(FileLockCoordinator::new());
//!
//!     let writer = MailboxWriter::new(store.clone(), coordinator.clone());
//!     writer.publish("tunnel up").await.unwrap();
//!
//!     let mut reader = MailboxReader::new(store, coordinator);
//!     let records = reader.poll().await.unwrap().into_records();
//!     assert_eq!(records, vec!["tunnel up"]);
//! }
//! ```

pub mod append_log;
pub mod config;
pub mod coordinator;
pub mod mailbox;
pub mod notify;
pub mod ring;

// Re-exports
pub use append_log::AppendLogStore;
pub use config::{
    AppendLogConfig, CoordinatorConfig, LogKind, MailboxConfig, RingConfig, TimeoutPolicy,
};
pub use coordinator::{
    Coordinator, FileLockCoordinator, ScopeGuard, ScopeMode, with_read_scope, with_write_scope,
};
pub use mailbox::{AppendMailboxReader, MailboxReader, MailboxWriter, PollOutcome};
pub use notify::{ChangeNotifier, LocalNotifier, NoopNotifier};
pub use ring::{HEADER_SIZE, ReadBatch, ReadStatus, RingHeader, RingLogStore};

// Re-export the shared types so most callers need only this crate
pub use conduit_core::{CoordinationError, Cursor, LogError, RecordCodec};

use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use tracing::warn;

/// Write side shared by every log variant.
///
/// Reading differs too much between the variants (cursor vs. drain) to sit
/// behind one method, so only appending and clearing are abstracted.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Path of the backing file
    fn path(&self) -> &Path;

    /// Append one record
    ///
    /// # Errors
    ///
    /// Returns an error if the record is rejected by the codec or an I/O
    /// error occurs.
    async fn append(&self, content: &str) -> Result<(), LogError>;

    /// Delete the backing file; clearing an absent log succeeds
    async fn clear(&self) -> Result<(), LogError>;
}

pub(crate) async fn remove_if_exists(path: &Path) -> Result<(), LogError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete log file");
            Err(e.into())
        }
    }
}
