//! Writer and reader ends of a shared log file
//!
//! A mailbox pairs a store with a [`Coordinator`] so every operation runs
//! in the right scope, and implements the reader's recovery rules:
//!
//! - the reader keeps its [`Cursor`] in memory between polls
//! - on corruption the reader clears the file and restarts without a cursor,
//!   giving up whatever had not been delivered yet
//!
//! A ring reader detects corruption under a read scope but clears under a
//! write scope. A writer may reset the ring in between, so the ring is read
//! again under the write scope and only cleared if it is still corrupt.

use std::sync::Arc;

use conduit_core::{Cursor, LogError};
use tracing::{debug, info, instrument, warn};

use crate::LogStore;
use crate::append_log::AppendLogStore;
use crate::coordinator::Coordinator;
use crate::notify::{ChangeNotifier, NoopNotifier};
use crate::ring::{ReadBatch, ReadStatus, RingLogStore};

/// Result of one reader poll
#[derive(Debug)]
pub enum PollOutcome {
    /// Records delivered since the previous poll, oldest first
    Records(Vec<String>),
    /// The file was corrupt and has been cleared
    Healed { cause: LogError },
}

impl PollOutcome {
    /// Delivered records; empty after a heal
    pub fn into_records(self) -> Vec<String> {
        match self {
            PollOutcome::Records(records) => records,
            PollOutcome::Healed { .. } => Vec::new(),
        }
    }

    pub fn is_healed(&self) -> bool {
        matches!(self, PollOutcome::Healed { .. })
    }
}

/// Writing end: appends under a write scope, then signals the reader
pub struct MailboxWriter<S: LogStore> {
    store: S,
    coordinator: Arc<dyn Coordinator>,
    notifier: Arc<dyn ChangeNotifier>,
}

impl<S: LogStore> MailboxWriter<S> {
    pub fn new(store: S, coordinator: Arc<dyn Coordinator>) -> Self {
        Self {
            store,
            coordinator,
            notifier: Arc::new(NoopNotifier),
        }
    }

    /// Signal `notifier` after every successful publish
    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Append one record and notify the reader.
    ///
    /// The reader is only signalled when the append succeeded, and only
    /// after the write scope has been released.
    #[instrument(skip_all, fields(path = %self.store.path().display()))]
    pub async fn publish(&self, content: &str) -> Result<(), LogError> {
        {
            let _scope = self.coordinator.write_scope(self.store.path()).await?;
            self.store
                .append(content)
                .await
                .inspect_err(|e| warn!(error = %e, "Failed to append record"))?;
        }
        self.notifier.notify();
        Ok(())
    }
}

/// Reading end of a ring mailbox
pub struct MailboxReader {
    store: RingLogStore,
    coordinator: Arc<dyn Coordinator>,
    cursor: Option<Cursor>,
}

impl MailboxReader {
    pub fn new(store: RingLogStore, coordinator: Arc<dyn Coordinator>) -> Self {
        Self {
            store,
            coordinator,
            cursor: None,
        }
    }

    /// Resume from a cursor kept by an earlier reader
    pub fn with_cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn store(&self) -> &RingLogStore {
        &self.store
    }

    /// Position the next poll resumes from; `None` means "everything"
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Forget the cursor; the next poll returns the whole ring
    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }

    /// Fetch the records written since the previous poll
    #[instrument(skip_all, fields(path = %self.store.path().display(), cursor = ?self.cursor))]
    pub async fn poll(&mut self) -> Result<PollOutcome, LogError> {
        let result = {
            let _scope = self.coordinator.read_scope(self.store.path()).await?;
            self.store.read_since(self.cursor).await
        };

        match result {
            Ok(batch) => Ok(self.accept(batch)),
            Err(e) if e.is_corruption() => {
                warn!(error = %e, "Ring is corrupt, clearing it");
                self.heal(e).await
            }
            Err(e) => Err(e),
        }
    }

    fn accept(&mut self, batch: ReadBatch) -> PollOutcome {
        self.cursor = match batch.status {
            // An empty ring restarts from slot 0; a cursor left over
            // from before a reset would skip the oldest records.
            ReadStatus::Empty => None,
            ReadStatus::Delivered | ReadStatus::Resynchronized => Some(batch.cursor),
        };
        debug!(
            records = batch.records.len(),
            status = ?batch.status,
            cursor = ?self.cursor,
            "Polled ring"
        );
        PollOutcome::Records(batch.records)
    }

    /// Clear the ring unless a writer repaired it since `cause` was seen
    async fn heal(&mut self, cause: LogError) -> Result<PollOutcome, LogError> {
        let _scope = self.coordinator.write_scope(self.store.path()).await?;
        match self.store.read_since(self.cursor).await {
            Ok(batch) => {
                info!("Ring was repaired by a writer, skipping clear");
                return Ok(self.accept(batch));
            }
            Err(e) if e.is_corruption() => {}
            Err(e) => return Err(e),
        }

        self.store.clear().await?;
        self.cursor = None;
        info!("Ring cleared after corruption");
        Ok(PollOutcome::Healed { cause })
    }
}

/// Reading end of an append-only mailbox: every poll drains the file
pub struct AppendMailboxReader {
    store: AppendLogStore,
    coordinator: Arc<dyn Coordinator>,
}

impl AppendMailboxReader {
    pub fn new(store: AppendLogStore, coordinator: Arc<dyn Coordinator>) -> Self {
        Self { store, coordinator }
    }

    pub fn store(&self) -> &AppendLogStore {
        &self.store
    }

    /// Take every record currently in the log
    #[instrument(skip_all, fields(path = %self.store.path().display()))]
    pub async fn poll(&self) -> Result<PollOutcome, LogError> {
        let _scope = self.coordinator.write_scope(self.store.path()).await?;
        match self.store.drain().await {
            Ok(records) => Ok(PollOutcome::Records(records)),
            Err(e) if e.is_corruption() => {
                warn!(error = %e, "Append log is corrupt, clearing it");
                self.store.clear().await?;
                Ok(PollOutcome::Healed { cause: e })
            }
            Err(e) => Err(e),
        }
    }
}
