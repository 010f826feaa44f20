//! Error types for conduit
//!
//! Every failure a log store can report is a [`LogError`]. Callers that only
//! care about "did it work" can treat any `Err` as the failure signal; callers
//! that self-heal check [`LogError::is_corruption`] and clear the file.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while reading or writing a record log
#[derive(Debug, Error)]
pub enum LogError {
    /// Record content does not fit into a ring slot
    #[error("Record too long: {len} bytes, limit is {max} (exclusive)")]
    ContentTooLong { len: usize, max: usize },

    /// Ring records must carry at least one byte of content
    #[error("Empty record rejected by bounded log")]
    EmptyRecord,

    /// I/O error during a file operation
    #[error("I/O error: {0}")]
    Io(String),

    /// Magic byte mismatch or a length outside the accepted range
    #[error("Corrupt frame at offset {offset}: {reason}")]
    CorruptFrame { offset: u64, reason: String },

    /// The source ended before the frame did
    #[error("Truncated frame at offset {offset}: needed {needed} bytes, {available} available")]
    TruncatedFrame {
        offset: u64,
        needed: usize,
        available: usize,
    },

    /// Cursor outside `[0, capacity)`
    #[error("Invalid cursor {cursor} for capacity {capacity}")]
    InvalidCursor { cursor: u32, capacity: u32 },

    /// Ring header fields outside their ranges, or a file of the wrong size
    #[error("Corrupt ring header: write_index={write_index}, count={count}, capacity={capacity}")]
    CorruptHeader {
        write_index: u32,
        count: u32,
        capacity: u32,
    },

    /// Configuration values that cannot describe a log
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A coordinated scope could not be acquired
    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),
}

/// Errors raised while acquiring cross-process access to a log file
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The lock stayed contended until the deadline
    #[error("Timed out after {waited:?} waiting for {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    /// The lock file could not be opened or locked
    #[error("Failed to lock {path}: {message}")]
    Lock { path: PathBuf, message: String },
}

impl From<std::io::Error> for LogError {
    fn from(err: std::io::Error) -> Self {
        LogError::Io(err.to_string())
    }
}

impl LogError {
    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Create a new CorruptFrame error
    pub fn corrupt_frame(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptFrame {
            offset,
            reason: reason.into(),
        }
    }

    /// Shift the offset of a frame error by `base`.
    ///
    /// Frames decoded from a buffer that was read at a file offset report
    /// buffer-relative offsets; this turns them into file offsets.
    pub fn with_base_offset(self, base: u64) -> Self {
        match self {
            LogError::CorruptFrame { offset, reason } => LogError::CorruptFrame {
                offset: base + offset,
                reason,
            },
            LogError::TruncatedFrame {
                offset,
                needed,
                available,
            } => LogError::TruncatedFrame {
                offset: base + offset,
                needed,
                available,
            },
            other => other,
        }
    }

    /// Whether the log file contents can no longer be trusted.
    ///
    /// The remedy for these errors is to clear the file and restart without
    /// a cursor.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            LogError::CorruptFrame { .. }
                | LogError::TruncatedFrame { .. }
                | LogError::CorruptHeader { .. }
        )
    }
}
