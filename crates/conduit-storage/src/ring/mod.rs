//! Fixed-capacity ring log
//!
//! A ring file is pre-allocated on first append and never changes size:
//!
//! ```text
//! [header: 8 bytes][slot 0][slot 1]...[slot capacity-1]
//! slot = [magic: 1][length: 4][content: max_content_len]
//! ```
//!
//! Readers resume from a [`Cursor`](conduit_core::Cursor) they keep
//! themselves; the ring only knows where the next write goes and how many
//! slots are valid.

mod header;
mod store;

pub use header::{HEADER_SIZE, RingHeader};
pub use store::{ReadBatch, ReadStatus, RingLogStore};
