//! # Conduit Core
//!
//! Framing, cursors, and errors shared by the conduit log stores.
//!
//! Conduit carries small text records (diagnostic and connection-info
//! events) from one writer process to one reader process through a shared
//! file. This crate holds the pieces both sides agree on:
//!
//! - [`RecordCodec`]: the `[magic][length][content]` frame format
//! - [`Cursor`]: the reader's position in a ring log
//! - [`LogError`]: everything that can go wrong, with
//!   [`LogError::is_corruption`] marking the errors whose remedy is a clear

pub mod codec;
pub mod cursor;
pub mod error;

pub use codec::{
    DecodedFrame, DecodedRecords, FRAME_PREFIX_SIZE, LENGTH_SIZE, LengthPolicy, RECORD_MAGIC,
    RecordCodec,
};
pub use cursor::Cursor;
pub use error::{CoordinationError, LogError};
