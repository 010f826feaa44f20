//! Append-only record log
//!
//! The simpler of the two variants: frames are appended back to back with
//! no header and the file grows without bound until a reader drains it.
//!
//! ## Storage Format
//!
//! ```text
//! [0xFE][4 bytes: len, LE][len bytes: content][0xFE][4 bytes: len, LE][...]
//! ```

mod frame_log;

pub use frame_log::AppendLogStore;
