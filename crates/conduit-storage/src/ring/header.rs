//! Ring file header
//!
//! Fixed 8 bytes at offset 0, little-endian:
//!
//! ```text
//! [write_index: u32][count: u32]
//! ```
//!
//! A zero-filled file decodes as an empty ring.

use conduit_core::{Cursor, LogError};

use crate::config::RingConfig;

/// Size of the encoded header
pub const HEADER_SIZE: usize = 8;

/// Ring position state, the only coordination data shared by both processes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingHeader {
    /// Next slot to write, in `[0, capacity)`
    pub write_index: u32,
    /// Number of valid slots, in `[0, capacity]`
    pub count: u32,
}

impl RingHeader {
    pub const EMPTY: Self = Self {
        write_index: 0,
        count: 0,
    };

    /// Decode a header, or `None` if `buf` is too short
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let bytes: &[u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self {
            write_index: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            count: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.write_index.to_le_bytes());
        buf[4..8].copy_from_slice(&self.count.to_le_bytes());
        buf
    }

    /// Check the header against the ring geometry.
    ///
    /// Until the ring first wraps, slots fill from 0 upwards, so a ring that
    /// is not full must have `write_index == count`.
    pub fn validate(&self, config: &RingConfig) -> Result<(), LogError> {
        let capacity = config.capacity;
        let consistent = self.write_index < capacity
            && self.count <= capacity
            && (self.count == capacity || self.write_index == self.count);
        if consistent {
            Ok(())
        } else {
            Err(LogError::CorruptHeader {
                write_index: self.write_index,
                count: self.count,
                capacity,
            })
        }
    }

    pub fn is_full(&self, config: &RingConfig) -> bool {
        self.count == config.capacity
    }

    /// Header after one more record has been written at `write_index`.
    ///
    /// Once full, the count stays at capacity and the slot just written held
    /// the oldest record.
    pub fn advance(self, config: &RingConfig) -> Self {
        Self {
            write_index: (self.write_index + 1) % config.capacity,
            count: (self.count + 1).min(config.capacity),
        }
    }

    /// Slots written since a reader observed `cursor`, modulo capacity.
    ///
    /// The caller must have checked `cursor < capacity`.
    pub fn slots_since(&self, cursor: Cursor, config: &RingConfig) -> u32 {
        let cursor = cursor.position();
        if cursor <= self.write_index {
            self.write_index - cursor
        } else {
            (config.capacity - cursor) + self.write_index
        }
    }

    /// Slot holding the oldest surviving record
    pub fn oldest_slot(&self, config: &RingConfig) -> u32 {
        if self.is_full(config) {
            self.write_index
        } else {
            0
        }
    }
}
