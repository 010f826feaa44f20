//! Reader cursor for ring logs

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Position a reader has consumed up to.
///
/// The value is the ring's `write_index` as observed by the last successful
/// read, so it is always in `[0, capacity)` when it comes from the store.
/// The store never persists cursors; the reader keeps them between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(u32);

impl Cursor {
    pub const fn new(position: u32) -> Self {
        Self(position)
    }

    /// The raw slot position
    pub const fn position(self) -> u32 {
        self.0
    }
}

impl From<u32> for Cursor {
    fn from(position: u32) -> Self {
        Self(position)
    }
}

impl From<Cursor> for u32 {
    fn from(cursor: Cursor) -> Self {
        cursor.0
    }
}

impl Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_conversions() {
        let cursor = Cursor::from(42);
        assert_eq!(cursor.position(), 42);
        assert_eq!(u32::from(cursor), 42);
        assert_eq!(cursor.to_string(), "42");
        assert_eq!(Cursor::default(), Cursor::new(0));
    }

    #[test]
    fn test_cursor_serializes_as_plain_integer() {
        let json = serde_json::to_string(&Some(Cursor::new(7))).unwrap();
        assert_eq!(json, "7");
        let back: Option<Cursor> = serde_json::from_str("null").unwrap();
        assert_eq!(back, None);
    }
}
