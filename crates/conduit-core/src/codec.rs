//! Record framing
//!
//! Every record on disk is one frame:
//!
//! ```text
//! [magic: 1 byte = 0xFE][length: 4 bytes, little-endian][content: length bytes]
//! ```
//!
//! The same framing is used by both log variants. They differ only in which
//! lengths they accept, captured by [`LengthPolicy`].

use crate::error::LogError;

/// Sentinel byte that starts every frame
pub const RECORD_MAGIC: u8 = 0xFE;

/// Size of the length field
pub const LENGTH_SIZE: usize = 4;

/// Magic byte plus length field
pub const FRAME_PREFIX_SIZE: usize = 1 + LENGTH_SIZE;

/// Which content lengths a codec accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthPolicy {
    /// Fixed-slot logs: `0 < length` on both sides, `length < max` when
    /// encoding and `length <= max` when decoding.
    Bounded { max: u32 },
    /// Growing logs: any length that fits in the remaining source.
    Unbounded,
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// The content, or `None` when the payload is not valid UTF-8
    pub content: Option<String>,
    /// Total bytes the frame occupies, prefix included
    pub consumed: usize,
}

/// Result of scanning a buffer of consecutive frames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedRecords {
    /// Records in write order
    pub records: Vec<String>,
    /// Frames that decoded fine but whose payload was not UTF-8
    pub skipped_non_utf8: usize,
}

/// Encoder/decoder for framed records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCodec {
    policy: LengthPolicy,
}

impl RecordCodec {
    /// Codec for fixed-size slots holding at most `max_content_len` bytes
    pub const fn bounded(max_content_len: u32) -> Self {
        Self {
            policy: LengthPolicy::Bounded {
                max: max_content_len,
            },
        }
    }

    /// Codec for the append-only log
    pub const fn unbounded() -> Self {
        Self {
            policy: LengthPolicy::Unbounded,
        }
    }

    pub fn policy(&self) -> LengthPolicy {
        self.policy
    }

    /// Size of the frame that `content_len` bytes of content produce
    pub const fn frame_size(content_len: usize) -> usize {
        FRAME_PREFIX_SIZE + content_len
    }

    /// Encode a record into a new frame buffer
    pub fn encode(&self, content: &str) -> Result<Vec<u8>, LogError> {
        let mut buf = Vec::with_capacity(Self::frame_size(content.len()));
        self.encode_into(content, &mut buf)?;
        Ok(buf)
    }

    /// Append the frame for `content` to `buf`.
    ///
    /// Nothing is written to `buf` when the content is rejected.
    pub fn encode_into(&self, content: &str, buf: &mut Vec<u8>) -> Result<(), LogError> {
        let bytes = content.as_bytes();
        if let LengthPolicy::Bounded { max } = self.policy {
            if bytes.is_empty() {
                return Err(LogError::EmptyRecord);
            }
            if bytes.len() >= max as usize {
                return Err(LogError::ContentTooLong {
                    len: bytes.len(),
                    max: max as usize,
                });
            }
        }
        let length = u32::try_from(bytes.len()).map_err(|_| LogError::ContentTooLong {
            len: bytes.len(),
            max: u32::MAX as usize,
        })?;

        buf.reserve(Self::frame_size(bytes.len()));
        buf.push(RECORD_MAGIC);
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Decode the frame starting at `offset` in `source`.
    ///
    /// Bytes after the declared length are never looked at, so a fixed slot
    /// may carry stale trailing bytes from an earlier, longer record.
    pub fn decode_at(&self, source: &[u8], offset: usize) -> Result<DecodedFrame, LogError> {
        let available = source.len().saturating_sub(offset);
        let at = offset as u64;

        if available < 1 {
            return Err(LogError::TruncatedFrame {
                offset: at,
                needed: 1,
                available,
            });
        }
        let magic = source[offset];
        if magic != RECORD_MAGIC {
            return Err(LogError::corrupt_frame(
                at,
                format!("invalid magic byte {magic:#04x}"),
            ));
        }

        if available < FRAME_PREFIX_SIZE {
            return Err(LogError::TruncatedFrame {
                offset: at,
                needed: FRAME_PREFIX_SIZE,
                available,
            });
        }
        let mut len_buf = [0u8; LENGTH_SIZE];
        len_buf.copy_from_slice(&source[offset + 1..offset + FRAME_PREFIX_SIZE]);
        let length = u32::from_le_bytes(len_buf);

        if let LengthPolicy::Bounded { max } = self.policy
            && (length == 0 || length > max)
        {
            return Err(LogError::corrupt_frame(
                at,
                format!("invalid record length {length}, accepted range is 1..={max}"),
            ));
        }

        let needed = Self::frame_size(length as usize);
        if available < needed {
            return Err(LogError::TruncatedFrame {
                offset: at,
                needed,
                available,
            });
        }

        let payload = &source[offset + FRAME_PREFIX_SIZE..offset + needed];
        Ok(DecodedFrame {
            content: std::str::from_utf8(payload).ok().map(str::to_owned),
            consumed: needed,
        })
    }

    /// Decode consecutive frames from offset 0 to the end of `source`.
    ///
    /// Any corrupt or incomplete frame fails the whole scan; no partial
    /// result is returned.
    pub fn decode_all(&self, source: &[u8]) -> Result<DecodedRecords, LogError> {
        let mut decoded = DecodedRecords::default();
        let mut offset = 0;

        while offset < source.len() {
            let frame = self.decode_at(source, offset)?;
            match frame.content {
                Some(content) => decoded.records.push(content),
                None => decoded.skipped_non_utf8 += 1,
            }
            offset += frame.consumed;
        }

        Ok(decoded)
    }
}
