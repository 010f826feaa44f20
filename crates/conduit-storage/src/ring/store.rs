//! Fixed-capacity ring log

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use conduit_core::{Cursor, LogError, RecordCodec};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, instrument, trace, warn};

use super::header::{HEADER_SIZE, RingHeader};
use crate::{LogStore, remove_if_exists};
use crate::config::RingConfig;

/// How a [`ReadBatch`] came about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Records (possibly none) were decoded since the cursor
    Delivered,
    /// The file is absent or holds no records yet
    Empty,
    /// The cursor could not describe a position in this ring; it was moved
    /// to the current write position and nothing was decoded
    Resynchronized,
}

/// Result of [`RingLogStore::read_since`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBatch {
    /// Records in write order, oldest first
    pub records: Vec<String>,
    /// Cursor to pass to the next read
    pub cursor: Cursor,
    pub status: ReadStatus,
    /// Frames dropped because their payload was not UTF-8
    pub skipped_non_utf8: usize,
}

impl ReadBatch {
    fn empty() -> Self {
        Self {
            records: Vec::new(),
            cursor: Cursor::default(),
            status: ReadStatus::Empty,
            skipped_non_utf8: 0,
        }
    }

    fn resynchronized(write_index: u32) -> Self {
        Self {
            records: Vec::new(),
            cursor: Cursor::new(write_index),
            status: ReadStatus::Resynchronized,
            skipped_non_utf8: 0,
        }
    }
}

/// Fixed-capacity circular log in a single pre-allocated file.
///
/// Layout: an 8-byte [`RingHeader`] followed by `capacity` slots of
/// `5 + max_content_len` bytes. Each slot holds one frame. Once the ring is
/// full every append overwrites the oldest record.
///
/// The store holds no open handle and caches nothing: each operation opens
/// the file, acts, and closes it. Callers must run each operation inside a
/// coordinated scope; the store does no locking of its own.
#[derive(Debug, Clone)]
pub struct RingLogStore {
    path: PathBuf,
    config: RingConfig,
    codec: RecordCodec,
}

impl RingLogStore {
    /// Create a store with the default geometry (500 slots of 1024 bytes)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, RingConfig::default())
    }

    /// Create a store with a custom geometry
    pub fn with_config(path: impl Into<PathBuf>, config: RingConfig) -> Self {
        Self {
            path: path.into(),
            codec: RecordCodec::bounded(config.max_content_len),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// Append one record, evicting the oldest once the ring is full.
    ///
    /// The record is written to its slot before the header is updated, so a
    /// crash in between leaves the record uncounted rather than the ring
    /// corrupted.
    #[instrument(skip_all, fields(path = %self.path.display(), len = content.len()))]
    pub async fn append(&self, content: &str) -> Result<(), LogError> {
        self.config.validate()?;
        let frame = self
            .codec
            .encode(content)
            .inspect_err(|e| warn!(error = %e, "Can't write record to ring"))?;

        let mut file = self.open_for_append().await?;
        let header = self.header_for_append(&mut file).await?;

        let slot_offset = self.config.slot_offset(header.write_index);
        file.seek(SeekFrom::Start(slot_offset)).await?;
        file.write_all(&frame).await?;

        let next = header.advance(&self.config);
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(&next.encode()).await?;

        if self.config.sync_on_write {
            file.sync_data().await?;
        }
        file.flush().await?;

        trace!(
            slot = header.write_index,
            write_index = next.write_index,
            count = next.count,
            "Appended record"
        );
        Ok(())
    }

    /// Open the ring for update, creating or re-initializing it as needed.
    ///
    /// A missing or empty file becomes a zero-filled ring. A file of any
    /// other wrong size was written with a different geometry and cannot be
    /// interpreted, so it is wiped.
    async fn open_for_append(&self) -> Result<File, LogError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await?;

        let expected = self.config.file_size();
        let actual = file.metadata().await?.len();
        if actual == 0 {
            info!(
                path = %self.path.display(),
                size = expected,
                capacity = self.config.capacity,
                "Creating ring buffer file"
            );
            file.set_len(expected).await?;
        } else if actual != expected {
            warn!(
                path = %self.path.display(),
                actual,
                expected,
                "Ring file has unexpected size, re-initializing"
            );
            file.set_len(0).await?;
            file.set_len(expected).await?;
        }

        Ok(file)
    }

    /// Header to append against; anything unusable counts as an empty ring
    async fn header_for_append(&self, file: &mut File) -> Result<RingHeader, LogError> {
        let mut buf = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0)).await?;
        let header = match file.read_exact(&mut buf).await {
            Ok(_) => RingHeader::decode(&buf).unwrap_or(RingHeader::EMPTY),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => RingHeader::EMPTY,
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = header.validate(&self.config) {
            warn!(error = %e, "Resetting corrupt ring header before append");
            return Ok(RingHeader::EMPTY);
        }
        Ok(header)
    }

    /// Read the records written since `cursor`.
    ///
    /// With no cursor, the whole ring is returned, oldest survivor first.
    /// Any corrupt slot fails the whole read; a fixed-offset layout gives no
    /// way to tell which of the remaining slots can still be trusted.
    #[instrument(skip_all, fields(path = %self.path.display(), cursor = ?cursor))]
    pub async fn read_since(&self, cursor: Option<Cursor>) -> Result<ReadBatch, LogError> {
        self.config.validate()?;
        let Some((mut file, header)) = self.open_for_read().await? else {
            return Ok(ReadBatch::empty());
        };

        if let Err(e) = header.validate(&self.config) {
            warn!(error = %e, "Ring header failed validation");
            return Err(e);
        }
        if header.count == 0 {
            return Ok(ReadBatch::empty());
        }

        let capacity = self.config.capacity;
        let (start, to_read) = match cursor {
            None => (header.oldest_slot(&self.config), header.count),
            Some(cursor) => {
                if cursor.position() >= capacity {
                    let err = LogError::InvalidCursor {
                        cursor: cursor.position(),
                        capacity,
                    };
                    warn!(error = %err, write_index = header.write_index, "Resynchronizing reader");
                    return Ok(ReadBatch::resynchronized(header.write_index));
                }
                let to_read = header.slots_since(cursor, &self.config);
                if to_read > header.count {
                    warn!(
                        cursor = cursor.position(),
                        write_index = header.write_index,
                        count = header.count,
                        "Cursor points at unwritten slots, resynchronizing reader"
                    );
                    return Ok(ReadBatch::resynchronized(header.write_index));
                }
                (cursor.position(), to_read)
            }
        };

        let mut records = Vec::with_capacity(to_read as usize);
        let mut skipped_non_utf8 = 0;
        let mut slot = vec![0u8; self.config.slot_size() as usize];

        for i in 0..to_read {
            let index = (start + i) % capacity;
            match self.read_slot(&mut file, index, &mut slot).await? {
                Some(content) => records.push(content),
                None => skipped_non_utf8 += 1,
            }
        }

        if skipped_non_utf8 > 0 {
            warn!(skipped = skipped_non_utf8, "Dropped records that were not valid UTF-8");
        }
        debug!(
            records = records.len(),
            write_index = header.write_index,
            count = header.count,
            "Decoded ring records"
        );

        Ok(ReadBatch {
            records,
            cursor: Cursor::new(header.write_index),
            status: ReadStatus::Delivered,
            skipped_non_utf8,
        })
    }

    /// Open the ring read-only and decode its header.
    ///
    /// `None` means there is nothing to read: the file is absent, or it was
    /// created but never sized.
    async fn open_for_read(&self) -> Result<Option<(File, RingHeader)>, LogError> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let actual = file.metadata().await?.len();
        if actual == 0 {
            return Ok(None);
        }

        let mut buf = [0u8; HEADER_SIZE];
        let header = if actual >= HEADER_SIZE as u64 {
            file.read_exact(&mut buf).await?;
            RingHeader::decode(&buf).unwrap_or(RingHeader::EMPTY)
        } else {
            RingHeader::EMPTY
        };

        if actual != self.config.file_size() {
            warn!(
                actual,
                expected = self.config.file_size(),
                "Ring file has unexpected size"
            );
            return Err(LogError::CorruptHeader {
                write_index: header.write_index,
                count: header.count,
                capacity: self.config.capacity,
            });
        }

        Ok(Some((file, header)))
    }

    /// Decode the frame in slot `index`; `None` for a non-UTF-8 payload
    async fn read_slot(
        &self,
        file: &mut File,
        index: u32,
        slot: &mut [u8],
    ) -> Result<Option<String>, LogError> {
        let offset = self.config.slot_offset(index);
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(slot).await?;

        let frame = self
            .codec
            .decode_at(slot, 0)
            .map_err(|e| e.with_base_offset(offset))
            .inspect_err(|e| warn!(slot = index, error = %e, "Data corruption detected"))?;
        Ok(frame.content)
    }

    /// Current header, without validation; `None` when there is no ring yet
    pub async fn header(&self) -> Result<Option<RingHeader>, LogError> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut buf = [0u8; HEADER_SIZE];
        match file.read_exact(&mut buf).await {
            Ok(_) => Ok(RingHeader::decode(&buf)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the ring file; the next append starts a fresh, empty ring
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn clear(&self) -> Result<(), LogError> {
        info!("Deleting ring buffer file");
        remove_if_exists(&self.path).await
    }
}

#[async_trait]
impl LogStore for RingLogStore {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, content: &str) -> Result<(), LogError> {
        RingLogStore::append(self, content).await
    }

    async fn clear(&self) -> Result<(), LogError> {
        RingLogStore::clear(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_ring(dir: &TempDir, capacity: u32) -> RingLogStore {
        RingLogStore::with_config(dir.path().join("info.ring"), RingConfig::new(capacity, 32))
    }

    async fn append_all(store: &RingLogStore, contents: impl IntoIterator<Item = String>) {
        for content in contents {
            store.append(&content).await.unwrap();
        }
    }

    fn numbered(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("record-{i}")).collect()
    }

    #[tokio::test]
    async fn test_absent_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);

        let batch = store.read_since(None).await.unwrap();
        assert_eq!(batch.status, ReadStatus::Empty);
        assert!(batch.records.is_empty());
        assert_eq!(batch.cursor, Cursor::new(0));
        assert_eq!(store.header().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_first_append_preallocates() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);

        store.append("A").await.unwrap();

        let len = tokio::fs::metadata(store.path()).await.unwrap().len();
        assert_eq!(len, 8 + 5 * 37);
        assert_eq!(
            store.header().await.unwrap(),
            Some(RingHeader { write_index: 1, count: 1 })
        );
    }

    #[tokio::test]
    async fn test_append_then_read_all() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);

        store.append("A").await.unwrap();
        store.append("B").await.unwrap();

        let batch = store.read_since(None).await.unwrap();
        assert_eq!(batch.records, vec!["A", "B"]);
        assert_eq!(batch.cursor, Cursor::new(2));
        assert_eq!(batch.status, ReadStatus::Delivered);
    }

    #[tokio::test]
    async fn test_wraparound_keeps_latest_capacity() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);
        append_all(&store, numbered(0..7)).await;

        let batch = store.read_since(None).await.unwrap();
        assert_eq!(batch.records, numbered(2..7));
        assert_eq!(batch.cursor, Cursor::new(2));
    }

    #[tokio::test]
    async fn test_cursor_resume() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);
        append_all(&store, numbered(0..3)).await;

        let first = store.read_since(None).await.unwrap();
        assert_eq!(first.records, numbered(0..3));

        append_all(&store, numbered(3..6)).await;
        let second = store.read_since(Some(first.cursor)).await.unwrap();
        assert_eq!(second.records, numbered(3..6));
        assert_eq!(second.cursor, Cursor::new(1));

        let third = store.read_since(Some(second.cursor)).await.unwrap();
        assert!(third.records.is_empty());
        assert_eq!(third.cursor, second.cursor);
        assert_eq!(third.status, ReadStatus::Delivered);
    }

    // A crash between the slot write and the header update leaves a frame
    // the header does not count.
    #[tokio::test]
    async fn test_frame_without_header_update_is_invisible() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);
        append_all(&store, numbered(0..2)).await;
        let before = store.header().await.unwrap();

        let frame = RecordCodec::bounded(32).encode("uncommitted record").unwrap();
        let mut bytes = std::fs::read(store.path()).unwrap();
        let offset = store.config().slot_offset(2) as usize;
        bytes[offset..offset + frame.len()].copy_from_slice(&frame);
        std::fs::write(store.path(), &bytes).unwrap();
        assert_eq!(store.header().await.unwrap(), before);

        let batch = store.read_since(None).await.unwrap();
        assert_eq!(batch.records, numbered(0..2));
        assert_eq!(batch.cursor, Cursor::new(2));

        let since_start = store.read_since(Some(Cursor::new(0))).await.unwrap();
        assert_eq!(since_start.records, numbered(0..2));
        let since_last = store.read_since(Some(batch.cursor)).await.unwrap();
        assert!(since_last.records.is_empty());
        assert_eq!(since_last.status, ReadStatus::Delivered);

        // The next append reuses the slot
        store.append("C").await.unwrap();
        let after = store.read_since(Some(batch.cursor)).await.unwrap();
        assert_eq!(after.records, vec!["C"]);
        assert_eq!(
            store.read_since(None).await.unwrap().records,
            vec!["record-0", "record-1", "C"]
        );
    }

    #[tokio::test]
    async fn test_shorter_record_over_longer_one() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 2);

        store.append("a much longer first record").await.unwrap();
        store.append("second").await.unwrap();
        store.append("x").await.unwrap();

        let batch = store.read_since(None).await.unwrap();
        assert_eq!(batch.records, vec!["second", "x"]);
    }

    #[tokio::test]
    async fn test_rejects_oversized_and_empty_records() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);

        let err = store.append(&"x".repeat(32)).await.unwrap_err();
        assert!(matches!(err, LogError::ContentTooLong { len: 32, max: 32 }));
        assert!(matches!(store.append("").await, Err(LogError::EmptyRecord)));

        // Rejected before any I/O
        assert!(!store.path().exists());

        store.append(&"x".repeat(31)).await.unwrap();
        assert_eq!(store.read_since(None).await.unwrap().records.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_cursor_resynchronizes() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);
        append_all(&store, numbered(0..3)).await;

        let batch = store.read_since(Some(Cursor::new(5))).await.unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.cursor, Cursor::new(3));
        assert_eq!(batch.status, ReadStatus::Resynchronized);
    }

    #[tokio::test]
    async fn test_cursor_past_written_slots_resynchronizes() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);
        append_all(&store, numbered(0..2)).await;

        let batch = store.read_since(Some(Cursor::new(4))).await.unwrap();
        assert_eq!(batch.status, ReadStatus::Resynchronized);
        assert_eq!(batch.cursor, Cursor::new(2));
    }

    #[tokio::test]
    async fn test_zeroed_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);
        let file = std::fs::File::create(store.path()).unwrap();
        file.set_len(store.config().file_size()).unwrap();

        let batch = store.read_since(Some(Cursor::new(3))).await.unwrap();
        assert_eq!(batch.status, ReadStatus::Empty);
        assert_eq!(batch.cursor, Cursor::new(0));
    }

    #[tokio::test]
    async fn test_corrupt_magic_fails_whole_read() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);
        append_all(&store, numbered(0..4)).await;

        let mut bytes = std::fs::read(store.path()).unwrap();
        let offset = store.config().slot_offset(2) as usize;
        bytes[offset] = 0x00;
        std::fs::write(store.path(), &bytes).unwrap();

        let err = store.read_since(None).await.unwrap_err();
        assert!(err.is_corruption());
        assert!(matches!(err, LogError::CorruptFrame { offset: o, .. } if o == offset as u64));

        // A cursor past the corrupt slot never touches it
        let batch = store.read_since(Some(Cursor::new(3))).await.unwrap();
        assert_eq!(batch.records, vec!["record-3"]);
    }

    #[tokio::test]
    async fn test_corrupt_length_fails_whole_read() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);
        append_all(&store, numbered(0..2)).await;

        let mut bytes = std::fs::read(store.path()).unwrap();
        let offset = store.config().slot_offset(1) as usize;
        bytes[offset + 1..offset + 5].copy_from_slice(&999u32.to_le_bytes());
        std::fs::write(store.path(), &bytes).unwrap();

        let err = store.read_since(None).await.unwrap_err();
        assert!(matches!(err, LogError::CorruptFrame { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_header_is_reported_then_reset_by_writer() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);
        append_all(&store, numbered(0..3)).await;

        let mut bytes = std::fs::read(store.path()).unwrap();
        bytes[0..4].copy_from_slice(&77u32.to_le_bytes());
        std::fs::write(store.path(), &bytes).unwrap();

        let err = store.read_since(None).await.unwrap_err();
        assert!(matches!(err, LogError::CorruptHeader { write_index: 77, .. }));

        store.append("fresh").await.unwrap();
        let batch = store.read_since(None).await.unwrap();
        assert_eq!(batch.records, vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_wrong_file_size_is_corrupt_for_reader() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);
        store.append("A").await.unwrap();

        let other = RingLogStore::with_config(store.path(), RingConfig::new(7, 32));
        let err = other.read_since(None).await.unwrap_err();
        assert!(matches!(err, LogError::CorruptHeader { .. }));

        // The writer re-initializes to its own geometry
        other.append("B").await.unwrap();
        assert_eq!(other.read_since(None).await.unwrap().records, vec!["B"]);
    }

    #[tokio::test]
    async fn test_non_utf8_slot_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);
        append_all(&store, numbered(0..3)).await;

        let mut bytes = std::fs::read(store.path()).unwrap();
        let offset = store.config().slot_offset(1) as usize;
        bytes[offset + 5] = 0xFF;
        std::fs::write(store.path(), &bytes).unwrap();

        let batch = store.read_since(None).await.unwrap();
        assert_eq!(batch.records, vec!["record-0", "record-2"]);
        assert_eq!(batch.skipped_non_utf8, 1);
        assert_eq!(batch.cursor, Cursor::new(3));
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = small_ring(&dir, 5);
        store.append("A").await.unwrap();

        store.clear().await.unwrap();
        assert!(!store.path().exists());
        store.clear().await.unwrap();

        store.append("B").await.unwrap();
        assert_eq!(store.read_since(None).await.unwrap().records, vec!["B"]);
    }
}
