//! Append-only frame log implementation

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use conduit_core::{LogError, RecordCodec};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::AppendLogConfig;
use crate::{LogStore, remove_if_exists};

/// Unbounded log of frames appended back to back.
///
/// There is no header, no eviction, and no cursor: readers scan the whole
/// file and usually [`drain`](Self::drain) it. Like the ring store, no file
/// handle is kept between operations.
#[derive(Debug, Clone)]
pub struct AppendLogStore {
    path: PathBuf,
    config: AppendLogConfig,
    codec: RecordCodec,
}

impl AppendLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, AppendLogConfig::default())
    }

    pub fn with_config(path: impl Into<PathBuf>, config: AppendLogConfig) -> Self {
        Self {
            path: path.into(),
            config,
            codec: RecordCodec::unbounded(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record at the end of the file.
    ///
    /// The whole frame goes out in a single write.
    #[instrument(skip_all, fields(path = %self.path.display(), len = content.len()))]
    pub async fn append(&self, content: &str) -> Result<(), LogError> {
        let frame = self.codec.encode(content)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to open log for append"))?;

        file.write_all(&frame).await?;
        if self.config.sync_on_write {
            file.sync_data().await?;
        }
        file.flush().await?;

        trace!(frame_len = frame.len(), "Appended record");
        Ok(())
    }

    /// Decode every record in the file, in write order.
    ///
    /// An absent file is an empty log. A corrupt or truncated frame anywhere
    /// fails the whole read.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn read_all(&self) -> Result<Vec<String>, LogError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let decoded = self
            .codec
            .decode_all(&bytes)
            .inspect_err(|e| warn!(error = %e, "Failed to decode append log"))?;

        if decoded.skipped_non_utf8 > 0 {
            warn!(
                skipped = decoded.skipped_non_utf8,
                "Dropped records that were not valid UTF-8"
            );
        }
        debug!(records = decoded.records.len(), bytes = bytes.len(), "Decoded append log");
        Ok(decoded.records)
    }

    /// Read everything, then delete the file.
    ///
    /// The file is only deleted after a successful read, so a failed decode
    /// leaves the evidence in place for the caller to inspect or clear.
    pub async fn drain(&self) -> Result<Vec<String>, LogError> {
        let records = self.read_all().await?;
        self.clear().await?;
        Ok(records)
    }

    /// Size of the log file in bytes; 0 when absent
    pub async fn size_bytes(&self) -> Result<u64, LogError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the log file if it exists
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn clear(&self) -> Result<(), LogError> {
        info!("Deleting append log file");
        remove_if_exists(&self.path).await
    }
}

#[async_trait]
impl LogStore for AppendLogStore {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, content: &str) -> Result<(), LogError> {
        AppendLogStore::append(self, content).await
    }

    async fn clear(&self) -> Result<(), LogError> {
        AppendLogStore::clear(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::RECORD_MAGIC;
    use tempfile::TempDir;

    fn create_test_log() -> (AppendLogStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let log = AppendLogStore::new(temp_dir.path().join("connection_info.log"));
        (log, temp_dir)
    }

    #[tokio::test]
    async fn test_absent_file_reads_empty() {
        let (log, _temp) = create_test_log();
        assert!(log.read_all().await.unwrap().is_empty());
        assert_eq!(log.size_bytes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let (log, _temp) = create_test_log();

        for i in 0..10 {
            log.append(&format!("event {i}")).await.unwrap();
        }

        let records = log.read_all().await.unwrap();
        assert_eq!(records.len(), 10);
        assert_eq!(records[0], "event 0");
        assert_eq!(records[9], "event 9");
    }

    #[tokio::test]
    async fn test_file_layout() {
        let (log, _temp) = create_test_log();
        log.append("ab").await.unwrap();
        log.append("").await.unwrap();

        let bytes = tokio::fs::read(log.path()).await.unwrap();
        assert_eq!(
            bytes,
            vec![RECORD_MAGIC, 2, 0, 0, 0, b'a', b'b', RECORD_MAGIC, 0, 0, 0, 0]
        );
        assert_eq!(log.read_all().await.unwrap(), vec!["ab", ""]);
    }

    #[tokio::test]
    async fn test_large_record_has_no_limit() {
        let (log, _temp) = create_test_log();
        let big = "y".repeat(64 * 1024);
        log.append(&big).await.unwrap();
        assert_eq!(log.read_all().await.unwrap(), vec![big]);
    }

    #[tokio::test]
    async fn test_truncated_tail_fails_whole_read() {
        let (log, _temp) = create_test_log();
        log.append("complete").await.unwrap();

        let mut bytes = tokio::fs::read(log.path()).await.unwrap();
        bytes.extend_from_slice(&[RECORD_MAGIC, 20, 0, 0, 0, b'p', b'a']);
        tokio::fs::write(log.path(), &bytes).await.unwrap();

        let err = log.read_all().await.unwrap_err();
        assert!(matches!(err, LogError::TruncatedFrame { .. }));
    }

    #[tokio::test]
    async fn test_bad_magic_fails_whole_read() {
        let (log, _temp) = create_test_log();
        log.append("one").await.unwrap();
        log.append("two").await.unwrap();

        let mut bytes = tokio::fs::read(log.path()).await.unwrap();
        bytes[8] = 0x01;
        tokio::fs::write(log.path(), &bytes).await.unwrap();

        let err = log.read_all().await.unwrap_err();
        assert!(matches!(err, LogError::CorruptFrame { offset: 8, .. }));
    }

    #[tokio::test]
    async fn test_drain_clears_on_success_only() {
        let (log, _temp) = create_test_log();
        log.append("a").await.unwrap();
        log.append("b").await.unwrap();

        assert_eq!(log.drain().await.unwrap(), vec!["a", "b"]);
        assert!(!log.path().exists());
        assert!(log.drain().await.unwrap().is_empty());

        log.append("c").await.unwrap();
        let mut bytes = tokio::fs::read(log.path()).await.unwrap();
        bytes.push(RECORD_MAGIC);
        tokio::fs::write(log.path(), &bytes).await.unwrap();

        assert!(log.drain().await.unwrap_err().is_corruption());
        assert!(log.path().exists());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let (log, _temp) = create_test_log();
        log.append("a").await.unwrap();
        log.clear().await.unwrap();
        log.clear().await.unwrap();
        assert!(log.read_all().await.unwrap().is_empty());
    }
}
