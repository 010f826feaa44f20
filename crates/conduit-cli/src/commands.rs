//! Command implementations
//!
//! Each command opens the store described by a [`MailboxConfig`] and runs
//! its operations inside scopes from a [`FileLockCoordinator`], so the tool
//! is safe to point at a file a live writer or reader is using.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use conduit_storage::{
    AppendLogStore, AppendMailboxReader, Coordinator, Cursor, FileLockCoordinator, LogError,
    LogKind, LogStore, MailboxConfig, MailboxReader, MailboxWriter, PollOutcome, ReadStatus,
    RingHeader, RingLogStore, with_read_scope, with_write_scope,
};
use tracing::{info, warn};

fn coordinator(config: &MailboxConfig) -> Arc<dyn Coordinator> {
    Arc::new(FileLockCoordinator::with_config(config.coordinator))
}

fn ring_store(config: &MailboxConfig) -> RingLogStore {
    RingLogStore::with_config(&config.path, config.ring)
}

fn append_store(config: &MailboxConfig) -> AppendLogStore {
    AppendLogStore::with_config(&config.path, config.append)
}

/// Publish every record in order; returns how many were written
pub async fn append(config: &MailboxConfig, contents: &[String]) -> anyhow::Result<usize> {
    match config.kind {
        LogKind::Ring => {
            let writer = MailboxWriter::new(ring_store(config), coordinator(config));
            publish_all(writer, contents).await
        }
        LogKind::Append => {
            let writer = MailboxWriter::new(append_store(config), coordinator(config));
            publish_all(writer, contents).await
        }
    }
}

async fn publish_all<S: LogStore>(
    writer: MailboxWriter<S>,
    contents: &[String],
) -> anyhow::Result<usize> {
    for (i, content) in contents.iter().enumerate() {
        writer
            .publish(content)
            .await
            .with_context(|| format!("Failed to append record {} of {}", i + 1, contents.len()))?;
    }
    info!(
        records = contents.len(),
        path = %writer.store().path().display(),
        "Published records"
    );
    Ok(contents.len())
}

/// Result of a one-shot read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutput {
    pub records: Vec<String>,
    /// Cursor for the next read; rings only
    pub cursor: Option<Cursor>,
    pub status: Option<ReadStatus>,
}

/// Read the log once without modifying it
pub async fn read(config: &MailboxConfig, cursor: Option<Cursor>) -> anyhow::Result<ReadOutput> {
    let coordinator = coordinator(config);
    let output = match config.kind {
        LogKind::Ring => {
            let store = ring_store(config);
            let batch = with_read_scope(coordinator.as_ref(), store.path(), || {
                store.read_since(cursor)
            })
            .await;
            let batch = corruption_hint(batch, &config.path)?;
            ReadOutput {
                records: batch.records,
                cursor: Some(batch.cursor),
                status: Some(batch.status),
            }
        }
        LogKind::Append => {
            let store = append_store(config);
            let records =
                with_read_scope(coordinator.as_ref(), store.path(), || store.read_all()).await;
            ReadOutput {
                records: corruption_hint(records, &config.path)?,
                cursor: None,
                status: None,
            }
        }
    };
    Ok(output)
}

fn corruption_hint<T>(result: Result<T, LogError>, path: &Path) -> anyhow::Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_corruption() => Err(e).with_context(|| {
            format!("{} is corrupt; run `conduit clear` to reset it", path.display())
        }),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Poll the log until `shutdown` resolves, handing every record to `sink`.
///
/// Rings are followed with a cursor; append logs are drained on every poll.
/// Corruption is healed by clearing the file and reported through `warn!`.
pub async fn tail<F, Fut>(
    config: &MailboxConfig,
    interval: Duration,
    cursor: Option<Cursor>,
    mut sink: F,
    shutdown: Fut,
) -> anyhow::Result<usize>
where
    F: FnMut(&str),
    Fut: std::future::Future<Output = ()>,
{
    let mut source = match config.kind {
        LogKind::Ring => TailSource::Ring(
            MailboxReader::new(ring_store(config), coordinator(config)).with_cursor(cursor),
        ),
        LogKind::Append => TailSource::Append(AppendMailboxReader::new(
            append_store(config),
            coordinator(config),
        )),
    };

    let mut delivered = 0;
    let mut ticker = tokio::time::interval(interval);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        match source.poll().await? {
            PollOutcome::Records(records) => {
                for record in &records {
                    sink(record);
                }
                delivered += records.len();
            }
            PollOutcome::Healed { cause } => {
                warn!(
                    error = %cause,
                    path = %config.path.display(),
                    "Log was corrupt and has been cleared"
                );
            }
        }
    }

    info!(delivered, "Stopped tailing");
    Ok(delivered)
}

enum TailSource {
    Ring(MailboxReader),
    Append(AppendMailboxReader),
}

impl TailSource {
    async fn poll(&mut self) -> anyhow::Result<PollOutcome> {
        let outcome = match self {
            TailSource::Ring(reader) => reader.poll().await?,
            TailSource::Append(reader) => reader.poll().await?,
        };
        Ok(outcome)
    }
}

/// Delete the log file under a write scope
pub async fn clear(config: &MailboxConfig) -> anyhow::Result<()> {
    let coordinator = coordinator(config);
    let result = match config.kind {
        LogKind::Ring => {
            let store = ring_store(config);
            with_write_scope(coordinator.as_ref(), store.path(), || store.clear()).await
        }
        LogKind::Append => {
            let store = append_store(config);
            with_write_scope(coordinator.as_ref(), store.path(), || store.clear()).await
        }
    };
    result.with_context(|| format!("Failed to clear {}", config.path.display()))
}

/// What `inspect` found
#[derive(Debug)]
pub enum Inspection {
    Ring {
        path: PathBuf,
        capacity: u32,
        max_content_len: u32,
        slot_size: u64,
        expected_size: u64,
        actual_size: Option<u64>,
        header: Option<RingHeader>,
        problem: Option<String>,
    },
    Append {
        path: PathBuf,
        size_bytes: u64,
        records: Result<usize, String>,
    },
}

/// Describe a log file without modifying it
pub async fn inspect(config: &MailboxConfig) -> anyhow::Result<Inspection> {
    let coordinator = coordinator(config);
    let _scope = coordinator.read_scope(&config.path).await?;

    let inspection = match config.kind {
        LogKind::Ring => {
            let store = ring_store(config);
            let actual_size = match tokio::fs::metadata(&config.path).await {
                Ok(meta) => Some(meta.len()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e).context("Failed to stat ring file"),
            };
            let header = store.header().await?;
            let problem = match (actual_size, &header) {
                (Some(size), _) if size != config.ring.file_size() => {
                    Some(format!("size {size} does not match the configured geometry"))
                }
                (_, Some(header)) => header.validate(&config.ring).err().map(|e| e.to_string()),
                _ => None,
            };
            Inspection::Ring {
                path: config.path.clone(),
                capacity: config.ring.capacity,
                max_content_len: config.ring.max_content_len,
                slot_size: config.ring.slot_size(),
                expected_size: config.ring.file_size(),
                actual_size,
                header,
                problem,
            }
        }
        LogKind::Append => {
            let store = append_store(config);
            Inspection::Append {
                path: config.path.clone(),
                size_bytes: store.size_bytes().await?,
                records: store.read_all().await.map(|r| r.len()).map_err(|e| e.to_string()),
            }
        }
    };
    Ok(inspection)
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inspection::Ring {
                path,
                capacity,
                max_content_len,
                slot_size,
                expected_size,
                actual_size,
                header,
                problem,
            } => {
                writeln!(f, "ring:          {}", path.display())?;
                writeln!(f, "capacity:      {capacity}")?;
                writeln!(f, "max content:   {max_content_len}")?;
                writeln!(f, "slot size:     {slot_size}")?;
                writeln!(f, "expected size: {expected_size}")?;
                match actual_size {
                    Some(size) => writeln!(f, "file size:     {size}")?,
                    None => writeln!(f, "file size:     (absent)")?,
                }
                if let Some(header) = header {
                    writeln!(f, "write index:   {}", header.write_index)?;
                    writeln!(f, "count:         {}", header.count)?;
                    writeln!(f, "header bytes:  {}", hex::encode(header.encode()))?;
                }
                match problem {
                    Some(problem) => write!(f, "status:        corrupt ({problem})"),
                    None => write!(f, "status:        ok"),
                }
            }
            Inspection::Append {
                path,
                size_bytes,
                records,
            } => {
                writeln!(f, "append log:    {}", path.display())?;
                writeln!(f, "file size:     {size_bytes}")?;
                match records {
                    Ok(count) => write!(f, "records:       {count}"),
                    Err(problem) => write!(f, "status:        corrupt ({problem})"),
                }
            }
        }
    }
}

/// Write `config` as TOML to `out`
pub fn init_config(config: &MailboxConfig, out: &Path, force: bool) -> anyhow::Result<()> {
    if out.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", out.display());
    }
    let text = config.to_toml_string()?;
    std::fs::write(out, text).with_context(|| format!("Failed to write {}", out.display()))?;
    Ok(())
}
