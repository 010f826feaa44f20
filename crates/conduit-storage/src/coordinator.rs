//! Cross-process access coordination
//!
//! The stores do no locking. Every operation on a shared log file must run
//! inside a scope handed out by a [`Coordinator`]: exclusive for writes and
//! clears, shared for reads. Holding the returned [`ScopeGuard`] is holding
//! the scope; dropping it ends the scope.
//!
//! [`FileLockCoordinator`] implements this with advisory locks on a sidecar
//! `<log>.lock` file. Locking the sidecar instead of the log lets a scope
//! delete the log itself.

use std::ffi::OsString;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use conduit_core::{CoordinationError, LogError};
use fs2::FileExt;
use tracing::{debug, trace, warn};

use crate::config::{CoordinatorConfig, TimeoutPolicy};

/// Kind of access a scope grants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    /// Exclusive: appends and clears
    Write,
    /// Shared with other readers, exclusive of writers
    Read,
}

impl fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeMode::Write => write!(f, "write"),
            ScopeMode::Read => write!(f, "read"),
        }
    }
}

enum Held {
    FileLock(File),
    Unlocked,
    /// Released by dropping it
    Custom { _resource: Box<dyn Send + Sync> },
}

/// RAII handle for an acquired scope
pub struct ScopeGuard {
    path: PathBuf,
    mode: ScopeMode,
    held: Held,
}

impl ScopeGuard {
    /// A scope that grants no exclusion at all
    pub fn unlocked(path: impl Into<PathBuf>, mode: ScopeMode) -> Self {
        Self {
            path: path.into(),
            mode,
            held: Held::Unlocked,
        }
    }

    /// A scope backed by an arbitrary resource, released when it is dropped
    pub fn custom(path: impl Into<PathBuf>, mode: ScopeMode, resource: impl Send + Sync + 'static) -> Self {
        Self {
            path: path.into(),
            mode,
            held: Held::Custom {
                _resource: Box::new(resource),
            },
        }
    }

    fn file_lock(path: PathBuf, mode: ScopeMode, file: File) -> Self {
        Self {
            path,
            mode,
            held: Held::FileLock(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> ScopeMode {
        self.mode
    }

    /// Whether the scope actually excludes other processes
    pub fn is_exclusive(&self) -> bool {
        !matches!(self.held, Held::Unlocked)
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("exclusive", &self.is_exclusive())
            .finish()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Held::FileLock(file) = &self.held {
            if let Err(e) = FileExt::unlock(file) {
                warn!(path = %self.path.display(), error = %e, "Failed to release lock");
            } else {
                trace!(path = %self.path.display(), mode = %self.mode, "Released scope");
            }
        }
    }
}

/// Provider of mutually exclusive, cross-process access to a log file
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Acquire exclusive access to `path`
    async fn write_scope(&self, path: &Path) -> Result<ScopeGuard, CoordinationError>;

    /// Acquire read access to `path`; never overlaps a write scope
    async fn read_scope(&self, path: &Path) -> Result<ScopeGuard, CoordinationError>;
}

/// Coordinator based on advisory file locks (`flock` / `LockFileEx`)
#[derive(Debug, Clone, Default)]
pub struct FileLockCoordinator {
    config: CoordinatorConfig,
}

impl FileLockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Path of the lock file guarding `path`
    pub fn lock_path(path: &Path) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    async fn acquire(&self, path: &Path, mode: ScopeMode) -> Result<ScopeGuard, CoordinationError> {
        let lock_path = Self::lock_path(path);
        let file = open_lock_file(&lock_path).map_err(|e| CoordinationError::Lock {
            path: lock_path.clone(),
            message: e.to_string(),
        })?;

        let started = Instant::now();
        loop {
            let attempt = match mode {
                ScopeMode::Write => FileExt::try_lock_exclusive(&file),
                ScopeMode::Read => FileExt::try_lock_shared(&file),
            };

            match attempt {
                Ok(()) => {
                    debug!(
                        path = %path.display(),
                        mode = %mode,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Acquired scope"
                    );
                    return Ok(ScopeGuard::file_lock(path.to_path_buf(), mode, file));
                }
                Err(e) if is_contended(&e) => {}
                Err(e) => {
                    return Err(CoordinationError::Lock {
                        path: lock_path,
                        message: e.to_string(),
                    });
                }
            }

            let waited = started.elapsed();
            if waited >= self.config.lock_timeout {
                return match self.config.on_timeout {
                    TimeoutPolicy::Abort => {
                        warn!(path = %path.display(), mode = %mode, ?waited, "Timed out waiting for scope");
                        Err(CoordinationError::LockTimeout {
                            path: lock_path,
                            waited,
                        })
                    }
                    TimeoutPolicy::ProceedUnlocked => {
                        warn!(
                            path = %path.display(),
                            mode = %mode,
                            ?waited,
                            "Timed out waiting for scope, proceeding without lock"
                        );
                        Ok(ScopeGuard::unlocked(path, mode))
                    }
                };
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl Coordinator for FileLockCoordinator {
    async fn write_scope(&self, path: &Path) -> Result<ScopeGuard, CoordinationError> {
        self.acquire(path, ScopeMode::Write).await
    }

    async fn read_scope(&self, path: &Path) -> Result<ScopeGuard, CoordinationError> {
        self.acquire(path, ScopeMode::Read).await
    }
}

fn open_lock_file(lock_path: &Path) -> io::Result<File> {
    if let Some(parent) = lock_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Run `f` inside a write scope on `path`
pub async fn with_write_scope<C, F, Fut, T>(coordinator: &C, path: &Path, f: F) -> Result<T, LogError>
where
    C: Coordinator + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, LogError>>,
{
    let _scope = coordinator.write_scope(path).await?;
    f().await
}

/// Run `f` inside a read scope on `path`
pub async fn with_read_scope<C, F, Fut, T>(coordinator: &C, path: &Path, f: F) -> Result<T, LogError>
where
    C: Coordinator + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, LogError>>,
{
    let _scope = coordinator.read_scope(path).await?;
    f().await
}
