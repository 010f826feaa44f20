//! Configuration for conduit log stores
//!
//! Every type here derives serde so a whole [`MailboxConfig`] can live in a
//! TOML file shared by the writer and the reader. Both processes must agree
//! on the ring geometry; a reader opening a ring written with a different
//! capacity reports it as a corrupt header.

use std::path::{Path, PathBuf};
use std::time::Duration;

use conduit_core::{FRAME_PREFIX_SIZE, LogError};
use serde::{Deserialize, Serialize};

use crate::ring::HEADER_SIZE;

/// Geometry of a ring log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Number of slots, i.e. records retained before the oldest is evicted
    pub capacity: u32,
    /// Bytes reserved for the content of each slot
    pub max_content_len: u32,
    /// Whether to `fsync` data after every append
    pub sync_on_write: bool,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            max_content_len: 1024,
            sync_on_write: false,
        }
    }
}

impl RingConfig {
    /// Create a ring configuration with the given geometry
    pub fn new(capacity: u32, max_content_len: u32) -> Self {
        Self {
            capacity,
            max_content_len,
            ..Default::default()
        }
    }

    /// Enable or disable `fsync` after each append
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Bytes per slot: magic, length, and the full content allocation
    pub fn slot_size(&self) -> u64 {
        FRAME_PREFIX_SIZE as u64 + u64::from(self.max_content_len)
    }

    /// Total size of a ring file
    pub fn file_size(&self) -> u64 {
        HEADER_SIZE as u64 + u64::from(self.capacity) * self.slot_size()
    }

    /// File offset of slot `index`
    pub fn slot_offset(&self, index: u32) -> u64 {
        HEADER_SIZE as u64 + u64::from(index) * self.slot_size()
    }

    pub fn validate(&self) -> Result<(), LogError> {
        if self.capacity == 0 {
            return Err(LogError::InvalidConfig("ring capacity must be positive".into()));
        }
        if self.max_content_len == 0 {
            return Err(LogError::InvalidConfig(
                "ring max_content_len must be positive".into(),
            ));
        }
        let fits = u64::from(self.capacity)
            .checked_mul(self.slot_size())
            .and_then(|slots| slots.checked_add(HEADER_SIZE as u64))
            .is_some();
        if !fits {
            return Err(LogError::InvalidConfig(format!(
                "ring of {} slots of {} bytes is too large",
                self.capacity,
                self.slot_size()
            )));
        }
        Ok(())
    }
}

/// Configuration for an append-only log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppendLogConfig {
    /// Whether to `fsync` data after every append
    pub sync_on_write: bool,
}

/// What a coordinator does when its lock deadline passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Fail the operation with a timeout error
    #[default]
    Abort,
    /// Log a warning and run the operation without exclusive access
    ProceedUnlocked,
}

/// Cross-process lock settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How long to wait for a contended lock
    #[serde(rename = "lock_timeout_ms", with = "duration_millis")]
    pub lock_timeout: Duration,
    /// Delay between lock attempts
    #[serde(rename = "poll_interval_ms", with = "duration_millis")]
    pub poll_interval: Duration,
    /// Behavior once `lock_timeout` expires
    pub on_timeout: TimeoutPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            on_timeout: TimeoutPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Set the lock deadline
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the timeout policy
    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.on_timeout = policy;
        self
    }
}

/// Which on-disk variant a mailbox uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// Fixed-capacity ring with resumable reads
    #[default]
    Ring,
    /// Unbounded append-only log, drained on read
    Append,
}

/// Everything both processes need to agree on for one shared log file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Path of the shared log file
    pub path: PathBuf,
    /// Log variant
    pub kind: LogKind,
    /// Ring geometry (ignored for append-only logs)
    pub ring: RingConfig,
    /// Append-only settings (ignored for rings)
    pub append: AppendLogConfig,
    /// Lock settings
    pub coordinator: CoordinatorConfig,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./conduit/connection_info.ring"),
            kind: LogKind::default(),
            ring: RingConfig::default(),
            append: AppendLogConfig::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl MailboxConfig {
    /// Create a configuration for the log at `path`
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the log variant
    pub fn with_kind(mut self, kind: LogKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the ring geometry
    pub fn with_ring(mut self, ring: RingConfig) -> Self {
        self.ring = ring;
        self
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, LogError> {
        let config: Self =
            toml::from_str(text).map_err(|e| LogError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String, LogError> {
        toml::to_string_pretty(self).map_err(|e| LogError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), LogError> {
        if self.path.as_os_str().is_empty() {
            return Err(LogError::InvalidConfig("mailbox path must not be empty".into()));
        }
        if self.kind == LogKind::Ring {
            self.ring.validate()?;
        }
        Ok(())
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ring_geometry() {
        let config = RingConfig::default();
        assert_eq!(config.capacity, 500);
        assert_eq!(config.max_content_len, 1024);
        assert_eq!(config.slot_size(), 1029);
        assert_eq!(config.file_size(), 8 + 500 * 1029);
        assert_eq!(config.slot_offset(0), 8);
        assert_eq!(config.slot_offset(2), 8 + 2 * 1029);
    }

    #[test]
    fn test_ring_validation() {
        assert!(RingConfig::default().validate().is_ok());
        assert!(matches!(
            RingConfig::new(0, 16).validate(),
            Err(LogError::InvalidConfig(_))
        ));
        assert!(matches!(
            RingConfig::new(5, 0).validate(),
            Err(LogError::InvalidConfig(_))
        ));
        assert!(matches!(
            RingConfig::new(u32::MAX, u32::MAX).validate(),
            Err(LogError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_coordinator_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.on_timeout, TimeoutPolicy::Abort);
    }

    #[test]
    fn test_mailbox_toml_roundtrip() {
        let config = MailboxConfig::with_path("/var/run/conduit/info.ring")
            .with_ring(RingConfig::new(64, 256).with_sync_on_write(true));
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("lock_timeout_ms = 5000"));
        assert!(text.contains("kind = \"ring\""));

        let parsed = MailboxConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_mailbox_partial_toml_uses_defaults() {
        let parsed = MailboxConfig::from_toml_str(
            r#"
            path = "/tmp/events.log"
            kind = "append"

            [coordinator]
            lock_timeout_ms = 250
            on_timeout = "proceed_unlocked"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.kind, LogKind::Append);
        assert_eq!(parsed.ring, RingConfig::default());
        assert_eq!(parsed.coordinator.lock_timeout, Duration::from_millis(250));
        assert_eq!(parsed.coordinator.poll_interval, Duration::from_millis(10));
        assert_eq!(parsed.coordinator.on_timeout, TimeoutPolicy::ProceedUnlocked);
    }

    #[test]
    fn test_mailbox_rejects_bad_ring() {
        let err = MailboxConfig::from_toml_str(
            r#"
            path = "/tmp/info.ring"

            [ring]
            capacity = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, LogError::InvalidConfig(_)));
    }
}
