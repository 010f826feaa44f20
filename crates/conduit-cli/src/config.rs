use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use conduit_logging::ProcessRole;
use conduit_storage::{LogKind, MailboxConfig};

#[derive(Parser, Debug)]
#[command(name = "conduit", version, about = "Write, read, and inspect conduit log files")]
pub struct Cli {
    /// Mailbox configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
    /// Log file variant
    #[arg(long, global = true, value_enum)]
    pub kind: Option<KindArg>,
    /// Ring capacity in records
    #[arg(long, global = true)]
    pub capacity: Option<u32>,
    /// Maximum record length in bytes for rings
    #[arg(long, global = true)]
    pub max_content: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Ring,
    Append,
}

impl From<KindArg> for LogKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Ring => LogKind::Ring,
            KindArg::Append => LogKind::Append,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Append records, one per argument
    Append {
        /// Log file path
        path: PathBuf,
        /// Record contents
        #[arg(required = true)]
        contents: Vec<String>,
    },
    /// Print the records in a log once
    Read {
        /// Log file path
        path: PathBuf,
        /// Only records written after this ring cursor
        #[arg(long)]
        cursor: Option<u32>,
    },
    /// Follow a log, printing new records as they arrive
    Tail {
        /// Log file path
        path: PathBuf,
        /// Polling interval in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
        /// Ring cursor to start from
        #[arg(long)]
        cursor: Option<u32>,
    },
    /// Delete a log file
    Clear {
        /// Log file path
        path: PathBuf,
    },
    /// Show the layout and header of a log file
    Inspect {
        /// Log file path
        path: PathBuf,
    },
    /// Write a mailbox configuration file with the effective settings
    InitConfig {
        /// Output file
        out: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Command {
    /// Name used for the root span
    pub fn name(&self) -> &'static str {
        match self {
            Command::Append { .. } => "append",
            Command::Read { .. } => "read",
            Command::Tail { .. } => "tail",
            Command::Clear { .. } => "clear",
            Command::Inspect { .. } => "inspect",
            Command::InitConfig { .. } => "init-config",
        }
    }

    pub fn role(&self) -> ProcessRole {
        match self {
            Command::Append { .. } => ProcessRole::Writer,
            Command::Read { .. } | Command::Tail { .. } => ProcessRole::Reader,
            Command::Clear { .. } | Command::Inspect { .. } | Command::InitConfig { .. } => {
                ProcessRole::Maintenance
            }
        }
    }

    /// Log file the command operates on
    pub fn path(&self) -> Option<&Path> {
        match self {
            Command::Append { path, .. }
            | Command::Read { path, .. }
            | Command::Tail { path, .. }
            | Command::Clear { path }
            | Command::Inspect { path } => Some(path),
            Command::InitConfig { .. } => None,
        }
    }
}

impl Cli {
    /// Effective mailbox settings: the config file, then command-line overrides
    pub fn mailbox_config(&self) -> anyhow::Result<MailboxConfig> {
        let mut config = match &self.config {
            Some(file) => MailboxConfig::from_toml_file(file)
                .with_context(|| format!("Failed to load config {}", file.display()))?,
            None => MailboxConfig::default(),
        };

        if let Some(path) = self.command.path() {
            config.path = path.to_path_buf();
        }
        if let Some(kind) = self.kind {
            config.kind = kind.into();
        }
        if let Some(capacity) = self.capacity {
            config.ring.capacity = capacity;
        }
        if let Some(max_content) = self.max_content {
            config.ring.max_content_len = max_content;
        }

        config.validate().context("Invalid mailbox settings")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::try_parse_from([
            "conduit",
            "append",
            "/tmp/info.ring",
            "A",
            "B",
            "--capacity",
            "5",
            "--max-content",
            "64",
        ])
        .unwrap();

        let config = cli.mailbox_config().unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/info.ring"));
        assert_eq!(config.kind, LogKind::Ring);
        assert_eq!(config.ring.capacity, 5);
        assert_eq!(config.ring.max_content_len, 64);
        assert_eq!(cli.command.role(), ProcessRole::Writer);
    }

    #[test]
    fn test_config_file_then_flags() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("mailbox.toml");
        std::fs::write(
            &file,
            "path = \"/ignored\"\nkind = \"append\"\n[ring]\ncapacity = 9\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "conduit",
            "--config",
            file.to_str().unwrap(),
            "read",
            "/tmp/events.log",
        ])
        .unwrap();
        let config = cli.mailbox_config().unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/events.log"));
        assert_eq!(config.kind, LogKind::Append);
        assert_eq!(config.ring.capacity, 9);

        let cli = Cli::try_parse_from([
            "conduit",
            "--config",
            file.to_str().unwrap(),
            "--kind",
            "ring",
            "init-config",
            "/tmp/out.toml",
        ])
        .unwrap();
        let config = cli.mailbox_config().unwrap();
        assert_eq!(config.path, PathBuf::from("/ignored"));
        assert_eq!(config.kind, LogKind::Ring);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let cli =
            Cli::try_parse_from(["conduit", "read", "/tmp/info.ring", "--capacity", "0"]).unwrap();
        assert!(cli.mailbox_config().is_err());
    }

    #[test]
    fn test_append_needs_content() {
        assert!(Cli::try_parse_from(["conduit", "append", "/tmp/info.ring"]).is_err());
    }
}
