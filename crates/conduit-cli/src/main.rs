use std::time::Duration;

use clap::Parser;
use conduit_cli::commands;
use conduit_cli::config::{Cli, Command};
use conduit_logging::{ConduitSubscriberBuilder, ConsoleConfig, LogConfig, ProcessContextGuard};
use conduit_storage::Cursor;
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Records go to stdout, diagnostics to stderr
    let _log_guard = ConduitSubscriberBuilder::new()
        .with_config(LogConfig {
            default_level: cli.log_level.clone(),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: false,
                stderr: true,
            },
            ..LogConfig::default()
        })
        .init();
    let _context = ProcessContextGuard::new(cli.command.role());

    let config = cli.mailbox_config()?;
    let span = tracing::info_span!("conduit", command = cli.command.name());

    async move {
        match &cli.command {
            Command::Append { contents, .. } => {
                let written = commands::append(&config, contents).await?;
                eprintln!("Appended {written} record(s) to {}", config.path.display());
            }

            Command::Read { cursor, .. } => {
                let output = commands::read(&config, cursor.map(Cursor::new)).await?;
                for record in &output.records {
                    println!("{record}");
                }
                if let Some(cursor) = output.cursor {
                    eprintln!("cursor: {cursor}");
                }
            }

            Command::Tail {
                interval_ms,
                cursor,
                ..
            } => {
                let shutdown = async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                };
                commands::tail(
                    &config,
                    Duration::from_millis(*interval_ms),
                    cursor.map(Cursor::new),
                    |record| println!("{record}"),
                    shutdown,
                )
                .await?;
            }

            Command::Clear { .. } => {
                commands::clear(&config).await?;
                eprintln!("Cleared {}", config.path.display());
            }

            Command::Inspect { .. } => {
                println!("{}", commands::inspect(&config).await?);
            }

            Command::InitConfig { out, force } => {
                commands::init_config(&config, out, *force)?;
                println!("Wrote {}", out.display());
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await
}
