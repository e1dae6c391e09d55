//! `ferry`: poll a remote directory and process every file exactly once.

mod error;
mod logging;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::{OptionExt, ResultExt};
use ferry_config::{Config, Transport};
use ferry_ledger::{Database, MarkerStore, MarkerStoreHandle, SqliteMarkerStore};
use ferry_pipeline::{Poller, PollerOptions, PrimeNumberProcessor};
use ferry_transfer::remote::DirectoryConnector;
use ferry_transfer::{ConnectorHandle, PoolOptions, SessionPool};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file; defaults to `ferry.toml` in the user config directory.
    #[arg(long, short, global = true, env = "FERRY_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll until interrupted.
    Run {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// Print the resolved configuration as JSON.
    Config,
    /// Inspect or edit the dedup ledger.
    #[command(subcommand)]
    Ledger(LedgerCommand),
}

#[derive(Debug, Subcommand)]
enum LedgerCommand {
    /// List every marker of the configured remote.
    List,
    /// Drop the marker for a `directory/name` key so the file is selected again.
    Forget { key: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    logging::init(&config.logging)?;
    match cli.command {
        Command::Run { once } => run(&config, once).await,
        Command::Config => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &config).or_raise(|| ErrorKind::Output)?;
            writeln!(stdout).or_raise(|| ErrorKind::Output)
        },
        Command::Ledger(command) => ledger(&config, command).await,
    }
}

async fn open_ledger(config: &Config) -> Result<(Database, MarkerStoreHandle)> {
    let path = config.ledger_path().or_raise(|| ErrorKind::Config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).or_raise(|| ErrorKind::LocalDirectory(parent.to_path_buf()))?;
    }
    tracing::debug!(path = %path.display(), "Opening ledger");
    let db = Database::connect(&path).await.or_raise(|| ErrorKind::Ledger)?;
    let store = Arc::new(SqliteMarkerStore::new(&db, config.remote.name.clone()));
    Ok((db, store))
}

fn connector(config: &Config) -> Result<ConnectorHandle> {
    let remote = &config.remote;
    match remote.transport {
        Transport::Directory => {
            let root = remote.root.as_deref().ok_or_raise(|| ErrorKind::Config)?;
            let connector = DirectoryConnector::new(remote.name.clone(), root).or_raise(|| ErrorKind::Remote)?;
            Ok(Arc::new(connector))
        },
        #[cfg(feature = "sftp")]
        Transport::Sftp => {
            use ferry_transfer::remote::{SftpConnector, SftpOptions};
            let (Some(host), Some(username), Some(private_key), Some(known_hosts)) = (
                remote.host.clone(),
                remote.username.clone(),
                remote.private_key.clone(),
                remote.known_hosts.clone(),
            ) else {
                exn::bail!(ErrorKind::Config);
            };
            let options = SftpOptions {
                host,
                port: remote.port,
                username,
                private_key,
                known_hosts,
                timeout: remote.timeout(),
            };
            Ok(Arc::new(SftpConnector::new(remote.name.clone(), options)))
        },
        #[cfg(not(feature = "sftp"))]
        Transport::Sftp => {
            tracing::error!("This build of ferry was compiled without the `sftp` feature");
            exn::bail!(ErrorKind::Remote)
        },
    }
}

async fn run(config: &Config, once: bool) -> Result<()> {
    let local_directory = config.local_directory().or_raise(|| ErrorKind::Config)?.to_path_buf();
    tokio::fs::create_dir_all(&local_directory)
        .await
        .or_raise(|| ErrorKind::LocalDirectory(local_directory.clone()))?;

    let pool = SessionPool::new(
        connector(config)?,
        PoolOptions {
            size: config.pool.size,
            wait_timeout: config.pool.wait_timeout(),
        },
    )
    .or_raise(|| ErrorKind::Remote)?;
    let (db, store) = open_ledger(config).await?;

    let options = PollerOptions {
        remote_directory: config.remote.directory.clone(),
        local_directory,
        delay: config.poller.delay(),
        max_fetch_size: config.poller.max_fetch_size,
        max_messages_per_poll: config.poller.max_messages_per_poll,
    };
    let poller = Poller::new(options, pool.clone(), store, PrimeNumberProcessor);

    let outcome = if once {
        let result = poller.poll_once().await;
        pool.close().await;
        result.map(|report| {
            tracing::info!(
                listed = report.listed,
                fetched = report.fetched,
                committed = report.committed(),
                rolled_back = report.rolled_back(),
                "Cycle complete"
            );
        })
    } else {
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, finishing current work");
            }
            signal.cancel();
        });
        poller.run(shutdown).await
    };
    let health = poller.monitor().health();
    tracing::info!(up = health.up, detail = health.detail.as_deref(), "Final health");
    db.close().await;
    outcome.or_raise(|| ErrorKind::Poller)
}

async fn ledger(config: &Config, command: LedgerCommand) -> Result<()> {
    let (db, store) = open_ledger(config).await?;
    let result = match command {
        LedgerCommand::List => list_markers(store.as_ref()).await,
        LedgerCommand::Forget { key } => store.clear(&key).await.or_raise(|| ErrorKind::Ledger).map(|removed| {
            if removed {
                println!("Forgot {key}");
            } else {
                println!("No marker for {key}");
            }
        }),
    };
    db.close().await;
    result
}

async fn list_markers(store: &dyn MarkerStore) -> Result<()> {
    let markers = store.markers().await.or_raise(|| ErrorKind::Ledger)?;
    let mut stdout = std::io::stdout().lock();
    for marker in markers {
        writeln!(stdout, "{}\t{}\t{}\t{}", marker.state, marker.marked_at, marker.fingerprint, marker.key)
            .or_raise(|| ErrorKind::Output)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ledger_forget() {
        let cli = Cli::try_parse_from(["ferry", "--config", "/etc/ferry.toml", "ledger", "forget", "/upload/a.txt"])
            .unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/etc/ferry.toml")));
        assert!(matches!(cli.command, Command::Ledger(LedgerCommand::Forget { key }) if key == "/upload/a.txt"));
    }

    #[test]
    fn test_parse_run_once() {
        let cli = Cli::try_parse_from(["ferry", "run", "--once"]).unwrap();
        assert!(matches!(cli.command, Command::Run { once: true }));
    }
}
