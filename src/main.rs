mod agent;
mod cache;
mod clients;
mod config;
mod db;
mod event;
mod http;
mod lifecycle;
mod net;
mod notify;
mod queue;
mod router;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use agent::Agent;
use cache::{CacheStore, MemoryStorage, SqliteStorage};
use config::{Config, StorageBackend};
use event::EventHandler;
use net::{HttpNetwork, Network};
use queue::{MemoryQueue, QueueStore, SqliteQueue};

#[derive(Parser, Debug)]
#[command(name = "taskflow-offline")]
#[command(about = "Offline-first request interception and background sync agent for TaskFlow")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/taskflow-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Directory for databases and logs
  #[arg(short, long)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
  /// Serve host events from stdin, write effects to stdout
  #[default]
  Run,
  /// Precache the install manifest and activate
  Install,
  /// Replay every pending request once
  Sync,
  /// Print pending requests
  Pending,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let data_dir = match args.data_dir {
    Some(dir) => dir,
    None => config.data_dir()?,
  };

  let _log_guard = init_logging(&data_dir)?;

  let network = HttpNetwork::new(Duration::from_secs(config.connect_timeout_secs))?;
  let command = args.command.unwrap_or_default();

  match config.storage.backend {
    StorageBackend::Sqlite => {
      let cache = SqliteStorage::open(&data_dir.join("cache.db"))?;
      let queue = SqliteQueue::open(&data_dir.join("queue.db"))?;
      execute(command, &config, Agent::new(&config, cache, queue, network)?).await
    }
    StorageBackend::Memory => {
      let agent = Agent::new(&config, MemoryStorage::new(), MemoryQueue::new(), network)?;
      execute(command, &config, agent).await
    }
  }
}

async fn execute<C, Q, N>(command: Command, config: &Config, agent: Agent<C, Q, N>) -> Result<()>
where
  C: CacheStore,
  Q: QueueStore,
  N: Network,
{
  match command {
    Command::Run => {
      let (out, writer) = event::stdout_writer();
      agent.run(EventHandler::stdin(), out).await;
      writer
        .await
        .map_err(|e| eyre!("Output writer failed: {}", e))?;
    }
    Command::Install => {
      agent.install().await;
      if agent.state() == lifecycle::LifecycleState::Installed {
        agent.activate().await;
      }
      println!("{}", serde_json::json!({ "state": agent.state() }));
    }
    Command::Sync => match agent.sync_now(&config.sync_tag).await? {
      Some(report) => println!(
        "{}",
        serde_json::json!({
          "syncedCount": report.synced_count,
          "delivered": report.delivered,
        })
      ),
      None => return Err(eyre!("Sync tag mismatch")),
    },
    Command::Pending => {
      for pending in agent.pending()? {
        println!("{}", serde_json::to_string(&pending)?);
      }
    }
  }

  Ok(())
}

/// Log to a daily file in the data dir; stdout carries the host protocol.
fn init_logging(data_dir: &Path) -> Result<WorkerGuard> {
  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "taskflow-offline.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter =
    EnvFilter::try_from_env("TASKFLOW_OFFLINE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
