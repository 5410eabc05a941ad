mod agent;
mod cache;
mod config;
mod logging;
mod manifest;
mod net;
mod stdio;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

use agent::{Agent, AgentSettings, ControlMessage};
use cache::{CacheStorage, MemoryStorage, SqliteStorage};
use net::{Destination, HttpFetcher, Request};

#[derive(Parser, Debug)]
#[command(name = "imgcache")]
#[command(about = "A client-side image caching agent with versioned stores")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/imgcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Cache version to use instead of the configured one
  #[arg(long, global = true)]
  cache_version: Option<String>,

  /// Keep the cache in memory only
  #[arg(long, global = true)]
  ephemeral: bool,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install, activate, then answer control messages on stdin/stdout (JSON lines)
  Serve,
  /// Send one request through the agent
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    /// Request destination (image, document, script, style, font, empty)
    #[arg(short, long, default_value = "image")]
    destination: Destination,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List what the current store holds
  Status,
  /// Fetch and store the given URLs in one batch
  Preload {
    #[arg(required = true)]
    urls: Vec<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override cache version if specified on command line
  if let Some(version) = args.cache_version {
    config.set_cache_version(version)?;
  }

  let _guard = logging::init(args.log_stderr)?;

  let fetcher = Arc::new(HttpFetcher::new(&config)?);
  let settings = AgentSettings::from_config(&config)?;

  if args.ephemeral {
    run(Arc::new(MemoryStorage::new()), fetcher, settings, args.command).await
  } else {
    let storage = SqliteStorage::open(&config.cache_path()?)?;
    run(Arc::new(storage), fetcher, settings, args.command).await
  }
}

async fn run<S: CacheStorage + 'static>(
  storage: Arc<S>,
  fetcher: Arc<HttpFetcher>,
  settings: AgentSettings,
  command: Command,
) -> Result<()> {
  info!(store = %settings.store, assets = settings.manifest.len(), "Starting agent");
  let agent = Agent::new(storage, fetcher, settings);

  let mut states = agent.subscribe();
  tokio::spawn(async move {
    while states.changed().await.is_ok() {
      let state = *states.borrow_and_update();
      info!(%state, "Lifecycle state changed");
    }
  });

  match command {
    Command::Serve => {
      agent.install().await;
      let warming = agent.activate().await;

      let client = agent.spawn_control();
      stdio::serve_lines(client, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;

      info!("Control input closed; waiting for background work");
      if let Err(e) = warming.await {
        info!(error = %e, "Warming task did not finish");
      }
      agent.writes_settled().await;
    }

    Command::Fetch {
      url,
      destination,
      output,
    } => {
      agent.install().await;
      let _warming = agent.activate().await;

      let request = Request::get(agent.resolve(&url)?).with_destination(destination);
      let result = agent
        .handle(request)
        .await
        .map_err(|e| eyre!("Request failed: {}", e))?;

      eprintln!(
        "{} {} ({}, {})",
        result.data.status,
        result.data.status_text,
        result.data.header("content-type").unwrap_or("unknown type"),
        result.source
      );

      match output {
        Some(path) => std::fs::write(&path, &result.data.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => std::io::stdout().write_all(&result.data.body)?,
      }

      agent.writes_settled().await;
    }

    Command::Status => {
      let reply = agent.spawn_control().status().await?;
      println!("{}", serde_json::to_string_pretty(&reply)?);
    }

    Command::Preload { urls } => {
      // Preloads only write into a store the lifecycle has set up
      agent.install().await;
      let _warming = agent.activate().await;

      let reply = agent.spawn_control().preload(urls).await?;
      println!("{}", serde_json::to_string_pretty(&reply)?);
      if let ControlMessage::PreloadError { error } = reply {
        return Err(eyre!("Preload failed: {}", error));
      }
    }
  }

  Ok(())
}
