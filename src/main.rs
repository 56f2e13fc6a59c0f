mod agent;
mod cache;
mod config;
mod db;
mod event;
mod logging;
mod net;
mod store;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use agent::{AgentSettings, EventOutcome, FetchOutcome, OfflineCacheAgent};
use cache::{CacheStorage, SqliteStorage};
use db::Database;
use event::{ConnectivityWatcher, LifecycleEvent};
use net::{FetchRequest, HttpNetwork, RequestMode};
use store::{LocalStorage, OfflineOrders, OrderRepository, OFFLINE_ORDERS_KEY};

type Agent = OfflineCacheAgent<SqliteStorage, HttpNetwork, OfflineOrders>;

#[derive(Parser, Debug)]
#[command(name = "orders-offline")]
#[command(about = "Offline cache and background sync agent for the orders app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/orders-offline/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Application origin, overrides the config file
  #[arg(long, global = true)]
  origin: Option<String>,

  /// Log debug output to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Precache the application shell
  Install,
  /// Answer a request the way the agent would
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
    /// Request mode; `navigate` enables the offline root-page fallback
    #[arg(long, value_enum, default_value_t = RequestMode::SameOrigin)]
    mode: RequestMode,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Fire a background sync event
  Sync {
    #[arg(long, default_value = "sync-orders")]
    tag: String,
  },
  /// Queue an order for the next sync, or list queued orders
  Queue {
    /// Order as a JSON document
    order: Option<String>,
    #[arg(long, conflicts_with = "order")]
    list: bool,
  },
  /// Show cached entries and pending orders
  Status,
  /// Probe connectivity and sync whenever the origin comes back
  Watch {
    /// Seconds between probes (default from config)
    #[arg(long)]
    interval: Option<u64>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  if let Some(origin) = args.origin {
    config.origin = origin;
    config.validate()?;
  }

  let data_dir = config.data_dir()?;
  let _log_guard = logging::init(&data_dir.join("logs"), args.verbose)?;

  let agent = build_agent(&config)?;

  match args.command {
    Commands::Install => {
      let outcome = agent.handle(LifecycleEvent::Install).await?;
      report(&outcome);
    }
    Commands::Fetch {
      url,
      mode,
      method,
      output,
    } => {
      let url = agent
        .settings()
        .origin
        .join(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let request = FetchRequest { url, method, mode };

      match agent.handle(LifecycleEvent::Fetch(request)).await? {
        EventOutcome::Fetched(outcome) => write_fetch(&outcome, output.as_deref())?,
        other => report(&other),
      }
    }
    Commands::Sync { tag } => {
      let outcome = agent.handle(LifecycleEvent::Sync { tag }).await?;
      report(&outcome);
    }
    Commands::Queue { order, list } => {
      if list || order.is_none() {
        for queued in agent.orders().load()? {
          println!("{} {}", store::fingerprint(&queued), queued);
        }
      } else if let Some(raw) = order {
        let order: serde_json::Value =
          serde_json::from_str(&raw).map_err(|e| eyre!("Order is not valid JSON: {}", e))?;
        let id = store::fingerprint(&order);
        agent.orders().enqueue(order)?;
        info!(order = %id, "Order queued");
        println!("queued {}", id);
      }
    }
    Commands::Status => status(&agent)?,
    Commands::Watch { interval } => {
      let interval = Duration::from_secs(interval.unwrap_or(config.watch.interval_secs).max(1));
      watch(&agent, HttpNetwork::new(&config)?, interval).await?;
    }
  }

  Ok(())
}

fn build_agent(config: &config::Config) -> Result<Agent> {
  let settings = AgentSettings::from_config(config)?;
  let db_path = config.database_path()?;

  let cache = SqliteStorage::new(Database::open(&db_path)?.into_connection());
  let orders = OfflineOrders::new(LocalStorage::new(
    Database::open(&db_path)?.into_connection(),
  ));
  let network = HttpNetwork::new(config)?;

  Ok(OfflineCacheAgent::new(settings, cache, network, orders))
}

fn report(outcome: &EventOutcome) {
  match outcome {
    EventOutcome::Installed { cache_name, cached } => {
      println!("installed {} assets into {}", cached, cache_name)
    }
    EventOutcome::Fetched(fetch) => println!("fetch answered from {}", fetch.source()),
    EventOutcome::Synced(sync) => {
      println!("sync: {}", sync);
      for id in &sync.failed {
        println!("  pending {}", id);
      }
    }
    EventOutcome::Ignored { tag } => println!("sync tag '{}' not handled", tag),
  }
}

fn write_fetch(outcome: &FetchOutcome, output: Option<&std::path::Path>) -> Result<()> {
  match outcome {
    FetchOutcome::Cached(cached) | FetchOutcome::OfflineFallback(cached) => eprintln!(
      "{} {} from {} (cached {})",
      outcome.source(),
      cached.response.status,
      cached.cache_name,
      cached.cached_at.to_rfc3339()
    ),
    FetchOutcome::Network(response) => eprintln!(
      "{} {} {}",
      outcome.source(),
      response.status,
      response.header("content-type").unwrap_or("-")
    ),
    FetchOutcome::Unavailable => {}
  }

  let response = outcome
    .response()
    .ok_or_else(|| eyre!("Request failed: offline and not cached"))?;

  match output {
    Some(path) => std::fs::write(path, &response.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
    None => std::io::stdout()
      .write_all(&response.body)
      .map_err(|e| eyre!("Failed to write response body: {}", e))?,
  }

  Ok(())
}

fn status(agent: &Agent) -> Result<()> {
  for name in agent.cache().cache_names()? {
    let keys = agent.cache().keys(&name)?;
    println!("cache {} ({} entries)", name, keys.len());
    for key in keys {
      println!("  {}", key);
    }
  }

  let pending = agent.orders().load()?;
  println!("{}: {} pending", OFFLINE_ORDERS_KEY, pending.len());
  Ok(())
}

async fn watch(agent: &Agent, probe_network: HttpNetwork, interval: Duration) -> Result<()> {
  let settings = agent.settings();
  let mut watcher = ConnectivityWatcher::spawn(
    probe_network,
    FetchRequest::get(settings.origin.clone()),
    interval,
    settings.sync_tag.clone(),
  );

  info!(origin = %settings.origin, ?interval, "Watching connectivity");

  loop {
    tokio::select! {
      event = watcher.next() => {
        let Some(event) = event else { break };
        // A failed pass is retried on the next reconnect
        match agent.handle(event).await {
          Ok(outcome) => report(&outcome),
          Err(e) => error!(error = %e, "Sync pass failed"),
        }
      }
      _ = tokio::signal::ctrl_c() => {
        info!("Stopping watcher");
        break;
      }
    }
  }

  Ok(())
}
