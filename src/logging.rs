use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Install the global subscriber.
///
/// Human-readable output goes to stderr, filtered by `RUST_LOG` (default
/// `info`). Everything at debug and above is also appended to a daily log
/// file under `log_dir`. Keep the returned guard alive until exit or
/// buffered file output is lost.
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let default_level = if verbose {
    LevelFilter::DEBUG
  } else {
    LevelFilter::INFO
  };

  let stderr_filter = EnvFilter::builder()
    .with_default_directive(default_level.into())
    .from_env_lossy();

  let file_appender = tracing_appender::rolling::daily(log_dir, "orders-offline.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .with_filter(stderr_filter);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_writer(file_writer)
    .with_ansi(false)
    .with_filter(LevelFilter::DEBUG);

  tracing_subscriber::registry()
    .with(stderr_layer)
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}
