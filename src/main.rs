mod api;
mod app;
mod cache;
mod config;
mod event;
mod notify;
mod store;
mod sync;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "flagwatch")]
#[command(about = "Watches the U.S. flag status feed, offline-first")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/flagwatch/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Status feed endpoint, overriding the config file
  #[arg(short, long)]
  status_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Watch the feed and notify on status transitions
  Watch,
  /// Print the current flag status
  Status,
  /// Print the flag status history
  History {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 20)]
    per_page: u32,
  },
  /// Subscribe to push notifications
  Subscribe,
  /// Unsubscribe from push notifications
  Unsubscribe,
  /// Drop every cache partition
  ClearCache,
  /// Print the live cache version
  Version,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = match args.status_url {
    Some(url) => config::Config::from_status_url(url),
    None => config::Config::load(args.config.as_deref())?,
  };

  // Log to a file so watch-mode output stays readable
  let _log_guard = init_logging(&config)?;

  let app = app::App::new(config)?;

  match args.command {
    Command::Watch => app.run_watch().await?,
    Command::Status => app.show_status().await?,
    Command::History { page, per_page } => app.show_history(page, per_page).await?,
    Command::Subscribe => app.subscribe().await?,
    Command::Unsubscribe => app.unsubscribe().await?,
    Command::ClearCache => app.clear_cache()?,
    Command::Version => app.version(),
  }

  Ok(())
}

fn init_logging(config: &config::Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = config.data_dir()?.join("logs");
  let appender = tracing_appender::rolling::daily(log_dir, "flagwatch.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
