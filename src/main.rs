mod cache;
mod config;
mod logging;
mod net;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use cache::{CacheStorage, SqliteStorage};
use config::Config;
use net::{HttpFetcher, Request};
use worker::{ActivationReport, InstallOutcome, Registration, ResponseSource};

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Cache-first offline interceptor for a web app shell")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin to use instead of the configured one
  #[arg(long)]
  origin: Option<url::Url>,

  /// Cache version to use instead of the configured one
  #[arg(long = "cache-version")]
  cache_version: Option<u32>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Cache the app shell for the configured version; it becomes waiting
  Install,
  /// Make the waiting version active and delete every other store
  Activate,
  /// Install and activate in one go
  Update,
  /// Send one request through the interceptor and print the body
  Fetch {
    /// Path relative to the origin, or an absolute URL
    target: String,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra request header, as `Name: value`
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
  },
  /// Show active/waiting versions and the stores on disk
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_file.as_deref())?;

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(version) = args.cache_version {
    config.version = version;
  }
  config.validate()?;

  let db_path = match &config.database {
    Some(path) => path.clone(),
    None => SqliteStorage::default_path()?,
  };
  let storage = Arc::new(SqliteStorage::open(&db_path)?);
  let fetcher = Arc::new(HttpFetcher::new(config.origin.clone(), config.timeout())?);
  let mut registration = Registration::restore(config.origin.clone(), Arc::clone(&storage), fetcher)?;

  match args.command {
    Command::Install => {
      match registration
        .register(config.cache_version(), config.shell.clone())
        .await?
      {
        InstallOutcome::Installed => println!("Installed {} (waiting)", config.cache_version()),
        InstallOutcome::Unchanged => println!("{} is already installed", config.cache_version()),
      }
    }
    Command::Activate => {
      let report = registration.activate()?;
      print_activation(&registration, &report);
    }
    Command::Update => {
      match registration
        .update(config.cache_version(), config.shell.clone())
        .await?
      {
        Some(report) => print_activation(&registration, &report),
        None => println!("{} is already active", config.cache_version()),
      }
    }
    Command::Fetch {
      target,
      method,
      headers,
    } => {
      let mut request = Request::resolve(&config.origin, &target)?;
      request.method = method.to_ascii_uppercase();
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Header '{}' must look like 'Name: value'", header))?;
        request = request.with_header(name.trim(), value.trim());
      }

      let mut outcome = registration.handle(request).await?;
      let source = match outcome.source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
      };
      info!(
        "{} {} from {} ({})",
        outcome.response.status,
        target,
        source,
        outcome.response.kind.as_str()
      );

      std::io::stdout()
        .write_all(&outcome.response.body)
        .map_err(|e| eyre!("Failed to write response body: {}", e))?;

      // The runtime stops when main returns, so let the store write land first
      outcome.finish_cache_write().await;
    }
    Command::Status => print_status(&registration, storage.as_ref())?,
  }

  Ok(())
}

fn print_activation<S: CacheStorage>(registration: &Registration<S>, report: &ActivationReport) {
  if let Some(active) = registration.active_version() {
    println!("Activated {}", active);
  }
  for name in &report.deleted {
    println!("  deleted {}", name);
  }
  for (name, reason) in &report.failed {
    println!("  could not delete {}: {}", name, reason);
  }
}

fn print_status<S: CacheStorage>(registration: &Registration<S>, storage: &S) -> Result<()> {
  println!("scope:   {}", registration.scope());
  match registration.active() {
    Some(w) => println!("active:  {} ({})", w.version(), w.state()),
    None => println!("active:  -"),
  }
  match registration.waiting() {
    Some(w) => println!("waiting: {} ({})", w.version(), w.state()),
    None => println!("waiting: -"),
  }

  for name in storage.keys()? {
    if let Some(info) = storage.info(&name)? {
      println!(
        "  {}  {} entries  created {}",
        info.name,
        info.entries,
        info.created_at.format("%Y-%m-%d %H:%M:%S")
      );
    }
  }

  Ok(())
}
