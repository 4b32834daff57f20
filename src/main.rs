mod app;
mod cache;
mod commands;
mod config;
mod event;
mod manifest;
mod net;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use app::{App, Route, Startup};
use cache::{CacheStorage, MemoryStorage, SqliteStorage};
use config::{Config, StorageKind};
use event::{Outcome, Source};
use manifest::Deployment;
use net::HttpClient;

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline resource cache manager for deployed web application shells")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./shellcache.yaml or $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Install and activate the deployed manifest
  Update {
    /// Run the lifecycle even if the recorded manifest is current
    #[arg(long)]
    force: bool,
  },
  /// Request resources through the cache controller
  Fetch {
    /// Absolute URLs or paths relative to the origin
    #[arg(required = true)]
    urls: Vec<String>,
    /// Write the body of the (single) response to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Send a message command to the controller
  Message {
    /// Command payload or alias (skipWaiting, downloadOffline)
    payload: String,
  },
  /// Show the state of the cache partitions
  Status,
  /// Delete all cache partitions
  Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let log_file = args
    .log_file
    .clone()
    .or_else(|| config.log_dir.as_ref().map(|dir| dir.join("shellcache.log")));
  let _guard = init_tracing(args.verbose, log_file.as_deref())?;

  let deployment = Deployment::load(&config.manifest)?;
  let network = Arc::new(HttpClient::new()?);

  match config.storage {
    StorageKind::Sqlite => {
      let storage = match &config.cache_path {
        Some(path) => SqliteStorage::open_at(path)?,
        None => SqliteStorage::open_default()?,
      };
      let app = App::new(&config, deployment, Arc::new(storage), network)?;
      run(&app, &config, args.command).await
    }
    StorageKind::Memory => {
      let app = App::new(&config, deployment, Arc::new(MemoryStorage::new()), network)?;
      run(&app, &config, args.command).await
    }
  }
}

/// Initialize logging: RUST_LOG wins, otherwise 0 = warn, 1 = info, 2+ = debug.
fn init_tracing(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
    0 => EnvFilter::new("shellcache=warn"),
    1 => EnvFilter::new("shellcache=info"),
    _ => EnvFilter::new("shellcache=debug"),
  });

  match log_file {
    Some(path) => {
      let dir = path.parent().unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
      Ok(None)
    }
  }
}

async fn run<S: CacheStorage>(
  app: &App<S, HttpClient>,
  config: &Config,
  command: Cmd,
) -> Result<()> {
  match command {
    Cmd::Update { force } => {
      match app.start(force).await? {
        Startup::Resumed => println!("Deployment {} is already active", app.controller().id()),
        Startup::Updated(Outcome::Activated(summary)) => {
          println!("Deployment {} activated", app.controller().id());
          println!(
            "  retained {}, evicted {}, promoted {}{}",
            summary.retained,
            summary.evicted,
            summary.promoted,
            if summary.fresh { " (fresh cache)" } else { "" }
          );
        }
        Startup::Updated(outcome) => {
          println!("Deployment {} activated: {:?}", app.controller().id(), outcome)
        }
      }
      Ok(())
    }

    Cmd::Fetch { urls, output } => {
      app.start(false).await?;

      let urls = urls
        .iter()
        .map(|u| resolve_url(&config.origin, u))
        .collect::<Result<Vec<_>>>()?;

      if output.is_some() && urls.len() != 1 {
        return Err(eyre!("--output needs exactly one URL"));
      }

      let mut failed = 0;
      for result in app.fetch(&urls).await {
        match result {
          Ok(fetched) => {
            let route = match fetched.route {
              Route::Controller(Source::Network) => "network",
              Route::Controller(Source::Cache) => "cache",
              Route::Controller(Source::Offline) => "offline cache",
              Route::Passthrough => "passthrough",
            };
            println!(
              "{} {} {} bytes ({})",
              fetched.response.status,
              fetched.url,
              fetched.response.body.len(),
              route
            );
            if let Some(path) = &output {
              std::fs::write(path, &fetched.response.body)
                .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
            }
          }
          Err(e) => {
            failed += 1;
            eprintln!("Error: {}", e);
          }
        }
      }

      if failed > 0 {
        return Err(eyre!("{} of {} requests failed", failed, urls.len()));
      }
      Ok(())
    }

    Cmd::Message { payload } => {
      let payload = match commands::resolve(&payload) {
        Some(cmd) => cmd.payload,
        None => {
          let hint = commands::get_suggestions(&payload)
            .iter()
            .map(|c| format!("{} ({})", c.payload, c.description))
            .collect::<Vec<_>>()
            .join(", ");
          return Err(eyre!(
            "Unknown message '{}'. Known messages: {}",
            payload,
            if hint.is_empty() {
              "skipWaiting, downloadOffline"
            } else {
              hint.as_str()
            }
          ));
        }
      };

      app.start(false).await?;
      match app.message(payload).await? {
        Outcome::SkipWaiting => println!("Skip waiting requested"),
        Outcome::Downloaded { fetched } => println!("Downloaded {} resources", fetched),
        Outcome::DownloadFailed(reason) => {
          return Err(eyre!("Offline download failed: {}", reason));
        }
        other => println!("{:?}", other),
      }
      Ok(())
    }

    Cmd::Status => {
      let status = app.status()?;
      println!("Controller:  {} ({})", status.controller, status.state);
      println!("Origin:      {}", app.controller().origin());
      println!(
        "Clients:     {}",
        status.claimed_by.as_deref().unwrap_or("unclaimed")
      );
      println!("Resources:   {}", status.resources);
      println!(
        "Record:      {}",
        if status.record_current { "current" } else { "stale or missing" }
      );
      for partition in &status.partitions {
        if !partition.exists {
          println!("{:<16} absent", partition.name);
          continue;
        }
        let bytes: usize = partition.entries.iter().map(|e| e.size).sum();
        let newest = partition.entries.iter().map(|e| e.stored_at).max();
        println!(
          "{:<16} {} entries, {} bytes{}",
          partition.name,
          partition.entries.len(),
          bytes,
          newest
            .map(|t| format!(", last stored {}", t.format("%Y-%m-%d %H:%M:%S")))
            .unwrap_or_default()
        );
      }
      if !status.missing.is_empty() {
        println!("Missing from content ({}):", status.missing.len());
        for key in &status.missing {
          println!("  {}", key);
        }
      }
      Ok(())
    }

    Cmd::Reset => {
      app.reset()?;
      println!("All cache partitions deleted");
      Ok(())
    }
  }
}

/// Resolve a CLI URL argument against the origin.
fn resolve_url(origin: &Url, input: &str) -> Result<Url> {
  match Url::parse(input) {
    Ok(url) => Ok(url),
    Err(url::ParseError::RelativeUrlWithoutBase) => origin
      .join(input)
      .map_err(|e| eyre!("Invalid URL '{}': {}", input, e)),
    Err(e) => Err(eyre!("Invalid URL '{}': {}", input, e)),
  }
}
