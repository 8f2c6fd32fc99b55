mod cache;
mod config;
mod controller;
mod host;
mod http;
mod logging;
mod net;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use cache::{CacheStorage, RegistrationSlot, SqliteStorage};
use controller::{CacheConfig, ControlMessage, FetchDisposition, Generation, OfflineCache};
use host::{RegisterOutcome, Registration};
use http::{Destination, Method, Request, RequestMode};
use net::{Fetcher, HttpFetcher};

#[derive(Parser, Debug)]
#[command(name = "storecache")]
#[command(about = "Offline-first fetch cache for storefront front-ends")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/storecache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured generation and activate it (or leave it waiting)
  Install,
  /// Fetch a URL through the active controller
  Fetch {
    url: String,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Declared resource type of the request
    #[arg(short, long, value_enum, default_value_t = Destination::Empty)]
    destination: Destination,
    /// Treat the request as a top-level navigation
    #[arg(long)]
    navigate: bool,
    /// Write the body to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Post a control message (SKIP_WAITING or CLEAR_CACHE)
  Message { payload: String },
  /// Show partitions, entry counts and registration slots
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let cache_config = config.cache_config()?;
  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);
  let network = Arc::new(HttpFetcher::new()?);
  let mut registration = Registration::new(Arc::clone(&storage));

  match args.command {
    Command::Status => print_status(
      &mut std::io::stdout(),
      storage.as_ref(),
      &cache_config.generation,
    )?,
    Command::Install => {
      match attach(&mut registration, cache_config, &storage, &network).await? {
        RegisterOutcome::Activated => println!("installed and activated"),
        RegisterOutcome::Waiting => println!("installed, waiting for SKIP_WAITING"),
        RegisterOutcome::Resumed => println!("already active"),
      }
    }
    Command::Fetch {
      url,
      method,
      destination,
      navigate,
      output,
    } => {
      let url = Url::parse(&url).map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
      let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
      let mut request = Request::new(method, url).with_destination(destination);
      if navigate {
        request = request.with_mode(RequestMode::Navigate);
      }

      attach(&mut registration, cache_config, &storage, &network).await?;
      let (response, source) = match registration.dispatch_fetch(&request).await {
        FetchDisposition::Respond(served) => (served.response, served.source.to_string()),
        FetchDisposition::Passthrough => (network.fetch(&request).await?, "passthrough".to_string()),
      };

      eprintln!(
        "{} {} ({}, {})",
        response.status,
        request.url,
        source,
        response.content_type().unwrap_or("no content-type")
      );
      match output {
        Some(path) => std::fs::write(&path, &response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => std::io::stdout()
          .write_all(&response.body)
          .map_err(|e| eyre!("Failed to write body: {}", e))?,
      }
    }
    Command::Message { payload } => match ControlMessage::parse(&payload) {
      Ok(message) => {
        attach(&mut registration, cache_config, &storage, &network).await?;
        registration.post_message(message).await?;
        println!("{} delivered", message);
      }
      Err(e) => warn!(error = %e, "ignoring control message"),
    },
  }

  // Keep the process alive until background stores land
  registration.settle().await;

  Ok(())
}

/// Attach the configured generation, installing it on first use.
async fn attach(
  registration: &mut Registration<SqliteStorage, HttpFetcher>,
  cache_config: CacheConfig,
  storage: &Arc<SqliteStorage>,
  network: &Arc<HttpFetcher>,
) -> Result<RegisterOutcome> {
  let controller = OfflineCache::new(cache_config, Arc::clone(storage), Arc::clone(network));
  registration.attach(controller).await
}

fn print_status<S: CacheStorage>(
  out: &mut impl Write,
  storage: &S,
  generation: &Generation,
) -> Result<()> {
  let active = storage.registration(RegistrationSlot::Active)?;
  let waiting = storage.registration(RegistrationSlot::Waiting)?;
  writeln!(out, "configured: {}", generation.version())?;
  writeln!(out, "active:     {}", active.as_deref().unwrap_or("-"))?;
  writeln!(out, "waiting:    {}", waiting.as_deref().unwrap_or("-"))?;

  writeln!(out)?;
  for name in storage.partition_names()? {
    let entries = storage.entry_count(&name)?;
    let live = if generation.is_live(&name) { "" } else { " (stale)" };
    writeln!(out, "{:<32} {:>6} entries{}", name, entries, live)?;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_fetch_command() {
    let args = Args::parse_from([
      "storecache",
      "fetch",
      "https://shop.example/p/1.jpg",
      "--destination",
      "image",
      "--navigate",
    ]);
    match args.command {
      Command::Fetch {
        url,
        method,
        destination,
        navigate,
        output,
      } => {
        assert_eq!(url, "https://shop.example/p/1.jpg");
        assert_eq!(method, "GET");
        assert_eq!(destination, Destination::Image);
        assert!(navigate);
        assert!(output.is_none());
      }
      other => panic!("unexpected command {:?}", other),
    }
  }

  #[test]
  fn test_parse_message_command() {
    let args = Args::parse_from(["storecache", "--config", "shop.yaml", "message", "CLEAR_CACHE"]);
    assert_eq!(args.config, Some(PathBuf::from("shop.yaml")));
    assert!(matches!(args.command, Command::Message { payload } if payload == "CLEAR_CACHE"));
  }

  #[test]
  fn test_print_status_marks_stale_partitions() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_partition("v1-static").unwrap();
    storage.open_partition("v0-static").unwrap();
    storage
      .set_registration(RegistrationSlot::Active, Some("v1"))
      .unwrap();
    let generation = Generation::new("v1", controller::Limits::default());

    let mut out = Vec::new();
    print_status(&mut out, &storage, &generation).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains("active:     v1"));
    assert!(text.contains("waiting:    -"));
    let line = |name: &str| text.lines().find(|l| l.starts_with(name)).unwrap().to_string();
    assert!(line("v0-static").ends_with("(stale)"));
    assert!(!line("v1-static").contains("stale"));
  }
}
