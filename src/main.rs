use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use spacesync::cache::{CacheLayer, KeyState, MutationOptions, RequestFingerprint};
use spacesync::config::Config;
use spacesync::error::ErrorKind;
use spacesync::remote::{Credentials, NetworkWrite};
use spacesync::session::Session;

#[derive(Parser, Debug)]
#[command(name = "spacesync")]
#[command(about = "Inspect and edit the local spaces cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/spacesync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print a resource, from the cache when it is fresh
  Get {
    /// Resource path, e.g. space/labels
    path: String,
    /// Query parameters as key=value
    #[arg(value_parser = parse_param)]
    params: Vec<(String, String)>,
  },
  /// Refetch a resource and print it
  Refresh {
    path: String,
    #[arg(value_parser = parse_param)]
    params: Vec<(String, String)>,
  },
  /// List cached keys
  Keys,
  /// Set one field of a cached object
  Set {
    path: String,
    #[arg(value_parser = parse_param)]
    params: Vec<(String, String)>,
    /// Field to set
    #[arg(long)]
    field: String,
    /// New value as JSON (bare words are taken as strings)
    #[arg(long)]
    value: String,
    /// Also PATCH the change to this resource path
    #[arg(long)]
    push: Option<String>,
    /// Refetch the resource afterwards
    #[arg(long)]
    revalidate: bool,
    /// Keep the local edit even if the push fails
    #[arg(long)]
    keep_on_error: bool,
  },
  /// Sign out: delete the cache and its persisted copy
  Clear,
}

fn parse_param(s: &str) -> Result<(String, String), String> {
  s.split_once('=')
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

fn init_logging() -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("spacesync");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, "spacesync.log"));
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_env("SPACESYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

async fn get(cache: &CacheLayer, key: &RequestFingerprint) -> Result<()> {
  let cached = cache.store().get(key);
  if let (KeyState::Fresh, Some(entry)) = (cache.state_of(key), &cached) {
    if let Some(value) = entry.value() {
      return print_json(value);
    }
  }

  match cache.fetch(key).await {
    Ok(value) => print_json(&value),
    Err(e) if matches!(e.kind(), ErrorKind::Network | ErrorKind::Server(_)) => {
      let value = cached
        .and_then(|entry| entry.value)
        .ok_or_else(|| eyre!("Failed to fetch {}: {}", key, e))?;
      eprintln!("warning: showing cached copy of {} ({})", key, e);
      print_json(&value)
    }
    Err(e) => Err(eyre!("Failed to fetch {}: {}", key, e)),
  }
}

fn parse_value(raw: &str) -> Value {
  serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// `current` with `field` set to `value`. Only objects (or nothing cached
/// yet) have fields to set.
fn set_field(current: Option<&Value>, field: &str, value: &Value) -> Result<Value> {
  let mut next = current.cloned().unwrap_or_else(|| json!({}));
  match next.as_object_mut() {
    Some(object) => {
      object.insert(field.to_string(), value.clone());
      Ok(next)
    }
    None => Err(eyre!("Cannot set '{}': cached value is not an object", field)),
  }
}

async fn set(
  cache: &CacheLayer,
  key: RequestFingerprint,
  field: &str,
  value: &Value,
  options: MutationOptions,
  write: Option<NetworkWrite>,
) -> Result<()> {
  let handle = cache.try_mutate_key(key, |current| set_field(current, field, value), options, write)?;
  match handle.await {
    Ok(outcome) => print_json(outcome.value.as_deref().unwrap_or(&Value::Null)),
    Err(e) if e.rolled_back => Err(eyre!("{} (local change rolled back)", e)),
    Err(e) => Err(eyre!("{} (local change kept)", e)),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging()?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let credentials = Config::get_api_token().map(Credentials::new).unwrap_or_default();
  let session = Session::start(&config, credentials)?;
  let cache = session.cache().clone();

  let result = match args.command {
    Command::Get { path, params } => get(&cache, &RequestFingerprint::new(&path, params)).await,
    Command::Refresh { path, params } => {
      let key = RequestFingerprint::new(&path, params);
      match cache.refresh(&key).await {
        Ok(value) => print_json(&value),
        Err(e) => Err(eyre!("Failed to refresh {}: {}", key, e)),
      }
    }
    Command::Keys => {
      for key in cache.store().keys() {
        let entry = cache.store().get(&key).unwrap_or_default();
        let fetched = entry
          .last_fetched_at
          .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
        println!("{}\t{:?}\t{}", key, entry.sync, fetched);
      }
      Ok(())
    }
    Command::Set {
      path,
      params,
      field,
      value,
      push,
      revalidate,
      keep_on_error,
    } => {
      let value = parse_value(&value);
      let options = MutationOptions {
        revalidate_after: revalidate,
        rollback_on_server_error: !keep_on_error,
      };
      let write = push.map(|target| NetworkWrite::patch(target, json!({ field.as_str(): value.clone() })));
      let key = RequestFingerprint::new(&path, params);
      set(&cache, key, &field, &value, options, write).await
    }
    Command::Clear => {
      session.sign_out();
      println!("cache cleared");
      Ok(())
    }
  };

  session.shutdown().await;
  result
}
