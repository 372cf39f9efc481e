mod event;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use crossterm::cursor::MoveTo;
use crossterm::event::{DisableFocusChange, EnableFocusChange, KeyCode, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType};
use crossterm::ExecutableCommand;
use serde_json::Value;
use std::io::{self, stdout, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use event::{Event, EventHandler};
use qcache::cache::hash_key;
use qcache::config::{Config, WatchConfig};
use qcache::{
  EndpointConfig, EntityAdapter, HostEvent, LifecycleBus, ManualEventSource, QueryCache, QueryKey,
  QueryResult, QueryStatus, Subscription,
};

const ENDPOINT: &str = "resource";

#[derive(Parser, Debug)]
#[command(name = "qcache")]
#[command(about = "Watch HTTP resources through a refetching query cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/qcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Directory for log files (default: $XDG_DATA_HOME/qcache/logs)
  #[arg(long)]
  log_dir: Option<PathBuf>,
}

/// A watched HTTP resource
#[derive(Debug, Clone)]
struct Resource {
  name: String,
  url: Url,
}

impl QueryKey for Resource {
  fn cache_hash(&self) -> String {
    hash_key(self.url.as_str())
  }

  fn description(&self) -> String {
    format!("{} ({})", self.name, self.url)
  }
}

type ResourceCache = QueryCache<Resource, Value, String>;
type ResourceSubscription = Subscription<Resource, Value, String>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(args.log_dir)?;

  let cache: ResourceCache = QueryCache::new(config.cache.to_cache_config())?;
  let http = reqwest::Client::builder()
    .build()
    .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
  cache.register_endpoint(ENDPOINT, EndpointConfig::default(), move |resource: Resource| {
    let http = http.clone();
    async move { fetch_json(&http, &resource.url).await }
  })?;

  // Terminal focus changes and the `f`/`o` keys are raised here
  let host = Arc::new(ManualEventSource::new());
  let bus = LifecycleBus::new(host.clone());
  let listeners = bus.setup_listeners(cache.dispatcher(), None)?;

  let subscriptions = config
    .watch
    .iter()
    .map(|watch| subscribe(&cache, watch))
    .collect::<Result<Vec<_>>>()?;
  info!(count = subscriptions.len(), "watching resources");

  enter_in_order(
    || stdout().execute(EnableFocusChange).map(|_| ()),
    enable_raw_mode,
    || stdout().execute(DisableFocusChange).map(|_| ()),
  )?;

  let outcome = run(&config, &host, &subscriptions).await;

  let restored = disable_raw_mode();
  stdout().execute(DisableFocusChange)?;
  restored?;

  listeners.unsubscribe();
  drop(subscriptions);
  outcome
}

/// Apply `first` then `second`. If `second` fails, `undo_first` reverts
/// `first` so the terminal is not left half configured.
fn enter_in_order(
  first: impl FnOnce() -> io::Result<()>,
  second: impl FnOnce() -> io::Result<()>,
  undo_first: impl FnOnce() -> io::Result<()>,
) -> io::Result<()> {
  first()?;
  if let Err(e) = second() {
    let _ = undo_first();
    return Err(e);
  }
  Ok(())
}

fn subscribe(cache: &ResourceCache, watch: &WatchConfig) -> Result<ResourceSubscription> {
  let resource = Resource {
    name: watch.name.clone(),
    url: watch.url.clone(),
  };
  Ok(cache.subscribe(ENDPOINT, resource, watch.overrides())?)
}

async fn run(
  config: &Config,
  host: &Arc<ManualEventSource>,
  subscriptions: &[ResourceSubscription],
) -> Result<()> {
  let mut events = EventHandler::new(Duration::from_millis(250), Arc::clone(host));
  let mut last_frame = String::new();

  while let Some(event) = events.next().await {
    match event {
      Event::Key(key) => match key.code {
        KeyCode::Char('q') | KeyCode::Esc => break,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
        KeyCode::Char('f') => {
          host.emit(HostEvent::Focus);
        }
        KeyCode::Char('o') => {
          host.emit(HostEvent::Online);
        }
        KeyCode::Char('r') => {
          for subscription in subscriptions {
            subscription.refetch();
          }
        }
        _ => {}
      },
      Event::Tick => {}
    }

    let frame = render(config, subscriptions);
    if frame != last_frame {
      draw(&frame)?;
      last_frame = frame;
    }
  }

  Ok(())
}

fn render(config: &Config, subscriptions: &[ResourceSubscription]) -> String {
  let mut lines = vec![
    config.title.clone().unwrap_or_else(|| "qcache".to_string()),
    "[f] focus  [o] online  [r] refetch  [q] quit".to_string(),
    String::new(),
  ];

  for (watch, subscription) in config.watch.iter().zip(subscriptions) {
    lines.push(format!("{:<20} {}", watch.name, describe(&subscription.read())));
  }
  lines.join("\r\n")
}

fn describe(result: &QueryResult<Value, String>) -> String {
  let status = match result.status {
    QueryStatus::Uninitialized => "idle",
    QueryStatus::Pending if result.is_loading => "loading",
    QueryStatus::Pending => "refetching",
    QueryStatus::Fulfilled => "ok",
    QueryStatus::Rejected => "error",
  };

  let mut line = format!("{:<11}", status);
  if let Some(data) = &result.data {
    line.push_str(&summarize(data));
  }
  if let Some(error) = &result.error {
    line.push_str(&format!("  ({})", error));
  }
  if let Some(at) = result.fulfilled_at {
    line.push_str(&format!("  @ {}", at.format("%H:%M:%S")));
  }
  line
}

/// Short description of a payload. Arrays are normalized by `id` first, so
/// duplicate records are counted once.
fn summarize(data: &Value) -> String {
  match data {
    Value::Array(items) => {
      let adapter = EntityAdapter::new(record_id);
      let records = adapter.with_entities(items.iter().cloned());
      format!("{} records", records.len())
    }
    Value::Object(fields) => format!("{} fields", fields.len()),
    other => other.to_string(),
  }
}

fn record_id(record: &Value) -> String {
  match record.get("id") {
    Some(Value::String(id)) => id.clone(),
    Some(id) => id.to_string(),
    None => record.to_string(),
  }
}

fn draw(frame: &str) -> Result<()> {
  let mut out = stdout();
  out.execute(Clear(ClearType::All))?.execute(MoveTo(0, 0))?;
  write!(out, "{}\r\n", frame)?;
  out.flush()?;
  Ok(())
}

async fn fetch_json(http: &reqwest::Client, url: &Url) -> Result<Value, String> {
  let response = http
    .get(url.clone())
    .send()
    .await
    .map_err(|e| format!("request failed: {}", e))?
    .error_for_status()
    .map_err(|e| format!("bad status: {}", e))?;

  let body = response
    .text()
    .await
    .map_err(|e| format!("failed to read body: {}", e))?;

  serde_json::from_str(&body).map_err(|e| format!("invalid JSON: {}", e))
}

fn init_tracing(log_dir: Option<PathBuf>) -> Result<WorkerGuard> {
  let dir = match log_dir {
    Some(dir) => dir,
    None => dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?
      .join("qcache")
      .join("logs"),
  };
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
    &dir,
    "qcache.log",
  ));
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qcache=info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_summarize_dedupes_records_by_id() {
    let data = json!([{"id": 1}, {"id": "a"}, {"id": 1, "x": true}]);
    assert_eq!(summarize(&data), "2 records");
    assert_eq!(summarize(&json!({"a": 1, "b": 2})), "2 fields");
  }

  #[test]
  fn test_enter_in_order_reverts_first_step_on_failure() {
    let steps = std::cell::RefCell::new(Vec::new());

    let result = enter_in_order(
      || {
        steps.borrow_mut().push("focus on");
        Ok(())
      },
      || Err(io::Error::other("no tty")),
      || {
        steps.borrow_mut().push("focus off");
        Ok(())
      },
    );

    assert!(result.is_err());
    assert_eq!(*steps.borrow(), vec!["focus on", "focus off"]);
  }

  #[test]
  fn test_enter_in_order_skips_rest_when_first_fails() {
    let steps = std::cell::RefCell::new(Vec::new());

    let result = enter_in_order(
      || Err(io::Error::other("no tty")),
      || {
        steps.borrow_mut().push("raw on");
        Ok(())
      },
      || {
        steps.borrow_mut().push("focus off");
        Ok(())
      },
    );

    assert!(result.is_err());
    assert!(steps.borrow().is_empty());
  }

  #[test]
  fn test_describe_refetching_keeps_data() {
    let result = QueryResult {
      status: QueryStatus::Pending,
      data: Some(json!([{"id": 1}])),
      error: None,
      is_loading: false,
      is_fetching: true,
      fulfilled_at: None,
      rejected_at: None,
    };
    assert!(describe(&result).starts_with("refetching"));
    assert!(describe(&result).contains("1 records"));
  }
}
