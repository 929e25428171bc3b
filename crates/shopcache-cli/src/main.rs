//! shopcache - resolve shops from a hydration snapshot, the on-disk store
//! or the network, printing every emission as a JSON line.
//!
//! ```text
//! shopcache [--hydrate <file>] <id>...   client mode: snapshot, store, network
//! shopcache --server <id>...             fetch and print a hydration snapshot
//! shopcache --network-only <id>...       no persistence at all
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use futures::StreamExt;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shopcache_core::{
    Config, HydrationSlot, JsonFileStore, ResourceCache, ResourceId, Shop, StorageBackend,
};

/// Directory for an additional plain-text log file.
const LOG_DIR_ENV: &str = "SHOPCACHE_LOG_DIR";

const USAGE: &str = "\
Usage: shopcache [--hydrate <file>] <id>...
       shopcache --server <id>...
       shopcache --network-only <id>...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Client,
    Server,
    NetworkOnly,
}

#[derive(Debug)]
struct Args {
    mode: Mode,
    hydrate: Option<PathBuf>,
    ids: Vec<ResourceId>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut mode = Mode::Client;
        let mut hydrate = None;
        let mut ids = Vec::new();

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--server" => mode = Mode::Server,
                "--network-only" => mode = Mode::NetworkOnly,
                "--hydrate" => {
                    let path = args.next().context("--hydrate needs a file argument")?;
                    hydrate = Some(PathBuf::from(path));
                }
                flag if flag.starts_with("--") => bail!("Unknown option {}\n{}", flag, USAGE),
                id => ids.push(parse_id(id)),
            }
        }

        if ids.is_empty() {
            bail!("No shop ids given\n{}", USAGE);
        }
        if hydrate.is_some() && mode != Mode::Client {
            bail!("--hydrate only applies to client mode");
        }

        Ok(Self { mode, hydrate, ids })
    }
}

/// Numeric only when the text round-trips, so `007` stays `"007"`.
fn parse_id(raw: &str) -> ResourceId {
    match raw.parse::<i64>() {
        Ok(n) if n.to_string() == raw => ResourceId::from(n),
        _ => ResourceId::from(raw),
    }
}

/// Initialize the tracing subscriber for logging.
///
/// RUST_LOG controls the level (default `warn`). Output goes to stderr so
/// stdout stays machine readable.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "shopcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args = Args::parse(std::env::args().skip(1))?;
    let config = Config::load()?;
    info!(mode = ?args.mode, ids = args.ids.len(), base_url = config.base_url(), "shopcache starting");

    match args.mode {
        Mode::Client => run_client(&config, args.hydrate, &args.ids).await,
        Mode::Server => run_server(&config, &args.ids).await,
        Mode::NetworkOnly => {
            let cache = config.shop_cache(StorageBackend::None)?;
            print_all(&cache, &args.ids).await
        }
    }
}

async fn run_client(config: &Config, hydrate: Option<PathBuf>, ids: &[ResourceId]) -> Result<()> {
    let snapshot = match hydrate {
        Some(path) => {
            let json = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
            let slot = HydrationSlot::<Shop>::from_json(&json)
                .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
            debug!(entries = slot.len(), "Loaded hydration snapshot");
            Some(slot)
        }
        None => None,
    };

    let store = JsonFileStore::<Shop>::new(config.cache_dir()?);
    let cache = config.shop_cache(StorageBackend::Persistent {
        store: Arc::new(store),
        snapshot,
    })?;
    print_all(&cache, ids).await
}

async fn run_server(config: &Config, ids: &[ResourceId]) -> Result<()> {
    let slot = HydrationSlot::<Shop>::new();
    let cache = config.shop_cache(StorageBackend::Hydration(slot.clone()))?;

    let cache = &cache;
    join_all(ids.iter().map(|id| async move {
        let resolved = cache.subscribe(id.clone()).count().await;
        if resolved == 0 {
            eprintln!("Failed to resolve shop {}", id);
        }
    }))
    .await;

    println!("{}", slot.to_json()?);
    Ok(())
}

/// Resolve every id concurrently and print each emission as it arrives.
async fn print_all(cache: &ResourceCache<Shop>, ids: &[ResourceId]) -> Result<()> {
    let results = join_all(ids.iter().map(|id| async move {
        let mut stream = cache.subscribe(id.clone());
        let mut emitted = 0usize;
        while let Some(envelope) = stream.next().await {
            println!("{}", serde_json::to_string(&envelope)?);
            emitted += 1;
        }
        if emitted == 0 {
            eprintln!("No value for shop {}", id);
        }
        Ok::<_, serde_json::Error>(())
    }))
    .await;

    results.into_iter().collect::<Result<Vec<_>, _>>()?;
    Ok(())
}
