//! `greenwave` service binary.
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout. Logs go to stderr.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use greenwave_authority::{SystemClock, Topic};
use greenwave_core::rpc::{
    handle_request, json_rpc_error, json_rpc_notification, json_rpc_result, INVALID_PARAMS,
};
use greenwave_core::{
    OsrmRouteProvider, ServiceConfig, ServiceState, StateSnapshot, StaticTokenAuthenticator,
};
use greenwave_corridor::SignalRegistry;
use greenwave_ir::parse::parse_catalog;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Emergency-vehicle signal preemption service.
#[derive(Parser, Debug)]
#[command(name = "greenwave", version)]
struct Args {
    /// Path to the JSON service configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Signal catalog, overriding `catalog_path` from the config
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Log filter, overriding `log_level` from the config
    #[arg(long)]
    log_level: Option<String>,
}

/// Feed forwarders keyed by subscription id.
type Feeds = HashMap<u64, JoinHandle<()>>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    if let Some(catalog) = args.catalog {
        config.catalog_path = catalog;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let catalog_json = std::fs::read_to_string(&config.catalog_path)
        .with_context(|| format!("reading catalog {}", config.catalog_path.display()))?;
    let registry = Arc::new(SignalRegistry::from_sites(parse_catalog(&catalog_json)?)?);
    info!(signals = registry.len(), "catalog loaded");

    let routes = Arc::new(OsrmRouteProvider::new(
        config.routing.osrm_base_url.clone(),
        Duration::from_secs(config.routing.timeout_secs),
    )?);
    let auth = Arc::new(StaticTokenAuthenticator::new(config.auth.tokens.clone()));
    let state_path = config.state_path.clone();
    let state = Arc::new(ServiceState::new(
        config,
        registry,
        Arc::new(SystemClock),
        routes,
        auth,
    ));

    if let Some(path) = &state_path {
        if let Some(snapshot) = StateSnapshot::load(path)? {
            snapshot.restore(&state.store, &state.lockdowns);
            info!(path = %path.display(), "state restored");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = {
        let state = state.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { state.scheduler().run(shutdown).await })
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = out_rx.recv().await {
            let line = format!("{msg}\n");
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                warn!(error = %e, "stdout write failed");
                break;
            }
            if let Err(e) = stdout.flush().await {
                warn!(error = %e, "stdout flush failed");
                break;
            }
        }
    });

    let mut feeds = Feeds::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Value>(&line) {
            Ok(req) => dispatch(&req, &state, &mut feeds, &out_tx, &shutdown_rx).await,
            Err(e) => json_rpc_error(Value::Null, -32700, &format!("Parse error: {e}")),
        };
        if out_tx.send(response).is_err() {
            break;
        }
    }

    info!("stdin closed, shutting down");
    let _ = shutdown_tx.send(true);
    for (sub_id, forwarder) in feeds.drain() {
        stop_feed(&state, sub_id, forwarder).await;
    }
    if let Err(e) = scheduler.await {
        error!(error = %e, "scheduler task failed");
    }

    if let Some(path) = &state_path {
        state.snapshot().save(path)?;
    }

    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

/// Feed methods need the output channel, so they are handled here; the
/// rest go to the shared handler.
async fn dispatch(
    req: &Value,
    state: &Arc<ServiceState>,
    feeds: &mut Feeds,
    out: &mpsc::UnboundedSender<Value>,
    shutdown: &watch::Receiver<bool>,
) -> Value {
    let id = req.get("id").cloned().unwrap_or(Value::Null);
    let params = match req.get("params") {
        None | Some(Value::Null) => json!({}),
        Some(params) => params.clone(),
    };

    match req.get("method").and_then(|m| m.as_str()) {
        Some("feed.subscribe") => {
            let topic: Topic = match serde_json::from_value(params) {
                Ok(topic) => topic,
                Err(e) => return json_rpc_error(id, INVALID_PARAMS, &e.to_string()),
            };
            let subscription = state.bus().subscribe(topic);
            let sub_id = subscription.id();
            let out = out.clone();
            let shutdown = shutdown.clone();

            // `recv` returns `None` as soon as the bus drops this subscription.
            let forwarder = tokio::task::spawn_blocking(move || {
                while let Some(event) = subscription.recv() {
                    if *shutdown.borrow() {
                        break;
                    }
                    let params = json!({ "subscription": sub_id, "event": event });
                    if out.send(json_rpc_notification("feed.event", params)).is_err() {
                        break;
                    }
                }
            });
            feeds.insert(sub_id, forwarder);
            json_rpc_result(id, json!({ "subscription": sub_id }))
        }
        Some("feed.unsubscribe") => {
            let sub_id = params.get("subscription").and_then(Value::as_u64);
            match sub_id.and_then(|sub_id| feeds.remove(&sub_id).map(|f| (sub_id, f))) {
                Some((sub_id, forwarder)) => {
                    stop_feed(state, sub_id, forwarder).await;
                    json_rpc_result(id, json!({ "unsubscribed": sub_id }))
                }
                None => {
                    warn!(?sub_id, "unsubscribe for unknown feed");
                    json_rpc_error(id, INVALID_PARAMS, "Unknown subscription")
                }
            }
        }
        _ => handle_request(req, state).await,
    }
}

/// Unregister a feed and wait for its forwarder to finish.
async fn stop_feed(state: &ServiceState, sub_id: u64, forwarder: JoinHandle<()>) {
    state.bus().unsubscribe(sub_id);
    if let Err(e) = forwarder.await {
        warn!(subscription = sub_id, error = %e, "feed forwarder failed");
    }
}
