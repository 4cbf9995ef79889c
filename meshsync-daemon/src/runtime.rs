use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use meshsync_core::batch::{is_batch_file, list_batch_files_at, load_batch_at};
use meshsync_core::{config, EngineConfig};
use meshsync_engine::ledger::{self, MemoryLedger};
use meshsync_engine::{ConfigReader, ConfigSink, ControllerOptions, LoggingPusher, Pipeline};

use crate::error::{io_err, DaemonError};
use crate::paths::{batches_dir, meshsync_root, socket_path, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Engine state shared by the processor and the socket server.
struct Engine {
    pipeline: Pipeline,
    /// Present when the ledger is enabled; snapshotted after every batch.
    ledger: Option<Arc<MemoryLedger>>,
}

struct BatchJob {
    path: PathBuf,
    source: &'static str,
    respond_to: oneshot::Sender<Result<BatchSummary, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub file: String,
    pub source: String,
    pub collection: String,
    pub incremental: bool,
    pub applied: usize,
    pub discarded: usize,
    pub events: usize,
    pub signals: usize,
    pub version: String,
    pub duration_ms: u128,
}

#[derive(Debug, Default)]
struct ProcessorStats {
    batches_applied: u64,
    batches_failed: u64,
    last_batch_at_unix: u64,
    last_batch: Option<BatchSummary>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let config = config::load_at(&home)?;
    let engine = Arc::new(build_engine(&home, &config)?);
    let stats = Arc::new(RwLock::new(ProcessorStats::default()));
    let started_at_unix = unix_seconds_now();
    tracing::info!(
        domain_suffix = %config.domain_suffix,
        cluster = %config.cluster_id,
        ledger = config.ledger.enabled,
        "meshsync daemon starting"
    );

    let (batch_tx, batch_rx) = mpsc::channel::<BatchJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let batch_tx = batch_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = watcher_task(home, batch_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let engine = engine.clone();
        let stats = stats.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = batch_processor_task(home, engine, stats, batch_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let engine = engine.clone();
        let stats = stats.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                engine,
                stats,
                shutdown.clone(),
                shutdown_rx,
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, processor_result, socket_result, signal_result) = tokio::join!(
        watcher_handle,
        processor_handle,
        socket_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("batch_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("meshsync daemon stopped");
    Ok(())
}

fn build_engine(home: &Path, config: &EngineConfig) -> Result<Engine, DaemonError> {
    let mut options = ControllerOptions::from_config(config).with_pusher(Arc::new(LoggingPusher));
    let ledger = if config.ledger.enabled {
        let snapshot = ledger::load_at(home)?;
        let restored = Arc::new(MemoryLedger::restore(&snapshot, config.ledger.history_limit));
        if !restored.is_empty() {
            tracing::info!(
                entries = restored.len(),
                root = %snapshot.root,
                "restored ledger snapshot"
            );
        }
        options = options.with_ledger(restored.clone());
        Some(restored)
    } else {
        None
    };
    Ok(Engine {
        pipeline: Pipeline::with_options(config, options),
        ledger,
    })
}

async fn watcher_task(
    home: PathBuf,
    batch_tx: mpsc::Sender<BatchJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let batches = batches_dir(&home);
    if !batches.exists() {
        fs::create_dir_all(&batches).map_err(|e| io_err(&batches, e))?;
    }

    // Canonicalize so that FSEvents paths (which arrive as real paths, e.g.
    // /private/var/... on macOS) match the `starts_with` checks below.
    let batches = fs::canonicalize(&batches).unwrap_or(batches);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&batches, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %batches.display(), "watching batch directory");

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    // Files already present are applied first, in file-name order.
    for path in list_batch_files_at(&batches)? {
        debounce.insert(path.clone(), Instant::now());
        report(enqueue_batch(&batch_tx, path, "startup").await);
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    if !path.starts_with(&batches) || !is_batch_file(&path) || !path.is_file() {
                        continue;
                    }
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }
                    report(enqueue_batch(&batch_tx, path, "watcher").await);
                }
            }
        }
    }

    Ok(())
}

fn report(result: Result<BatchSummary, DaemonError>) {
    match result {
        Ok(summary) => tracing::info!(
            file = %summary.file,
            collection = %summary.collection,
            applied = summary.applied,
            discarded = summary.discarded,
            events = summary.events,
            signals = summary.signals,
            duration_ms = summary.duration_ms,
            "batch applied",
        ),
        Err(err) => tracing::error!(error = %err, "batch failed"),
    }
}

async fn batch_processor_task(
    home: PathBuf,
    engine: Arc<Engine>,
    stats: Arc<RwLock<ProcessorStats>>,
    mut batch_rx: mpsc::Receiver<BatchJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = batch_rx.recv() => {
                let Some(job) = maybe_job else { break };

                let engine = engine.clone();
                let home = home.clone();
                let path = job.path;
                let source = job.source;
                let result = tokio::task::spawn_blocking(move || {
                    apply_batch_file(&home, &engine, &path, source)
                })
                .await
                .map_err(|err| DaemonError::Protocol(format!("batch task join error: {err}")))?;

                let mut guard = stats.write().await;
                let outcome = match result {
                    Ok(summary) => {
                        guard.batches_applied += 1;
                        guard.last_batch_at_unix = unix_seconds_now();
                        guard.last_batch = Some(summary.clone());
                        Ok(summary)
                    }
                    Err(err) => {
                        guard.batches_failed += 1;
                        Err(err.to_string())
                    }
                };
                drop(guard);

                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

/// Decode one batch file, apply it, and persist the ledger snapshot.
fn apply_batch_file(
    home: &Path,
    engine: &Engine,
    path: &Path,
    source: &'static str,
) -> Result<BatchSummary, DaemonError> {
    let started = std::time::Instant::now();
    let batch = load_batch_at(path)?;
    let outcome = engine.pipeline.apply(&batch)?;

    if let Some(ledger) = &engine.ledger {
        if let Err(err) = ledger::save_at(home, &ledger.snapshot()) {
            tracing::warn!(error = %err, "failed to persist ledger snapshot");
        }
    }

    Ok(BatchSummary {
        file: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        source: source.to_string(),
        collection: outcome.collection.to_string(),
        incremental: outcome.incremental,
        applied: outcome.applied,
        discarded: outcome.discarded,
        events: outcome.events.len(),
        signals: outcome.signals.len(),
        version: engine.pipeline.version(),
        duration_ms: started.elapsed().as_millis(),
    })
}

async fn socket_server_task(
    home: PathBuf,
    engine: Arc<Engine>,
    stats: Arc<RwLock<ProcessorStats>>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let engine = engine.clone();
                let stats = stats.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        engine,
                        stats,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    engine: Arc<Engine>,
    stats: Arc<RwLock<ProcessorStats>>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => {
                DaemonResponse::ok(build_status_payload(&home, &engine, &stats, started_at_unix).await)
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            _ => handle_query(&engine.pipeline, &request),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

/// `list` / `get` straight against the store; readers never wait on the
/// batch processor.
fn handle_query(pipeline: &Pipeline, request: &DaemonRequest) -> DaemonResponse {
    let Some(type_name) = request.type_name.as_deref() else {
        return match request.cmd.as_str() {
            "list" | "get" => DaemonResponse::error(format!("'{}' requires type_name", request.cmd)),
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };
    };
    let namespace = request.namespace.as_deref().unwrap_or("");

    let result = match request.cmd.as_str() {
        "list" => pipeline
            .list(type_name, namespace)
            .map(|records| json!(records.iter().map(|r| r.as_ref()).collect::<Vec<_>>())),
        "get" => {
            let Some(name) = request.name.as_deref() else {
                return DaemonResponse::error("'get' requires name");
            };
            pipeline
                .get(type_name, namespace, name)
                .map(|record| json!(record.as_deref()))
        }
        other => return DaemonResponse::error(format!("unknown command '{other}'")),
    };

    match result {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

async fn build_status_payload(
    home: &Path,
    engine: &Engine,
    stats: &RwLock<ProcessorStats>,
    started_at_unix: u64,
) -> Value {
    let (applied, failed, last_at, last_batch) = {
        let stats = stats.read().await;
        (
            stats.batches_applied,
            stats.batches_failed,
            stats.last_batch_at_unix,
            stats.last_batch.clone(),
        )
    };

    let pending: Vec<String> = engine
        .pipeline
        .pending_collections()
        .into_iter()
        .map(|c| c.0)
        .collect();

    json!({
        "running": true,
        "started_at_unix": started_at_unix,
        "synced": engine.pipeline.has_synced(),
        "pending_collections": pending,
        "version": engine.pipeline.version(),
        "batches_applied": applied,
        "batches_failed": failed,
        "last_batch_at_unix": last_at,
        "last_batch": last_batch,
        "socket": socket_path(home).display().to_string(),
        "batches_dir": batches_dir(home).display().to_string(),
    })
}

async fn enqueue_batch(
    batch_tx: &mpsc::Sender<BatchJob>,
    path: PathBuf,
    source: &'static str,
) -> Result<BatchSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    batch_tx
        .send(BatchJob {
            path,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("batch queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("batch response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [meshsync_root(home), batches_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the global stderr subscriber: `RUST_LOG` if set, `info` otherwise.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
