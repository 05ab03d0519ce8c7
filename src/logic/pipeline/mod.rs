//! Pipeline Orchestrator
//!
//! Source → Parser → (dispatch by EntityKey partition) → Entity Workers → Sink.
//!
//! - `source`: log sources and the source pump thread
//! - `worker`: per-partition windowing, scoring, thresholds, alerts
//!
//! Startup is all-or-nothing: config, model, vocabulary, cutoffs and sink are
//! checked before any line is read.

pub mod source;
pub mod worker;


use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::constants::APP_NAME;
use crate::logic::alert::{build_sink, spawn_sink_task, Alert, AlertManager, AlertSink, AlertStats, SinkHandle};
use crate::logic::config::{validate, PipelineConfig};
use crate::logic::error::{ModelError, StartupError};
use crate::logic::flow::{Boundary, FlowController};
use crate::logic::model::{ArtifactWatcher, ModelLoader, ModelRegistry, ScorerAdapter, ScoringModel};
use crate::logic::parser::{Parser, RawLine};
use crate::logic::telemetry::{spawn_reporter, Metrics, MetricsSnapshot};
use crate::logic::threshold::{load_hysteresis, save_hysteresis, ThresholdEngine};
use crate::logic::vocab::Vocabulary;
use crate::logic::window::{DetectorFamily, EntityKey, WindowBuilder, WindowStats};

pub use source::{spawn_source_pump, JsonLinesSource, LogSource, MemorySource};
pub use worker::{EntityWorker, WorkerCommand, WorkerInput, WorkerReport};

// ============================================================================
// METRICS VIEW
// ============================================================================

/// Everything a metrics snapshot reads from
#[derive(Clone)]
pub struct MetricsView {
    metrics: Arc<Metrics>,
    parser: Arc<Parser>,
    vocab: Arc<Vocabulary>,
    flow: Arc<FlowController>,
    registry: Arc<ModelRegistry>,
}

impl MetricsView {
    pub fn snapshot(&self) -> MetricsSnapshot {
        let dialects = self
            .parser
            .dialect_counts()
            .into_iter()
            .map(|(d, n)| (d.as_str().to_string(), n))
            .collect::<BTreeMap<_, _>>();

        let mut snapshot = MetricsSnapshot::collect(
            &self.metrics,
            dialects,
            self.vocab.stats(),
            self.flow.gauges(),
            self.registry.version(),
        );
        snapshot.model_swaps = self.registry.swap_count();
        snapshot
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// Control surface usable while `run` is in progress
#[derive(Clone)]
pub struct PipelineHandle {
    shutdown: Arc<watch::Sender<bool>>,
    commands: Vec<mpsc::Sender<WorkerCommand>>,
    view: MetricsView,
}

impl PipelineHandle {
    /// Stop reading, flush open windows, drain within the grace period
    pub fn shutdown(&self) {
        log::info!("Pipeline shutdown requested");
        self.shutdown.send_replace(true);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.view.snapshot()
    }

    pub async fn acknowledge(&self, alert_id: Uuid) -> bool {
        self.ask_any(|reply| WorkerCommand::Acknowledge(alert_id, reply)).await
    }

    pub async fn close(&self, alert_id: Uuid) -> bool {
        self.ask_any(|reply| WorkerCommand::Close(alert_id, reply)).await
    }

    /// Alerts currently held by all workers
    pub async fn alerts(&self) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for tx in &self.commands {
            let (reply, rx) = oneshot::channel();
            if tx.send(WorkerCommand::Alerts(reply)).await.is_ok() {
                if let Ok(mut part) = rx.await {
                    alerts.append(&mut part);
                }
            }
        }
        alerts.sort_by_key(|a| a.first_seen);
        alerts
    }

    pub async fn alert_stats(&self) -> AlertStats {
        let mut stats = AlertStats::default();
        for tx in &self.commands {
            let (reply, rx) = oneshot::channel();
            if tx.send(WorkerCommand::Stats(reply)).await.is_ok() {
                if let Ok(part) = rx.await {
                    stats.merge(&part);
                }
            }
        }
        stats
    }

    /// Alert ids are unique, so at most one worker answers true
    async fn ask_any<F>(&self, command: F) -> bool
    where
        F: Fn(oneshot::Sender<bool>) -> WorkerCommand,
    {
        for tx in &self.commands {
            let (reply, rx) = oneshot::channel();
            if tx.send(command(reply)).await.is_err() {
                continue;
            }
            if rx.await.unwrap_or(false) {
                return true;
            }
        }
        false
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub metrics: MetricsSnapshot,
    pub windows: WindowStats,
    /// All alerts, ordered by first_seen
    pub alerts: Vec<Alert>,
    pub alert_stats: AlertStats,
    /// Windows dropped unscored at shutdown
    pub abandoned: u64,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    parser: Arc<Parser>,
    vocab: Arc<Vocabulary>,
    registry: Arc<ModelRegistry>,
    scorer: Arc<ScorerAdapter>,
    flow: Arc<FlowController>,
    metrics: Arc<Metrics>,
    sink: Arc<dyn AlertSink>,
    watcher: Option<ArtifactWatcher>,
    shutdown: Arc<watch::Sender<bool>>,
    command_txs: Vec<mpsc::Sender<WorkerCommand>>,
    command_rxs: Vec<mpsc::Receiver<WorkerCommand>>,
    restored: Vec<EntityKey>,
    reporter: String,
}

impl Pipeline {
    /// Model and sink from config
    pub fn build(config: PipelineConfig) -> Result<Self, StartupError> {
        Self::build_with(config, None, None)
    }

    /// Same startup checks, with an injected model and/or sink
    pub fn build_with(
        config: PipelineConfig,
        model: Option<Arc<dyn ScoringModel>>,
        sink: Option<Arc<dyn AlertSink>>,
    ) -> Result<Self, StartupError> {
        validate(&config)?;

        let state_dir = config.state_dir();
        fs::create_dir_all(&state_dir)?;

        // 1. Vocabulary
        let vocab = if config.vocabulary.persist {
            Vocabulary::load(
                &config.vocabulary_snapshot_path(),
                config.vocabulary.growth,
                config.vocabulary.max_size,
            )?
        } else {
            Vocabulary::new(config.vocabulary.growth, config.vocabulary.max_size)
        };
        let vocab = Arc::new(vocab);

        // 2. Model
        let loader = ModelLoader::new(&config.model, config.window.length, vocab.clone());
        let model = match model {
            Some(model) => model,
            None => loader.load()?,
        };
        if model.sequence_length() != config.window.length {
            return Err(ModelError::SequenceLength {
                expected: config.window.length,
                actual: model.sequence_length(),
            }
            .into());
        }
        vocab.reconcile(model.vocab_size(), model.version())?;

        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(ModelRegistry::new(model));
        let scorer = Arc::new(ScorerAdapter::new(registry.clone(), &config.scorer, metrics.clone()));

        // 3. Every active family needs a cutoff now, not at the first verdict
        ThresholdEngine::new(&config.detectors, scorer.cutoff(), config.severity_bands.clone())?;

        // 4. Flow control and sink
        let flow = Arc::new(FlowController::new(&config.boundaries)?);
        let sink = match sink {
            Some(sink) => sink,
            None => build_sink(&config.sink, &state_dir)?,
        };

        let watcher = if config.model.watch && loader.artifact_path().is_some() {
            match ArtifactWatcher::start(registry.clone(), loader.clone(), vocab.clone()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Model hot-swap disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let restored = load_hysteresis(&config.hysteresis_path());
        if !restored.is_empty() {
            log::info!("Restored {} alerting keys", restored.len());
        }

        let (command_txs, command_rxs): (Vec<_>, Vec<_>) = (0..config.workers)
            .map(|_| mpsc::channel::<WorkerCommand>(16))
            .unzip();
        let (shutdown, _) = watch::channel(false);

        let reporter = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| APP_NAME.to_lowercase());

        log::info!(
            "Pipeline ready: {} workers, L={}, model {}, sink {}",
            config.workers,
            config.window.length,
            registry.version(),
            sink.name()
        );

        Ok(Self {
            config,
            parser: Arc::new(Parser::default()),
            vocab,
            registry,
            scorer,
            flow,
            metrics,
            sink,
            watcher,
            shutdown: Arc::new(shutdown),
            command_txs,
            command_rxs,
            restored,
            reporter,
        })
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            shutdown: self.shutdown.clone(),
            commands: self.command_txs.clone(),
            view: self.view(),
        }
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    fn view(&self) -> MetricsView {
        MetricsView {
            metrics: self.metrics.clone(),
            parser: self.parser.clone(),
            vocab: self.vocab.clone(),
            flow: self.flow.clone(),
            registry: self.registry.clone(),
        }
    }

    /// Run until the source ends (everything drained) or shutdown is requested
    pub async fn run(self, source: Box<dyn LogSource>) -> Result<PipelineReport, StartupError> {
        let view = self.view();
        let Pipeline {
            config,
            parser,
            vocab,
            registry,
            scorer,
            flow,
            metrics,
            sink,
            watcher,
            shutdown,
            command_txs,
            command_rxs,
            restored,
            reporter,
        } = self;
        drop(command_txs);

        let workers = config.workers;
        let shutdown_rx = shutdown.subscribe();
        let queue_depth = flow.max_depth(Boundary::Source).max(1);
        let sink_timeout = Duration::from_millis(config.sink.timeout_ms);
        let grace = Duration::from_millis(config.shutdown_grace_ms);
        let tick = (Duration::from_millis(config.window.idle_timeout_ms) / 4)
            .clamp(Duration::from_millis(10), Duration::from_secs(1));

        // Sink boundary
        let (sink_tx, sink_rx) = mpsc::channel(flow.max_depth(Boundary::Sink).max(1));
        let sink_task = spawn_sink_task(sink_rx, sink, flow.clone(), metrics.clone(), sink_timeout);
        let sink_handle = SinkHandle::new(sink_tx, flow.clone(), sink_timeout);

        // Workers
        let mut restored_by_worker = vec![Vec::new(); workers];
        for key in restored {
            restored_by_worker[key.partition(workers)].push(key);
        }

        let mut worker_txs = Vec::with_capacity(workers);
        let mut worker_tasks = Vec::with_capacity(workers);
        for (index, (commands, keys)) in command_rxs.into_iter().zip(restored_by_worker).enumerate() {
            let mut threshold =
                ThresholdEngine::new(&config.detectors, scorer.cutoff(), config.severity_bands.clone())?;
            threshold.restore(keys);

            let alerts = AlertManager::new(
                config.dedup_window_secs(),
                vocab.clone(),
                sink_handle.clone(),
                metrics.clone(),
                reporter.clone(),
            );
            let worker = EntityWorker::new(
                index,
                WindowBuilder::new(&config.window),
                threshold,
                alerts,
                scorer.clone(),
                vocab.clone(),
                flow.clone(),
                metrics.clone(),
                tick,
                grace,
            );

            let (tx, rx) = mpsc::channel(queue_depth);
            worker_txs.push(tx);
            worker_tasks.push(tokio::spawn(worker.run(rx, commands, shutdown_rx.clone())));
        }
        drop(sink_handle);

        // Dispatcher and source
        let (line_tx, line_rx) = mpsc::channel(queue_depth);
        let families: Vec<DetectorFamily> = config.detectors.iter().map(|d| d.family).collect();
        let dispatcher = tokio::spawn(dispatch(
            line_rx,
            worker_txs,
            parser,
            families,
            flow.clone(),
            metrics.clone(),
            shutdown_rx.clone(),
        ));
        // Not joined: a source blocked on input must not hold up shutdown
        spawn_source_pump(source, line_tx, flow.clone(), metrics.clone(), shutdown_rx.clone())?;

        // Background
        let snapshot_path = config.vocabulary_snapshot_path();
        let snapshot_task = config.vocabulary.persist.then(|| {
            spawn_vocab_snapshots(
                vocab.clone(),
                registry.clone(),
                snapshot_path.clone(),
                Duration::from_secs(config.vocabulary.snapshot_interval_secs.max(1)),
                shutdown_rx.clone(),
            )
        });
        let reporter_view = view.clone();
        let reporter_task = spawn_reporter(
            Duration::from_secs(config.metrics_interval_secs.max(1)),
            shutdown_rx,
            move || reporter_view.snapshot(),
        );

        log::info!("Pipeline running");

        // Chờ theo thứ tự: dispatcher → workers → sink
        if let Err(e) = dispatcher.await {
            log::error!("Dispatcher task failed: {}", e);
        }
        let mut reports = Vec::with_capacity(workers);
        for task in worker_tasks {
            match task.await {
                Ok(report) => reports.push(report),
                Err(e) => log::error!("Worker task failed: {}", e),
            }
        }
        if let Err(e) = sink_task.await {
            log::error!("Sink task failed: {}", e);
        }

        shutdown.send_replace(true);
        if let Some(task) = snapshot_task {
            let _ = task.await;
        }
        let _ = reporter_task.await;
        drop(watcher);

        // Lưu state cho lần chạy sau
        let alerting: Vec<EntityKey> = reports.iter().flat_map(|r| r.alerting_keys.iter().cloned()).collect();
        if let Err(e) = save_hysteresis(&config.hysteresis_path(), alerting) {
            log::warn!("Failed to save alerting state: {}", e);
        }
        if config.vocabulary.persist {
            match vocab.checkpoint(&snapshot_path, &registry.version()) {
                Ok(n) => log::info!("Vocabulary saved ({} new ids, size {})", n, vocab.len()),
                Err(e) => log::error!("Failed to save vocabulary: {}", e),
            }
        }

        let mut windows = WindowStats::default();
        let mut alerts = Vec::new();
        let mut alert_stats = AlertStats::default();
        let mut abandoned = 0;
        for report in reports {
            windows.emitted_full += report.windows.emitted_full;
            windows.emitted_idle += report.windows.emitted_idle;
            windows.emitted_shutdown += report.windows.emitted_shutdown;
            windows.late_records += report.windows.late_records;
            windows.evicted_keys += report.windows.evicted_keys;
            alert_stats.merge(&report.alert_stats);
            alerts.extend(report.alerts);
            abandoned += report.abandoned;
        }
        alerts.sort_by_key(|a| a.first_seen);

        let metrics = view.snapshot();
        log::info!(
            "Pipeline stopped: {} lines, {} windows, {} alerts, {} drops",
            metrics.lines_read,
            windows.emitted(),
            alerts.len(),
            metrics.total_drops()
        );

        Ok(PipelineReport {
            metrics,
            windows,
            alerts,
            alert_stats,
            abandoned,
        })
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Parse in arrival order and route each keyed record to its partition's worker
async fn dispatch(
    mut lines: mpsc::Receiver<RawLine>,
    workers: Vec<mpsc::Sender<WorkerInput>>,
    parser: Arc<Parser>,
    families: Vec<DetectorFamily>,
    flow: Arc<FlowController>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    'lines: loop {
        let line = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        flow.leave(Boundary::Source);

        let record = match parser.parse(&line) {
            Ok(record) => Arc::new(record),
            Err(e) => {
                Metrics::incr(&metrics.parse_failures);
                log::debug!("Parse failed at offset {}: {}", line.source_offset, e);
                continue;
            }
        };
        Metrics::incr(&metrics.records_parsed);

        let mut routed = false;
        for family in &families {
            let Some(key) = EntityKey::for_record(&record, *family) else {
                continue;
            };
            routed = true;
            let worker = key.partition(workers.len());
            let input = WorkerInput {
                key,
                record: record.clone(),
            };
            if workers[worker].send(input).await.is_err() {
                log::warn!("Dispatcher: worker {} stopped, no more routing", worker);
                break 'lines;
            }
        }
        if !routed {
            Metrics::incr(&metrics.records_unkeyed);
        }
    }

    // Lines still queued at shutdown are dropped
    lines.close();
    while lines.try_recv().is_ok() {
        flow.leave(Boundary::Source);
        flow.record_drop(Boundary::Source);
    }
    log::debug!("Dispatcher stopped");
}

/// Periodic vocabulary checkpoint (final one happens at shutdown)
fn spawn_vocab_snapshots(
    vocab: Arc<Vocabulary>,
    registry: Arc<ModelRegistry>,
    path: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let v = vocab.clone();
                    let p = path.clone();
                    let version = registry.version();
                    match tokio::task::spawn_blocking(move || v.checkpoint(&p, &version)).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => log::warn!("Vocabulary checkpoint failed: {}", e),
                        Err(e) => log::error!("Vocabulary checkpoint task failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
