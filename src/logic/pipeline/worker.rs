//! Entity Worker
//!
//! Owns a partition of entity keys: window builder, pending windows, threshold
//! state and alert manager. One window in flight at a time, so scores, verdicts
//! and alerts for a key come out in window order.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::logic::alert::{Alert, AlertManager, AlertStats};
use crate::logic::error::ScoreError;
use crate::logic::flow::{Admission, Boundary, FlowController, OverflowPolicy, PendingQueue};
use crate::logic::model::{Score, ScorerAdapter};
use crate::logic::parser::NormalizedRecord;
use crate::logic::telemetry::Metrics;
use crate::logic::threshold::ThresholdEngine;
use crate::logic::vocab::Vocabulary;
use crate::logic::window::{EntityKey, Window, WindowBuilder, WindowStats};

/// Routed record (the same record may go to one worker per detector family)
#[derive(Debug, Clone)]
pub struct WorkerInput {
    pub key: EntityKey,
    pub record: Arc<NormalizedRecord>,
}

/// Lifecycle requests answered from the worker's own task
#[derive(Debug)]
pub enum WorkerCommand {
    Acknowledge(Uuid, oneshot::Sender<bool>),
    Close(Uuid, oneshot::Sender<bool>),
    Alerts(oneshot::Sender<Vec<Alert>>),
    Stats(oneshot::Sender<AlertStats>),
}

#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    pub index: usize,
    pub windows: WindowStats,
    pub alerts: Vec<Alert>,
    pub alert_stats: AlertStats,
    pub alerting_keys: Vec<EntityKey>,
    /// Windows still unscored when the grace period ran out
    pub abandoned: u64,
}

type InFlight = JoinHandle<(Window, Result<Score, ScoreError>)>;

pub struct EntityWorker {
    index: usize,
    builder: WindowBuilder,
    pending: PendingQueue,
    threshold: ThresholdEngine,
    alerts: AlertManager,
    scorer: Arc<ScorerAdapter>,
    vocab: Arc<Vocabulary>,
    flow: Arc<FlowController>,
    metrics: Arc<Metrics>,
    tick: Duration,
    grace: Duration,
    in_flight: Option<InFlight>,
}

impl EntityWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        builder: WindowBuilder,
        threshold: ThresholdEngine,
        alerts: AlertManager,
        scorer: Arc<ScorerAdapter>,
        vocab: Arc<Vocabulary>,
        flow: Arc<FlowController>,
        metrics: Arc<Metrics>,
        tick: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            index,
            builder,
            pending: PendingQueue::new(),
            threshold,
            alerts,
            scorer,
            vocab,
            flow,
            metrics,
            tick,
            grace,
            in_flight: None,
        }
    }

    /// Run until input closes (drain everything) or shutdown (drain within grace)
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<WorkerInput>,
        mut commands: mpsc::Receiver<WorkerCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> WorkerReport {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut input_open = true;
        let mut commands_open = true;
        let mut paused = false;
        let mut interrupted = false;

        log::debug!("Worker {} started", self.index);

        loop {
            self.start_next();

            if !input_open && self.is_idle() {
                break;
            }

            let intake = input_open && !self.must_pause();
            if !intake && input_open && !paused {
                self.flow.record_blocked(Boundary::Scorer);
                log::debug!("Worker {}: scorer boundary full, pausing intake", self.index);
            }
            paused = !intake && input_open;

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        interrupted = true;
                        break;
                    }
                }

                joined = join_in_flight(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.flow.leave(Boundary::Scorer);
                    self.finish(joined).await;
                }

                msg = input.recv(), if intake => match msg {
                    Some(msg) => self.accept(msg),
                    None => {
                        input_open = false;
                        for window in self.builder.flush_all() {
                            self.enqueue(window);
                        }
                    }
                },

                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => commands_open = false,
                },

                _ = ticker.tick() => self.on_tick(Instant::now()),
            }
        }

        let abandoned = if interrupted {
            drop(input);
            for window in self.builder.flush_all() {
                self.enqueue(window);
            }
            self.drain_within(self.grace).await
        } else {
            0
        };

        log::debug!(
            "Worker {} stopped: {} windows emitted, {} abandoned",
            self.index,
            self.builder.stats().emitted(),
            abandoned
        );

        WorkerReport {
            index: self.index,
            windows: self.builder.stats().clone(),
            alerts: self.alerts.alerts(),
            alert_stats: self.alerts.stats(),
            alerting_keys: self.threshold.alerting_keys(),
            abandoned,
        }
    }

    // ========================================================================
    // INTAKE
    // ========================================================================

    fn accept(&mut self, msg: WorkerInput) {
        let id = self.vocab.intern(msg.record.event_token());
        if let Some(window) = self.builder.push(
            &msg.key,
            id,
            msg.record.timestamp,
            msg.record.raw_ref,
            Instant::now(),
        ) {
            self.enqueue(window);
        }
    }

    /// Admission at the scorer boundary
    fn enqueue(&mut self, window: Window) {
        Metrics::incr(&self.metrics.windows_emitted);

        if self.flow.admit(Boundary::Scorer) == Admission::Shed && !self.pending.is_empty() {
            let builder = &self.builder;
            if let Some(shed) = self.pending.shed_one(|k| builder.last_activity(k)) {
                self.flow.leave(Boundary::Scorer);
                self.flow.record_drop(Boundary::Scorer);
                log::debug!("Worker {}: shed window {} of {}", self.index, shed.id, shed.entity_key);
            }
        }

        self.flow.enter(Boundary::Scorer);
        self.pending.push(window);
    }

    /// Block policy: stop reading while the boundary is full and this worker
    /// has its own work that will free a slot
    fn must_pause(&self) -> bool {
        self.flow.policy(Boundary::Scorer) == OverflowPolicy::Block
            && self.flow.is_full(Boundary::Scorer)
            && !self.is_idle()
    }

    fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }

    fn on_tick(&mut self, now: Instant) {
        for window in self.builder.poll_idle(now) {
            self.enqueue(window);
        }

        let evicted = self.builder.evict_idle(now);
        if !evicted.is_empty() {
            Metrics::add(&self.metrics.keys_evicted, evicted.len() as u64);
            for key in &evicted {
                self.threshold.forget(key);
                self.alerts.forget(key);
            }
        }
    }

    // ========================================================================
    // SCORING
    // ========================================================================

    fn start_next(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(window) = self.pending.pop() else {
            return;
        };
        let scorer = self.scorer.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = scorer.score(&window).await;
            (window, result)
        }));
    }

    async fn finish(&mut self, joined: Result<(Window, Result<Score, ScoreError>), tokio::task::JoinError>) {
        let (window, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                log::error!("Worker {}: scoring task failed: {}", self.index, e);
                return;
            }
        };

        let score = match result {
            Ok(score) => score,
            Err(e) => {
                log::warn!("Worker {}: {}", self.index, e);
                return;
            }
        };

        let verdict = self.threshold.evaluate(&score);
        if verdict.is_alert {
            Metrics::incr(&self.metrics.verdicts_alerting);
            self.alerts.ingest(&verdict, &window).await;
        }
    }

    /// Shutdown drain. Whatever is left at the deadline is dropped and counted.
    async fn drain_within(&mut self, grace: Duration) -> u64 {
        let deadline = tokio::time::Instant::now() + grace;

        loop {
            self.start_next();
            let Some(handle) = self.in_flight.as_mut() else {
                break;
            };
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(joined) => {
                    self.in_flight = None;
                    self.flow.leave(Boundary::Scorer);
                    self.finish(joined).await;
                }
                Err(_) => break,
            }
        }

        let mut abandoned = 0;
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
            self.flow.leave(Boundary::Scorer);
            abandoned += 1;
        }
        for _ in self.pending.drain() {
            self.flow.leave(Boundary::Scorer);
            abandoned += 1;
        }
        if abandoned > 0 {
            for _ in 0..abandoned {
                self.flow.record_drop(Boundary::Scorer);
            }
            log::warn!(
                "Worker {}: grace period over, {} windows dropped unscored",
                self.index,
                abandoned
            );
        }
        abandoned
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    fn handle_command(&mut self, cmd: WorkerCommand) {
        // Receiver đã drop = caller không chờ nữa
        match cmd {
            WorkerCommand::Acknowledge(id, reply) => {
                let _ = reply.send(self.alerts.acknowledge(id));
            }
            WorkerCommand::Close(id, reply) => {
                let _ = reply.send(self.alerts.close(id));
            }
            WorkerCommand::Alerts(reply) => {
                let _ = reply.send(self.alerts.alerts());
            }
            WorkerCommand::Stats(reply) => {
                let _ = reply.send(self.alerts.stats());
            }
        }
    }
}

/// Pending forever when nothing is in flight
fn join_in_flight(
    in_flight: &mut Option<InFlight>,
) -> impl Future<Output = Result<(Window, Result<Score, ScoreError>), tokio::task::JoinError>> + '_ {
    async move {
        match in_flight.as_mut() {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    }
}
