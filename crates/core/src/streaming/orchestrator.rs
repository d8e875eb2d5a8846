//! Subscription orchestrator.
//!
//! Owns the streaming consumer fleet for the life of the process:
//!
//! ```text
//! SubscriptionOrchestrator
//!       │
//!       ├─► allocate()      (wholesale, on start and every rebalance)
//!       ├─► reallocate()    (targeted, when one consumer fails)
//!       ├─► worker task per consumer  ──events──┐
//!       └─► monitor loop  ◄─────────────────────┘
//!             ├─ health checks
//!             ├─ periodic / on-disconnect rebalance
//!             └─ status line
//! ```
//!
//! The allocation and worker table sit behind one async mutex; the shared
//! state table is the only thing workers write. Calls into consumers are
//! made after that mutex is released, each bounded by the consumer timeout,
//! so one stuck vendor cannot stall the rest of the fleet.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::allocation::{allocate, reallocate, Allocation, AllocationContext, ConsumerProfile};
use super::consumer::{ConsumerError, StreamConsumer};
use super::reconnect::ReconnectPolicy;
use super::state::{ConsumerState, ConsumerStates};
use super::worker::{spawn_worker, WorkerEvent, WorkerHandle, WorkerSpec};
use crate::assets::AssetRepositoryTrait;
use crate::errors::Result;
use crate::settings::{EngineSettings, SettingsHandle};

/// Per-consumer line of [`OrchestratorStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStatus {
    pub id: String,
    pub state: ConsumerState,
    pub tickers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    /// Consumers currently running.
    pub active: usize,
    pub total: usize,
    pub assigned_tickers: usize,
    pub per_consumer: Vec<ConsumerStatus>,
}

impl OrchestratorStatus {
    pub fn summary(&self) -> String {
        format!(
            "{}/{} consumers active, {} tickers assigned",
            self.active, self.total, self.assigned_tickers
        )
    }
}

/// Consumer calls deferred until the orchestrator lock is released.
#[derive(Default)]
struct ConsumerCalls {
    disconnect: Vec<Arc<dyn StreamConsumer>>,
    /// Running consumers and their new ticker sets.
    resubscribe: Vec<(Arc<dyn StreamConsumer>, Vec<String>)>,
}

#[derive(Default)]
struct OrchestratorInner {
    allocation: Allocation,
    workers: HashMap<String, WorkerHandle>,
    /// When each consumer last failed; entries expire after the cool-down.
    failed_at: HashMap<String, Instant>,
    backoff: HashMap<String, ReconnectPolicy>,
    last_rebalance: Option<Instant>,
    next_generation: u64,
}

pub struct SubscriptionOrchestrator {
    consumers: Vec<Arc<dyn StreamConsumer>>,
    assets: Arc<dyn AssetRepositoryTrait>,
    settings: SettingsHandle,
    states: ConsumerStates,
    inner: tokio::sync::Mutex<OrchestratorInner>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerEvent>>>,
    shutdown: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionOrchestrator {
    pub fn new(
        consumers: Vec<Arc<dyn StreamConsumer>>,
        assets: Arc<dyn AssetRepositoryTrait>,
        settings: SettingsHandle,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut seen = HashSet::new();
        let consumers: Vec<_> = consumers
            .into_iter()
            .filter(|c| {
                let fresh = seen.insert(c.id().to_string());
                if !fresh {
                    warn!("Duplicate streaming consumer {} ignored", c.id());
                }
                fresh
            })
            .collect();

        Self {
            consumers,
            assets,
            settings,
            states: ConsumerStates::default(),
            inner: tokio::sync::Mutex::new(OrchestratorInner::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown: CancellationToken::new(),
            monitor: Mutex::new(None),
        }
    }

    pub fn state(&self, consumer: &str) -> ConsumerState {
        self.states.get(consumer)
    }

    /// Snapshot of the current allocation.
    pub async fn allocation(&self) -> Allocation {
        self.inner.lock().await.allocation.clone()
    }

    /// Allocate, start the workers and spawn the monitoring loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!(
            "Starting subscription orchestrator with {} consumers",
            self.consumers.len()
        );
        self.rebalance().await?;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_monitor().await });
        *lock(&self.monitor) = Some(handle);
        Ok(())
    }

    /// Recompute every assignment from scratch.
    ///
    /// Running consumers get their new ticker set in place; the rest are
    /// started. Consumers that failed within the cool-down are left out.
    pub async fn rebalance(&self) -> Result<()> {
        let settings = self.settings.snapshot();
        let assets = self.assets.list_active()?;

        let mut calls = ConsumerCalls::default();
        {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            let cool_down = settings.streaming.failure_cool_down();
            inner
                .failed_at
                .retain(|_, at| now.saturating_duration_since(*at) < cool_down);

            let excluded: Vec<String> = inner.failed_at.keys().cloned().collect();
            let ctx = self.context(&settings, excluded);
            let allocation = allocate(&assets, &ctx);
            let previous = std::mem::replace(&mut inner.allocation, allocation);
            inner.last_rebalance = Some(now);

            for consumer in &self.consumers {
                let id = consumer.id();
                let tickers = symbols_of(&inner.allocation, id);
                let before = symbols_of(&previous, id);
                let worker_alive = inner.workers.get(id).is_some_and(|w| !w.is_finished());
                let state = self.states.get(id);

                if tickers.is_empty() {
                    if worker_alive || state.is_active() {
                        info!("Consumer {}: no tickers assigned, stopping", id);
                        stop_worker(&mut inner, id).await;
                        self.states.set(id, ConsumerState::Idle);
                        calls.disconnect.push(Arc::clone(consumer));
                    }
                    continue;
                }

                if worker_alive && state.is_running() {
                    if tickers != before {
                        debug!("Consumer {}: resubscribing {} tickers in place", id, tickers.len());
                        calls.resubscribe.push((Arc::clone(consumer), tickers));
                    }
                    continue;
                }

                if worker_alive && tickers == before {
                    // Still connecting with the same set.
                    continue;
                }

                stop_worker(&mut inner, id).await;
                let delay = self.restart_delay(&mut inner, id);
                self.spawn(&mut inner, consumer, tickers, delay);
            }

            info!(
                "Rebalanced: {} subscriptions over {} consumers, {} unassigned",
                inner.allocation.assigned_tickers(),
                inner.allocation.assignments.len(),
                inner.allocation.unassigned.len()
            );
        }

        for id in self.run_calls(calls, &settings).await {
            self.fail(&id, &settings).await;
        }
        Ok(())
    }

    /// Take `consumer` out of service and move its tickers elsewhere.
    pub async fn handle_failure(&self, consumer: &str) {
        let settings = self.settings.snapshot();
        self.fail(consumer, &settings).await;
    }

    /// Monitoring loop. Runs until [`shutdown`](Self::shutdown).
    pub async fn run_monitor(&self) {
        let Some(mut events) = lock(&self.events_rx).take() else {
            warn!("Monitoring loop already running");
            return;
        };

        let mut period = self.settings.snapshot().streaming.health_check_interval();
        let mut ticker = health_ticker(period);
        info!("Streaming monitor started, checking every {:?}", period);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(event) = events.recv() => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.on_event(event) => {}
                    }
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.tick() => {}
                    }
                    let configured = self.settings.snapshot().streaming.health_check_interval();
                    if configured != period {
                        period = configured;
                        ticker = health_ticker(period);
                    }
                }
            }
        }

        info!("Streaming monitor stopped");
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let inner = self.inner.lock().await;
        self.status_locked(&inner)
    }

    /// Stop the monitor and every worker, disconnect all consumers and drop
    /// the allocation.
    pub async fn shutdown(&self) {
        info!("Shutting down subscription orchestrator");
        self.shutdown.cancel();

        let monitor = lock(&self.monitor).take();
        if let Some(handle) = monitor {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!("Streaming monitor panicked: {}", e);
                }
            }
        }

        let workers: Vec<WorkerHandle> = {
            let mut inner = self.inner.lock().await;
            inner.allocation = Allocation::default();
            inner.workers.drain().map(|(_, worker)| worker).collect()
        };
        for worker in workers {
            worker.stop().await;
        }

        let limit = self.settings.snapshot().streaming.consumer_timeout();
        join_all(
            self.consumers
                .iter()
                .map(|consumer| disconnect_within(consumer.as_ref(), limit)),
        )
        .await;
        for consumer in &self.consumers {
            self.states.set(consumer.id(), ConsumerState::Disconnected);
        }
    }

    async fn on_event(&self, event: WorkerEvent) {
        let current = {
            let inner = self.inner.lock().await;
            inner
                .workers
                .get(event.consumer())
                .map(|w| w.generation)
        };
        if current != Some(event.generation()) {
            debug!(
                "Ignoring event from replaced worker of {}",
                event.consumer()
            );
            return;
        }

        match event {
            WorkerEvent::Failed {
                consumer,
                stage,
                error,
                ..
            } => {
                warn!(
                    "Consumer {} failed while {} ({}), reallocating its tickers",
                    consumer, stage, error
                );
                self.handle_failure(&consumer).await;
            }
            WorkerEvent::Disconnected { consumer, .. } => {
                info!("Consumer {} disconnected, rebalance on next check", consumer);
            }
        }
    }

    async fn tick(&self) {
        let settings = self.settings.snapshot();
        let limit = settings.streaming.consumer_timeout();

        // Who to check is read under the lock; the checks run without it.
        let (running, disconnected) = {
            let inner = self.inner.lock().await;
            let mut running = Vec::new();
            let mut disconnected = Vec::new();
            for consumer in &self.consumers {
                match self.states.get(consumer.id()) {
                    ConsumerState::Running => running.push(Arc::clone(consumer)),
                    ConsumerState::Disconnected
                        if inner.allocation.assignment(consumer.id()).is_some() =>
                    {
                        disconnected.push(Arc::clone(consumer))
                    }
                    _ => {}
                }
            }
            (running, disconnected)
        };

        let checks = join_all(running.iter().map(|c| health_within(c.as_ref(), limit))).await;
        let mut healthy = Vec::new();
        for (consumer, ok) in running.iter().zip(checks) {
            if ok {
                healthy.push(consumer.id());
            } else {
                warn!(
                    "Consumer {}: health check failed while running, left to its own reconnect",
                    consumer.id()
                );
            }
        }
        if !healthy.is_empty() {
            let mut inner = self.inner.lock().await;
            for id in healthy {
                if let Some(policy) = inner.backoff.get_mut(id) {
                    policy.reset();
                }
            }
        }

        let checks =
            join_all(disconnected.iter().map(|c| health_within(c.as_ref(), limit))).await;
        for (consumer, ok) in disconnected.iter().zip(checks) {
            if !ok {
                warn!("Consumer {}: disconnected and unhealthy", consumer.id());
                self.fail(consumer.id(), &settings).await;
            }
        }

        let due = {
            let inner = self.inner.lock().await;
            inner
                .last_rebalance
                .map(|at| at.elapsed() >= settings.streaming.rebalance_interval())
                .unwrap_or(true)
        };

        if due || !disconnected.is_empty() {
            if !disconnected.is_empty() {
                let ids: Vec<&str> = disconnected.iter().map(|c| c.id()).collect();
                info!("Rebalancing after disconnect of {}", ids.join(", "));
            }
            if let Err(e) = self.rebalance().await {
                warn!("Rebalance failed: {}", e);
            }
        }

        let status = self.status().await;
        info!("Streaming status: {}", status.summary());
    }

    /// Mark failed, stop, disconnect, then move its tickers. Receivers that
    /// fail their own resubscribe are handled the same way.
    async fn fail(&self, consumer: &str, settings: &EngineSettings) {
        let mut pending = vec![consumer.to_string()];
        while let Some(id) = pending.pop() {
            let Some(failed) = self.find(&id) else {
                warn!("Failure reported for unknown consumer {}", id);
                continue;
            };

            let mut calls = ConsumerCalls::default();
            {
                let mut inner = self.inner.lock().await;
                self.states.transition(&id, ConsumerState::Failed);
                inner.failed_at.insert(id.clone(), Instant::now());
                stop_worker(&mut inner, &id).await;
                calls.disconnect.push(failed);

                let excluded: Vec<String> = inner.failed_at.keys().cloned().collect();
                let ctx = self.context(settings, excluded);
                let result = reallocate(&mut inner.allocation, &id, &ctx);
                if !result.moved.is_empty() {
                    info!(
                        "Moved {} tickers from failed consumer {}",
                        result.moved.len(),
                        id
                    );
                }

                for receiver_id in result.receivers() {
                    let Some(receiver) = self.find(&receiver_id) else {
                        continue;
                    };
                    let tickers = symbols_of(&inner.allocation, &receiver_id);
                    let worker_alive = inner
                        .workers
                        .get(&receiver_id)
                        .is_some_and(|w| !w.is_finished());

                    if worker_alive && self.states.get(&receiver_id).is_running() {
                        calls.resubscribe.push((receiver, tickers));
                        continue;
                    }

                    stop_worker(&mut inner, &receiver_id).await;
                    let delay = self.restart_delay(&mut inner, &receiver_id);
                    self.spawn(&mut inner, &receiver, tickers, delay);
                }
            }

            pending.extend(self.run_calls(calls, settings).await);
        }
    }

    /// Make the deferred consumer calls. Returns the consumers whose
    /// resubscribe failed or timed out.
    async fn run_calls(&self, calls: ConsumerCalls, settings: &EngineSettings) -> Vec<String> {
        let limit = settings.streaming.consumer_timeout();
        join_all(
            calls
                .disconnect
                .iter()
                .map(|consumer| disconnect_within(consumer.as_ref(), limit)),
        )
        .await;

        let mut failed = Vec::new();
        for (consumer, tickers) in &calls.resubscribe {
            if let Err(e) = subscribe_within(consumer.as_ref(), tickers, limit).await {
                warn!("Consumer {}: resubscribe failed: {}", consumer.id(), e);
                failed.push(consumer.id().to_string());
            }
        }
        failed
    }

    fn status_locked(&self, inner: &OrchestratorInner) -> OrchestratorStatus {
        let per_consumer: Vec<ConsumerStatus> = self
            .consumers
            .iter()
            .map(|c| ConsumerStatus {
                id: c.id().to_string(),
                state: self.states.get(c.id()),
                tickers: inner
                    .allocation
                    .assignment(c.id())
                    .map(|a| a.len())
                    .unwrap_or(0),
            })
            .collect();

        OrchestratorStatus {
            active: per_consumer.iter().filter(|c| c.state.is_running()).count(),
            total: self.consumers.len(),
            assigned_tickers: inner.allocation.assigned_tickers(),
            per_consumer,
        }
    }

    fn context(&self, settings: &EngineSettings, excluded: Vec<String>) -> AllocationContext {
        let profiles = self
            .consumers
            .iter()
            .map(|c| ConsumerProfile::of(c.as_ref(), settings.is_enabled(c.id())))
            .collect();
        let fallback: BTreeMap<_, _> = settings.streaming.fallback.clone();
        let mut ctx = AllocationContext::new(profiles)
            .with_fallback(fallback)
            .with_routing(settings.streaming.routing_rules());
        for id in excluded {
            ctx.exclude(id);
        }
        ctx
    }

    fn find(&self, id: &str) -> Option<Arc<dyn StreamConsumer>> {
        self.consumers.iter().find(|c| c.id() == id).cloned()
    }

    /// Backoff for consumers coming back from a failure or disconnect.
    fn restart_delay(&self, inner: &mut OrchestratorInner, id: &str) -> Duration {
        match self.states.get(id) {
            ConsumerState::Failed | ConsumerState::Disconnected => {
                inner.backoff.entry(id.to_string()).or_default().next_delay()
            }
            _ => Duration::ZERO,
        }
    }

    fn spawn(
        &self,
        inner: &mut OrchestratorInner,
        consumer: &Arc<dyn StreamConsumer>,
        tickers: Vec<String>,
        delay: Duration,
    ) {
        // A replaced worker may have been cut off mid-handshake.
        if self.states.get(consumer.id()).is_active() {
            self.states.set(consumer.id(), ConsumerState::Idle);
        }
        inner.next_generation += 1;
        let spec = WorkerSpec {
            consumer: Arc::clone(consumer),
            tickers,
            delay,
            generation: inner.next_generation,
        };
        let handle = spawn_worker(
            spec,
            self.states.clone(),
            self.events_tx.clone(),
            self.shutdown.child_token(),
        );
        inner.workers.insert(consumer.id().to_string(), handle);
    }
}

async fn health_within(consumer: &dyn StreamConsumer, limit: Duration) -> bool {
    match tokio::time::timeout(limit, consumer.health_check()).await {
        Ok(healthy) => healthy,
        Err(_) => {
            warn!(
                "Consumer {}: health check timed out after {:?}",
                consumer.id(),
                limit
            );
            false
        }
    }
}

async fn subscribe_within(
    consumer: &dyn StreamConsumer,
    tickers: &[String],
    limit: Duration,
) -> std::result::Result<(), ConsumerError> {
    tokio::time::timeout(limit, consumer.subscribe(tickers))
        .await
        .unwrap_or_else(|_| Err(ConsumerError::Subscribe(format!("timed out after {limit:?}"))))
}

async fn disconnect_within(consumer: &dyn StreamConsumer, limit: Duration) {
    if tokio::time::timeout(limit, consumer.disconnect()).await.is_err() {
        warn!(
            "Consumer {}: disconnect timed out after {:?}",
            consumer.id(),
            limit
        );
    }
}

async fn stop_worker(inner: &mut OrchestratorInner, id: &str) {
    if let Some(worker) = inner.workers.remove(id) {
        worker.stop().await;
    }
}

fn symbols_of(allocation: &Allocation, consumer: &str) -> Vec<String> {
    allocation
        .assignment(consumer)
        .map(|a| a.symbols())
        .unwrap_or_default()
}

fn health_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Orchestrator lock poisoned, recovering");
        poisoned.into_inner()
    })
}
