//! One task per streaming consumer.
//!
//! A worker drives its consumer through connect, subscribe and run, keeps
//! the shared state table current, and reports how the run ended over an
//! unbounded channel. It never restarts itself: restarts go through the
//! orchestrator.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::consumer::{ConsumerError, StreamConsumer};
use super::state::{ConsumerState, ConsumerStates};

/// How a worker's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Failed {
        consumer: String,
        generation: u64,
        /// State the consumer was in when it failed.
        stage: ConsumerState,
        error: ConsumerError,
    },
    Disconnected {
        consumer: String,
        generation: u64,
    },
}

impl WorkerEvent {
    pub fn consumer(&self) -> &str {
        match self {
            WorkerEvent::Failed { consumer, .. } | WorkerEvent::Disconnected { consumer, .. } => {
                consumer
            }
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            WorkerEvent::Failed { generation, .. }
            | WorkerEvent::Disconnected { generation, .. } => *generation,
        }
    }
}

/// What to start.
pub(crate) struct WorkerSpec {
    pub consumer: Arc<dyn StreamConsumer>,
    pub tickers: Vec<String>,
    /// Wait before connecting.
    pub delay: Duration,
    /// Tags events so stale ones from a replaced worker can be ignored.
    pub generation: u64,
}

pub(crate) struct WorkerHandle {
    pub generation: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            if e.is_panic() {
                warn!("Streaming worker panicked: {}", e);
            }
        }
    }
}

pub(crate) fn spawn_worker(
    spec: WorkerSpec,
    states: ConsumerStates,
    events: mpsc::UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
) -> WorkerHandle {
    let generation = spec.generation;
    let token = cancel.clone();
    let join = tokio::spawn(async move { run_worker(spec, states, events, token).await });
    WorkerHandle {
        generation,
        cancel,
        join,
    }
}

async fn run_worker(
    spec: WorkerSpec,
    states: ConsumerStates,
    events: mpsc::UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
) {
    let id = spec.consumer.id().to_string();

    if !spec.delay.is_zero() {
        debug!("Consumer {}: starting in {:?}", id, spec.delay);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(spec.delay) => {}
        }
    }

    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Consumer {}: worker cancelled", id);
            return;
        }
        outcome = drive(spec.consumer.as_ref(), &spec.tickers, &states) => outcome,
    };

    let event = match outcome {
        Ok(()) => {
            info!("Consumer {}: stream ended", id);
            states.transition(&id, ConsumerState::Disconnected);
            WorkerEvent::Disconnected {
                consumer: id,
                generation: spec.generation,
            }
        }
        Err(error) => {
            let stage = states.get(&id);
            warn!("Consumer {}: failed while {}: {}", id, stage, error);
            states.transition(&id, ConsumerState::Failed);
            WorkerEvent::Failed {
                consumer: id,
                generation: spec.generation,
                stage,
                error,
            }
        }
    };

    if events.send(event).is_err() {
        debug!("Orchestrator gone, dropping worker event");
    }
}

async fn drive(
    consumer: &dyn StreamConsumer,
    tickers: &[String],
    states: &ConsumerStates,
) -> Result<(), ConsumerError> {
    let id = consumer.id();

    states.transition(id, ConsumerState::Connecting);
    consumer.connect().await?;

    states.transition(id, ConsumerState::Subscribing);
    consumer.subscribe(tickers).await?;

    states.transition(id, ConsumerState::Running);
    info!("Consumer {}: running with {} tickers", id, tickers.len());
    consumer.run().await
}
