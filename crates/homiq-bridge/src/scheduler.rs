//! Scenario push scheduler
//!
//! Each push event of the active scenario gets its own repeating timer task.
//! A tick only asks the bridge actor to generate and broadcast the frame, so
//! value generation stays serialized with frame processing. Timers belong to
//! one activation: starting a new set aborts the previous one, and ticks that
//! were already queued by an aborted set are recognised by their generation
//! and ignored.

use std::time::Duration;

use homiq_sim::PushEventSpec;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::actor::BridgeCommand;

/// Owner of the running push timers
#[derive(Debug, Default)]
pub struct PushScheduler {
    generation: u64,
    specs: Vec<PushEventSpec>,
    tasks: Vec<JoinHandle<()>>,
}

impl PushScheduler {
    /// Create with no timers running
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all timers with one per spec
    ///
    /// Ticks are delivered to `actor_tx` as [`BridgeCommand::PushTick`]. The
    /// sender is weak so running timers never keep the actor alive.
    pub fn start(&mut self, specs: Vec<PushEventSpec>, actor_tx: mpsc::WeakSender<BridgeCommand>) {
        self.cancel();
        self.generation += 1;

        for (index, spec) in specs.iter().enumerate() {
            if spec.interval_ms == 0 {
                warn!(
                    "Push event {} on {} has no interval; not scheduling it",
                    spec.cmd, spec.device_addr
                );
                continue;
            }
            let period = Duration::from_millis(spec.interval_ms);
            self.tasks.push(tokio::spawn(run_push_timer(
                self.generation,
                index,
                period,
                actor_tx.clone(),
            )));
            debug!(
                "Push timer for {}@{} every {:?}",
                spec.cmd, spec.device_addr, period
            );
        }

        if !self.tasks.is_empty() {
            info!("Started {} push timers", self.tasks.len());
        }
        self.specs = specs;
    }

    /// Abort every running timer
    pub fn cancel(&mut self) {
        if !self.tasks.is_empty() {
            info!("Cancelling {} push timers", self.tasks.len());
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.specs.clear();
    }

    /// The spec for a tick, unless the tick belongs to a cancelled set
    pub fn spec(&self, generation: u64, index: usize) -> Option<&PushEventSpec> {
        if generation != self.generation {
            return None;
        }
        self.specs.get(index)
    }

    /// Number of running timers
    pub fn active(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for PushScheduler {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn run_push_timer(
    generation: u64,
    index: usize,
    period: Duration,
    actor_tx: mpsc::WeakSender<BridgeCommand>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(tx) = actor_tx.upgrade() else {
            break;
        };
        if tx
            .send(BridgeCommand::PushTick { generation, index })
            .await
            .is_err()
        {
            break;
        }
    }
}
