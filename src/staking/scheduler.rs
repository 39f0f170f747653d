//! Background tasks driving the decision engine
//!
//! Scheduled cycles and query-triggered cycles flow through the same mpsc
//! channel into a single worker, so at most one decision runs at a time and
//! no two cycles ever interleave their guard reads and mutations.

use super::decision::{DecisionTrigger, TriggerSource};
use super::engine::StakeDecisionEngine;
use crate::ledger::{Hotkey, Netuid};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// A partition (and optional explicit hotkey) decided on every interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionTarget {
    pub netuid: Netuid,
    pub hotkey: Option<Hotkey>,
}

impl DecisionTarget {
    fn trigger(&self) -> DecisionTrigger {
        DecisionTrigger {
            netuid: self.netuid,
            hotkey: self.hotkey.clone(),
            source: TriggerSource::Scheduled,
        }
    }
}

/// Decision worker task - runs triggers one at a time until every sender is dropped
///
/// Returns the number of decisions run.
pub async fn decision_worker_task(
    mut rx: mpsc::Receiver<DecisionTrigger>,
    engine: Arc<StakeDecisionEngine>,
) -> usize {
    log::info!("🧠 Decision worker started");

    let mut processed = 0;
    while let Some(trigger) = rx.recv().await {
        log::debug!("Decision trigger for netuid {} ({:?})", trigger.netuid, trigger.source);
        let decision = engine.run(trigger).await;
        processed += 1;

        if decision.outcome.is_failure() {
            log::debug!("Decision {} for netuid {} ended in failure", processed, decision.netuid);
        }
    }

    log::info!("🛑 Decision worker stopped after {} decisions", processed);
    processed
}

/// Decision scheduler task - enqueues one trigger per target every `period`
///
/// The first round is enqueued immediately. Stops once the worker side of
/// the channel is gone.
pub async fn decision_scheduler_task(
    tx: mpsc::Sender<DecisionTrigger>,
    targets: Vec<DecisionTarget>,
    period: Duration,
) {
    if targets.is_empty() {
        log::info!("⏰ No decision targets configured, scheduler idle");
        return;
    }

    log::info!(
        "⏰ Starting decision scheduler ({} targets, interval: {:?})",
        targets.len(),
        period
    );

    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;

        for target in &targets {
            if tx.send(target.trigger()).await.is_err() {
                log::info!("🛑 Decision channel closed, scheduler stopping");
                return;
            }
        }
    }
}
