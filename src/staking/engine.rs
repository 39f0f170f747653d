//! Stake decision state machine
//!
//! ```text
//! Scoring -> Deciding -> Guarding -> Acting -> Recording -> Done
//!    |           |           |
//!    +-----------+-----------+--> Recording (skipped / failure)
//! ```
//!
//! - no score, no action: an unavailable oracle ends the cycle as skipped
//! - the actuator is invoked at most once per `run`, and never again after
//!   a later step (recording) fails
//! - the target hotkey, when not given, is resolved to the partition owner
//!   on every run

use super::decision::{
    DecisionTrigger, FailureReason, Outcome, SkipReason, StakeAction, StakeDecision, TriggerSource,
};
use super::recorder::DecisionRecorder;
use super::sentiment::{ActivityFeed, OracleError, SentimentOracle, MAX_SCORE, MIN_SCORE};
use super::wallet::{InclusionPolicy, WalletActuator};
use crate::ledger::{Hotkey, Netuid, Snapshot, SnapshotClient};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// The ledger resolves TAO amounts to whole rao
const RAO_PER_TAO: f64 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionState {
    Scoring,
    Deciding,
    Guarding,
    Acting,
    Recording,
    Done,
}

#[derive(Debug, Clone)]
pub struct StakeSettings {
    /// TAO per sentiment point
    pub scaling_factor: f64,
    /// Reject stakes whose slippage/amount exceeds this ratio
    pub max_slippage_ratio: Option<f64>,
    pub oracle_timeout: Duration,
    /// Applies to every wallet and ledger call made by the engine
    pub actuator_timeout: Duration,
}

impl Default for StakeSettings {
    fn default() -> Self {
        Self {
            scaling_factor: 0.01,
            max_slippage_ratio: None,
            oracle_timeout: Duration::from_secs(30),
            actuator_timeout: Duration::from_secs(60),
        }
    }
}

/// Fields collected while the state machine advances
struct Draft {
    netuid: Netuid,
    hotkey: Option<Hotkey>,
    score: Option<f64>,
    amount: f64,
    slippage: Option<f64>,
    snapshot: Option<Snapshot>,
    source: TriggerSource,
}

impl Draft {
    fn new(trigger: &DecisionTrigger) -> Self {
        Self {
            netuid: trigger.netuid,
            hotkey: trigger.hotkey.clone(),
            score: None,
            amount: 0.0,
            slippage: None,
            snapshot: None,
            source: trigger.source,
        }
    }

    fn finish(self, outcome: Outcome) -> StakeDecision {
        StakeDecision {
            netuid: self.netuid,
            hotkey: self.hotkey,
            sentiment_score: self.score,
            stake_amount: self.amount,
            action: StakeAction::from_amount(self.amount),
            slippage: self.slippage,
            snapshot: self.snapshot,
            outcome,
            source: self.source,
            decided_at: chrono::Utc::now().timestamp(),
        }
    }
}

pub struct StakeDecisionEngine {
    ledger: Arc<dyn SnapshotClient>,
    feed: Arc<dyn ActivityFeed>,
    oracle: Arc<dyn SentimentOracle>,
    wallet: Arc<dyn WalletActuator>,
    recorder: Arc<dyn DecisionRecorder>,
    settings: StakeSettings,
}

impl StakeDecisionEngine {
    pub fn new(
        ledger: Arc<dyn SnapshotClient>,
        feed: Arc<dyn ActivityFeed>,
        oracle: Arc<dyn SentimentOracle>,
        wallet: Arc<dyn WalletActuator>,
        recorder: Arc<dyn DecisionRecorder>,
        settings: StakeSettings,
    ) -> Self {
        Self {
            ledger,
            feed,
            oracle,
            wallet,
            recorder,
            settings,
        }
    }

    /// Run one decision cycle to completion
    ///
    /// Never fails: every early exit is captured in the returned decision's
    /// outcome, which has already been handed to the recorder.
    pub async fn run(&self, trigger: DecisionTrigger) -> StakeDecision {
        let mut draft = Draft::new(&trigger);
        let outcome = self.evaluate(&mut draft).await;
        let decision = draft.finish(outcome);

        self.enter(decision.netuid, DecisionState::Recording);
        if let Err(e) = self.recorder.record(&decision).await {
            log::error!(
                "❌ Failed to record decision for netuid {} ({} backend): {}",
                decision.netuid,
                self.recorder.backend_type(),
                e
            );
        }
        self.enter(decision.netuid, DecisionState::Done);

        match &decision.outcome {
            Outcome::Failure(reason) => log::warn!(
                "⚠️  Decision netuid {} {:?} {:.9} TAO failed: {:?}",
                decision.netuid,
                decision.action,
                decision.stake_amount,
                reason
            ),
            outcome => log::info!(
                "Decision netuid {} {:?} {:.9} TAO: {}",
                decision.netuid,
                decision.action,
                decision.stake_amount,
                outcome.as_str()
            ),
        }

        decision
    }

    async fn evaluate(&self, draft: &mut Draft) -> Outcome {
        let netuid = draft.netuid;

        self.enter(netuid, DecisionState::Scoring);
        let score = match self.score(netuid).await {
            Ok(score) => score,
            Err(e) => {
                log::warn!("⚠️  No sentiment score for netuid {}: {}", netuid, e);
                return Outcome::Skipped(SkipReason::OracleUnavailable);
            }
        };
        draft.score = Some(score as f64);

        self.enter(netuid, DecisionState::Deciding);
        let amount = to_ledger_resolution(score as f64 * self.settings.scaling_factor);
        draft.amount = amount;
        if amount == 0.0 {
            return Outcome::Skipped(SkipReason::ZeroDelta);
        }

        self.enter(netuid, DecisionState::Guarding);
        let snapshot = match self.bounded("current snapshot", self.ledger.current_snapshot()).await {
            Ok(snapshot) => snapshot,
            Err(message) => return ledger_unavailable(message),
        };
        draft.snapshot = Some(snapshot.clone());

        let hotkey = match draft.hotkey.clone() {
            Some(hotkey) => hotkey,
            None => match self.bounded("owner hotkey", self.ledger.owner_hotkey(netuid, &snapshot)).await {
                Ok(owner) => {
                    log::debug!("netuid {}: resolved owner hotkey {}", netuid, owner);
                    owner
                }
                Err(message) => return ledger_unavailable(message),
            },
        };
        draft.hotkey = Some(hotkey.clone());

        let guarded = if amount > 0.0 {
            self.guard_stake(netuid, amount, &snapshot, draft).await
        } else {
            self.guard_unstake(netuid, &hotkey, amount.abs()).await
        };
        if let Err(reason) = guarded {
            return Outcome::Failure(reason);
        }

        self.enter(netuid, DecisionState::Acting);
        let policy = InclusionPolicy::INCLUDED;
        let acted = if amount > 0.0 {
            self.bounded("stake", self.wallet.stake(netuid, &hotkey, amount, policy))
                .await
        } else {
            self.bounded("unstake", self.wallet.unstake(netuid, &hotkey, amount.abs(), policy))
                .await
        };

        match acted {
            Ok(receipt) => {
                log::info!(
                    "✅ {:?} included for netuid {} hotkey {} (block {})",
                    StakeAction::from_amount(amount),
                    netuid,
                    hotkey,
                    receipt.block_hash.as_deref().unwrap_or("unknown")
                );
                Outcome::Success
            }
            Err(message) => Outcome::Failure(FailureReason::ActuatorFailure { message }),
        }
    }

    async fn score(&self, netuid: Netuid) -> Result<i64, OracleError> {
        let limit = self.settings.oracle_timeout;

        let corpus = tokio::time::timeout(limit, self.feed.recent_activity(netuid))
            .await
            .map_err(|_| OracleError::Timeout("activity feed"))??;

        let score = tokio::time::timeout(limit, self.oracle.score(&corpus))
            .await
            .map_err(|_| OracleError::Timeout("sentiment oracle"))??;

        if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
            return Err(OracleError::OutOfRange(score));
        }

        Ok(score)
    }

    async fn guard_stake(
        &self,
        netuid: Netuid,
        amount: f64,
        snapshot: &Snapshot,
        draft: &mut Draft,
    ) -> Result<(), FailureReason> {
        let slippage = self
            .bounded("slippage", self.wallet.slippage(netuid, amount))
            .await
            .map_err(|message| FailureReason::LedgerUnavailable { message })?;
        draft.slippage = Some(slippage);

        if let Some(max_ratio) = self.settings.max_slippage_ratio {
            if slippage / amount > max_ratio {
                return Err(FailureReason::ExcessiveSlippage { slippage, max_ratio });
            }
        }

        let balance = self
            .bounded("balance", self.wallet.balance(self.wallet.coldkey()))
            .await
            .map_err(|message| FailureReason::LedgerUnavailable { message })?;

        let minimum = self
            .bounded("existential deposit", self.wallet.minimum_retained_balance(snapshot))
            .await
            .map_err(|message| FailureReason::LedgerUnavailable { message })?;

        let available = to_ledger_resolution(balance - minimum);
        if to_rao(amount) > to_rao(available) {
            return Err(FailureReason::InsufficientFunds {
                requested: amount,
                available,
            });
        }

        Ok(())
    }

    async fn guard_unstake(
        &self,
        netuid: Netuid,
        hotkey: &Hotkey,
        requested: f64,
    ) -> Result<(), FailureReason> {
        let staked = self
            .bounded(
                "staked amount",
                self.wallet.staked_amount(netuid, self.wallet.coldkey(), hotkey),
            )
            .await
            .map_err(|message| FailureReason::LedgerUnavailable { message })?;

        if to_rao(requested) > to_rao(staked) {
            return Err(FailureReason::InsufficientStake { requested, staked });
        }

        Ok(())
    }

    async fn bounded<T, E, F>(&self, operation: &str, fut: F) -> Result<T, String>
    where
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        let limit = self.settings.actuator_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{}: {}", operation, e)),
            Err(_) => Err(format!("{} timed out after {:?}", operation, limit)),
        }
    }

    fn enter(&self, netuid: Netuid, state: DecisionState) {
        log::debug!("netuid {}: -> {:?}", netuid, state);
    }
}

fn ledger_unavailable(message: String) -> Outcome {
    Outcome::Failure(FailureReason::LedgerUnavailable { message })
}

/// Round a TAO amount to whole rao
pub fn to_ledger_resolution(amount: f64) -> f64 {
    (amount * RAO_PER_TAO).round() / RAO_PER_TAO
}

/// Amount in whole rao; guards compare in this unit
fn to_rao(amount: f64) -> i64 {
    (amount * RAO_PER_TAO).round() as i64
}
