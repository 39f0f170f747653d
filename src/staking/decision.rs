//! Stake decision records
//!
//! A `StakeDecision` is produced once per decision cycle and is not
//! modified after its outcome is known. It is handed to the recorder as-is.

use crate::ledger::{Hotkey, Netuid, Snapshot};
use serde::{Deserialize, Serialize};

/// What started a decision cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduled,
    Query,
}

/// Request to run one decision cycle for a partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTrigger {
    pub netuid: Netuid,
    /// Explicit target; `None` resolves to the partition owner at decision time
    pub hotkey: Option<Hotkey>,
    pub source: TriggerSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeAction {
    Stake,
    Unstake,
    None,
}

impl StakeAction {
    pub fn from_amount(amount: f64) -> Self {
        if amount > 0.0 {
            StakeAction::Stake
        } else if amount < 0.0 {
            StakeAction::Unstake
        } else {
            StakeAction::None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    OracleUnavailable,
    ZeroDelta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InsufficientFunds { requested: f64, available: f64 },
    InsufficientStake { requested: f64, staked: f64 },
    ExcessiveSlippage { slippage: f64, max_ratio: f64 },
    /// Mutation attempted and rejected or timed out
    ActuatorFailure { message: String },
    /// A guard read (snapshot, balance, owner key...) could not be completed
    LedgerUnavailable { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Skipped(SkipReason),
    Failure(FailureReason),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Skipped(_) => "skipped",
            Outcome::Failure(_) => "failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakeDecision {
    pub netuid: Netuid,
    pub hotkey: Option<Hotkey>,
    pub sentiment_score: Option<f64>,
    /// Signed TAO delta: positive stakes, negative unstakes
    pub stake_amount: f64,
    pub action: StakeAction,
    pub slippage: Option<f64>,
    /// Snapshot the guards were evaluated at
    pub snapshot: Option<Snapshot>,
    pub outcome: Outcome,
    pub source: TriggerSource,
    /// Unix timestamp (seconds)
    pub decided_at: i64,
}
