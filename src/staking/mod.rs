//! Sentiment-driven stake decisions

pub mod decision;
pub mod engine;
pub mod recorder;
pub mod scheduler;
pub mod sentiment;
pub mod wallet;

pub use decision::{
    DecisionTrigger, FailureReason, Outcome, SkipReason, StakeAction, StakeDecision, TriggerSource,
};
pub use engine::{to_ledger_resolution, DecisionState, StakeDecisionEngine, StakeSettings};
pub use recorder::{DecisionRecorder, LogDecisionRecorder, RecorderError};
pub use scheduler::{decision_scheduler_task, decision_worker_task, DecisionTarget};
pub use sentiment::{ActivityFeed, ChutesOracle, DaturaFeed, OracleError, SentimentOracle};
pub use wallet::{ActuatorError, ExtrinsicReceipt, InclusionPolicy, RpcWalletActuator, WalletActuator};
