//! Hand-off point for finished decisions
//!
//! Durable storage of decisions belongs to whoever implements
//! `DecisionRecorder`; the engine only calls `record` once per decision and
//! logs a failure without retrying it.

use super::decision::StakeDecision;
use async_trait::async_trait;

#[derive(Debug)]
pub enum RecorderError {
    Serialization(serde_json::Error),
    Backend(String),
}

impl From<serde_json::Error> for RecorderError {
    fn from(err: serde_json::Error) -> Self {
        RecorderError::Serialization(err)
    }
}

impl std::fmt::Display for RecorderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderError::Serialization(e) => write!(f, "Serialization error: {}", e),
            RecorderError::Backend(e) => write!(f, "Recorder backend error: {}", e),
        }
    }
}

impl std::error::Error for RecorderError {}

#[async_trait]
pub trait DecisionRecorder: Send + Sync {
    async fn record(&self, decision: &StakeDecision) -> Result<(), RecorderError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Writes each decision as one JSON log line
pub struct LogDecisionRecorder;

#[async_trait]
impl DecisionRecorder for LogDecisionRecorder {
    async fn record(&self, decision: &StakeDecision) -> Result<(), RecorderError> {
        let json = serde_json::to_string(decision)?;
        log::info!("📝 decision {}", json);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "log"
    }
}
