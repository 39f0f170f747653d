//! Wallet actuator: funds checks and the stake/unstake mutations
//!
//! `stake` and `unstake` are the only non-idempotent calls in the crate.
//! Callers invoke them at most once per decision; this module never
//! retries them either.

use crate::ledger::{Hotkey, Netuid, Snapshot};
use crate::rpc::{JsonRpcTransport, RpcError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug)]
pub enum ActuatorError {
    Rpc(RpcError),
    /// The ledger refused the extrinsic
    Rejected(String),
    Timeout(String),
}

impl From<RpcError> for ActuatorError {
    fn from(err: RpcError) -> Self {
        ActuatorError::Rpc(err)
    }
}

impl std::fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActuatorError::Rpc(e) => write!(f, "Wallet RPC failed: {}", e),
            ActuatorError::Rejected(msg) => write!(f, "Extrinsic rejected: {}", msg),
            ActuatorError::Timeout(op) => write!(f, "Wallet call timed out: {}", op),
        }
    }
}

impl std::error::Error for ActuatorError {}

/// How long a mutation call blocks before returning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InclusionPolicy {
    #[serde(rename = "waitForInclusion")]
    pub wait_for_inclusion: bool,
    #[serde(rename = "waitForFinalization")]
    pub wait_for_finalization: bool,
}

impl InclusionPolicy {
    /// Wait until the extrinsic is in a block, not until it is finalized
    pub const INCLUDED: Self = Self {
        wait_for_inclusion: true,
        wait_for_finalization: false,
    };
}

/// Result of an accepted mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtrinsicReceipt {
    #[serde(rename = "blockHash")]
    pub block_hash: Option<String>,
    #[serde(rename = "extrinsicHash")]
    pub extrinsic_hash: Option<String>,
}

#[async_trait]
pub trait WalletActuator: Send + Sync {
    /// Coldkey address of the wallet that funds stakes
    fn coldkey(&self) -> &str;

    async fn stake(
        &self,
        netuid: Netuid,
        hotkey: &Hotkey,
        amount: f64,
        policy: InclusionPolicy,
    ) -> Result<ExtrinsicReceipt, ActuatorError>;

    async fn unstake(
        &self,
        netuid: Netuid,
        hotkey: &Hotkey,
        amount: f64,
        policy: InclusionPolicy,
    ) -> Result<ExtrinsicReceipt, ActuatorError>;

    /// Free balance of an account, in TAO
    async fn balance(&self, address: &str) -> Result<f64, ActuatorError>;

    /// Stake held by `coldkey` on `hotkey` in one partition, in TAO
    async fn staked_amount(
        &self,
        netuid: Netuid,
        coldkey: &str,
        hotkey: &Hotkey,
    ) -> Result<f64, ActuatorError>;

    /// Existential deposit at the snapshot
    async fn minimum_retained_balance(&self, snapshot: &Snapshot) -> Result<f64, ActuatorError>;

    /// Expected price impact of staking `amount` into the partition
    async fn slippage(&self, netuid: Netuid, amount: f64) -> Result<f64, ActuatorError>;
}

#[derive(Debug, Deserialize)]
struct SubmitResult {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    receipt: ExtrinsicReceipt,
}

impl SubmitResult {
    fn into_receipt(self) -> Result<ExtrinsicReceipt, ActuatorError> {
        if self.success {
            Ok(self.receipt)
        } else {
            Err(ActuatorError::Rejected(
                self.error.unwrap_or_else(|| "no reason given".to_string()),
            ))
        }
    }
}

/// Actuator backed by a signing wallet gateway
///
/// | Method                      | Params                                                  |
/// |-----------------------------|---------------------------------------------------------|
/// | `wallet_addStake`           | `[netuid, hotkey, amount, {waitForInclusion, ...}]`     |
/// | `wallet_removeStake`        | `[netuid, hotkey, amount, {waitForInclusion, ...}]`     |
/// | `wallet_balance`            | `[address]`                                             |
/// | `wallet_stakeFor`           | `[netuid, coldkey, hotkey]`                             |
/// | `wallet_existentialDeposit` | `[at]`                                                  |
/// | `wallet_stakeSlippage`      | `[netuid, amount]`                                      |
pub struct RpcWalletActuator {
    transport: Arc<JsonRpcTransport>,
    coldkey: String,
}

impl RpcWalletActuator {
    pub fn new(transport: Arc<JsonRpcTransport>, coldkey: &str) -> Self {
        Self {
            transport,
            coldkey: coldkey.to_string(),
        }
    }
}

#[async_trait]
impl WalletActuator for RpcWalletActuator {
    fn coldkey(&self) -> &str {
        &self.coldkey
    }

    async fn stake(
        &self,
        netuid: Netuid,
        hotkey: &Hotkey,
        amount: f64,
        policy: InclusionPolicy,
    ) -> Result<ExtrinsicReceipt, ActuatorError> {
        let result: SubmitResult = self
            .transport
            .call("wallet_addStake", (netuid, hotkey.as_str(), amount, policy))
            .await?;
        result.into_receipt()
    }

    async fn unstake(
        &self,
        netuid: Netuid,
        hotkey: &Hotkey,
        amount: f64,
        policy: InclusionPolicy,
    ) -> Result<ExtrinsicReceipt, ActuatorError> {
        let result: SubmitResult = self
            .transport
            .call("wallet_removeStake", (netuid, hotkey.as_str(), amount, policy))
            .await?;
        result.into_receipt()
    }

    async fn balance(&self, address: &str) -> Result<f64, ActuatorError> {
        Ok(self.transport.call("wallet_balance", [address]).await?)
    }

    async fn staked_amount(
        &self,
        netuid: Netuid,
        coldkey: &str,
        hotkey: &Hotkey,
    ) -> Result<f64, ActuatorError> {
        Ok(self
            .transport
            .call("wallet_stakeFor", (netuid, coldkey, hotkey.as_str()))
            .await?)
    }

    async fn minimum_retained_balance(&self, snapshot: &Snapshot) -> Result<f64, ActuatorError> {
        Ok(self
            .transport
            .call("wallet_existentialDeposit", [snapshot.block_hash()])
            .await?)
    }

    async fn slippage(&self, netuid: Netuid, amount: f64) -> Result<f64, ActuatorError> {
        Ok(self
            .transport
            .call("wallet_stakeSlippage", (netuid, amount))
            .await?)
    }
}
