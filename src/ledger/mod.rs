//! Ledger access: snapshot handles, partition ids and the read client seam
//!
//! Every read against the ledger is parameterised by a [`Snapshot`]. A
//! multi-partition read is only meaningful when all partitions are read at
//! the same block, so the snapshot is obtained once by the caller and then
//! threaded by reference into each query. Nothing in this module refreshes
//! it implicitly.

pub mod hotkey;
pub mod rpc_client;

pub use hotkey::{Hotkey, HotkeyError};
pub use rpc_client::RpcSnapshotClient;

use crate::rpc::RpcError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Partition (subnet) identifier
pub type Netuid = u16;

/// Stream of `(hotkey, dividend)` pairs for one partition
///
/// Implementations page through the partition lazily; consumers must drain
/// the stream before treating the partition as complete.
pub type DividendStream = BoxStream<'static, Result<(Hotkey, f64), LedgerError>>;

#[derive(Debug)]
pub enum LedgerError {
    Rpc(RpcError),
    Timeout(String),
    Decode(String),
    InvalidSnapshot(String),
}

impl From<RpcError> for LedgerError {
    fn from(err: RpcError) -> Self {
        LedgerError::Rpc(err)
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Rpc(e) => write!(f, "Ledger RPC failed: {}", e),
            LedgerError::Timeout(op) => write!(f, "Ledger query timed out: {}", op),
            LedgerError::Decode(msg) => write!(f, "Ledger decode error: {}", msg),
            LedgerError::InvalidSnapshot(msg) => write!(f, "Invalid snapshot handle: {}", msg),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Immutable handle identifying one ledger state (a block hash)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    block_hash: String,
}

impl Snapshot {
    /// Build a handle from a `0x`-prefixed 32-byte block hash
    pub fn new(block_hash: impl Into<String>) -> Result<Self, LedgerError> {
        let block_hash = block_hash.into();
        let digits = block_hash
            .strip_prefix("0x")
            .ok_or_else(|| LedgerError::InvalidSnapshot(format!("missing 0x prefix: {}", block_hash)))?;

        let bytes = hex::decode(digits)
            .map_err(|e| LedgerError::InvalidSnapshot(format!("{}: {}", block_hash, e)))?;

        if bytes.len() != 32 {
            return Err(LedgerError::InvalidSnapshot(format!(
                "expected 32-byte hash, got {} bytes",
                bytes.len()
            )));
        }

        Ok(Self {
            block_hash: block_hash.to_lowercase(),
        })
    }

    pub fn block_hash(&self) -> &str {
        &self.block_hash
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 0x + first 8 hex digits is enough to tell blocks apart in logs
        write!(f, "{}", &self.block_hash[..self.block_hash.len().min(10)])
    }
}

/// Read-only client for the remote ledger
#[async_trait]
pub trait SnapshotClient: Send + Sync {
    /// Handle of the current chain head
    async fn current_snapshot(&self) -> Result<Snapshot, LedgerError>;

    /// Dividend of a single hotkey in one partition
    async fn point_query(
        &self,
        netuid: Netuid,
        hotkey: &Hotkey,
        snapshot: &Snapshot,
    ) -> Result<f64, LedgerError>;

    /// All `(hotkey, dividend)` entries of one partition
    fn map_query(&self, netuid: Netuid, snapshot: &Snapshot) -> DividendStream;

    /// Number of partitions (`TotalNetworks`) at the snapshot
    async fn partition_count(&self, snapshot: &Snapshot) -> Result<Netuid, LedgerError>;

    /// Designated owner hotkey of a partition
    async fn owner_hotkey(&self, netuid: Netuid, snapshot: &Snapshot) -> Result<Hotkey, LedgerError>;
}
