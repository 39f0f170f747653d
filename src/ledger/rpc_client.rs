//! `SnapshotClient` backed by the ledger's JSON-RPC gateway
//!
//! Storage reads go through gateway methods that return decoded values:
//!
//! | Method                          | Params                                   |
//! |---------------------------------|------------------------------------------|
//! | `chain_getBlockHash`            | `[]` (current head)                      |
//! | `subtensor_totalNetworks`       | `[at]`                                   |
//! | `subtensor_taoDividend`         | `[netuid, hotkey, at]`                   |
//! | `subtensor_taoDividendsPage`    | `[netuid, at, start_key, page_size]`     |
//! | `subtensor_subnetOwnerHotkey`   | `[netuid, at]`                           |
//!
//! `at` is always the block hash of the caller's snapshot.

use super::{DividendStream, Hotkey, LedgerError, Netuid, Snapshot, SnapshotClient};
use crate::rpc::JsonRpcTransport;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use std::sync::Arc;

/// One page of `TaoDividendsPerSubnet` entries
#[derive(Debug, Clone, Deserialize)]
pub struct DividendPage {
    pub entries: Vec<(String, f64)>,
    /// Storage key to resume from; `None` on the last page
    #[serde(rename = "nextKey")]
    pub next_key: Option<String>,
}

pub struct RpcSnapshotClient {
    transport: Arc<JsonRpcTransport>,
    page_size: u32,
}

impl RpcSnapshotClient {
    pub fn new(transport: Arc<JsonRpcTransport>, page_size: u32) -> Self {
        Self {
            transport,
            page_size: page_size.max(1),
        }
    }
}

/// Paging cursor: `None` once the last page has been yielded
type Cursor = Option<Option<String>>;

async fn fetch_page(
    transport: Arc<JsonRpcTransport>,
    netuid: Netuid,
    at: String,
    cursor: Cursor,
    page_size: u32,
) -> Result<Option<(Vec<(String, f64)>, Cursor)>, LedgerError> {
    let start_key = match cursor {
        Some(start_key) => start_key,
        None => return Ok(None),
    };

    let page: DividendPage = transport
        .call(
            "subtensor_taoDividendsPage",
            (netuid, at.as_str(), start_key, page_size),
        )
        .await?;

    log::debug!(
        "netuid {} page: {} entries (more: {})",
        netuid,
        page.entries.len(),
        page.next_key.is_some()
    );

    Ok(Some((page.entries, page.next_key.map(Some))))
}

#[async_trait]
impl SnapshotClient for RpcSnapshotClient {
    async fn current_snapshot(&self) -> Result<Snapshot, LedgerError> {
        let hash: Option<String> = self.transport.call("chain_getBlockHash", Vec::<u64>::new()).await?;
        let hash = hash.ok_or_else(|| LedgerError::Decode("chain head has no hash".to_string()))?;
        Snapshot::new(hash)
    }

    async fn point_query(
        &self,
        netuid: Netuid,
        hotkey: &Hotkey,
        snapshot: &Snapshot,
    ) -> Result<f64, LedgerError> {
        let value: Option<f64> = self
            .transport
            .call(
                "subtensor_taoDividend",
                (netuid, hotkey.as_str(), snapshot.block_hash()),
            )
            .await?;

        // Missing storage entries read as the item's default
        Ok(value.unwrap_or(0.0))
    }

    fn map_query(&self, netuid: Netuid, snapshot: &Snapshot) -> DividendStream {
        let transport = self.transport.clone();
        let at = snapshot.block_hash().to_string();
        let page_size = self.page_size;

        let initial: Cursor = Some(None);

        stream::try_unfold(initial, move |cursor| {
            fetch_page(transport.clone(), netuid, at.clone(), cursor, page_size)
        })
        .map_ok(|entries| {
            stream::iter(
                entries
                    .into_iter()
                    .map(|(hotkey, value)| Ok::<_, LedgerError>((Hotkey::from_ledger(hotkey), value))),
            )
        })
        .try_flatten()
        .boxed()
    }

    async fn partition_count(&self, snapshot: &Snapshot) -> Result<Netuid, LedgerError> {
        let count: Netuid = self
            .transport
            .call("subtensor_totalNetworks", [snapshot.block_hash()])
            .await?;
        Ok(count)
    }

    async fn owner_hotkey(&self, netuid: Netuid, snapshot: &Snapshot) -> Result<Hotkey, LedgerError> {
        let owner: Option<String> = self
            .transport
            .call("subtensor_subnetOwnerHotkey", (netuid, snapshot.block_hash()))
            .await?;

        owner
            .map(Hotkey::from_ledger)
            .ok_or_else(|| LedgerError::Decode(format!("netuid {} has no owner hotkey", netuid)))
    }
}
