//! Cache-through dividend lookups
//!
//! Three query granularities share one entry point:
//!
//! | netuid | hotkey | strategy                          | cache key              |
//! |--------|--------|-----------------------------------|------------------------|
//! | set    | set    | point query                       | `Exact`                |
//! | set    | -      | single-partition aggregation      | `Partition`            |
//! | -      | -      | aggregation over all partitions   | `Global`               |
//!
//! On a miss the snapshot is fetched once and every ledger read of that
//! request uses it. Concurrent misses on the same key are not coalesced;
//! both callers fetch and the later write wins.

use super::aggregator::{global_total, partition_total, AggregationEngine, AggregationError};
use crate::cache::{get_json, set_json, Cache, CacheKey, CachedDividend};
use crate::ledger::{Hotkey, LedgerError, Netuid, Snapshot, SnapshotClient};
use crate::staking::decision::{DecisionTrigger, TriggerSource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub const DEFAULT_DIVIDEND_TTL: Duration = Duration::from_secs(120);
pub const DEFAULT_TOTAL_PARTITIONS_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub enum ServiceError {
    /// Bad netuid/hotkey combination or format (caller error)
    InvalidRequest(String),
    Aggregation(AggregationError),
    Ledger(LedgerError),
}

impl From<AggregationError> for ServiceError {
    fn from(err: AggregationError) -> Self {
        ServiceError::Aggregation(err)
    }
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        ServiceError::Ledger(err)
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ServiceError::Aggregation(e) => write!(f, "{}", e),
            ServiceError::Ledger(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Inbound dividend query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DividendQuery {
    pub netuid: Option<Netuid>,
    pub hotkey: Option<String>,
    /// Also enqueue a stake decision for the partition
    #[serde(default)]
    pub trade: bool,
}

impl DividendQuery {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn partition(netuid: Netuid) -> Self {
        Self {
            netuid: Some(netuid),
            ..Self::default()
        }
    }

    pub fn exact(netuid: Netuid, hotkey: &str) -> Self {
        Self {
            netuid: Some(netuid),
            hotkey: Some(hotkey.to_string()),
            trade: false,
        }
    }

    pub fn with_trade(mut self) -> Self {
        self.trade = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DividendResponse {
    pub netuid: Option<Netuid>,
    pub hotkey: Option<Hotkey>,
    pub value: f64,
    pub cached: bool,
    #[serde(rename = "asOf")]
    pub as_of: Snapshot,
    pub stake_tx_triggered: bool,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub dividend_ttl: Duration,
    pub total_partitions_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dividend_ttl: DEFAULT_DIVIDEND_TTL,
            total_partitions_ttl: DEFAULT_TOTAL_PARTITIONS_TTL,
        }
    }
}

pub struct DividendService {
    ledger: Arc<dyn SnapshotClient>,
    cache: Arc<dyn Cache>,
    aggregator: AggregationEngine,
    settings: CacheSettings,
    triggers: Option<mpsc::Sender<DecisionTrigger>>,
}

impl DividendService {
    pub fn new(
        ledger: Arc<dyn SnapshotClient>,
        cache: Arc<dyn Cache>,
        aggregator: AggregationEngine,
        settings: CacheSettings,
    ) -> Self {
        Self {
            ledger,
            cache,
            aggregator,
            settings,
            triggers: None,
        }
    }

    /// Forward `trade=true` queries to a decision worker
    pub fn with_trade_triggers(mut self, triggers: mpsc::Sender<DecisionTrigger>) -> Self {
        self.triggers = Some(triggers);
        self
    }

    pub async fn get_dividends(&self, query: DividendQuery) -> Result<DividendResponse, ServiceError> {
        if query.hotkey.is_some() && query.netuid.is_none() {
            return Err(ServiceError::InvalidRequest(
                "hotkey provided but no netuid".to_string(),
            ));
        }

        let hotkey = match query.hotkey.as_deref() {
            Some(raw) => Some(
                Hotkey::parse(raw)
                    .map_err(|e| ServiceError::InvalidRequest(format!("invalid hotkey {}: {}", raw, e)))?,
            ),
            None => None,
        };

        if let Some(netuid) = query.netuid {
            let total = self.total_partitions().await?;
            if netuid < 1 || netuid > total {
                return Err(ServiceError::InvalidRequest(format!(
                    "invalid netuid {} (valid range 1..={})",
                    netuid, total
                )));
            }
        }

        let key = match (query.netuid, hotkey.clone()) {
            (Some(netuid), Some(hotkey)) => CacheKey::Exact { netuid, hotkey },
            (Some(netuid), None) => CacheKey::Partition { netuid },
            _ => CacheKey::Global,
        };

        let (entry, cached) = match self.cache_get::<CachedDividend>(&key).await {
            Some(entry) => {
                log::debug!("Cache hit for {}", key.redis_key());
                (entry, true)
            }
            None => {
                let snapshot = self.ledger.current_snapshot().await?;
                let value = self.fetch(&key, &snapshot).await?;
                let entry = CachedDividend {
                    value,
                    as_of: snapshot,
                };
                self.cache_set(&key, &entry, self.settings.dividend_ttl).await;
                (entry, false)
            }
        };

        let stake_tx_triggered = match (query.trade, query.netuid) {
            (true, Some(netuid)) => self.trigger_decision(netuid, hotkey.clone()),
            _ => false,
        };

        Ok(DividendResponse {
            netuid: query.netuid,
            hotkey,
            value: entry.value,
            cached,
            as_of: entry.as_of,
            stake_tx_triggered,
        })
    }

    /// Partition count, cached separately with its own (longer) TTL
    pub async fn total_partitions(&self) -> Result<Netuid, ServiceError> {
        self.total_partitions_at(None).await
    }

    /// On a miss, reads the count at `pinned` when given, else at the current head
    async fn total_partitions_at(&self, pinned: Option<&Snapshot>) -> Result<Netuid, ServiceError> {
        if let Some(total) = self.cache_get::<Netuid>(&CacheKey::TotalPartitions).await {
            return Ok(total);
        }

        let total = match pinned {
            Some(snapshot) => self.ledger.partition_count(snapshot).await?,
            None => {
                let snapshot = self.ledger.current_snapshot().await?;
                self.ledger.partition_count(&snapshot).await?
            }
        };

        self.cache_set(&CacheKey::TotalPartitions, &total, self.settings.total_partitions_ttl)
            .await;

        Ok(total)
    }

    async fn fetch(&self, key: &CacheKey, snapshot: &Snapshot) -> Result<f64, ServiceError> {
        match key {
            CacheKey::Exact { netuid, hotkey } => {
                Ok(self.ledger.point_query(*netuid, hotkey, snapshot).await?)
            }
            CacheKey::Partition { netuid } => {
                let total = self.total_partitions_at(Some(snapshot)).await?;
                let partitions: BTreeSet<Netuid> = [*netuid].into_iter().collect();
                let merged = self.aggregator.aggregate(&partitions, total, snapshot).await?;
                Ok(merged.get(netuid).map(partition_total).unwrap_or(0.0))
            }
            CacheKey::Global => {
                let total = self.total_partitions_at(Some(snapshot)).await?;
                if total == 0 {
                    return Ok(0.0);
                }
                let merged = self.aggregator.aggregate_all(total, snapshot).await?;
                Ok(global_total(&merged))
            }
            CacheKey::TotalPartitions => Err(ServiceError::InvalidRequest(
                "total_networks is not a dividend key".to_string(),
            )),
        }
    }

    fn trigger_decision(&self, netuid: Netuid, hotkey: Option<Hotkey>) -> bool {
        let Some(triggers) = &self.triggers else {
            log::warn!("⚠️  Trade requested for netuid {} but no decision worker is attached", netuid);
            return false;
        };

        let trigger = DecisionTrigger {
            netuid,
            hotkey,
            source: TriggerSource::Query,
        };

        match triggers.try_send(trigger) {
            Ok(()) => {
                log::info!("Queued stake decision for netuid {}", netuid);
                true
            }
            Err(TrySendError::Full(_)) => {
                log::warn!("⚠️  Decision queue full, dropping trade trigger for netuid {}", netuid);
                false
            }
            Err(TrySendError::Closed(_)) => {
                log::warn!("⚠️  Decision worker stopped, dropping trade trigger for netuid {}", netuid);
                false
            }
        }
    }

    // Cache failures degrade to a miss / a skipped write; the ledger stays authoritative.
    async fn cache_get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match get_json(self.cache.as_ref(), key).await {
            Ok(value) => value,
            Err(e) => {
                log::warn!("⚠️  {} cache read failed for {}: {}", self.cache.backend_type(), key.redis_key(), e);
                None
            }
        }
    }

    async fn cache_set<T: Serialize + Sync>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        if let Err(e) = set_json(self.cache.as_ref(), key, value, ttl).await {
            log::warn!("⚠️  {} cache write failed for {}: {}", self.cache.backend_type(), key.redis_key(), e);
        }
    }
}
