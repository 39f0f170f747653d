//! Fan-out aggregation across partitions
//!
//! One map query per partition, all bound to the same snapshot, polled
//! concurrently and merged as they complete. The merged value is a sorted
//! map, so completion order cannot influence it, and totals are summed in
//! key order.
//!
//! Failure is all-or-nothing: the first partition that errors (or exceeds
//! its timeout) aborts the aggregation, and the futures still in flight are
//! dropped, which cancels their requests.

use crate::ledger::{Hotkey, LedgerError, Netuid, Snapshot, SnapshotClient};
use futures::stream::{FuturesUnordered, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Dividends of every hotkey in one partition
pub type PartitionDividends = BTreeMap<Hotkey, f64>;

/// netuid -> hotkey -> dividend
pub type MergedDividends = BTreeMap<Netuid, PartitionDividends>;

#[derive(Debug)]
pub struct PartitionFailure {
    pub netuid: Netuid,
    pub error: LedgerError,
}

#[derive(Debug)]
pub enum AggregationError {
    EmptyPartitionSet,
    InvalidPartition(Netuid),
    PartialAggregationFailure { failed: Vec<PartitionFailure> },
}

impl AggregationError {
    /// Partitions whose reads failed
    pub fn failed_partitions(&self) -> Vec<Netuid> {
        match self {
            AggregationError::PartialAggregationFailure { failed } => {
                failed.iter().map(|f| f.netuid).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Display for AggregationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationError::EmptyPartitionSet => write!(f, "No partitions to aggregate"),
            AggregationError::InvalidPartition(netuid) => write!(f, "Invalid partition id {}", netuid),
            AggregationError::PartialAggregationFailure { failed } => {
                write!(f, "Partial aggregation failure:")?;
                for failure in failed {
                    write!(f, " [netuid {}: {}]", failure.netuid, failure.error)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AggregationError {}

pub struct AggregationEngine {
    client: Arc<dyn SnapshotClient>,
    partition_timeout: Duration,
}

impl AggregationEngine {
    /// # Arguments
    /// * `client` - Ledger client used for every partition query
    /// * `partition_timeout` - Budget for draining one partition, pages included
    pub fn new(client: Arc<dyn SnapshotClient>, partition_timeout: Duration) -> Self {
        Self {
            client,
            partition_timeout,
        }
    }

    /// Read and merge the given partitions at `snapshot`
    ///
    /// Every id must lie in `1..=total_partitions`, the partition count at
    /// that same snapshot. Returns only after every partition has been
    /// drained, or as soon as one fails. No retry is attempted here.
    pub async fn aggregate(
        &self,
        partitions: &BTreeSet<Netuid>,
        total_partitions: Netuid,
        snapshot: &Snapshot,
    ) -> Result<MergedDividends, AggregationError> {
        if partitions.is_empty() {
            return Err(AggregationError::EmptyPartitionSet);
        }
        if let Some(&netuid) = partitions
            .iter()
            .find(|&&netuid| netuid == 0 || netuid > total_partitions)
        {
            return Err(AggregationError::InvalidPartition(netuid));
        }

        let started = Instant::now();
        log::debug!(
            "Aggregating {} partitions at {}",
            partitions.len(),
            snapshot
        );

        let mut in_flight: FuturesUnordered<_> = partitions
            .iter()
            .map(|&netuid| async move { (netuid, self.drain_with_timeout(netuid, snapshot).await) })
            .collect();

        let mut merged = MergedDividends::new();

        while let Some((netuid, result)) = in_flight.next().await {
            match result {
                Ok(entries) => {
                    merged.insert(netuid, entries);
                }
                Err(error) => {
                    log::warn!(
                        "⚠️  Partition {} failed at {}, abandoning {} in-flight queries: {}",
                        netuid,
                        snapshot,
                        in_flight.len(),
                        error
                    );
                    return Err(AggregationError::PartialAggregationFailure {
                        failed: vec![PartitionFailure { netuid, error }],
                    });
                }
            }
        }

        log::debug!(
            "✅ Aggregated {} partitions at {} in {:?}",
            merged.len(),
            snapshot,
            started.elapsed()
        );

        Ok(merged)
    }

    /// Aggregate partitions `1..=total_partitions`
    pub async fn aggregate_all(
        &self,
        total_partitions: Netuid,
        snapshot: &Snapshot,
    ) -> Result<MergedDividends, AggregationError> {
        let partitions: BTreeSet<Netuid> = (1..=total_partitions).collect();
        self.aggregate(&partitions, total_partitions, snapshot).await
    }

    async fn drain_with_timeout(
        &self,
        netuid: Netuid,
        snapshot: &Snapshot,
    ) -> Result<PartitionDividends, LedgerError> {
        match tokio::time::timeout(self.partition_timeout, self.drain_partition(netuid, snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(format!(
                "netuid {} not drained within {:?}",
                netuid, self.partition_timeout
            ))),
        }
    }

    async fn drain_partition(
        &self,
        netuid: Netuid,
        snapshot: &Snapshot,
    ) -> Result<PartitionDividends, LedgerError> {
        let mut stream = self.client.map_query(netuid, snapshot);
        let mut entries = PartitionDividends::new();

        while let Some((hotkey, value)) = stream.try_next().await? {
            entries.insert(hotkey, value);
        }

        Ok(entries)
    }
}

/// Sum over every hotkey of one partition
pub fn partition_total(entries: &PartitionDividends) -> f64 {
    entries.values().sum()
}

/// Sum over every partition
pub fn global_total(merged: &MergedDividends) -> f64 {
    merged.values().map(partition_total).sum()
}
