//! Spy doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tao_dividends::ledger::{
    DividendStream, Hotkey, LedgerError, Netuid, Snapshot, SnapshotClient,
};
use tao_dividends::staking::{
    ActivityFeed, ActuatorError, DecisionRecorder, ExtrinsicReceipt, InclusionPolicy, OracleError,
    RecorderError, SentimentOracle, StakeDecision, WalletActuator,
};

pub const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
pub const BOB: &str = "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty";

pub fn alice() -> Hotkey {
    Hotkey::parse(ALICE).unwrap()
}

pub fn bob() -> Hotkey {
    Hotkey::parse(BOB).unwrap()
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn snapshot_at(height: usize) -> Snapshot {
    Snapshot::new(format!("0x{:064x}", height)).unwrap()
}

/// Ledger double; every read records the snapshot it was bound to
#[derive(Default)]
pub struct MockLedger {
    partition_count: Netuid,
    partitions: HashMap<Netuid, Vec<(Hotkey, f64)>>,
    delays: HashMap<Netuid, Duration>,
    failures: HashSet<Netuid>,
    owners: HashMap<Netuid, Hotkey>,
    moving_head: bool,
    height: AtomicUsize,
    pub snapshot_calls: AtomicUsize,
    pub point_calls: AtomicUsize,
    pub map_calls: AtomicUsize,
    pub count_calls: AtomicUsize,
    pub owner_calls: AtomicUsize,
    pub completed_drains: Arc<AtomicUsize>,
    pub seen_snapshots: Mutex<Vec<Snapshot>>,
}

impl MockLedger {
    pub fn new(partition_count: Netuid) -> Self {
        Self {
            partition_count,
            ..Self::default()
        }
    }

    pub fn with_partition(mut self, netuid: Netuid, entries: Vec<(Hotkey, f64)>) -> Self {
        self.partitions.insert(netuid, entries);
        self
    }

    pub fn with_delay(mut self, netuid: Netuid, delay: Duration) -> Self {
        self.delays.insert(netuid, delay);
        self
    }

    pub fn with_failure(mut self, netuid: Netuid) -> Self {
        self.failures.insert(netuid);
        self
    }

    pub fn with_owner(mut self, netuid: Netuid, owner: Hotkey) -> Self {
        self.owners.insert(netuid, owner);
        self
    }

    /// Every `current_snapshot` call returns a new block
    pub fn with_moving_head(mut self) -> Self {
        self.moving_head = true;
        self
    }

    /// Move the chain head forward so the next snapshot differs
    pub fn advance_head(&self) {
        self.height.fetch_add(1, Ordering::SeqCst);
    }

    pub fn completed(&self) -> usize {
        self.completed_drains.load(Ordering::SeqCst)
    }

    pub fn distinct_snapshots(&self) -> usize {
        let seen = self.seen_snapshots.lock().unwrap();
        seen.iter().collect::<HashSet<_>>().len()
    }

    fn record(&self, snapshot: &Snapshot) {
        self.seen_snapshots.lock().unwrap().push(snapshot.clone());
    }
}

#[async_trait]
impl SnapshotClient for MockLedger {
    async fn current_snapshot(&self) -> Result<Snapshot, LedgerError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let height = if self.moving_head {
            self.height.fetch_add(1, Ordering::SeqCst)
        } else {
            self.height.load(Ordering::SeqCst)
        };
        Ok(snapshot_at(height))
    }

    async fn point_query(
        &self,
        netuid: Netuid,
        hotkey: &Hotkey,
        snapshot: &Snapshot,
    ) -> Result<f64, LedgerError> {
        self.point_calls.fetch_add(1, Ordering::SeqCst);
        self.record(snapshot);

        Ok(self
            .partitions
            .get(&netuid)
            .and_then(|entries| entries.iter().find(|(h, _)| h == hotkey))
            .map(|(_, value)| *value)
            .unwrap_or(0.0))
    }

    fn map_query(&self, netuid: Netuid, snapshot: &Snapshot) -> DividendStream {
        self.map_calls.fetch_add(1, Ordering::SeqCst);
        self.record(snapshot);

        let delay = self.delays.get(&netuid).copied().unwrap_or_default();
        let fail = self.failures.contains(&netuid);
        let entries = self.partitions.get(&netuid).cloned().unwrap_or_default();
        let completed = self.completed_drains.clone();

        stream::once(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(LedgerError::Decode(format!("netuid {} unavailable", netuid)));
            }
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(stream::iter(entries.into_iter().map(Ok::<_, LedgerError>)))
        })
        .try_flatten()
        .boxed()
    }

    async fn partition_count(&self, snapshot: &Snapshot) -> Result<Netuid, LedgerError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.record(snapshot);
        Ok(self.partition_count)
    }

    async fn owner_hotkey(&self, netuid: Netuid, snapshot: &Snapshot) -> Result<Hotkey, LedgerError> {
        self.owner_calls.fetch_add(1, Ordering::SeqCst);
        self.record(snapshot);
        self.owners
            .get(&netuid)
            .cloned()
            .ok_or_else(|| LedgerError::Decode(format!("no owner for netuid {}", netuid)))
    }
}

pub struct MockFeed {
    pub available: bool,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl MockFeed {
    pub fn available() -> Self {
        Self {
            available: true,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::available()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ActivityFeed for MockFeed {
    async fn recent_activity(&self, netuid: Netuid) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        pause(self.delay).await;
        if self.available {
            Ok(format!("netuid {} is doing great", netuid))
        } else {
            Err(OracleError::Status(503))
        }
    }
}

/// Oracle returning a fixed score, or failing when `score` is `None`
pub struct MockOracle {
    pub score: Option<i64>,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl MockOracle {
    pub fn scoring(score: i64) -> Self {
        Self {
            score: Some(score),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            score: None,
            ..Self::scoring(0)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SentimentOracle for MockOracle {
    async fn score(&self, _corpus: &str) -> Result<i64, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        pause(self.delay).await;
        self.score
            .ok_or_else(|| OracleError::Parse("model returned no score".to_string()))
    }
}

/// Wallet double counting every mutation attempt
pub struct MockWallet {
    pub balance: f64,
    pub minimum_retained: f64,
    pub staked: f64,
    pub slippage: f64,
    pub reject_mutations: bool,
    pub actuator_delay: Duration,
    pub stake_calls: AtomicUsize,
    pub unstake_calls: AtomicUsize,
    pub mutations: Mutex<Vec<(Netuid, Hotkey, f64)>>,
}

impl MockWallet {
    pub fn new(balance: f64, minimum_retained: f64) -> Self {
        Self {
            balance,
            minimum_retained,
            staked: 0.0,
            slippage: 0.0,
            reject_mutations: false,
            actuator_delay: Duration::ZERO,
            stake_calls: AtomicUsize::new(0),
            unstake_calls: AtomicUsize::new(0),
            mutations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_staked(mut self, staked: f64) -> Self {
        self.staked = staked;
        self
    }

    pub fn with_slippage(mut self, slippage: f64) -> Self {
        self.slippage = slippage;
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.reject_mutations = true;
        self
    }

    /// Stake and unstake calls hang this long before the receipt
    pub fn with_actuator_delay(mut self, delay: Duration) -> Self {
        self.actuator_delay = delay;
        self
    }

    pub fn actuator_calls(&self) -> usize {
        self.stake_calls.load(Ordering::SeqCst) + self.unstake_calls.load(Ordering::SeqCst)
    }

    fn submit(&self, netuid: Netuid, hotkey: &Hotkey, amount: f64) -> Result<ExtrinsicReceipt, ActuatorError> {
        self.mutations
            .lock()
            .unwrap()
            .push((netuid, hotkey.clone(), amount));

        if self.reject_mutations {
            return Err(ActuatorError::Rejected("NotEnoughBalanceToStake".to_string()));
        }

        Ok(ExtrinsicReceipt {
            block_hash: Some(format!("0x{}", "11".repeat(32))),
            extrinsic_hash: None,
        })
    }
}

#[async_trait]
impl WalletActuator for MockWallet {
    fn coldkey(&self) -> &str {
        BOB
    }

    async fn stake(
        &self,
        netuid: Netuid,
        hotkey: &Hotkey,
        amount: f64,
        _policy: InclusionPolicy,
    ) -> Result<ExtrinsicReceipt, ActuatorError> {
        self.stake_calls.fetch_add(1, Ordering::SeqCst);
        pause(self.actuator_delay).await;
        self.submit(netuid, hotkey, amount)
    }

    async fn unstake(
        &self,
        netuid: Netuid,
        hotkey: &Hotkey,
        amount: f64,
        _policy: InclusionPolicy,
    ) -> Result<ExtrinsicReceipt, ActuatorError> {
        self.unstake_calls.fetch_add(1, Ordering::SeqCst);
        pause(self.actuator_delay).await;
        self.submit(netuid, hotkey, amount)
    }

    async fn balance(&self, _address: &str) -> Result<f64, ActuatorError> {
        Ok(self.balance)
    }

    async fn staked_amount(
        &self,
        _netuid: Netuid,
        _coldkey: &str,
        _hotkey: &Hotkey,
    ) -> Result<f64, ActuatorError> {
        Ok(self.staked)
    }

    async fn minimum_retained_balance(&self, _snapshot: &Snapshot) -> Result<f64, ActuatorError> {
        Ok(self.minimum_retained)
    }

    async fn slippage(&self, _netuid: Netuid, _amount: f64) -> Result<f64, ActuatorError> {
        Ok(self.slippage)
    }
}

/// Recorder keeping every decision; optionally fails after keeping it
#[derive(Default)]
pub struct MockRecorder {
    pub fail: bool,
    pub decisions: Mutex<Vec<StakeDecision>>,
}

impl MockRecorder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn recorded(&self) -> Vec<StakeDecision> {
        self.decisions.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionRecorder for MockRecorder {
    async fn record(&self, decision: &StakeDecision) -> Result<(), RecorderError> {
        self.decisions.lock().unwrap().push(decision.clone());
        if self.fail {
            return Err(RecorderError::Backend("disk full".to_string()));
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "mock"
    }
}
