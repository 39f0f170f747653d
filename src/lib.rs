//! Cached dividend views over a partitioned ledger, plus a sentiment-driven
//! stake decision loop that acts on the same ledger.
//!
//! - `ledger`: snapshot-pinned reads through a JSON-RPC gateway
//! - `dividends`: concurrent per-partition aggregation behind a cache-through service
//! - `cache`: Redis and in-memory TTL caches
//! - `staking`: the decision state machine and its scheduler/worker tasks

pub mod cache;
pub mod config;
pub mod dividends;
pub mod ledger;
pub mod rpc;
pub mod staking;
