//! Stake Runtime - scheduled and query-triggered stake decisions
//!
//! Orchestrates:
//! - a decision worker consuming triggers one at a time
//! - a scheduler enqueueing `DECISION_TARGETS` every `DECISION_INTERVAL_SECS`
//! - a query loop reading one JSON `DividendQuery` per stdin line and
//!   printing the response; `"trade": true` enqueues a decision
//!
//! Usage:
//!   cargo run --release --bin stake_runtime
//!   echo '{"netuid":18,"trade":true}' | cargo run --bin stake_runtime
//!
//! Environment variables: see `ServiceConfig` and `StakeConfig`.

use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use tao_dividends::cache;
use tao_dividends::config::{ServiceConfig, StakeConfig};
use tao_dividends::dividends::{
    spawn_line_reader, AggregationEngine, DividendQuery, DividendService,
};
use tao_dividends::ledger::{RpcSnapshotClient, SnapshotClient};
use tao_dividends::rpc::JsonRpcTransport;
use tao_dividends::staking::{
    decision_scheduler_task, decision_worker_task, ActivityFeed, ChutesOracle, DaturaFeed,
    DecisionRecorder, DecisionTrigger, LogDecisionRecorder, RpcWalletActuator, SentimentOracle,
    StakeDecisionEngine, WalletActuator,
};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    info!("🚀 Stake Runtime");

    let service_config = ServiceConfig::from_env()?;
    let stake_config = StakeConfig::from_env()?;

    info!("   ├─ Ledger gateway: {}", service_config.ledger_rpc_url);
    info!("   ├─ Wallet gateway: {}", stake_config.wallet_rpc_url);
    info!("   ├─ Scaling factor: {} TAO/point", stake_config.settings.scaling_factor);
    info!("   ├─ Decision targets: {}", stake_config.targets.len());
    info!("   └─ Interval: {:?}", stake_config.decision_interval);

    let ledger_transport = Arc::new(JsonRpcTransport::new(
        &service_config.ledger_rpc_url,
        service_config.ledger_rpc_timeout,
    )?);
    let ledger: Arc<dyn SnapshotClient> = Arc::new(RpcSnapshotClient::new(
        ledger_transport,
        service_config.map_page_size,
    ));

    let wallet_transport = Arc::new(JsonRpcTransport::new(
        &stake_config.wallet_rpc_url,
        stake_config.settings.actuator_timeout,
    )?);
    let wallet: Arc<dyn WalletActuator> = Arc::new(RpcWalletActuator::new(
        wallet_transport,
        &stake_config.wallet_coldkey,
    ));

    let feed: Arc<dyn ActivityFeed> = Arc::new(DaturaFeed::new(
        &stake_config.datura_api_url,
        &stake_config.datura_api_key,
        stake_config.settings.oracle_timeout,
    )?);
    let oracle: Arc<dyn SentimentOracle> = Arc::new(ChutesOracle::new(
        &stake_config.chutes_api_url,
        &stake_config.chutes_api_key,
        &stake_config.chutes_model,
        stake_config.settings.oracle_timeout,
    )?);
    let recorder: Arc<dyn DecisionRecorder> = Arc::new(LogDecisionRecorder);

    let engine = Arc::new(StakeDecisionEngine::new(
        ledger.clone(),
        feed,
        oracle,
        wallet,
        recorder,
        stake_config.settings.clone(),
    ));
    info!("✅ Decision engine created");

    let (tx, rx) = mpsc::channel::<DecisionTrigger>(stake_config.trigger_channel_buffer);
    info!("✅ Trigger channel created (buffer: {})", stake_config.trigger_channel_buffer);

    let cache = cache::from_config(&service_config).await?;
    let aggregator = AggregationEngine::new(ledger.clone(), service_config.partition_query_timeout);
    let service = DividendService::new(ledger, cache, aggregator, service_config.cache_settings())
        .with_trade_triggers(tx.clone());

    info!("🚀 Spawning background tasks...");

    let worker = tokio::spawn(decision_worker_task(rx, engine));
    info!("   ├─ ✅ Decision worker spawned");

    let scheduler = tokio::spawn(decision_scheduler_task(
        tx.clone(),
        stake_config.targets.clone(),
        stake_config.decision_interval,
    ));
    info!("   ├─ ✅ Scheduler spawned");

    let queries = tokio::spawn(query_loop(service));
    info!("   └─ ✅ Query loop reading stdin");

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    // Every sender must go before the worker sees the channel close
    scheduler.abort();
    queries.abort();
    drop(tx);

    // A decision already in flight runs to completion; its mutation is never cut short
    match worker.await {
        Ok(processed) => info!("✅ Stake runtime stopped ({} decisions)", processed),
        Err(e) => warn!("⚠️  Decision worker ended abnormally: {}", e),
    }

    Ok(())
}

async fn query_loop(service: DividendService) {
    // stdin is read off the runtime so shutdown never waits on a pending read
    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()), 16);

    loop {
        let line = match lines.recv().await {
            Some(Ok(line)) => line,
            None => {
                info!("stdin closed, query loop stopping");
                return;
            }
            Some(Err(e)) => {
                error!("❌ Failed to read query: {}", e);
                return;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let query: DividendQuery = match serde_json::from_str(&line) {
            Ok(query) => query,
            Err(e) => {
                warn!("⚠️  Ignoring malformed query {:?}: {}", line, e);
                continue;
            }
        };

        match service.get_dividends(query).await {
            Ok(response) => match serde_json::to_string(&response) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("❌ Failed to encode response: {}", e),
            },
            Err(e) => {
                warn!("⚠️  Query failed: {}", e);
                println!("{}", serde_json::json!({ "error": e.to_string() }));
            }
        }
    }
}
