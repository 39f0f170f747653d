//! Dividend Query - one-shot lookup against the cached dividend view
//!
//! Usage:
//!   cargo run --bin dividend_query -- [--netuid N] [--hotkey H]
//!   cargo run --bin dividend_query -- --total-networks
//!
//! Prints the response as JSON on stdout; logs go to stderr.
//! Configuration comes from the environment (see `ServiceConfig`).

use dotenv::dotenv;
use log::{error, info};
use std::env;
use std::sync::Arc;
use tao_dividends::cache;
use tao_dividends::config::ServiceConfig;
use tao_dividends::dividends::{AggregationEngine, DividendQuery, DividendService};
use tao_dividends::ledger::{Netuid, RpcSnapshotClient, SnapshotClient};
use tao_dividends::rpc::JsonRpcTransport;

struct Args {
    query: DividendQuery,
    total_networks: bool,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut query = DividendQuery::global();
    let mut total_networks = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--netuid" => {
                let raw = iter.next().ok_or("--netuid needs a value")?;
                let netuid: Netuid = raw
                    .parse()
                    .map_err(|_| format!("--netuid must be an integer, got {}", raw))?;
                query.netuid = Some(netuid);
            }
            "--hotkey" => {
                let raw = iter.next().ok_or("--hotkey needs a value")?;
                query.hotkey = Some(raw.clone());
            }
            "--total-networks" => total_networks = true,
            other => return Err(format!("unknown argument {}", other)),
        }
    }

    Ok(Args {
        query,
        total_networks,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            error!("❌ {}", msg);
            eprintln!("usage: dividend_query [--netuid N] [--hotkey H] [--total-networks]");
            std::process::exit(2);
        }
    };

    let config = ServiceConfig::from_env()?;
    info!("🔧 Ledger gateway: {}", config.ledger_rpc_url);

    let transport = Arc::new(JsonRpcTransport::new(
        &config.ledger_rpc_url,
        config.ledger_rpc_timeout,
    )?);
    let ledger: Arc<dyn SnapshotClient> =
        Arc::new(RpcSnapshotClient::new(transport, config.map_page_size));
    let cache = cache::from_config(&config).await?;

    let aggregator = AggregationEngine::new(ledger.clone(), config.partition_query_timeout);
    let service = DividendService::new(ledger, cache, aggregator, config.cache_settings());

    if args.total_networks {
        let total = service.total_partitions().await?;
        println!("{}", serde_json::json!({ "total_networks": total }));
        return Ok(());
    }

    match service.get_dividends(args.query).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            error!("❌ Dividend query failed: {}", e);
            Err(e.into())
        }
    }
}
