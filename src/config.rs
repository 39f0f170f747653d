//! Configuration from environment variables
//!
//! Two layers, loaded independently:
//! - `ServiceConfig`: ledger gateway and cache settings, needed by every binary
//! - `StakeConfig`: oracle, wallet and scheduler settings, only needed by the
//!   stake runtime (its API keys and coldkey are required there)
//!
//! Every loader has a `from_lookup` twin taking the variable source as a
//! closure so tests never touch the process environment.

use crate::dividends::CacheSettings;
use crate::ledger::{Hotkey, Netuid};
use crate::staking::{DecisionTarget, StakeSettings};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

impl FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(CacheBackend::Redis),
            "memory" => Ok(CacheBackend::Memory),
            other => Err(ConfigError::InvalidValue(format!(
                "CACHE_BACKEND must be redis or memory, got {}",
                other
            ))),
        }
    }
}

/// Ledger and cache settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub ledger_rpc_url: String,
    pub ledger_rpc_timeout: Duration,
    /// Entries per `subtensor_taoDividendsPage` request
    pub map_page_size: u32,
    /// Upper bound on draining one partition during aggregation
    pub partition_query_timeout: Duration,
    pub cache_backend: CacheBackend,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,
    pub dividend_ttl: Duration,
    pub total_networks_ttl: Duration,
}

impl ServiceConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `LEDGER_RPC_URL` (default: https://entrypoint-finney.opentensor.ai:443)
    /// - `LEDGER_RPC_TIMEOUT_MS` (default: 30000)
    /// - `MAP_PAGE_SIZE` (default: 256)
    /// - `PARTITION_QUERY_TIMEOUT_MS` (default: 30000)
    /// - `CACHE_BACKEND` (default: redis)
    /// - `REDIS_HOST` / `REDIS_PORT` / `REDIS_DB` (default: localhost / 6379 / 0)
    /// - `DIVIDEND_TTL_SECS` (default: 120)
    /// - `TOTAL_NETWORKS_TTL_SECS` (default: 300)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ledger_rpc_url = lookup("LEDGER_RPC_URL")
            .unwrap_or_else(|| "https://entrypoint-finney.opentensor.ai:443".to_string());
        require_http("LEDGER_RPC_URL", &ledger_rpc_url)?;

        let map_page_size = parse_or(&lookup, "MAP_PAGE_SIZE", 256u32)?;
        if map_page_size == 0 {
            return Err(ConfigError::InvalidValue("MAP_PAGE_SIZE must be positive".to_string()));
        }

        Ok(Self {
            ledger_rpc_url,
            ledger_rpc_timeout: Duration::from_millis(parse_or(&lookup, "LEDGER_RPC_TIMEOUT_MS", 30_000)?),
            map_page_size,
            partition_query_timeout: Duration::from_millis(parse_or(
                &lookup,
                "PARTITION_QUERY_TIMEOUT_MS",
                30_000,
            )?),
            cache_backend: parse_or(&lookup, "CACHE_BACKEND", CacheBackend::Redis)?,
            redis_host: lookup("REDIS_HOST").unwrap_or_else(|| "localhost".to_string()),
            redis_port: parse_or(&lookup, "REDIS_PORT", 6379)?,
            redis_db: parse_or(&lookup, "REDIS_DB", 0)?,
            dividend_ttl: Duration::from_secs(parse_or(&lookup, "DIVIDEND_TTL_SECS", 120)?),
            total_networks_ttl: Duration::from_secs(parse_or(&lookup, "TOTAL_NETWORKS_TTL_SECS", 300)?),
        })
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db)
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            dividend_ttl: self.dividend_ttl,
            total_partitions_ttl: self.total_networks_ttl,
        }
    }
}

/// Oracle, wallet and scheduler settings for the stake runtime
#[derive(Debug, Clone)]
pub struct StakeConfig {
    pub datura_api_key: String,
    pub datura_api_url: String,
    pub chutes_api_key: String,
    pub chutes_api_url: String,
    pub chutes_model: String,
    pub wallet_rpc_url: String,
    pub wallet_coldkey: String,
    pub settings: StakeSettings,
    pub decision_interval: Duration,
    pub targets: Vec<DecisionTarget>,
    pub trigger_channel_buffer: usize,
}

impl StakeConfig {
    /// Load configuration from environment variables
    ///
    /// Required: `DATURA_API_KEY`, `CHUTES_API_KEY`, `WALLET_COLDKEY`.
    /// `DECISION_TARGETS` is a comma list of `netuid` or `netuid:hotkey`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let wallet_rpc_url = lookup("WALLET_RPC_URL")
            .unwrap_or_else(|| "https://test.chain.opentensor.ai".to_string());
        require_http("WALLET_RPC_URL", &wallet_rpc_url)?;

        let defaults = StakeSettings::default();
        let scaling_factor = parse_or(&lookup, "STAKE_SCALING_FACTOR", defaults.scaling_factor)?;
        if !scaling_factor.is_finite() || scaling_factor <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "STAKE_SCALING_FACTOR must be a positive number".to_string(),
            ));
        }

        let max_slippage_ratio = match lookup("MAX_SLIPPAGE_RATIO") {
            Some(raw) if !raw.trim().is_empty() => Some(parse_value::<f64>("MAX_SLIPPAGE_RATIO", &raw)?),
            _ => None,
        };

        let decision_interval = Duration::from_secs(parse_or(&lookup, "DECISION_INTERVAL_SECS", 3600)?);
        if decision_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "DECISION_INTERVAL_SECS must be positive".to_string(),
            ));
        }

        let targets = match lookup("DECISION_TARGETS") {
            Some(raw) => parse_targets(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            datura_api_key: require(&lookup, "DATURA_API_KEY")?,
            datura_api_url: lookup("DATURA_API_URL")
                .unwrap_or_else(|| "https://apis.datura.ai/twitter".to_string()),
            chutes_api_key: require(&lookup, "CHUTES_API_KEY")?,
            chutes_api_url: lookup("CHUTES_API_URL")
                .unwrap_or_else(|| "https://llm.chutes.ai/v1/chat/completions".to_string()),
            chutes_model: lookup("CHUTES_MODEL")
                .unwrap_or_else(|| "unsloth/Llama-3.2-3B-Instruct".to_string()),
            wallet_rpc_url,
            wallet_coldkey: require(&lookup, "WALLET_COLDKEY")?,
            settings: StakeSettings {
                scaling_factor,
                max_slippage_ratio,
                oracle_timeout: Duration::from_millis(parse_or(&lookup, "ORACLE_TIMEOUT_MS", 30_000)?),
                actuator_timeout: Duration::from_millis(parse_or(&lookup, "ACTUATOR_TIMEOUT_MS", 60_000)?),
            },
            decision_interval,
            targets,
            trigger_channel_buffer: parse_or(&lookup, "TRIGGER_CHANNEL_BUFFER", 100usize)?.max(1),
        })
    }
}

/// Parse `DECISION_TARGETS`, e.g. `18,3:5GrwvaEF...`
pub fn parse_targets(raw: &str) -> Result<Vec<DecisionTarget>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (netuid, hotkey) = match item.split_once(':') {
                Some((netuid, hotkey)) => (netuid, Some(hotkey.trim())),
                None => (item, None),
            };

            let netuid: Netuid = parse_value("DECISION_TARGETS", netuid.trim())?;
            if netuid == 0 {
                return Err(ConfigError::InvalidValue(
                    "DECISION_TARGETS netuid must be at least 1".to_string(),
                ));
            }

            let hotkey = hotkey
                .map(|h| {
                    Hotkey::parse(h).map_err(|e| {
                        ConfigError::InvalidValue(format!("DECISION_TARGETS hotkey {}: {}", h, e))
                    })
                })
                .transpose()?;

            Ok(DecisionTarget { netuid, hotkey })
        })
        .collect()
}

fn require<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn require_http(key: &str, url: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::InvalidValue(format!(
            "{} must start with http:// or https://",
            key
        )));
    }
    Ok(())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw)))
}
