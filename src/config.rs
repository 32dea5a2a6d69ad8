use alloy::primitives::Address;
use dotenvy::dotenv;
use eyre::Result;
use std::{env, path::PathBuf, str::FromStr, time::Duration};
use tracing::info;

use crate::error::ConfigError;

/// USDC on Sepolia.
pub const DEFAULT_CONTRACT: &str = "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238";

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub start_block: u64,
    pub port: u16,
    pub db_path: PathBuf,
    pub contract_address: Address,
    pub poll_interval: Duration,
    pub log_range: u64,
    pub max_resubscribe: u32,
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // ✅ Load from .env file

    let cfg = from_lookup(|key| env::var(key).ok())?;

    info!("Loaded config: {:?}", cfg);
    Ok(cfg)
}

/// Build a config from any key lookup. Unset keys take defaults; unparsable ones fail.
pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let rpc_url = get("RPC_URL").ok_or(ConfigError::Missing("RPC_URL"))?;

    let contract_address: Address = parse(
        "CONTRACT_ADDRESS",
        get("CONTRACT_ADDRESS").unwrap_or_else(|| DEFAULT_CONTRACT.to_string()),
    )?;

    let log_range: u64 = parse_or(get("LOG_RANGE"), "LOG_RANGE", 2000)?;
    if log_range == 0 {
        return Err(ConfigError::Invalid { key: "LOG_RANGE", value: "0".into() });
    }

    Ok(Config {
        rpc_url,
        start_block: parse_or(get("START_BLOCK"), "START_BLOCK", 0)?,
        port: parse_or(get("PORT"), "PORT", 3000)?,
        db_path: get("DATABASE_URL")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/events.db")),
        contract_address,
        poll_interval: Duration::from_millis(parse_or(
            get("POLL_INTERVAL_MS"),
            "POLL_INTERVAL_MS",
            4000,
        )?),
        log_range,
        max_resubscribe: parse_or(get("MAX_RESUBSCRIBE"), "MAX_RESUBSCRIBE", 5)?,
    })
}

fn parse<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw })
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    raw.map_or(Ok(default), |v| parse(key, v))
}
