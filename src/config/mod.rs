//! Relay configuration loaded from the environment

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::models::oracle::{FlightStatus, StatusMode};
use crate::services::dispatcher::DispatchSettings;
use crate::services::registry::PoolSettings;
use crate::services::request_watcher::{EarlyRequestPolicy, StartBlock, WatcherSettings};

pub mod network;

pub use network::NetworkConfig;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_POOL_SIZE: usize = 20;
const DEFAULT_ACCOUNT_OFFSET: usize = 10;
const DEFAULT_GAS_LIMIT: u64 = 10_000_000;
const DEFAULT_LEDGER_TIMEOUT_SECONDS: u64 = 30;

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub network: NetworkConfig,
    pub pool: PoolSettings,
    pub dispatch: DispatchSettings,
    pub watcher: WatcherSettings,
    /// Upper bound for a single JSON-RPC request and for each startup call.
    pub ledger_timeout: Duration,
    pub authorize_caller: bool,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        let network_name = env::var("RELAY_NETWORK").unwrap_or_else(|_| "localhost".to_string());
        let config_file =
            env::var("RELAY_CONFIG_FILE").unwrap_or_else(|_| "config.json".to_string());
        let network = NetworkConfig::load(&PathBuf::from(config_file), &network_name)?;

        Self::from_vars(network, |key| env::var(key).ok())
    }

    /// Builds everything but the network section from a variable lookup.
    pub fn from_vars<F>(network: NetworkConfig, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gas_limit = parse_or(&var, "ORACLE_GAS_LIMIT", DEFAULT_GAS_LIMIT)?;
        let ledger_timeout = Duration::from_secs(parse_or(
            &var,
            "LEDGER_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_LEDGER_TIMEOUT_SECONDS,
        )?);
        if ledger_timeout.is_zero() {
            return Err(RelayError::Config(
                "LEDGER_REQUEST_TIMEOUT_SECONDS must be at least 1".to_string(),
            ));
        }

        let stake_ether = var("ORACLE_STAKE_ETHER").unwrap_or_else(|| "1".to_string());
        let stake = ethers::utils::parse_ether(stake_ether.trim()).map_err(|err| {
            RelayError::Config(format!("ORACLE_STAKE_ETHER `{stake_ether}` is invalid: {err}"))
        })?;

        let status_mode = match var("ORACLE_FIXED_STATUS") {
            Some(code) if !code.trim().is_empty() => {
                let code: u8 = parse_value("ORACLE_FIXED_STATUS", &code)?;
                let status = FlightStatus::try_from(code).map_err(|code| {
                    RelayError::Config(format!(
                        "ORACLE_FIXED_STATUS {code} is not a flight status code"
                    ))
                })?;
                StatusMode::Fixed(status)
            }
            _ => StatusMode::Random,
        };

        let pool = PoolSettings {
            size: parse_or(&var, "ORACLE_POOL_SIZE", DEFAULT_POOL_SIZE)?,
            account_offset: parse_or(&var, "ORACLE_ACCOUNT_OFFSET", DEFAULT_ACCOUNT_OFFSET)?,
            stake,
            gas_limit,
            registration_timeout: Duration::from_secs(parse_or(
                &var,
                "REGISTRATION_TIMEOUT_SECONDS",
                60,
            )?),
            index_query_timeout: Duration::from_secs(parse_or(
                &var,
                "INDEX_QUERY_TIMEOUT_SECONDS",
                10,
            )?),
            index_query_retries: parse_or(&var, "INDEX_QUERY_RETRIES", 3)?,
            index_query_interval: Duration::from_millis(500),
        };

        let dispatch = DispatchSettings {
            status_mode,
            submission_timeout: Duration::from_secs(parse_or(
                &var,
                "SUBMISSION_TIMEOUT_SECONDS",
                30,
            )?),
            gas_limit,
        };

        let start_block = match var("RELAY_START_BLOCK") {
            Some(value) if value.trim().eq_ignore_ascii_case("latest") => StartBlock::Latest,
            Some(value) => StartBlock::Number(parse_value("RELAY_START_BLOCK", &value)?),
            None => StartBlock::Number(0),
        };

        let early_requests = match var("RELAY_EARLY_REQUESTS").as_deref().map(str::trim) {
            None | Some("wait") => EarlyRequestPolicy::Wait,
            Some("drop") => EarlyRequestPolicy::Drop,
            Some(other) => {
                return Err(RelayError::Config(format!(
                    "RELAY_EARLY_REQUESTS must be `wait` or `drop`, got `{other}`"
                )))
            }
        };

        let watcher = WatcherSettings {
            poll_interval: Duration::from_millis(parse_or(&var, "RELAY_POLL_INTERVAL_MS", 2_000)?),
            max_blocks_per_step: parse_or(&var, "RELAY_MAX_BLOCKS_PER_STEP", 1_000)?,
            start_block,
            max_consecutive_failures: parse_or(&var, "RELAY_MAX_CONSECUTIVE_FAILURES", 10)?,
            request_timeout: ledger_timeout,
            early_requests,
            state_file: var("RELAY_STATE_FILE")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
        };

        if watcher.max_blocks_per_step == 0 {
            return Err(RelayError::Config(
                "RELAY_MAX_BLOCKS_PER_STEP must be at least 1".to_string(),
            ));
        }

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:8000".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            network,
            pool,
            dispatch,
            watcher,
            ledger_timeout,
            authorize_caller: parse_or(&var, "RELAY_AUTHORIZE_CALLER", true)?,
            port: parse_or(&var, "PORT", DEFAULT_PORT)?,
            cors_allowed_origins,
        })
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| RelayError::Config(format!("{key} `{value}` is invalid: {err}")))
}
