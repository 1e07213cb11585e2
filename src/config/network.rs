use std::collections::HashMap;
use std::env;
use std::path::Path;

use ethers::types::Address;
use serde::Deserialize;

use crate::error::{RelayError, Result};

/// Ledger endpoint and deployed contract addresses for one network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    pub name: String,
    pub url: String,
    pub app_address: Address,
    pub data_address: Address,
}

/// One entry of the deployment `config.json`, keyed by network name.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkEntry {
    url: Option<String>,
    app_address: Option<String>,
    data_address: Option<String>,
}

impl NetworkConfig {
    /// Loads `network` from the deployment file (if present) and applies
    /// `LEDGER_URL`, `APP_CONTRACT_ADDRESS` and `DATA_CONTRACT_ADDRESS` overrides.
    pub fn load(path: &Path, network: &str) -> Result<Self> {
        let entry = match std::fs::read_to_string(path) {
            Ok(content) => {
                let mut networks: HashMap<String, NetworkEntry> = serde_json::from_str(&content)?;
                networks.remove(network).unwrap_or_default()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %path.display(),
                    "no deployment file, using environment only"
                );
                NetworkEntry::default()
            }
            Err(err) => return Err(err.into()),
        };

        let url = env::var("LEDGER_URL")
            .ok()
            .or(entry.url)
            .unwrap_or_else(|| "http://localhost:8545".to_string());
        let app_address = env::var("APP_CONTRACT_ADDRESS")
            .ok()
            .or(entry.app_address)
            .ok_or_else(|| missing(network, "appAddress"))?;
        let data_address = env::var("DATA_CONTRACT_ADDRESS")
            .ok()
            .or(entry.data_address)
            .ok_or_else(|| missing(network, "dataAddress"))?;

        Ok(Self {
            name: network.to_string(),
            url,
            app_address: parse_address("appAddress", &app_address)?,
            data_address: parse_address("dataAddress", &data_address)?,
        })
    }
}

fn missing(network: &str, key: &str) -> RelayError {
    RelayError::Config(format!("network `{network}` has no {key} configured"))
}

pub(crate) fn parse_address(key: &str, value: &str) -> Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|err| RelayError::Config(format!("{key} `{value}` is not an address: {err}")))
}
