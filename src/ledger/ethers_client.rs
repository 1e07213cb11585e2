use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::contract::{abigen, ContractError};
use ethers::providers::{
    Http, HttpRateLimitRetryPolicy, Middleware, PendingTransaction, Provider, RetryClient,
    RetryClientBuilder,
};
use ethers::types::{Address, TransactionReceipt, TxHash, U256, U64};
use reqwest::Url;

use super::{LedgerClient, LedgerResult};
use crate::config::NetworkConfig;
use crate::error::{LedgerError, RelayError};
use crate::models::oracle::{OracleRequest, OracleResponse};

abigen!(
    FlightSuretyApp,
    r#"[
        function isOperational() external view returns (bool)
        function registerOracle() external payable
        function getMyIndexes() external view returns (uint8[3])
        function submitOracleResponse(uint8 index, address airline, string flight, uint256 timestamp, uint8 statusCode) external
        event OracleRequest(uint8 index, address airline, string flight, uint256 timestamp)
    ]"#,
);

abigen!(
    FlightSuretyData,
    r#"[
        function authorizeCaller(address contractAddress) external
    ]"#,
);

/// Ethereum client using Ethers, with a rate limit aware retry strategy.
pub type EthersClient = Provider<RetryClient<Http>>;

const PENDING_TX_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// [`LedgerClient`] backed by a JSON-RPC node whose accounts are unlocked,
/// such as a local Ganache instance.
pub struct EthersLedger {
    provider: Arc<EthersClient>,
    app: FlightSuretyApp<EthersClient>,
    data: FlightSuretyData<EthersClient>,
    app_address: Address,
}

impl EthersLedger {
    /// Connects to `network`. Every JSON-RPC request is bounded by
    /// `request_timeout`.
    pub fn connect(
        network: &NetworkConfig,
        request_timeout: Duration,
    ) -> Result<Self, RelayError> {
        let url = Url::parse(&network.url).map_err(|err| {
            RelayError::Config(format!("ledger url `{}` is invalid: {err}", network.url))
        })?;
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| RelayError::Config(format!("cannot build http client: {err}")))?;
        let http = Http::new_with_client(url, http_client);
        let client = RetryClientBuilder::default()
            .rate_limit_retries(10)
            .timeout_retries(3)
            .initial_backoff(Duration::from_millis(500))
            .build(http, Box::<HttpRateLimitRetryPolicy>::default());
        let provider = Arc::new(Provider::new(client).interval(PENDING_TX_POLL_INTERVAL));

        tracing::info!(
            network = %network.name,
            url = %network.url,
            ?request_timeout,
            app = ?network.app_address,
            data = ?network.data_address,
            "ledger client configured"
        );

        Ok(Self {
            app: FlightSuretyApp::new(network.app_address, provider.clone()),
            data: FlightSuretyData::new(network.data_address, provider.clone()),
            provider,
            app_address: network.app_address,
        })
    }
}

#[async_trait]
impl LedgerClient for EthersLedger {
    async fn accounts(&self) -> LedgerResult<Vec<Address>> {
        self.provider.get_accounts().await.map_err(transport_error)
    }

    async fn is_operational(&self, from: Address) -> LedgerResult<bool> {
        self.app
            .is_operational()
            .from(from)
            .call()
            .await
            .map_err(contract_error)
    }

    async fn authorize_caller(&self, owner: Address) -> LedgerResult<Option<TxHash>> {
        let call = self.data.authorize_caller(self.app_address).from(owner);
        let pending = call.send().await.map_err(contract_error)?;
        confirm(pending).await
    }

    async fn register_oracle(
        &self,
        agent: Address,
        stake: U256,
        gas_limit: u64,
    ) -> LedgerResult<Option<TxHash>> {
        let call = self
            .app
            .register_oracle()
            .from(agent)
            .value(stake)
            .gas(gas_limit);
        let pending = call.send().await.map_err(contract_error)?;
        confirm(pending).await
    }

    async fn get_my_indexes(&self, agent: Address) -> LedgerResult<Vec<u8>> {
        let indexes = self
            .app
            .get_my_indexes()
            .from(agent)
            .call()
            .await
            .map_err(contract_error)?;
        Ok(indexes.to_vec())
    }

    async fn submit_oracle_response(
        &self,
        agent: Address,
        response: &OracleResponse,
        gas_limit: u64,
    ) -> LedgerResult<Option<TxHash>> {
        let call = self
            .app
            .submit_oracle_response(
                response.index,
                response.airline,
                response.flight.clone(),
                response.timestamp,
                response.status.code(),
            )
            .from(agent)
            .gas(gas_limit);
        let pending = call.send().await.map_err(contract_error)?;
        confirm(pending).await
    }

    async fn latest_block(&self) -> LedgerResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|number| number.as_u64())
            .map_err(transport_error)
    }

    async fn oracle_requests(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> LedgerResult<Vec<OracleRequest>> {
        let mut found = self
            .app
            .oracle_request_filter()
            .from_block(from_block)
            .to_block(to_block)
            .query_with_meta()
            .await
            .map_err(contract_error)?;
        found.sort_by_key(|(_, meta)| (meta.block_number, meta.log_index));

        Ok(found
            .into_iter()
            .map(|(event, meta)| OracleRequest {
                index: event.index,
                airline: event.airline,
                flight: event.flight,
                timestamp: event.timestamp,
                block_number: Some(meta.block_number.as_u64()),
            })
            .collect())
    }
}

/// Waits for the receipt of a sent transaction.
async fn confirm(
    pending: PendingTransaction<'_, RetryClient<Http>>,
) -> LedgerResult<Option<TxHash>> {
    let tx_hash = pending.tx_hash();
    let receipt = pending.await.map_err(transport_error)?;
    receipt_outcome(tx_hash, receipt)
}

/// A missing receipt means the transaction was dropped from the mempool; a
/// zero status means it reverted.
fn receipt_outcome(
    tx_hash: TxHash,
    receipt: Option<TransactionReceipt>,
) -> LedgerResult<Option<TxHash>> {
    match receipt {
        None => Err(LedgerError::Rejected(format!("transaction {tx_hash:?} dropped"))),
        Some(receipt) if receipt.status == Some(U64::zero()) => Err(LedgerError::Rejected(
            format!("transaction {tx_hash:?} reverted"),
        )),
        Some(receipt) => Ok(Some(receipt.transaction_hash)),
    }
}

fn contract_error<M: Middleware>(err: ContractError<M>) -> LedgerError {
    if err.is_revert() {
        LedgerError::Rejected(err.to_string())
    } else if matches!(
        err,
        ContractError::DecodingError(_)
            | ContractError::AbiError(_)
            | ContractError::DetokenizationError(_)
    ) {
        LedgerError::Decode(err.to_string())
    } else {
        LedgerError::Transport(err.to_string())
    }
}

fn transport_error(err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(hash: TxHash, status: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: hash,
            status: Some(U64::from(status)),
            ..Default::default()
        }
    }

    #[test]
    fn dropped_transaction_is_rejected() {
        let hash = TxHash::from_low_u64_be(7);
        assert!(matches!(
            receipt_outcome(hash, None),
            Err(LedgerError::Rejected(reason)) if reason.contains("dropped")
        ));
    }

    #[test]
    fn reverted_transaction_is_rejected() {
        let hash = TxHash::from_low_u64_be(7);
        assert!(matches!(
            receipt_outcome(hash, Some(receipt(hash, 0))),
            Err(LedgerError::Rejected(reason)) if reason.contains("reverted")
        ));
    }

    #[test]
    fn mined_transaction_yields_its_hash() {
        let hash = TxHash::from_low_u64_be(7);
        assert_eq!(
            receipt_outcome(hash, Some(receipt(hash, 1))).unwrap(),
            Some(hash)
        );
    }
}
