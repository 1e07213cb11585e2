//! Ledger client adapter
//!
//! [`LedgerClient`] is the only way the relay talks to the chain. The
//! production implementation is [`EthersLedger`]; [`MockLedger`] keeps the
//! whole relay runnable without a node.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, TxHash, U256};
use tokio::time::timeout;

use crate::error::LedgerError;
use crate::models::oracle::{OracleRequest, OracleResponse};

pub mod ethers_client;
pub mod mocked;

pub use ethers_client::EthersLedger;
pub use mocked::MockLedger;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Runs a ledger call with an upper bound. A call that outlives `limit` is
/// reported as a transport error.
pub async fn bounded<T, F>(limit: Duration, call: F) -> LedgerResult<T>
where
    F: Future<Output = LedgerResult<T>>,
{
    timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(LedgerError::Transport(format!("no answer within {limit:?}"))))
}

/// Calls into the App and Data contracts used by the relay.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Accounts managed (unlocked) by the node.
    async fn accounts(&self) -> LedgerResult<Vec<Address>>;

    /// App `isOperational()`.
    async fn is_operational(&self, from: Address) -> LedgerResult<bool>;

    /// Data `authorizeCaller(app)` sent by the contract owner.
    async fn authorize_caller(&self, owner: Address) -> LedgerResult<Option<TxHash>>;

    /// App `registerOracle()`, paying `stake`.
    async fn register_oracle(
        &self,
        agent: Address,
        stake: U256,
        gas_limit: u64,
    ) -> LedgerResult<Option<TxHash>>;

    /// App `getMyIndexes()` called as `agent`.
    async fn get_my_indexes(&self, agent: Address) -> LedgerResult<Vec<u8>>;

    /// App `submitOracleResponse(index, airline, flight, timestamp, statusCode)`.
    async fn submit_oracle_response(
        &self,
        agent: Address,
        response: &OracleResponse,
        gas_limit: u64,
    ) -> LedgerResult<Option<TxHash>>;

    async fn latest_block(&self) -> LedgerResult<u64>;

    /// `OracleRequest` events in `[from_block, to_block]`, in delivery order.
    async fn oracle_requests(&self, from_block: u64, to_block: u64)
        -> LedgerResult<Vec<OracleRequest>>;
}
