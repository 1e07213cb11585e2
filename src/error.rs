//! Error types for the oracle relay

use ethers::types::Address;

/// Errors surfaced by the ledger adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// The contract reverted or the transaction was dropped.
    #[error("transaction rejected: {0}")]
    Rejected(String),
    /// The node could not be reached or returned a malformed response.
    #[error("ledger transport error: {0}")]
    Transport(String),
    /// A log or return value could not be decoded.
    #[error("failed to decode ledger data: {0}")]
    Decode(String),
}

/// Errors raised while inserting into the agent registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("agent {0:?} is already registered")]
    DuplicateAgent(Address),
    #[error("agent {0:?} has no assigned indexes")]
    EmptyIndexSet(Address),
}

/// Top level error for the relay library.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The OracleRequest subscription failed too many times in a row.
    #[error("oracle request stream failed after {attempts} attempts: {last_error}")]
    EventStream { attempts: u32, last_error: String },
    /// The dispatch task is no longer accepting requests.
    #[error("request dispatch task has stopped")]
    DispatchStopped,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
