//! Relay services: oracle registry, request dispatch and the request watcher

pub mod bootstrap;
pub mod dispatcher;
pub mod registry;
pub mod request_watcher;
pub mod retry;

pub use bootstrap::{prepare_contracts, ContractsStatus};
pub use dispatcher::{DispatchSettings, RequestDispatcher, RoundQueue};
pub use registry::{register_pool, AgentRegistry, PoolReport, PoolSettings};
pub use request_watcher::{EarlyRequestPolicy, OracleRequestWatcher, StartBlock, WatcherSettings};
