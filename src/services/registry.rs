//! Oracle agent registry and startup pool registration

use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, U256};
use futures_util::future::join_all;
use tokio::sync::{watch, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, RegistryError};
use crate::ledger::{bounded, LedgerClient};
use crate::models::oracle::Agent;
use crate::services::retry::FixedRetries;

#[derive(Clone, Debug)]
pub struct PoolSettings {
    /// How many oracle accounts to register.
    pub size: usize,
    /// Index of the first node account used as an oracle.
    pub account_offset: usize,
    /// Registration fee paid by each oracle, in wei.
    pub stake: U256,
    pub gas_limit: u64,
    pub registration_timeout: Duration,
    /// Upper bound for one account listing or index query attempt.
    pub index_query_timeout: Duration,
    pub index_query_retries: usize,
    pub index_query_interval: Duration,
}

/// Registered agents, shared between the pool builder and dispatch rounds.
///
/// Agents are only ever appended. Readers take a cheap [`Arc`] snapshot, so a
/// dispatch round never holds the lock while it submits.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: RwLock<Arc<Vec<Agent>>>,
    ready: watch::Sender<bool>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            agents: RwLock::new(Arc::new(Vec::new())),
            ready,
        }
    }

    pub async fn insert(&self, agent: Agent) -> Result<(), RegistryError> {
        if agent.indexes().is_empty() {
            return Err(RegistryError::EmptyIndexSet(agent.address()));
        }

        let mut agents = self.agents.write().await;
        if agents.iter().any(|existing| existing.address() == agent.address()) {
            return Err(RegistryError::DuplicateAgent(agent.address()));
        }
        Arc::make_mut(&mut *agents).push(agent);
        Ok(())
    }

    pub async fn snapshot(&self) -> Arc<Vec<Agent>> {
        self.agents.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, address: Address) -> bool {
        self.agents
            .read()
            .await
            .iter()
            .any(|agent| agent.address() == address)
    }

    /// Signals that the startup registration batch has finished.
    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub async fn wait_until_ready(&self) {
        let mut ready = self.ready.subscribe();
        // the sender lives as long as `self`, so this only returns once ready
        let _ = ready.wait_for(|ready| *ready).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Registration,
    IndexQuery,
    Insert,
}

#[derive(Debug, Clone)]
pub struct CandidateFailure {
    pub address: Address,
    pub stage: FailureStage,
    pub reason: String,
}

/// Outcome of one pool registration batch.
#[derive(Debug, Default)]
pub struct PoolReport {
    pub registered: Vec<Address>,
    pub failures: Vec<CandidateFailure>,
}

/// Picks the oracle accounts `[offset, offset + size)` from the node accounts.
pub fn select_candidates(accounts: &[Address], settings: &PoolSettings) -> Vec<Address> {
    let candidates: Vec<Address> = accounts
        .iter()
        .skip(settings.account_offset)
        .take(settings.size)
        .copied()
        .collect();

    if candidates.len() < settings.size {
        warn!(
            requested = settings.size,
            available = candidates.len(),
            offset = settings.account_offset,
            "not enough node accounts for the requested oracle pool"
        );
    }
    candidates
}

/// Registers the configured oracle pool and marks the registry ready.
///
/// Only fails when the node accounts cannot be listed; individual candidate
/// failures are recorded in the report.
pub async fn register_pool(
    registry: &AgentRegistry,
    ledger: &dyn LedgerClient,
    settings: &PoolSettings,
) -> Result<PoolReport, LedgerError> {
    let policy = FixedRetries::new(settings.index_query_interval, settings.index_query_retries);
    let attempt_timeout = settings.index_query_timeout;
    let accounts = backoff::future::retry(policy, move || async move {
        bounded(attempt_timeout, ledger.accounts())
            .await
            .map_err(backoff::Error::transient)
    })
    .await;

    let accounts = match accounts {
        Ok(accounts) => accounts,
        Err(err) => {
            registry.mark_ready();
            return Err(err);
        }
    };

    let candidates = select_candidates(&accounts, settings);
    Ok(register_candidates(registry, ledger, &candidates, settings).await)
}

/// Registers every candidate concurrently. A failing candidate is logged and
/// left out of the registry without affecting the others.
pub async fn register_candidates(
    registry: &AgentRegistry,
    ledger: &dyn LedgerClient,
    candidates: &[Address],
    settings: &PoolSettings,
) -> PoolReport {
    info!(candidates = candidates.len(), "registering oracles");

    let tasks = candidates
        .iter()
        .enumerate()
        .map(|(slot, &address)| register_candidate(registry, ledger, slot, address, settings));
    let results = join_all(tasks).await;

    let mut report = PoolReport::default();
    for result in results {
        match result {
            Ok(address) => report.registered.push(address),
            Err(failure) => report.failures.push(failure),
        }
    }

    registry.mark_ready();
    info!(
        registered = report.registered.len(),
        failed = report.failures.len(),
        "oracle pool registration finished"
    );
    report
}

async fn register_candidate(
    registry: &AgentRegistry,
    ledger: &dyn LedgerClient,
    slot: usize,
    address: Address,
    settings: &PoolSettings,
) -> Result<Address, CandidateFailure> {
    let fail = |stage: FailureStage, reason: String| {
        warn!(slot, agent = ?address, ?stage, %reason, "oracle candidate excluded");
        CandidateFailure {
            address,
            stage,
            reason,
        }
    };

    let registration = timeout(
        settings.registration_timeout,
        ledger.register_oracle(address, settings.stake, settings.gas_limit),
    )
    .await;
    match registration {
        Ok(Ok(tx_hash)) => debug!(slot, agent = ?address, ?tx_hash, "oracle registered"),
        Ok(Err(err)) => return Err(fail(FailureStage::Registration, err.to_string())),
        Err(_) => {
            return Err(fail(
                FailureStage::Registration,
                format!("no receipt within {:?}", settings.registration_timeout),
            ))
        }
    }

    // The account is now registered on-chain, so a flaky index lookup is
    // retried before giving up on it.
    let policy = FixedRetries::new(settings.index_query_interval, settings.index_query_retries);
    let attempt_timeout = settings.index_query_timeout;
    let indexes = backoff::future::retry(policy, move || async move {
        bounded(attempt_timeout, ledger.get_my_indexes(address))
            .await
            .map_err(|err| match err {
                LedgerError::Rejected(_) => backoff::Error::permanent(err),
                other => backoff::Error::transient(other),
            })
    })
    .await
    .map_err(|err| fail(FailureStage::IndexQuery, err.to_string()))?;

    registry
        .insert(Agent::new(address, indexes.clone()))
        .await
        .map_err(|err| fail(FailureStage::Insert, err.to_string()))?;

    info!(slot, agent = ?address, ?indexes, "oracle added to pool");
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedger;

    fn settings(size: usize, account_offset: usize) -> PoolSettings {
        PoolSettings {
            size,
            account_offset,
            stake: U256::exp10(18),
            gas_limit: 10_000_000,
            registration_timeout: Duration::from_millis(200),
            index_query_timeout: Duration::from_millis(50),
            index_query_retries: 2,
            index_query_interval: Duration::from_millis(1),
        }
    }

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[tokio::test]
    async fn registers_every_candidate_with_assigned_indexes() {
        let ledger = MockLedger::with_accounts(5);
        ledger.assign_indexes(addr(1), vec![1, 4, 7]);

        let registry = AgentRegistry::new();
        let report = register_pool(&registry, &ledger, &settings(5, 0))
            .await
            .unwrap();

        assert_eq!(report.registered.len(), 5);
        assert!(report.failures.is_empty());
        assert!(registry.is_ready());
        let snapshot = registry.snapshot().await;
        let first = snapshot.iter().find(|a| a.address() == addr(1)).unwrap();
        assert_eq!(first.indexes(), &[1, 4, 7]);
    }

    #[tokio::test]
    async fn failed_index_lookup_excludes_only_that_candidate() {
        let ledger = MockLedger::with_accounts(5);
        ledger.fail_index_query(addr(3), usize::MAX);

        let registry = AgentRegistry::new();
        let report = register_pool(&registry, &ledger, &settings(5, 0))
            .await
            .unwrap();

        assert_eq!(registry.len().await, 4);
        assert!(!registry.contains(addr(3)).await);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].address, addr(3));
        assert_eq!(report.failures[0].stage, FailureStage::IndexQuery);
        // first attempt plus the configured retries
        assert_eq!(ledger.index_query_calls(addr(3)), 3);
    }

    #[tokio::test]
    async fn transient_index_lookup_failure_is_retried() {
        let ledger = MockLedger::with_accounts(2);
        ledger.fail_index_query(addr(2), 1);

        let registry = AgentRegistry::new();
        let report = register_pool(&registry, &ledger, &settings(2, 0))
            .await
            .unwrap();

        assert!(report.failures.is_empty());
        assert!(registry.contains(addr(2)).await);
        assert_eq!(ledger.index_query_calls(addr(2)), 2);
    }

    #[tokio::test]
    async fn stalled_index_lookup_does_not_block_the_pool() {
        let ledger = MockLedger::with_accounts(3);
        ledger.delay_index_query(addr(2), Duration::from_secs(60));

        let registry = AgentRegistry::new();
        let report = timeout(
            Duration::from_secs(2),
            register_pool(&registry, &ledger, &settings(3, 0)),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(registry.is_ready());
        assert_eq!(registry.len().await, 2);
        assert!(!registry.contains(addr(2)).await);
        assert_eq!(report.failures[0].address, addr(2));
        assert_eq!(report.failures[0].stage, FailureStage::IndexQuery);
        assert_eq!(ledger.index_query_calls(addr(2)), 3);
    }

    #[tokio::test]
    async fn rejected_registration_excludes_candidate() {
        let ledger = MockLedger::with_accounts(3);
        ledger.fail_registration(addr(2));

        let registry = AgentRegistry::new();
        let report = register_pool(&registry, &ledger, &settings(3, 0))
            .await
            .unwrap();

        assert_eq!(report.failures[0].stage, FailureStage::Registration);
        assert_eq!(registry.len().await, 2);
        // a rejected registration never reaches the index query
        assert_eq!(ledger.index_query_calls(addr(2)), 0);
    }

    #[tokio::test]
    async fn registration_timeout_excludes_candidate() {
        let ledger = MockLedger::with_accounts(2);
        ledger.delay_registration(addr(1), Duration::from_secs(5));

        let registry = AgentRegistry::new();
        let report = register_pool(&registry, &ledger, &settings(2, 0))
            .await
            .unwrap();

        assert_eq!(report.registered, vec![addr(2)]);
        assert_eq!(report.failures[0].address, addr(1));
    }

    #[tokio::test]
    async fn candidates_start_at_the_account_offset() {
        let ledger = MockLedger::with_accounts(30);
        let registry = AgentRegistry::new();
        let report = register_pool(&registry, &ledger, &settings(20, 10))
            .await
            .unwrap();

        assert_eq!(report.registered.len(), 20);
        assert!(!registry.contains(addr(10)).await);
        assert!(registry.contains(addr(11)).await);
        assert!(registry.contains(addr(30)).await);
    }

    #[test]
    fn candidate_selection_is_clipped_to_available_accounts() {
        let accounts: Vec<Address> = (1..=12).map(addr).collect();
        let candidates = select_candidates(&accounts, &settings(20, 10));
        assert_eq!(candidates, vec![addr(11), addr(12)]);
    }

    #[tokio::test]
    async fn insert_rejects_duplicates_and_empty_index_sets() {
        let registry = AgentRegistry::new();
        registry.insert(Agent::new(addr(1), vec![1])).await.unwrap();

        assert_eq!(
            registry.insert(Agent::new(addr(1), vec![2])).await,
            Err(RegistryError::DuplicateAgent(addr(1)))
        );
        assert_eq!(
            registry.insert(Agent::new(addr(2), vec![])).await,
            Err(RegistryError::EmptyIndexSet(addr(2)))
        );
        assert_eq!(registry.snapshot().await[0].indexes(), &[1]);
    }

    #[tokio::test]
    async fn snapshots_are_unaffected_by_later_inserts() {
        let registry = AgentRegistry::new();
        registry.insert(Agent::new(addr(1), vec![1, 2, 3])).await.unwrap();
        let before = registry.snapshot().await;

        registry.insert(Agent::new(addr(2), vec![4, 5, 6])).await.unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(before[0], Agent::new(addr(1), vec![1, 2, 3]));
        assert_eq!(registry.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn wait_until_ready_resolves_after_mark_ready() {
        let registry = Arc::new(AgentRegistry::new());
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_until_ready().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        registry.mark_ready();
        timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
