//! In-memory ledger used to run the relay without a node.
//!
//! It mimics the parts of the App contract the relay relies on: registration
//! assigns indexes, `getMyIndexes` only answers registered oracles and
//! `submitOracleResponse` is only accepted for an index the oracle holds.
//! Failures and latency can be scripted per account.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, TxHash, U256};

use super::{LedgerClient, LedgerResult};
use crate::error::LedgerError;
use crate::models::oracle::{OracleRequest, OracleResponse};

#[derive(Debug, Default)]
struct MockState {
    accounts: Vec<Address>,
    assigned_indexes: HashMap<Address, Vec<u8>>,
    registered: HashSet<Address>,
    failing_registrations: HashSet<Address>,
    failing_index_queries: HashMap<Address, usize>,
    index_query_calls: HashMap<Address, usize>,
    failing_submissions: HashSet<Address>,
    submission_delays: HashMap<Address, Duration>,
    registration_delays: HashMap<Address, Duration>,
    index_query_delays: HashMap<Address, Duration>,
    poll_delay: Option<Duration>,
    authorization_delay: Option<Duration>,
    submissions: Vec<(Address, OracleResponse)>,
    requests: Vec<OracleRequest>,
    block: u64,
    failing_polls: usize,
    authorized: bool,
    paused: bool,
    tx_counter: u64,
}

#[derive(Debug, Default)]
pub struct MockLedger {
    state: Mutex<MockState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger whose node manages `count` accounts, `0x..01` upwards.
    pub fn with_accounts(count: u64) -> Self {
        let ledger = Self::new();
        ledger.lock().accounts = (1..=count).map(Address::from_low_u64_be).collect();
        ledger
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // a panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fixes the indexes `agent` receives when it registers.
    pub fn assign_indexes(&self, agent: Address, indexes: Vec<u8>) {
        self.lock().assigned_indexes.insert(agent, indexes);
    }

    pub fn fail_registration(&self, agent: Address) {
        self.lock().failing_registrations.insert(agent);
    }

    /// Makes the next `times` index queries for `agent` fail.
    pub fn fail_index_query(&self, agent: Address, times: usize) {
        self.lock().failing_index_queries.insert(agent, times);
    }

    pub fn fail_submissions(&self, agent: Address) {
        self.lock().failing_submissions.insert(agent);
    }

    pub fn delay_submissions(&self, agent: Address, delay: Duration) {
        self.lock().submission_delays.insert(agent, delay);
    }

    pub fn delay_registration(&self, agent: Address, delay: Duration) {
        self.lock().registration_delays.insert(agent, delay);
    }

    pub fn delay_index_query(&self, agent: Address, delay: Duration) {
        self.lock().index_query_delays.insert(agent, delay);
    }

    /// Delays every block number query by `delay`.
    pub fn delay_polls(&self, delay: Duration) {
        self.lock().poll_delay = Some(delay);
    }

    pub fn delay_authorization(&self, delay: Duration) {
        self.lock().authorization_delay = Some(delay);
    }

    /// Makes the next `times` block or event queries fail.
    pub fn fail_next_polls(&self, times: usize) {
        self.lock().failing_polls = times;
    }

    pub fn set_operational(&self, operational: bool) {
        self.lock().paused = !operational;
    }

    /// Mines a block carrying one `OracleRequest` and returns its number.
    pub fn emit_request(&self, index: u8, airline: Address, flight: &str, timestamp: u64) -> u64 {
        let mut state = self.lock();
        state.block += 1;
        let block = state.block;
        state.requests.push(OracleRequest {
            index,
            airline,
            flight: flight.to_string(),
            timestamp: U256::from(timestamp),
            block_number: Some(block),
        });
        block
    }

    /// Mines `count` empty blocks.
    pub fn mine(&self, count: u64) {
        self.lock().block += count;
    }

    pub fn submissions(&self) -> Vec<(Address, OracleResponse)> {
        self.lock().submissions.clone()
    }

    pub fn submissions_from(&self, agent: Address) -> Vec<OracleResponse> {
        self.lock()
            .submissions
            .iter()
            .filter(|(from, _)| *from == agent)
            .map(|(_, response)| response.clone())
            .collect()
    }

    pub fn is_registered(&self, agent: Address) -> bool {
        self.lock().registered.contains(&agent)
    }

    pub fn is_authorized(&self) -> bool {
        self.lock().authorized
    }

    pub fn index_query_calls(&self, agent: Address) -> usize {
        self.lock()
            .index_query_calls
            .get(&agent)
            .copied()
            .unwrap_or_default()
    }

    fn next_tx_hash(state: &mut MockState) -> TxHash {
        state.tx_counter += 1;
        TxHash::from_low_u64_be(state.tx_counter)
    }

    fn take_poll_failure(state: &mut MockState) -> LedgerResult<()> {
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(LedgerError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Three distinct indexes in `0..10` derived from the address.
fn derived_indexes(agent: Address) -> Vec<u8> {
    let seed = agent.as_bytes()[19] % 10;
    vec![seed, (seed + 3) % 10, (seed + 6) % 10]
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn accounts(&self) -> LedgerResult<Vec<Address>> {
        Ok(self.lock().accounts.clone())
    }

    async fn is_operational(&self, _from: Address) -> LedgerResult<bool> {
        Ok(!self.lock().paused)
    }

    async fn authorize_caller(&self, owner: Address) -> LedgerResult<Option<TxHash>> {
        let delay = self.lock().authorization_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.accounts.first() != Some(&owner) {
            return Err(LedgerError::Rejected("caller is not contract owner".to_string()));
        }
        state.authorized = true;
        Ok(Some(Self::next_tx_hash(&mut state)))
    }

    async fn register_oracle(
        &self,
        agent: Address,
        stake: U256,
        _gas_limit: u64,
    ) -> LedgerResult<Option<TxHash>> {
        let delay = self.lock().registration_delays.get(&agent).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.failing_registrations.contains(&agent) {
            return Err(LedgerError::Rejected("registration reverted".to_string()));
        }
        if stake < U256::exp10(18) {
            return Err(LedgerError::Rejected("registration fee is required".to_string()));
        }
        if !state.assigned_indexes.contains_key(&agent) {
            state.assigned_indexes.insert(agent, derived_indexes(agent));
        }
        state.registered.insert(agent);
        Ok(Some(Self::next_tx_hash(&mut state)))
    }

    async fn get_my_indexes(&self, agent: Address) -> LedgerResult<Vec<u8>> {
        let delay = {
            let mut state = self.lock();
            *state.index_query_calls.entry(agent).or_default() += 1;
            state.index_query_delays.get(&agent).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(remaining) = state.failing_index_queries.get_mut(&agent) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LedgerError::Transport("index query timed out".to_string()));
            }
        }
        if !state.registered.contains(&agent) {
            return Err(LedgerError::Rejected("not registered as an oracle".to_string()));
        }
        Ok(state
            .assigned_indexes
            .get(&agent)
            .cloned()
            .unwrap_or_default())
    }

    async fn submit_oracle_response(
        &self,
        agent: Address,
        response: &OracleResponse,
        _gas_limit: u64,
    ) -> LedgerResult<Option<TxHash>> {
        let delay = self.lock().submission_delays.get(&agent).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.failing_submissions.contains(&agent) {
            return Err(LedgerError::Rejected("response rejected".to_string()));
        }
        let holds_index = state
            .assigned_indexes
            .get(&agent)
            .map(|indexes| indexes.contains(&response.index))
            .unwrap_or(false);
        if !state.registered.contains(&agent) || !holds_index {
            return Err(LedgerError::Rejected(
                "index does not match oracle request".to_string(),
            ));
        }
        state.submissions.push((agent, response.clone()));
        Ok(Some(Self::next_tx_hash(&mut state)))
    }

    async fn latest_block(&self) -> LedgerResult<u64> {
        let delay = self.lock().poll_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        Self::take_poll_failure(&mut state)?;
        Ok(state.block)
    }

    async fn oracle_requests(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> LedgerResult<Vec<OracleRequest>> {
        let mut state = self.lock();
        Self::take_poll_failure(&mut state)?;
        Ok(state
            .requests
            .iter()
            .filter(|request| {
                request
                    .block_number
                    .map(|block| (from_block..=to_block).contains(&block))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}
