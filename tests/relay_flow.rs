//! Pool registration, request watching and dispatch wired together against
//! the in-memory ledger.

use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, U256};
use futures_util::future::join_all;

use flight_oracle_relay::ledger::MockLedger;
use flight_oracle_relay::models::oracle::{FlightStatus, StatusMode};
use flight_oracle_relay::services::registry::FailureStage;
use flight_oracle_relay::services::{
    register_pool, AgentRegistry, DispatchSettings, EarlyRequestPolicy, OracleRequestWatcher,
    PoolSettings, RequestDispatcher, StartBlock, WatcherSettings,
};

fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

fn pool_settings(size: usize) -> PoolSettings {
    PoolSettings {
        size,
        account_offset: 0,
        stake: U256::exp10(18),
        gas_limit: 10_000_000,
        registration_timeout: Duration::from_secs(1),
        index_query_timeout: Duration::from_secs(1),
        index_query_retries: 1,
        index_query_interval: Duration::from_millis(1),
    }
}

fn watcher_settings() -> WatcherSettings {
    WatcherSettings {
        poll_interval: Duration::from_millis(10),
        max_blocks_per_step: 50,
        start_block: StartBlock::Number(0),
        max_consecutive_failures: 5,
        request_timeout: Duration::from_secs(1),
        early_requests: EarlyRequestPolicy::Wait,
        state_file: None,
    }
}

async fn relay(
    ledger: &Arc<MockLedger>,
    status_mode: StatusMode,
) -> (Arc<AgentRegistry>, OracleRequestWatcher) {
    let registry = Arc::new(AgentRegistry::new());
    let dispatcher = Arc::new(RequestDispatcher::new(
        registry.clone(),
        ledger.clone(),
        DispatchSettings {
            status_mode,
            submission_timeout: Duration::from_secs(1),
            gas_limit: 10_000_000,
        },
    ));
    let watcher =
        OracleRequestWatcher::new(ledger.clone(), registry.clone(), dispatcher, watcher_settings())
            .await;
    (registry, watcher)
}

#[tokio::test]
async fn partial_pool_still_answers_with_the_registered_agents() {
    let ledger = Arc::new(MockLedger::with_accounts(5));
    for n in 1..=5 {
        ledger.assign_indexes(addr(n), vec![2, 5, 8]);
    }
    ledger.fail_index_query(addr(3), usize::MAX);
    ledger.fail_registration(addr(5));

    let (registry, watcher) = relay(&ledger, StatusMode::Random).await;
    let report = register_pool(&registry, ledger.as_ref(), &pool_settings(5))
        .await
        .unwrap();

    assert_eq!(registry.len().await, 3);
    let mut failed: Vec<(Address, FailureStage)> = report
        .failures
        .iter()
        .map(|failure| (failure.address, failure.stage))
        .collect();
    failed.sort_by_key(|(address, _)| *address);
    assert_eq!(
        failed,
        vec![
            (addr(3), FailureStage::IndexQuery),
            (addr(5), FailureStage::Registration)
        ]
    );

    ledger.emit_request(5, addr(0xa1), "ND1309", 1_700_000_000);
    let batch = watcher.poll_once().await.unwrap();
    let rounds: Vec<_> = join_all(batch.rounds)
        .await
        .into_iter()
        .map(|round| round.unwrap())
        .collect();

    let mut responders: Vec<Address> = rounds[0].succeeded().collect();
    responders.sort();
    assert_eq!(responders, vec![addr(1), addr(2), addr(4)]);
    assert!(ledger.submissions_from(addr(3)).is_empty());
}

#[tokio::test]
async fn background_relay_answers_requests_as_they_arrive() {
    let ledger = Arc::new(MockLedger::with_accounts(4));
    ledger.assign_indexes(addr(1), vec![0, 1, 2]);
    ledger.assign_indexes(addr(2), vec![1, 2, 3]);
    ledger.assign_indexes(addr(3), vec![3, 4, 5]);
    ledger.assign_indexes(addr(4), vec![6, 7, 8]);

    let (registry, watcher) = relay(&ledger, StatusMode::Fixed(FlightStatus::LateAirline)).await;
    let watcher = Arc::new(watcher);
    let task = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.run().await })
    };

    // a request mined before the pool exists is answered once it is ready
    ledger.emit_request(1, addr(0xa1), "EARLY", 1);
    register_pool(&registry, ledger.as_ref(), &pool_settings(4))
        .await
        .unwrap();
    ledger.emit_request(3, addr(0xa1), "LATER", 2);

    let waiting = ledger.clone();
    tokio::time::timeout(Duration::from_secs(2), async move {
        while waiting.submissions().len() < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    task.abort();

    let submissions = ledger.submissions();
    let early: Vec<Address> = submissions
        .iter()
        .filter(|(_, response)| response.flight == "EARLY")
        .map(|(agent, _)| *agent)
        .collect();
    let later: Vec<Address> = submissions
        .iter()
        .filter(|(_, response)| response.flight == "LATER")
        .map(|(agent, _)| *agent)
        .collect();
    assert_eq!(early.len(), 2);
    assert!(early.contains(&addr(1)) && early.contains(&addr(2)));
    assert_eq!(later.len(), 2);
    assert!(later.contains(&addr(2)) && later.contains(&addr(3)));
    assert!(submissions
        .iter()
        .all(|(_, response)| response.status == FlightStatus::LateAirline));
}
