//! Polling subscription to the App contract's `OracleRequest` event

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, Result};
use crate::ledger::{bounded, LedgerClient};
use crate::models::oracle::DispatchRound;
use crate::services::dispatcher::{RequestDispatcher, RoundQueue};
use crate::services::registry::AgentRegistry;

/// Where the watcher starts when no cursor has been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBlock {
    Number(u64),
    /// Only requests mined after the head at the first poll.
    Latest,
}

/// What happens to requests seen before the oracle pool is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyRequestPolicy {
    /// Hold off polling until the pool is ready. Requests stay on-chain and
    /// are picked up from the cursor afterwards.
    Wait,
    /// Poll right away and answer with whatever agents are registered.
    Drop,
}

#[derive(Clone, Debug)]
pub struct WatcherSettings {
    pub poll_interval: Duration,
    pub max_blocks_per_step: u64,
    pub start_block: StartBlock,
    pub max_consecutive_failures: u32,
    /// Upper bound for one block number or event query.
    pub request_timeout: Duration,
    pub early_requests: EarlyRequestPolicy,
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WatcherState {
    last_processed_block: u64,
}

/// The block range covered by one poll and the rounds it queued.
#[derive(Debug)]
pub struct PollBatch {
    pub from_block: u64,
    pub to_block: Option<u64>,
    /// One receiver per request, in delivery order; each yields the round once
    /// its submissions have settled.
    pub rounds: Vec<oneshot::Receiver<DispatchRound>>,
    /// The range reached the chain head.
    pub caught_up: bool,
}

pub struct OracleRequestWatcher {
    ledger: Arc<dyn LedgerClient>,
    registry: Arc<AgentRegistry>,
    rounds: RoundQueue,
    settings: WatcherSettings,
    next_block: Mutex<Option<u64>>,
}

impl OracleRequestWatcher {
    /// Creates a watcher, resuming from the persisted cursor if there is one.
    pub async fn new(
        ledger: Arc<dyn LedgerClient>,
        registry: Arc<AgentRegistry>,
        dispatcher: Arc<RequestDispatcher>,
        settings: WatcherSettings,
    ) -> Self {
        let mut next_block = match settings.start_block {
            StartBlock::Number(block) => Some(block),
            StartBlock::Latest => None,
        };

        if let Some(path) = &settings.state_file {
            match read_watcher_state(path).await {
                Ok(state) => {
                    info!(
                        last_processed_block = state.last_processed_block,
                        "resuming oracle request watcher"
                    );
                    next_block = Some(state.last_processed_block.saturating_add(1));
                }
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "no watcher state to resume")
                }
            }
        }

        Self {
            ledger,
            registry,
            rounds: RoundQueue::spawn(dispatcher),
            settings,
            next_block: Mutex::new(next_block),
        }
    }

    /// Polls until the stream fails `max_consecutive_failures` times in a row.
    pub async fn run(&self) -> Result<()> {
        if self.settings.early_requests == EarlyRequestPolicy::Wait && !self.registry.is_ready() {
            info!("waiting for oracle pool registration before watching requests");
            self.registry.wait_until_ready().await;
        }

        info!("oracle request watcher started");

        let mut failures: u32 = 0;
        loop {
            match self.poll_once().await {
                Ok(batch) => {
                    failures = 0;
                    if !batch.rounds.is_empty() {
                        debug!(
                            from_block = batch.from_block,
                            to_block = ?batch.to_block,
                            rounds = batch.rounds.len(),
                            "oracle requests dispatched"
                        );
                    }
                    // the dispatch task logs each outcome
                    drop(batch.rounds);
                    if batch.caught_up {
                        sleep(self.settings.poll_interval).await;
                    }
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    error!(error = %err, failures, "oracle request poll failed");
                    if failures >= self.settings.max_consecutive_failures {
                        return Err(RelayError::EventStream {
                            attempts: failures,
                            last_error: err.to_string(),
                        });
                    }
                    sleep(self.settings.poll_interval).await;
                }
            }
        }
    }

    /// Fetches the next block range and queues one dispatch round per request,
    /// in the order the ledger delivered them.
    pub async fn poll_once(&self) -> Result<PollBatch> {
        let limit = self.settings.request_timeout;
        let latest_block = bounded(limit, self.ledger.latest_block()).await?;

        let mut next_block = self.next_block.lock().await;
        let from_block = next_block.unwrap_or_else(|| latest_block.saturating_add(1));
        if from_block > latest_block {
            *next_block = Some(from_block);
            return Ok(PollBatch {
                from_block,
                to_block: None,
                rounds: Vec::new(),
                caught_up: true,
            });
        }

        let step = self.settings.max_blocks_per_step.max(1);
        let to_block = latest_block.min(from_block.saturating_add(step - 1));
        let requests = bounded(limit, self.ledger.oracle_requests(from_block, to_block)).await?;

        let rounds = requests
            .into_iter()
            .map(|request| self.rounds.enqueue(request))
            .collect::<Result<Vec<_>>>()?;

        *next_block = Some(to_block.saturating_add(1));
        if let Some(path) = &self.settings.state_file {
            let state = WatcherState {
                last_processed_block: to_block,
            };
            if let Err(err) = persist_watcher_state(path, &state).await {
                warn!(path = %path.display(), error = %err, "failed to persist watcher cursor");
            }
        }

        Ok(PollBatch {
            from_block,
            to_block: Some(to_block),
            rounds,
            caught_up: to_block == latest_block,
        })
    }
}

async fn read_watcher_state(path: &Path) -> Result<WatcherState> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

async fn persist_watcher_state(path: &Path, state: &WatcherState) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let payload = serde_json::to_string_pretty(state)?;
    tokio::fs::write(path, payload).await?;
    Ok(())
}
