//! Oracle request dispatch
//!
//! One `OracleRequest` is one round: a status is chosen once, then every
//! registered agent holding the requested index submits a response. Each
//! submission is bounded by a timeout and isolated from the others.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::ledger::LedgerClient;
use crate::models::oracle::{
    Agent, DispatchRound, FlightStatus, OracleRequest, OracleResponse, StatusMode, Submission,
    SubmissionOutcome,
};
use crate::services::registry::AgentRegistry;

#[derive(Clone, Debug)]
pub struct DispatchSettings {
    pub status_mode: StatusMode,
    pub submission_timeout: Duration,
    pub gas_limit: u64,
}

struct PreparedRound {
    id: Uuid,
    request: OracleRequest,
    status: FlightStatus,
    agents: Vec<Agent>,
}

type QueuedRequest = (OracleRequest, oneshot::Sender<DispatchRound>);

/// Handle to the task that dispatches queued requests in order.
#[derive(Debug, Clone)]
pub struct RoundQueue {
    sender: mpsc::UnboundedSender<QueuedRequest>,
}

impl RoundQueue {
    /// Spawns the dispatch task. It stops once every handle is dropped and
    /// the rounds it started have finished.
    pub fn spawn(dispatcher: Arc<RequestDispatcher>) -> Self {
        let (sender, queue) = mpsc::unbounded_channel();
        tokio::spawn(dispatcher.run_rounds(queue));
        Self { sender }
    }

    /// Queues a request behind the ones already queued. The receiver yields
    /// the finished round.
    pub fn enqueue(&self, request: OracleRequest) -> Result<oneshot::Receiver<DispatchRound>> {
        let (reply, round) = oneshot::channel();
        self.sender
            .send((request, reply))
            .map_err(|_| RelayError::DispatchStopped)?;
        Ok(round)
    }
}

pub struct RequestDispatcher {
    registry: Arc<AgentRegistry>,
    ledger: Arc<dyn LedgerClient>,
    settings: DispatchSettings,
}

impl RequestDispatcher {
    pub fn new(
        registry: Arc<AgentRegistry>,
        ledger: Arc<dyn LedgerClient>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            ledger,
            settings,
        }
    }

    fn choose_status(&self) -> FlightStatus {
        match self.settings.status_mode {
            StatusMode::Fixed(status) => status,
            StatusMode::Random => FlightStatus::random(&mut rand::thread_rng()),
        }
    }

    /// Handles one request and reports how each matching agent fared.
    /// Failures are logged and recorded, never returned.
    pub async fn on_request_event(&self, request: &OracleRequest) -> DispatchRound {
        let round = self.prepare(request.clone()).await;
        self.fan_out(round).await
    }

    /// Fixes the round's status and the agents that will answer it.
    async fn prepare(&self, request: OracleRequest) -> PreparedRound {
        let id = Uuid::new_v4();
        let status = self.choose_status();
        let agents = self.registry.snapshot().await;

        let matching: Vec<Agent> = agents
            .iter()
            .filter(|agent| agent.matches(request.index))
            .cloned()
            .collect();

        info!(
            round = %id,
            index = request.index,
            airline = ?request.airline,
            flight = %request.flight,
            timestamp = %request.timestamp,
            ?status,
            pool = agents.len(),
            matching = matching.len(),
            "oracle request received"
        );

        PreparedRound {
            id,
            request,
            status,
            agents: matching,
        }
    }

    /// Submits the round's response from every matching agent concurrently.
    async fn fan_out(&self, round: PreparedRound) -> DispatchRound {
        let PreparedRound {
            id,
            request,
            status,
            agents,
        } = round;

        let response = OracleResponse::answering(&request, status);
        let submissions = join_all(
            agents
                .iter()
                .map(|agent| self.submit(id, agent, &response)),
        )
        .await;

        let round = DispatchRound {
            id,
            request,
            status,
            submissions,
        };
        debug!(
            round = %id,
            succeeded = round.succeeded().count(),
            failed = round.failed().count(),
            "dispatch round finished"
        );
        round
    }

    /// Starts rounds one at a time in the order requests were queued. A round's
    /// submissions are issued before the next round starts, but rounds then
    /// complete independently of each other.
    async fn run_rounds(self: Arc<Self>, mut queue: mpsc::UnboundedReceiver<QueuedRequest>) {
        let mut in_flight = FuturesUnordered::new();

        loop {
            tokio::select! {
                biased;
                queued = queue.recv() => {
                    let Some((request, reply)) = queued else { break };
                    let round = self.prepare(request).await;
                    let dispatcher = self.clone();
                    in_flight.push(async move {
                        let round = dispatcher.fan_out(round).await;
                        // nobody may be waiting for the outcome
                        let _ = reply.send(round);
                    });
                }
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
            }
        }

        while in_flight.next().await.is_some() {}
        debug!("dispatch queue closed");
    }

    async fn submit(&self, round: Uuid, agent: &Agent, response: &OracleResponse) -> Submission {
        let address = agent.address();
        let submission = self
            .ledger
            .submit_oracle_response(address, response, self.settings.gas_limit);

        let outcome = match timeout(self.settings.submission_timeout, submission).await {
            Ok(Ok(tx_hash)) => {
                info!(%round, agent = ?address, ?tx_hash, "oracle response submitted");
                SubmissionOutcome::Confirmed { tx_hash }
            }
            Ok(Err(err)) => {
                warn!(%round, agent = ?address, error = %err, "oracle response rejected");
                SubmissionOutcome::Rejected(err.to_string())
            }
            Err(_) => {
                warn!(
                    %round,
                    agent = ?address,
                    timeout = ?self.settings.submission_timeout,
                    "oracle response timed out"
                );
                SubmissionOutcome::TimedOut
            }
        };

        Submission {
            agent: address,
            outcome,
        }
    }
}
