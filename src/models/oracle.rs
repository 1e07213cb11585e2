use ethers::types::{Address, TxHash, U256};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Flight status codes accepted by the App contract's `submitOracleResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FlightStatus {
    Unknown = 0,
    OnTime = 10,
    LateAirline = 20,
    LateWeather = 30,
    LateTechnical = 40,
    LateOther = 50,
}

impl FlightStatus {
    pub const ALL: [FlightStatus; 6] = [
        FlightStatus::Unknown,
        FlightStatus::OnTime,
        FlightStatus::LateAirline,
        FlightStatus::LateWeather,
        FlightStatus::LateTechnical,
        FlightStatus::LateOther,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Draws one status uniformly from [`FlightStatus::ALL`].
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        // ALL is a non-empty const array
        *Self::ALL.choose(rng).unwrap_or(&FlightStatus::Unknown)
    }
}

impl TryFrom<u8> for FlightStatus {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|status| status.code() == code)
            .ok_or(code)
    }
}

/// How a dispatch round chooses the status it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMode {
    /// A fresh uniform draw per round.
    Random,
    /// Every round reports the same status.
    Fixed(FlightStatus),
}

/// An `OracleRequest` event emitted by the App contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub index: u8,
    pub airline: Address,
    pub flight: String,
    pub timestamp: U256,
    pub block_number: Option<u64>,
}

/// Arguments of one `submitOracleResponse` transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResponse {
    pub index: u8,
    pub airline: Address,
    pub flight: String,
    pub timestamp: U256,
    pub status: FlightStatus,
}

impl OracleResponse {
    pub fn answering(request: &OracleRequest, status: FlightStatus) -> Self {
        Self {
            index: request.index,
            airline: request.airline,
            flight: request.flight.clone(),
            timestamp: request.timestamp,
            status,
        }
    }
}

/// A registered oracle account and the indexes the ledger assigned to it.
///
/// Fields are private so an agent cannot change once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    address: Address,
    indexes: Vec<u8>,
}

impl Agent {
    pub fn new(address: Address, indexes: Vec<u8>) -> Self {
        Self { address, indexes }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn indexes(&self) -> &[u8] {
        &self.indexes
    }

    pub fn matches(&self, index: u8) -> bool {
        self.indexes.contains(&index)
    }
}

/// Serializable view of an [`Agent`].
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentView {
    pub address: Address,
    pub indexes: Vec<u8>,
}

impl From<&Agent> for AgentView {
    fn from(agent: &Agent) -> Self {
        Self {
            address: agent.address(),
            indexes: agent.indexes().to_vec(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OraclesView {
    pub ready: bool,
    pub agents: Vec<AgentView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Confirmed { tx_hash: Option<TxHash> },
    Rejected(String),
    TimedOut,
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionOutcome::Confirmed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub agent: Address,
    pub outcome: SubmissionOutcome,
}

/// The result of handling one `OracleRequest`.
#[derive(Debug, Clone)]
pub struct DispatchRound {
    pub id: Uuid,
    pub request: OracleRequest,
    pub status: FlightStatus,
    pub submissions: Vec<Submission>,
}

impl DispatchRound {
    pub fn succeeded(&self) -> impl Iterator<Item = Address> + '_ {
        self.submissions
            .iter()
            .filter(|s| s.outcome.is_success())
            .map(|s| s.agent)
    }

    pub fn failed(&self) -> impl Iterator<Item = Address> + '_ {
        self.submissions
            .iter()
            .filter(|s| !s.outcome.is_success())
            .map(|s| s.agent)
    }
}
