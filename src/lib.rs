//! Flight status oracle relay
//!
//! Registers a pool of simulated oracle accounts with the FlightSurety App
//! contract and answers every `OracleRequest` event from the agents that hold
//! the requested index.

pub mod app_state;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod routes;
pub mod services;
