//! FlightSurety oracle relay server
//!
//! Registers the simulated oracle pool, watches the App contract for
//! `OracleRequest` events and serves a small status API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tokio::time::{sleep, Duration};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flight_oracle_relay::app_state::AppState;
use flight_oracle_relay::config::RelayConfig;
use flight_oracle_relay::ledger::{EthersLedger, LedgerClient};
use flight_oracle_relay::routes;
use flight_oracle_relay::services::{
    prepare_contracts, register_pool, AgentRegistry, OracleRequestWatcher, RequestDispatcher,
};

const WATCHER_SUPERVISOR_MAX_BACKOFF_SECONDS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::from_env().context("failed to load relay configuration")?;
    let ledger: Arc<dyn LedgerClient> = Arc::new(
        EthersLedger::connect(&config.network, config.ledger_timeout)
            .context("failed to build ledger client")?,
    );

    prepare_contracts(ledger.as_ref(), config.authorize_caller, config.ledger_timeout).await;

    let registry = Arc::new(AgentRegistry::new());

    // Register the oracle pool in the background; dispatch does not block on it.
    {
        let registry = registry.clone();
        let ledger = ledger.clone();
        let settings = config.pool.clone();
        tokio::spawn(async move {
            if let Err(err) = register_pool(&registry, ledger.as_ref(), &settings).await {
                error!(error = %err, "could not list node accounts; oracle pool is empty");
            }
        });
    }

    let dispatcher = Arc::new(RequestDispatcher::new(
        registry.clone(),
        ledger.clone(),
        config.dispatch.clone(),
    ));
    let watcher = Arc::new(
        OracleRequestWatcher::new(
            ledger.clone(),
            registry.clone(),
            dispatcher,
            config.watcher.clone(),
        )
        .await,
    );

    // Start and supervise the OracleRequest watcher.
    tokio::spawn(async move {
        let mut restart_count: u32 = 0;
        loop {
            let watcher = watcher.clone();
            let handle = tokio::spawn(async move { watcher.run().await });

            match handle.await {
                Ok(Ok(())) => {
                    info!("oracle request watcher exited cleanly; stopping supervisor");
                    break;
                }
                Ok(Err(err)) => {
                    error!(error = %err, "oracle request watcher stopped; resubscribing");
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!("oracle request watcher panicked; restarting");
                    } else {
                        error!(
                            error = %join_error,
                            "oracle request watcher task failed; restarting"
                        );
                    }
                }
            }

            restart_count = restart_count.saturating_add(1);
            let backoff_seconds = (2u64.saturating_pow(restart_count.min(5)))
                .min(WATCHER_SUPERVISOR_MAX_BACKOFF_SECONDS);
            warn!(restart_count, backoff_seconds, "oracle request watcher restart backoff");
            sleep(Duration::from_secs(backoff_seconds)).await;
        }
    });

    let app = routes::app(AppState::new(registry))
        .layer(build_cors_layer(&config.cors_allowed_origins));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allowed_origins = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(false)
}
