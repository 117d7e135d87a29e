//! Backend for a legal services marketplace connecting clients with lawyers.
//!
//!
//!
//! # General Infrastructure
//! - Single axum server exposing the JSON API under `/api` and a websocket at `/ws`
//! - SQLite holds every record; integrity rules live in the schema
//! - Redis holds one-time login codes when `REDIS_URL` is set
//! - Meilisearch serves the lawyer directory when `MEILI_URL` is set
//! - Dashboards join realtime rooms for chat relay and instant consults
//!
//!
//!
//! # Workflows
//!
//! ## Leads
//! - Client posts a case, any lawyer may accept it
//! - Acceptance is a conditional update: the first lawyer wins, later ones get `409`
//! - Accepting links the pair with an active connection
//!
//! ## Connections
//! - A request starts `pending`; the side that did not send it accepts or rejects
//! - A rejected pair may ask again, which reopens the request
//!
//! ## Appointments
//! - One live booking per lawyer, date and slot; the loser of a race gets `409`
//! - `pending -> confirmed | rejected | cancelled`, `confirmed -> completed | cancelled`
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
//!
//! Run locally with codes echoed back to the dashboard.
//! ```sh
//! EXPOSE_OTP=true RUST_LOG=info cargo run
//! ```

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod admin;
pub mod agreements;
pub mod appointments;
pub mod auth;
pub mod cases;
pub mod config;
pub mod connections;
pub mod contact;
pub mod database;
pub mod error;
pub mod events;
pub mod hub;
pub mod lawyers;
pub mod messages;
pub mod notifications;
pub mod otp;
pub mod payments;
pub mod posts;
pub mod routes;
pub mod search;
pub mod state;
pub mod topics;
pub mod users;
pub mod utils;

use config::Config;
use routes::router;
use state::AppState;

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new(Config::load()).await?;

    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    let app = router(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
