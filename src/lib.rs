//! Spendlog is a JSON web API for tracking personal expenses.
//!
//! Users register and log in with a session cookie, record expenses against a
//! fixed set of categories and get summaries, category breakdowns and exports
//! of their spending. Every response is a JSON envelope, and a debug block
//! with the matched route, executed statements and timing can be requested
//! per request.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum_server::Handle;
use tokio::signal;

mod api_response;
mod app_state;
mod auth;
mod category;
mod config;
mod currency;
mod db;
mod endpoints;
mod error;
mod export;
mod expense;
mod gateway;
mod logging;
mod request_log;
mod router;
mod routing;
mod settings;
mod timezone;

#[cfg(test)]
mod test_utils;

pub use app_state::AppState;
pub use auth::{PasswordHash, User, UserID, ValidatedPassword};
pub use config::AppConfig;
pub use db::{initialize as initialize_db, open as open_db};
pub use error::Error;
pub use logging::logging_middleware;
pub use request_log::DEFAULT_MAX_LOG_BYTES;
pub use routing::build_router;

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!("failed to install the terminate signal handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}
