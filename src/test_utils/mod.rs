//! Helpers for spinning up the API in tests.

#![allow(missing_docs)]

use std::path::PathBuf;

use axum_extra::extract::cookie::Cookie;
use axum_test::TestServer;
use rusqlite::Connection;
use serde_json::json;

use crate::{AppConfig, AppState, auth::COOKIE_TOKEN, build_router, endpoints};

/// The password used by [register_user].
pub(crate) const TEST_PASSWORD: &str = "secret1";

/// A test server over a fresh in-memory database with the audit log turned off.
pub(crate) fn get_test_server() -> TestServer {
    get_test_server_with_config(AppConfig::default())
}

/// Like [get_test_server], but writing the audit log to `log_path`.
pub(crate) fn get_test_server_with_log(log_path: PathBuf) -> TestServer {
    get_test_server_with_config(AppConfig {
        log_path: Some(log_path),
        ..AppConfig::default()
    })
}

/// A test server over a fresh in-memory database.
///
/// The password cost is always lowered so registration does not slow tests down.
pub(crate) fn get_test_server_with_config(config: AppConfig) -> TestServer {
    let connection =
        Connection::open_in_memory().expect("Could not open database in memory.");
    let state = AppState::new(
        connection,
        "42",
        AppConfig {
            password_cost: 4,
            ..config
        },
    )
    .expect("Could not create app state.");

    TestServer::try_new(build_router(state)).expect("Could not create test server.")
}

/// Register a user with [TEST_PASSWORD] and return their session cookie.
pub(crate) async fn register_user(server: &TestServer, name: &str, email: &str) -> Cookie<'static> {
    let response = server
        .post(endpoints::REGISTER)
        .json(&json!({
            "username": name,
            "email": email,
            "password": TEST_PASSWORD,
        }))
        .await;

    response.assert_status(axum::http::StatusCode::CREATED);

    response.cookie(COOKIE_TOKEN)
}
