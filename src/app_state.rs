//! Implements a struct that holds the state of the REST server.

use std::sync::{Arc, Mutex, MutexGuard};

use axum_extra::extract::cookie::Key;
use rusqlite::Connection;
use sha2::{Digest, Sha512};
use time::Duration;

use crate::{
    AppConfig, Error, auth::DEFAULT_COOKIE_DURATION, db::initialize, request_log::RequestLogger,
};

/// The state of the REST server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The key to be used for signing and encrypting private cookies.
    pub cookie_key: Key,

    /// The duration for which cookies used for authentication are valid.
    pub cookie_duration: Duration,

    /// Runtime settings.
    pub config: AppConfig,

    /// The request audit log, if enabled.
    pub request_logger: Option<RequestLogger>,

    /// The database connection
    pub db_connection: Arc<Mutex<Connection>>,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for the domain models.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(
        db_connection: Connection,
        cookie_secret: &str,
        config: AppConfig,
    ) -> Result<Self, Error> {
        initialize(&db_connection)?;

        let request_logger = config
            .log_path
            .as_ref()
            .map(|path| RequestLogger::new(path, config.log_max_bytes));

        Ok(Self {
            cookie_key: create_cookie_key(cookie_secret),
            cookie_duration: DEFAULT_COOKIE_DURATION,
            config,
            request_logger,
            db_connection: Arc::new(Mutex::new(db_connection)),
        })
    }

    /// Lock the database connection for the duration of a handler call.
    ///
    /// A handler that panicked while holding the lock poisons it. SQLite rolls
    /// back any unfinished statement on its own, so the poison is cleared and
    /// the connection reused rather than failing every later request.
    pub fn db(&self) -> MutexGuard<'_, Connection> {
        self.db_connection.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("recovering the database connection after a handler panic");
            self.db_connection.clear_poison();
            poisoned.into_inner()
        })
    }
}

/// Create a signing key for cookies from a `secret`s string.
pub fn create_cookie_key(secret: &str) -> Key {
    let hash = Sha512::digest(secret);

    Key::from(&hash)
}
