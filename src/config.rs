//! Runtime settings shared by the dispatcher, the request logger and the handlers.

use std::path::PathBuf;

use crate::request_log::DEFAULT_MAX_LOG_BYTES;

/// Settings that change how the app behaves, independent of the database.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Attach the debug block to every response, not just the ones that ask for it.
    pub debug: bool,

    /// A path prefix the app is mounted under, e.g. "/spendlog".
    ///
    /// The prefix is stripped from request paths before routing so the same
    /// routes work whether or not the app is served from a sub-directory.
    pub base_path: String,

    /// Where the request audit log is written. `None` disables the audit log.
    pub log_path: Option<PathBuf>,

    /// The size in bytes at which the audit log is rotated.
    pub log_max_bytes: u64,

    /// The bcrypt cost used when hashing new passwords.
    pub password_cost: u32,

    /// The local timezone as a canonical timezone name, e.g. "Pacific/Auckland".
    pub local_timezone: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            base_path: String::new(),
            log_path: None,
            log_max_bytes: DEFAULT_MAX_LOG_BYTES,
            password_cost: bcrypt::DEFAULT_COST,
            local_timezone: "Etc/UTC".to_owned(),
        }
    }
}
