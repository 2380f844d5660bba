//! The request audit log: an append-only file of JSON entries, one per
//! request, response and server error, separated by delimiter lines.
//!
//! The file is rotated once it grows past a size limit. Recent entries can be
//! read back and summarised through the `/api/logs` endpoints.

use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use axum::http::{StatusCode, header::USER_AGENT};
use flate2::{Compression, write::GzEncoder};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::{OffsetDateTime, macros::format_description};

use crate::{
    AppState, Error, UserID,
    api_response::ApiResponse,
    logging::{redact_form_text, redact_json},
    router::{Reply, RequestContext},
};

/// The size at which the log file is rotated, 10 MiB.
pub const DEFAULT_MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// The line written after every entry.
pub const ENTRY_DELIMITER: &str = "----- END LOG ENTRY -----";

/// How many entries `GET /api/logs` returns when no limit is given.
pub const DEFAULT_LOG_LIMIT: usize = 50;
/// The most entries `GET /api/logs` returns.
pub const MAX_LOG_LIMIT: usize = 500;

/// How many of the most recent entries the statistics are computed over.
const STATISTICS_SAMPLE: usize = 1000;

/// Request bodies longer than this many characters are cut short in the log.
const LOG_BODY_LIMIT: usize = 4096;

/// What part of the request lifecycle an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    /// A request as it arrived.
    Request,
    /// The response sent back, with its status and timing.
    Response,
    /// A server error or panic while handling the request.
    Error,
}

/// One entry in the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// A unique ID for the entry.
    pub id: String,
    /// When the entry was written.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Serialized as `type`.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// The request the entry belongs to. A request, its response and any
    /// error share the same ID.
    pub request_id: String,
    /// The HTTP method, e.g. "POST".
    pub method: String,
    /// The normalized request path.
    pub path: String,
    /// Details that depend on the entry's kind.
    pub payload: Value,
}

/// The parts of a request that every entry about it repeats.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMeta {
    /// The ULID the dispatcher gave the request.
    pub request_id: String,
    /// The HTTP method.
    pub method: String,
    /// The normalized request path.
    pub path: String,
    /// The query string parameters.
    pub query: HashMap<String, String>,
    /// The `User-Agent` header, if it was sent and is valid text.
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// Copy the request's identifying parts out of `context`.
    pub fn from_context(context: &RequestContext) -> Self {
        Self {
            request_id: context.request_id.clone(),
            method: context.method.to_string(),
            path: context.path.clone(),
            query: context.query.clone(),
            user_agent: context
                .headers
                .get(USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
        }
    }
}

/// Counts over the most recent audit log entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogStatistics {
    /// The number of entries the statistics were computed over.
    pub entries: usize,
    /// How many of the entries are requests.
    pub requests: u64,
    /// How many of the entries are server errors.
    pub errors: u64,
    /// Requests per HTTP method.
    pub by_method: BTreeMap<String, u64>,
    /// Responses per status code.
    pub by_status: BTreeMap<String, u64>,
    /// Requests per path.
    pub by_endpoint: BTreeMap<String, u64>,
    /// Responses per user ID, with "anonymous" for requests without a session.
    pub by_user: BTreeMap<String, u64>,
    /// The mean response time in milliseconds, or zero without responses.
    pub average_response_ms: f64,
}

/// Writes and reads the audit log file.
///
/// Clones share the same lock so entries from concurrent requests are never interleaved.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    path: PathBuf,
    max_bytes: u64,
    lock: Arc<Mutex<()>>,
}

fn io_error(error: std::io::Error) -> Error {
    Error::LogIoError(error.to_string())
}

impl RequestLogger {
    /// Create a logger that writes to `path` and rotates the file once it
    /// is larger than `max_bytes`.
    ///
    /// The file and its directory are created on the first write.
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// The log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an incoming request. Password fields in JSON or form bodies are redacted.
    ///
    /// # Errors
    /// Returns [Error::LogIoError] if the entry could not be written.
    pub fn log_request(&self, meta: &RequestMeta, body: &[u8]) -> Result<(), Error> {
        let payload = json!({
            "query": meta.query,
            "user_agent": meta.user_agent,
            "body_bytes": body.len(),
            "body": loggable_body(body),
        });

        self.append(&self.entry(EntryKind::Request, meta, payload))
    }

    /// Record the response sent for a request.
    ///
    /// # Errors
    /// Returns [Error::LogIoError] if the entry could not be written.
    pub fn log_response(
        &self,
        meta: &RequestMeta,
        status: StatusCode,
        elapsed_ms: f64,
        user_id: Option<UserID>,
    ) -> Result<(), Error> {
        let payload = json!({
            "status": status.as_u16(),
            "elapsed_ms": elapsed_ms,
            "user_id": user_id.map(|id| id.as_i64()),
        });

        self.append(&self.entry(EntryKind::Response, meta, payload))
    }

    /// Record a server error and its details.
    ///
    /// # Errors
    /// Returns [Error::LogIoError] if the entry could not be written.
    pub fn log_error(
        &self,
        meta: &RequestMeta,
        status: StatusCode,
        details: &Value,
    ) -> Result<(), Error> {
        let payload = json!({
            "status": status.as_u16(),
            "error": details,
        });

        self.append(&self.entry(EntryKind::Error, meta, payload))
    }

    fn entry(&self, kind: EntryKind, meta: &RequestMeta, payload: Value) -> LogEntry {
        LogEntry {
            id: ulid::Ulid::new().to_string(),
            timestamp: OffsetDateTime::now_utc(),
            kind,
            request_id: meta.request_id.clone(),
            method: meta.method.clone(),
            path: meta.path.clone(),
            payload,
        }
    }

    fn append(&self, entry: &LogEntry) -> Result<(), Error> {
        let mut block = serde_json::to_string_pretty(entry)?;
        block.push('\n');
        block.push_str(ENTRY_DELIMITER);
        block.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.rotate_if_needed()?;

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_error)?;

        file.write_all(block.as_bytes()).map_err(io_error)
    }

    /// Compress the log file into a gzip file with a timestamp in its name once
    /// it reaches the size limit, then remove it so the next entry starts a new file.
    fn rotate_if_needed(&self) -> Result<(), Error> {
        let size = match fs::metadata(&self.path) {
            Ok(metadata) => metadata.len(),
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(io_error(error)),
        };

        if size < self.max_bytes {
            return Ok(());
        }

        let rotated = self.rotated_path()?;
        compress(&self.path, &rotated)?;
        fs::remove_file(&self.path).map_err(io_error)?;
        tracing::info!(
            "rotated the request log to {} after it reached {size} bytes",
            rotated.display()
        );

        Ok(())
    }

    fn rotated_path(&self) -> Result<PathBuf, Error> {
        let stamp = OffsetDateTime::now_utc()
            .format(format_description!(
                "[year][month][day]-[hour][minute][second]"
            ))
            .map_err(|error| Error::LogIoError(error.to_string()))?;

        let stem = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "requests".to_owned());
        let extension = self
            .path
            .extension()
            .map(|extension| format!(".{}", extension.to_string_lossy()))
            .unwrap_or_default();

        let mut candidate = self
            .path
            .with_file_name(format!("{stem}.{stamp}{extension}.gz"));
        let mut suffix = 1;
        while candidate.exists() {
            candidate = self
                .path
                .with_file_name(format!("{stem}.{stamp}-{suffix}{extension}.gz"));
            suffix += 1;
        }

        Ok(candidate)
    }

    /// Read the last `limit` entries, newest first.
    ///
    /// A missing log file has no entries. Blocks that are not valid entries are skipped.
    ///
    /// # Errors
    /// Returns [Error::LogIoError] if the file exists but cannot be read.
    pub fn get_recent_logs(&self, limit: usize) -> Result<Vec<LogEntry>, Error> {
        let text = {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

            match fs::read_to_string(&self.path) {
                Ok(text) => text,
                Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(error) => return Err(io_error(error)),
            }
        };

        let mut entries = Vec::with_capacity(limit);
        let mut block = Vec::new();

        // Walk backwards so only the requested entries are parsed.
        for line in text.lines().rev() {
            if entries.len() == limit {
                break;
            }

            if line != ENTRY_DELIMITER {
                block.push(line);
                continue;
            }

            if !block.is_empty() {
                entries.extend(parse_block(&block));
                block.clear();
            }
        }

        if !block.is_empty() && entries.len() < limit {
            entries.extend(parse_block(&block));
        }

        Ok(entries)
    }

    /// Count the most recent entries by method, status, endpoint and user.
    ///
    /// # Errors
    /// Returns [Error::LogIoError] if the log file cannot be read.
    pub fn get_statistics(&self) -> Result<LogStatistics, Error> {
        let entries = self.get_recent_logs(STATISTICS_SAMPLE)?;
        let mut statistics = LogStatistics {
            entries: entries.len(),
            ..Default::default()
        };
        let mut total_elapsed_ms = 0.0;
        let mut responses = 0_u64;

        for entry in &entries {
            match entry.kind {
                EntryKind::Request => {
                    statistics.requests += 1;
                    *statistics.by_method.entry(entry.method.clone()).or_default() += 1;
                    *statistics
                        .by_endpoint
                        .entry(format!("{} {}", entry.method, entry.path))
                        .or_default() += 1;
                }
                EntryKind::Response => {
                    responses += 1;
                    let status = entry.payload["status"]
                        .as_u64()
                        .map_or_else(|| "unknown".to_owned(), |status| status.to_string());
                    *statistics.by_status.entry(status).or_default() += 1;

                    let user = entry.payload["user_id"]
                        .as_i64()
                        .map_or_else(|| "anonymous".to_owned(), |id| id.to_string());
                    *statistics.by_user.entry(user).or_default() += 1;

                    total_elapsed_ms += entry.payload["elapsed_ms"].as_f64().unwrap_or(0.0);
                }
                EntryKind::Error => statistics.errors += 1,
            }
        }

        if responses > 0 {
            statistics.average_response_ms =
                (total_elapsed_ms / responses as f64 * 100.0).round() / 100.0;
        }

        Ok(statistics)
    }

    /// Delete the log file.
    ///
    /// Returns `false` if there was no log file to delete.
    ///
    /// # Errors
    /// Returns [Error::LogIoError] if the file exists but cannot be deleted.
    pub fn clear_logs(&self) -> Result<bool, Error> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(io_error(error)),
        }
    }
}

/// Parse a block of lines collected in reverse order.
fn parse_block(reversed_lines: &[&str]) -> Option<LogEntry> {
    let text = reversed_lines
        .iter()
        .rev()
        .copied()
        .collect::<Vec<_>>()
        .join("\n");

    serde_json::from_str(&text)
        .inspect_err(|error| tracing::warn!("skipping a malformed request log entry: {error}"))
        .ok()
}

/// Write a gzip copy of the file at `source` to `destination`.
fn compress(source: &Path, destination: &Path) -> Result<(), Error> {
    let mut input = File::open(source).map_err(io_error)?;
    let output = File::create(destination).map_err(io_error)?;

    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder).map_err(io_error)?;
    encoder.finish().map_err(io_error)?;

    Ok(())
}

/// The request body as it is written to the log: JSON with passwords
/// redacted, otherwise text cut to [LOG_BODY_LIMIT] characters.
fn loggable_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }

    if let Ok(mut value) = serde_json::from_slice::<Value>(body) {
        redact_json(&mut value);
        return value;
    }

    let text = String::from_utf8_lossy(body);
    let text = redact_form_text(&text);

    Value::String(text.chars().take(LOG_BODY_LIMIT).collect())
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

fn disabled() -> ApiResponse {
    ApiResponse::success(Value::Null).with_message("The request log is disabled")
}

/// A route handler returning the most recent audit log entries, newest first.
///
/// The `limit` query parameter defaults to [DEFAULT_LOG_LIMIT] and is capped at [MAX_LOG_LIMIT].
pub fn get_logs(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    context.user_id()?;
    let Some(logger) = &state.request_logger else {
        return Ok(disabled().into());
    };

    let limit = match context.query_param("limit") {
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or_else(|| Error::field("limit", "Limit must be a positive whole number"))?
            .min(MAX_LOG_LIMIT),
        None => DEFAULT_LOG_LIMIT,
    };

    Ok(serde_json::to_value(logger.get_recent_logs(limit)?)?.into())
}

/// A route handler returning counts over recent audit log entries.
pub fn get_log_statistics(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    context.user_id()?;
    let Some(logger) = &state.request_logger else {
        return Ok(disabled().into());
    };

    Ok(serde_json::to_value(logger.get_statistics()?)?.into())
}

/// A route handler that deletes the audit log file.
pub fn delete_logs(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let user_id = context.user_id()?;
    let Some(logger) = &state.request_logger else {
        return Ok(disabled().into());
    };

    logger.clear_logs()?;
    tracing::info!("user {user_id} cleared the request log");

    Ok(ApiResponse::no_content().into())
}
