//! The uniform JSON envelope every API call answers with, plus the optional debug block.
//!
//! ```json
//! {
//!   "success": false,
//!   "error": "validation failed",
//!   "errors": { "amount": "Amount must be greater than zero" },
//!   "debug": { "queries": { "count": 1, "list": [...] }, "memory": {...}, ... }
//! }
//! ```

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::{
    Error,
    error::FieldErrors,
    gateway::QueryTrace,
};

/// The header clients send to ask for the debug block.
pub const DEBUG_HEADER: &str = "x-debug";

/// The query parameter clients send to ask for the debug block.
pub const DEBUG_QUERY_PARAM: &str = "debug";

/// The JSON body of an API response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Whether the request succeeded.
    pub success: bool,
    /// The payload of a successful response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// A human readable description of what went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-field validation messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
    /// An optional note for the client, e.g. "Expense created".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Diagnostics, only present when debugging was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<Value>,
}

/// A response waiting to be sent: status code, headers and envelope.
///
/// Handlers build one of these, the dispatcher decides whether to attach the
/// debug block and then calls [ApiResponse::send].
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    envelope: Option<Envelope>,
}

impl ApiResponse {
    /// A 200 OK response carrying `data`.
    pub fn success(data: Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            envelope: Some(Envelope {
                success: true,
                data: Some(data),
                error: None,
                errors: None,
                message: None,
                debug: None,
            }),
        }
    }

    /// A 201 Created response carrying `data`.
    pub fn created(data: Value) -> Self {
        Self {
            status: StatusCode::CREATED,
            ..Self::success(data)
        }
    }

    /// A 400 Bad Request response with `message`. Use [ApiResponse::with_status]
    /// for other error codes.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            headers: HeaderMap::new(),
            envelope: Some(Envelope {
                success: false,
                data: None,
                error: Some(message.into()),
                errors: None,
                message: None,
                debug: None,
            }),
        }
    }

    /// A 204 No Content response with an empty body.
    pub fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            envelope: None,
        }
    }

    /// Replace the status code.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Add a message next to the data or error.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        if let Some(envelope) = self.envelope.as_mut() {
            envelope.message = Some(message.into());
        }
        self
    }

    /// Attach per-field validation messages.
    pub fn with_field_errors(mut self, errors: FieldErrors) -> Self {
        if let Some(envelope) = self.envelope.as_mut() {
            envelope.errors = Some(errors);
        }
        self
    }

    /// Add a header to send alongside `Content-Type`.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The status code the response will be sent with.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The envelope, `None` for 204 No Content.
    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    /// Set the debug block. Has no effect on an empty 204 response.
    pub fn set_debug(&mut self, debug: Value) {
        if let Some(envelope) = self.envelope.as_mut() {
            envelope.debug = Some(debug);
        }
    }

    /// Serialize the envelope as pretty-printed JSON and build the final response.
    ///
    /// Consumes the builder, so nothing can be added after sending.
    pub fn send(self) -> Response {
        let Some(envelope) = self.envelope else {
            let mut response = self.status.into_response();
            response.headers_mut().extend(self.headers);
            return response;
        };

        let body = match serde_json::to_string_pretty(&envelope) {
            Ok(body) => body,
            Err(error) => {
                tracing::error!("could not serialize the response envelope: {error}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(CONTENT_TYPE, "application/json")],
                    r#"{"success":false,"error":"An unexpected error occurred"}"#,
                )
                    .into_response();
            }
        };

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.headers_mut().extend(self.headers);

        response
    }
}

impl From<&Error> for ApiResponse {
    fn from(error: &Error) -> Self {
        let response = ApiResponse::error(error.client_message()).with_status(error.status_code());

        match error {
            Error::Validation(errors) => response.with_field_errors(errors.clone()),
            _ => response,
        }
    }
}

/// Whether the debug block should be attached to this response.
///
/// True if any of: the global debug flag is set, the request has an
/// `X-Debug: true` header, or a `debug=true` query parameter.
pub fn debug_requested(
    global_debug: bool,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> bool {
    let header_flag = headers
        .get(DEBUG_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(is_truthy);
    let query_flag = query
        .get(DEBUG_QUERY_PARAM)
        .is_some_and(|value| is_truthy(value));

    global_debug || header_flag || query_flag
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Merge the dispatcher's `context` (route, controller, timing) with the
/// query traces and memory usage for this request.
pub fn build_debug_block(mut context: Map<String, Value>, queries: &[QueryTrace]) -> Value {
    context.insert(
        "queries".to_owned(),
        json!({
            "count": queries.len(),
            "list": queries,
        }),
    );
    context.insert("memory".to_owned(), memory_usage());

    Value::Object(context)
}

/// The highest resident memory seen by [memory_usage] so far.
static PEAK_MEMORY_BYTES: AtomicU64 = AtomicU64::new(0);

fn memory_usage() -> Value {
    let current = memory_stats::memory_stats()
        .map(|usage| usage.physical_mem as u64)
        .unwrap_or(0);
    let peak = PEAK_MEMORY_BYTES
        .fetch_max(current, Ordering::Relaxed)
        .max(current);

    json!({
        "current": format_bytes(current),
        "peak": format_bytes(peak),
    })
}

/// Format a byte count with binary units, e.g. 1536 -> "1.50 KB".
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;

    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{value:.2} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::{
        body::to_bytes,
        http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE},
    };
    use serde_json::{Map, Value, json};

    use crate::{Error, error::FieldErrors};

    use super::{ApiResponse, build_debug_block, debug_requested, format_bytes};

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn success_envelope() {
        let response = ApiResponse::success(json!({"id": 1}))
            .with_message("Found it")
            .send();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            body_json(response).await,
            json!({"success": true, "data": {"id": 1}, "message": "Found it"})
        );
    }

    #[tokio::test]
    async fn created_envelope_has_201() {
        let response = ApiResponse::created(json!({"id": 2})).send();

        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn error_envelope_defaults_to_bad_request() {
        let response = ApiResponse::error("Nope").send();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"success": false, "error": "Nope"})
        );
    }

    #[tokio::test]
    async fn validation_error_lists_fields() {
        let error = Error::field("amount", "Amount must be greater than zero");

        let response = ApiResponse::from(&error).send();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(
            body["errors"]["amount"],
            json!("Amount must be greater than zero")
        );
    }

    #[tokio::test]
    async fn no_content_has_empty_body() {
        let response = ApiResponse::no_content().send();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn explicit_headers_are_sent() {
        let response = ApiResponse::success(json!(null))
            .with_header(
                "x-request-id".parse().unwrap(),
                HeaderValue::from_static("abc"),
            )
            .send();

        assert_eq!(response.headers()["x-request-id"], "abc");
    }

    #[test]
    fn debug_is_off_without_any_flag() {
        assert!(!debug_requested(false, &HeaderMap::new(), &HashMap::new()));
    }

    #[test]
    fn debug_from_global_flag() {
        assert!(debug_requested(true, &HeaderMap::new(), &HashMap::new()));
    }

    #[test]
    fn debug_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Debug", HeaderValue::from_static("true"));

        assert!(debug_requested(false, &headers, &HashMap::new()));

        headers.insert("X-Debug", HeaderValue::from_static("false"));
        assert!(!debug_requested(false, &headers, &HashMap::new()));
    }

    #[test]
    fn debug_from_query_param() {
        let query = HashMap::from([("debug".to_owned(), "true".to_owned())]);

        assert!(debug_requested(false, &HeaderMap::new(), &query));
    }

    #[test]
    fn debug_block_contains_queries_and_memory() {
        let mut context = Map::new();
        context.insert("route".to_owned(), json!({"pattern": "/api/health"}));

        let block = build_debug_block(context, &[]);

        assert_eq!(block["route"]["pattern"], json!("/api/health"));
        assert_eq!(block["queries"]["count"], json!(0));
        assert_eq!(block["queries"]["list"], json!([]));
        assert!(block["memory"]["current"].is_string());
        assert!(block["memory"]["peak"].is_string());
    }

    #[test]
    fn formats_bytes_with_binary_units() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn field_errors_survive_conversion() {
        let errors = FieldErrors::from([
            ("email".to_owned(), "Email is invalid".to_owned()),
            ("name".to_owned(), "Name is too short".to_owned()),
        ]);

        let response = ApiResponse::from(&Error::Validation(errors.clone()));

        assert_eq!(response.envelope().unwrap().errors, Some(errors));
    }
}
