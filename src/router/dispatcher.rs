//! Runs a request through route matching, middleware and the matched handler,
//! and turns whatever comes back into a JSON envelope.
//!
//! The dispatcher sits behind a single axum fallback handler, so axum only
//! accepts connections and reads bodies; everything else happens here.

use std::{
    any::Any,
    backtrace::Backtrace,
    cell::RefCell,
    collections::HashMap,
    error::Error as _,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Once},
    time::Instant,
};

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::extract::PrivateCookieJar;
use serde_json::{Map, Value, json};
use ulid::Ulid;

use crate::{
    AppState, Error,
    api_response::{ApiResponse, build_debug_block, debug_requested},
    gateway::QueryLog,
    request_log::RequestMeta,
    router::{Reply, RequestContext, Route, RouteSummary, RouteTable},
};

/// The largest request body the dispatcher will read.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// A function run before every matched handler, in registration order.
///
/// Returning `Err` stops the request and sends the given response instead.
pub type Middleware = Box<
    dyn Fn(&AppState, &mut RequestContext, &Route) -> Result<(), ApiResponse> + Send + Sync,
>;

/// Owns the routes, the middleware and the app state.
pub struct Dispatcher {
    routes: RouteTable,
    middleware: Vec<Middleware>,
    state: AppState,
    summaries: Arc<[RouteSummary]>,
}

impl Dispatcher {
    /// Create a dispatcher for `routes`.
    pub fn new(state: AppState, routes: RouteTable) -> Self {
        let summaries = Arc::from(routes.summaries());

        Self {
            routes,
            middleware: Vec::new(),
            state,
            summaries,
        }
    }

    /// Add a middleware function that runs after every previously added one.
    pub fn with_middleware<M>(mut self, middleware: M) -> Self
    where
        M: Fn(&AppState, &mut RequestContext, &Route) -> Result<(), ApiResponse>
            + Send
            + Sync
            + 'static,
    {
        self.middleware.push(Box::new(middleware));
        self
    }

    /// Handle one request from start to finish.
    ///
    /// Never panics: handler errors become error envelopes and handler panics
    /// become a 500 envelope.
    pub fn handle(&self, parts: Parts, body: Bytes) -> Response {
        let started = Instant::now();
        let config = &self.state.config;

        let path = normalize_path(parts.uri.path(), &config.base_path);
        let query = parse_query(parts.uri.query());
        let debug = debug_requested(config.debug, &parts.headers, &query);

        let mut context = RequestContext {
            request_id: Ulid::new().to_string(),
            method: parts.method,
            path,
            jar: PrivateCookieJar::from_headers(&parts.headers, self.state.cookie_key.clone()),
            headers: parts.headers,
            query,
            body,
            params: HashMap::new(),
            user_id: None,
            queries: QueryLog::new(),
            routes: self.summaries.clone(),
        };

        let meta = RequestMeta::from_context(&context);
        if let Some(logger) = &self.state.request_logger {
            if let Err(error) = logger.log_request(&meta, &context.body) {
                tracing::warn!("could not write request to the audit log: {error}");
            }
        }

        let Some(matched) = self.routes.match_route(&context.method, &context.path) else {
            let response = self.not_found(&context, debug, started);
            self.log_response(&meta, response.status(), started, &context);
            return with_request_id(response, &context.request_id);
        };

        let route = matched.route;
        context.params = matched.params;

        clear_panic_details();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(route, &mut context)));

        let mut error_details = None;
        let mut response = match outcome {
            Ok(Ok(Reply::File(response))) => {
                self.log_response(&meta, response.status(), started, &context);
                let response = (context.jar, response).into_response();
                return with_request_id(response, &context.request_id);
            }
            Ok(Ok(Reply::Data(data))) => ApiResponse::success(data),
            Ok(Ok(Reply::Envelope(response))) => response,
            Ok(Err(error)) => {
                let response = ApiResponse::from(&error);

                if response.status().is_server_error() {
                    tracing::error!(
                        "{} {} failed in {}: {error}",
                        context.method,
                        context.path,
                        route.handler_name()
                    );
                    let details = describe_error(&error);
                    self.log_error(&meta, response.status(), &details);
                    error_details = Some(details);
                }

                response
            }
            Err(payload) => {
                let details = describe_panic(payload.as_ref());
                tracing::error!(
                    "{} {} panicked in {}: {}",
                    context.method,
                    context.path,
                    route.handler_name(),
                    details["message"]
                );
                self.log_error(&meta, StatusCode::INTERNAL_SERVER_ERROR, &details);
                error_details = Some(details);

                ApiResponse::error("An unexpected error occurred")
                    .with_status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };

        if debug {
            let mut block = Map::new();
            block.insert("request_id".to_owned(), json!(context.request_id));
            block.insert(
                "route".to_owned(),
                json!({
                    "method": route.method().as_str(),
                    "pattern": route.template(),
                    "path": context.path,
                    "params": context.params,
                }),
            );
            block.insert(
                "controller".to_owned(),
                json!({ "handler": route.handler_name() }),
            );
            block.insert("performance_ms".to_owned(), json!(elapsed_ms(started)));
            if let Some(details) = error_details {
                block.insert("error".to_owned(), details);
            }

            response.set_debug(build_debug_block(block, &context.queries.snapshot()));
        }

        self.log_response(&meta, response.status(), started, &context);
        let response = (context.jar, response.send()).into_response();

        with_request_id(response, &context.request_id)
    }

    fn run(&self, route: &Route, context: &mut RequestContext) -> Result<Reply, Error> {
        for middleware in &self.middleware {
            if let Err(response) = middleware(&self.state, context, route) {
                return Ok(Reply::Envelope(response));
            }
        }

        route.call(&self.state, context)
    }

    fn not_found(&self, context: &RequestContext, debug: bool, started: Instant) -> Response {
        let mut response = ApiResponse::error(format!(
            "No route matches {} {}",
            context.method, context.path
        ))
        .with_status(StatusCode::NOT_FOUND);

        if debug {
            let mut block = Map::new();
            block.insert("request_id".to_owned(), json!(context.request_id));
            block.insert(
                "available_routes".to_owned(),
                json!(self.routes.describe()),
            );
            block.insert(
                "request".to_owned(),
                json!({
                    "method": context.method.as_str(),
                    "path": context.path,
                    "query": context.query,
                }),
            );
            block.insert("performance_ms".to_owned(), json!(elapsed_ms(started)));

            response.set_debug(build_debug_block(block, &context.queries.snapshot()));
        }

        response.send()
    }

    fn log_response(
        &self,
        meta: &RequestMeta,
        status: StatusCode,
        started: Instant,
        context: &RequestContext,
    ) {
        let Some(logger) = &self.state.request_logger else {
            return;
        };

        if let Err(error) = logger.log_response(meta, status, elapsed_ms(started), context.user_id)
        {
            tracing::warn!("could not write response to the audit log: {error}");
        }
    }

    fn log_error(&self, meta: &RequestMeta, status: StatusCode, details: &Value) {
        let Some(logger) = &self.state.request_logger else {
            return;
        };

        if let Err(error) = logger.log_error(meta, status, details) {
            tracing::warn!("could not write error to the audit log: {error}");
        }
    }
}

/// The axum fallback handler that feeds every request to the [Dispatcher].
///
/// Handlers are synchronous and may block on the database or on password
/// hashing, so each request runs on the blocking thread pool.
pub async fn dispatch(State(dispatcher): State<Arc<Dispatcher>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(error) => {
            tracing::warn!("could not read the request body: {error}");
            return ApiResponse::error("The request body could not be read or is too large")
                .with_status(StatusCode::PAYLOAD_TOO_LARGE)
                .send();
        }
    };

    match tokio::task::spawn_blocking(move || dispatcher.handle(parts, body)).await {
        Ok(response) => response,
        Err(error) => {
            tracing::error!("the request task failed: {error}");
            ApiResponse::error("An unexpected error occurred")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
                .send()
        }
    }
}

/// Strip `base_path` from the front of `path` and drop any trailing slash.
///
/// "/spendlog/api/health/" with base path "/spendlog" becomes "/api/health".
pub fn normalize_path(path: &str, base_path: &str) -> String {
    let base_path = base_path.trim_end_matches('/');

    let path = match path.strip_prefix(base_path) {
        Some(rest) if !base_path.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
        _ => path,
    };

    let path = path.trim_end_matches('/');

    if path.is_empty() {
        "/".to_owned()
    } else if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let Some(query) = query else {
        return HashMap::new();
    };

    serde_urlencoded::from_str(query).unwrap_or_else(|error| {
        tracing::debug!("ignoring malformed query string \"{query}\": {error}");
        HashMap::new()
    })
}

fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

fn describe_error(error: &Error) -> Value {
    let mut trace = Vec::new();
    let mut source = error.source();

    while let Some(cause) = source {
        trace.push(cause.to_string());
        source = cause.source();
    }

    json!({
        "message": error.to_string(),
        "kind": error.kind(),
        "trace": trace,
    })
}

/// Where a handler panicked, captured by the panic hook on the panicking thread.
struct PanicDetails {
    file: String,
    line: u32,
    backtrace: String,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicDetails>> = const { RefCell::new(None) };
}

static INSTALL_PANIC_HOOK: Once = Once::new();

/// Install a panic hook that remembers the location and backtrace of the last
/// panic on each thread, then defers to the previous hook.
fn install_panic_hook() {
    INSTALL_PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();

        panic::set_hook(Box::new(move |info| {
            let details = PanicDetails {
                file: info
                    .location()
                    .map(|location| location.file().to_owned())
                    .unwrap_or_default(),
                line: info.location().map(|location| location.line()).unwrap_or(0),
                backtrace: Backtrace::force_capture().to_string(),
            };
            LAST_PANIC.with(|last| *last.borrow_mut() = Some(details));

            previous(info);
        }));
    });
}

fn clear_panic_details() {
    install_panic_hook();
    LAST_PANIC.with(|last| last.borrow_mut().take());
}

fn describe_panic(payload: &(dyn Any + Send)) -> Value {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "the handler panicked".to_owned());

    let details = LAST_PANIC.with(|last| last.borrow_mut().take());

    match details {
        Some(details) => json!({
            "message": message,
            "kind": "Panic",
            "file": details.file,
            "line": details.line,
            "trace": details
                .backtrace
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>(),
        }),
        None => json!({
            "message": message,
            "kind": "Panic",
            "trace": [],
        }),
    }
}
