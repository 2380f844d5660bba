//! Application router configuration: the API route table with its public
//! routes marked, and the axum router that hands every request to the dispatcher.

use std::sync::Arc;

use axum::{Router, middleware};
use serde_json::json;

use crate::{
    AppState, Error,
    api_response::ApiResponse,
    auth::{get_current_user, post_log_in, post_log_out, register_user, session_middleware},
    category::{Category, list_categories},
    endpoints,
    expense::{
        create_expense_endpoint, delete_expense_endpoint, get_dashboard, get_expense,
        get_expense_category_stats, get_expense_summary, list_expenses, update_expense_endpoint,
    },
    export::export_expenses,
    gateway::Gateway,
    logging::logging_middleware,
    request_log::{delete_logs, get_log_statistics, get_logs},
    router::{Dispatcher, Reply, RequestContext, RouteTable, dispatch},
    settings::{get_settings, update_currency, update_profile},
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    let dispatcher = Dispatcher::new(state, api_routes()).with_middleware(session_middleware);

    dispatcher_router(dispatcher)
}

/// Wrap `dispatcher` in an axum router that sends every request to it.
pub fn dispatcher_router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(Arc::new(dispatcher))
        .layer(middleware::from_fn(logging_middleware))
}

/// The API routes in match order.
///
/// Routes under the same prefix with a fixed segment, e.g. the stats routes,
/// are registered before the ones with a placeholder in that position.
pub fn api_routes() -> RouteTable {
    let mut routes = RouteTable::new();

    routes.get(endpoints::HEALTH, get_health).public();
    routes.get(endpoints::ROUTES, get_routes).public();

    routes.post(endpoints::LOG_IN, post_log_in).public();
    routes.post(endpoints::REGISTER, register_user).public();
    routes.post(endpoints::LOG_OUT, post_log_out).public();
    routes.get(endpoints::CURRENT_USER, get_current_user);

    routes.get(endpoints::EXPENSE_SUMMARY, get_expense_summary);
    routes.get(endpoints::EXPENSE_CATEGORY_STATS, get_expense_category_stats);
    routes.get(endpoints::EXPENSES, list_expenses);
    routes.post(endpoints::EXPENSES, create_expense_endpoint);
    routes.get(endpoints::EXPENSE, get_expense);
    routes.put(endpoints::EXPENSE, update_expense_endpoint);
    routes.delete(endpoints::EXPENSE, delete_expense_endpoint);
    routes.get(endpoints::DASHBOARD, get_dashboard);
    routes.get(endpoints::CATEGORIES, list_categories);

    routes.get(endpoints::SETTINGS, get_settings);
    routes.patch(endpoints::SETTINGS_CURRENCY, update_currency);
    routes.patch(endpoints::SETTINGS_PROFILE, update_profile);

    routes.get(endpoints::EXPORT, export_expenses);

    routes.get(endpoints::LOG_STATS, get_log_statistics);
    routes.get(endpoints::LOGS, get_logs);
    routes.delete(endpoints::LOGS, delete_logs);

    routes
}

/// Report whether the server and its database are up.
///
/// Always responds 200 so the status of each part can be read from the body.
fn get_health(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let database = {
        let connection = state.db();
        let categories = Gateway::<Category>::new(&connection, &context.queries);

        match categories.query_one("SELECT 1", &[], |row| row.get::<_, i64>(0)) {
            Ok(_) => "ok",
            Err(error) => {
                tracing::error!("health check could not reach the database: {error}");
                "error"
            }
        }
    };

    Ok(json!({
        "status": "ok",
        "database": database,
        "version": env!("CARGO_PKG_VERSION"),
    })
    .into())
}

/// List every registered route.
fn get_routes(_: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    Ok(ApiResponse::success(json!(context.routes.as_ref()))
        .with_message(format!("{} routes", context.routes.len()))
        .into())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use rusqlite::{Connection, types::Value as SqlValue};
    use serde_json::{Value, json};

    use crate::{
        AppConfig, AppState, Error,
        api_response::DEBUG_HEADER,
        category::Category,
        endpoints,
        gateway::Gateway,
        request_log::{EntryKind, RequestLogger},
        router::{Dispatcher, Reply, RequestContext, RouteTable},
        test_utils::{get_test_server, get_test_server_with_config},
    };

    use super::{api_routes, dispatcher_router};

    fn get_state(config: AppConfig) -> AppState {
        AppState::new(Connection::open_in_memory().unwrap(), "foobar", config).unwrap()
    }

    fn server_for(routes: RouteTable) -> TestServer {
        server_with_config(routes, AppConfig::default())
    }

    fn server_with_config(routes: RouteTable, config: AppConfig) -> TestServer {
        let dispatcher = Dispatcher::new(get_state(config), routes);
        TestServer::try_new(dispatcher_router(dispatcher)).unwrap()
    }

    fn failing_routes() -> RouteTable {
        let mut routes = RouteTable::new();
        routes.get("/api/broken", |_: &AppState, _: &mut RequestContext| -> Result<Reply, Error> {
            Err(Error::HashingError("bad salt".to_owned()))
        });
        routes.get("/api/boom", |_: &AppState, _: &mut RequestContext| -> Result<Reply, Error> {
            panic!("boom")
        });
        routes.get("/api/missing", |_: &AppState, _: &mut RequestContext| -> Result<Reply, Error> {
            Err(Error::NotFound)
        });
        routes
    }

    #[tokio::test]
    async fn first_registered_route_wins() {
        static FIRST: AtomicUsize = AtomicUsize::new(0);
        static SECOND: AtomicUsize = AtomicUsize::new(0);

        let mut routes = RouteTable::new();
        routes.get("/api/items/{id}", |_: &AppState, _: &mut RequestContext| {
            FIRST.fetch_add(1, Ordering::SeqCst);
            Ok(json!("first").into())
        });
        routes.get("/api/items/special", |_: &AppState, _: &mut RequestContext| {
            SECOND.fetch_add(1, Ordering::SeqCst);
            Ok(json!("second").into())
        });
        let server = server_for(routes);

        let response = server.get("/api/items/special").await;

        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["data"], json!("first"));
        assert_eq!(FIRST.load(Ordering::SeqCst), 1);
        assert_eq!(SECOND.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn debug_block_only_when_asked_for() {
        let server = get_test_server();

        let plain = server.get(endpoints::HEALTH).await.json::<Value>();
        assert!(plain.get("debug").is_none());

        let by_header = server
            .get(endpoints::HEALTH)
            .add_header(DEBUG_HEADER, "true")
            .await
            .json::<Value>();
        assert!(by_header["debug"].is_object());

        let by_query = server
            .get(endpoints::HEALTH)
            .add_query_param("debug", "1")
            .await
            .json::<Value>();
        assert!(by_query["debug"].is_object());

        let turned_off = server
            .get(endpoints::HEALTH)
            .add_query_param("debug", "false")
            .await
            .json::<Value>();
        assert!(turned_off.get("debug").is_none());

        let global = get_test_server_with_config(AppConfig {
            debug: true,
            ..AppConfig::default()
        });
        let response = global.get(endpoints::HEALTH).await.json::<Value>();
        assert!(response["debug"].is_object());
    }

    #[tokio::test]
    async fn debug_block_describes_route_and_queries() {
        let server = get_test_server();

        let body = server
            .get(endpoints::HEALTH)
            .add_header(DEBUG_HEADER, "true")
            .await
            .json::<Value>();

        let debug = &body["debug"];
        assert_eq!(debug["route"]["method"], json!("GET"));
        assert_eq!(debug["route"]["pattern"], json!(endpoints::HEALTH));
        assert!(
            debug["controller"]["handler"]
                .as_str()
                .unwrap()
                .ends_with("get_health")
        );
        assert_eq!(debug["queries"]["count"], json!(1));
        assert!(debug["memory"]["current"].is_string());
        assert!(debug["performance_ms"].is_number());
    }

    #[tokio::test]
    async fn query_trace_is_reset_for_every_request() {
        let mut routes = RouteTable::new();
        routes.get(
            "/api/three",
            |state: &AppState, context: &mut RequestContext| -> Result<Reply, Error> {
                let connection = state.db();
                let categories = Gateway::<Category>::new(&connection, &context.queries);
                categories.find(1)?;
                categories.where_eq("slug", SqlValue::Text("food".to_owned()))?;
                categories.all()?;
                Ok(json!(null).into())
            },
        );
        let server = server_for(routes);

        for _ in 0..2 {
            let body = server
                .get("/api/three")
                .add_header(DEBUG_HEADER, "true")
                .await
                .json::<Value>();

            let queries = &body["debug"]["queries"];
            assert_eq!(queries["count"], json!(3));
            let list = queries["list"].as_array().unwrap();
            assert!(list[0]["sql"].as_str().unwrap().contains("WHERE id = ?1"));
            assert!(list[1]["sql"].as_str().unwrap().contains("WHERE slug = ?1"));
            assert!(list[2]["sql"].as_str().unwrap().contains("ORDER BY id"));
        }
    }

    #[tokio::test]
    async fn unknown_route_lists_available_routes() {
        let server = get_test_server();

        let response = server
            .get("/api/nonexistent")
            .add_query_param("debug", "true")
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
        let body = response.json::<Value>();
        assert_eq!(body["success"], json!(false));
        let available = body["debug"]["available_routes"].as_array().unwrap();
        assert!(available.contains(&json!("GET /api/health")));
        assert_eq!(body["debug"]["request"]["path"], json!("/api/nonexistent"));
    }

    #[tokio::test]
    async fn unknown_route_without_debug_has_no_route_list() {
        let server = get_test_server();

        let response = server.get("/api/nonexistent").await;

        response.assert_status(StatusCode::NOT_FOUND);
        assert!(response.json::<Value>().get("debug").is_none());
    }

    #[tokio::test]
    async fn handler_panic_becomes_internal_error() {
        let server = server_for(failing_routes());

        let response = server
            .get("/api/boom")
            .add_header(DEBUG_HEADER, "true")
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.json::<Value>();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"], json!("An unexpected error occurred"));
        assert_eq!(body["debug"]["error"]["message"], json!("boom"));
        assert_eq!(body["debug"]["error"]["kind"], json!("Panic"));
        assert!(body["debug"]["error"]["file"].as_str().unwrap().ends_with("routing.rs"));
    }

    #[tokio::test]
    async fn server_error_hides_details_without_debug() {
        let server = server_for(failing_routes());

        let response = server.get("/api/broken").await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.text();
        assert!(!body.contains("bad salt"));
    }

    #[tokio::test]
    async fn server_errors_are_written_to_the_audit_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("requests.log");
        let server = server_with_config(
            failing_routes(),
            AppConfig {
                log_path: Some(log_path.clone()),
                ..AppConfig::default()
            },
        );

        let broken = server.get("/api/broken").await;
        broken.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let boom = server.get("/api/boom").await;
        boom.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let missing = server.get("/api/missing").await;
        missing.assert_status(StatusCode::NOT_FOUND);

        let entries = RequestLogger::new(log_path, u64::MAX)
            .get_recent_logs(100)
            .unwrap();
        let errors: Vec<_> = entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::Error)
            .collect();
        assert_eq!(errors.len(), 2);

        let request_id = broken.header("x-request-id").to_str().unwrap().to_owned();
        let error = errors
            .iter()
            .find(|entry| entry.request_id == request_id)
            .unwrap();
        assert_eq!(error.path, "/api/broken");
        assert_eq!(error.payload["status"], json!(500));
        assert_eq!(error.payload["error"]["kind"], json!("InternalError"));
        assert!(
            error.payload["error"]["message"]
                .as_str()
                .unwrap()
                .contains("bad salt")
        );

        let request_id = boom.header("x-request-id").to_str().unwrap().to_owned();
        let error = errors
            .iter()
            .find(|entry| entry.request_id == request_id)
            .unwrap();
        assert_eq!(error.payload["error"]["kind"], json!("Panic"));
        assert_eq!(error.payload["error"]["message"], json!("boom"));

        // Every request still gets its request and response entries.
        let request_id = missing.header("x-request-id").to_str().unwrap().to_owned();
        let kinds: Vec<_> = entries
            .iter()
            .filter(|entry| entry.request_id == request_id)
            .map(|entry| entry.kind)
            .collect();
        assert_eq!(kinds, [EntryKind::Response, EntryKind::Request]);
    }

    #[tokio::test]
    async fn health_reports_database() {
        let server = get_test_server();

        let response = server.get(endpoints::HEALTH).await;

        response.assert_status_ok();
        let data = &response.json::<Value>()["data"];
        assert_eq!(data["status"], json!("ok"));
        assert_eq!(data["database"], json!("ok"));
        assert_eq!(data["version"], json!(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn routes_lists_every_route() {
        let server = get_test_server();

        let response = server.get(endpoints::ROUTES).await;

        response.assert_status_ok();
        let data = response.json::<Value>()["data"].as_array().unwrap().clone();
        assert_eq!(data.len(), api_routes().routes().len());

        let health = &data[0];
        assert_eq!(health["method"], json!("GET"));
        assert_eq!(health["path"], json!(endpoints::HEALTH));
        assert_eq!(health["public"], json!(true));

        let expenses = data
            .iter()
            .find(|route| route["path"] == json!(endpoints::EXPENSES))
            .unwrap();
        assert_eq!(expenses["public"], json!(false));
    }

    #[tokio::test]
    async fn base_path_and_trailing_slash_are_ignored() {
        let server = get_test_server_with_config(AppConfig {
            base_path: "/spendlog".to_owned(),
            ..AppConfig::default()
        });

        server.get("/spendlog/api/health/").await.assert_status_ok();
        server.get("/api/health").await.assert_status_ok();
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let server = get_test_server();

        let response = server.get(endpoints::HEALTH).await;

        assert_eq!(response.header("x-request-id").len(), 26);
    }
}
