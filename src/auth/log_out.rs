//! Defines the route handler for logging out.

use serde_json::Value;

use crate::{
    AppState, Error,
    api_response::ApiResponse,
    auth::Auth,
    router::{Reply, RequestContext},
};

/// Invalidate the session cookie.
///
/// Reachable without a session so stale clients can always clear their cookie.
pub fn post_log_out(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    Auth::new(state, context).log_out();

    Ok(ApiResponse::success(Value::Null)
        .with_message("Logged out")
        .into())
}

#[cfg(test)]
mod log_out_tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    use crate::{
        auth::COOKIE_TOKEN,
        endpoints,
        test_utils::{get_test_server, register_user},
    };

    #[tokio::test]
    async fn log_out_invalidates_cookie() {
        let server = get_test_server();
        let cookie = register_user(&server, "alice_01", "a@x.com").await;

        let response = server.post(endpoints::LOG_OUT).add_cookie(cookie).await;

        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["success"], json!(true));
        let cookie = response.cookie(COOKIE_TOKEN);
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));

        server
            .get(endpoints::EXPENSES)
            .add_cookies(response.cookies())
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn log_out_without_session_succeeds() {
        let server = get_test_server();

        server.post(endpoints::LOG_OUT).await.assert_status_ok();
    }
}
