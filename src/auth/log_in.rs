//! This file defines the routes for logging in and reading the current session's user.
//! The auth service handles the lower level authentication and cookie logic.

use serde::Deserialize;
use serde_json::json;

use crate::{
    AppState, Error,
    api_response::ApiResponse,
    auth::Auth,
    router::{Reply, RequestContext},
};

/// The log-in form. `username` may also be the user's email address.
#[derive(Debug, Clone, Deserialize)]
pub struct LogInData {
    #[serde(default, alias = "email", alias = "identifier")]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Handler for log-in requests.
///
/// On success the session cookie is set and the user is returned.
pub fn post_log_in(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let data: LogInData = context.json()?;

    let user = Auth::new(state, context).log_in(&data.username, &data.password)?;

    Ok(ApiResponse::success(json!(user))
        .with_message("Logged in")
        .into())
}

/// Handler returning the logged in user.
pub fn get_current_user(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let user = Auth::new(state, context)
        .user()?
        .ok_or(Error::Unauthenticated)?;

    Ok(json!(user).into())
}
