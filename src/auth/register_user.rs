//! Defines the route handler for creating an account.

use serde_json::json;

use crate::{
    AppState, Error,
    api_response::ApiResponse,
    auth::{Auth, Registration},
    router::{Reply, RequestContext},
};

/// Create a user from the registration form and log them in.
///
/// Responds with 201 and the new user, 422 with a message per invalid field,
/// or 400 if the user name or email is already registered.
pub fn register_user(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let registration: Registration = context.json()?;

    let user = Auth::new(state, context).register(registration)?;

    Ok(ApiResponse::created(json!(user))
        .with_message("Account created")
        .into())
}
