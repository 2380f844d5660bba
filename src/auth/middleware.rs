//! Session middleware that resolves the logged in user and slides the session expiry.

use crate::{
    AppState,
    api_response::ApiResponse,
    auth::cookie::{extend_auth_cookie_duration_if_needed, get_token_from_cookies},
    router::{RequestContext, Route},
};

/// Put the session user, if any, into `context` and extend their session.
///
/// Requests to routes that are not [public](Route::public) are rejected with
/// 401 when there is no valid session.
pub fn session_middleware(
    state: &AppState,
    context: &mut RequestContext,
    route: &Route,
) -> Result<(), ApiResponse> {
    let token = match get_token_from_cookies(&context.jar) {
        Ok(token) => token,
        Err(_) if route.is_public() => return Ok(()),
        Err(error) => {
            tracing::debug!(
                "rejecting {} {} without a session",
                context.method,
                context.path
            );
            return Err(ApiResponse::from(&error));
        }
    };

    context.user_id = Some(token.user_id);

    context.jar = match extend_auth_cookie_duration_if_needed(
        context.jar.clone(),
        state.cookie_duration,
    ) {
        Ok(jar) => jar,
        Err(error) => {
            tracing::error!("Error extending cookie duration: {error}. Rolling back cookie jar.");
            context.jar.clone()
        }
    };

    Ok(())
}
