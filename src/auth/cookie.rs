//! Defines functions for handling user sessions with private cookies.

use std::cmp::max;

use axum_extra::extract::{
    PrivateCookieJar,
    cookie::{Cookie, SameSite},
};
use time::{Duration, OffsetDateTime};

use crate::{
    Error,
    auth::{Token, UserID},
};

/// The name of the cookie holding the encrypted session [Token].
pub const COOKIE_TOKEN: &str = "session";

/// How long a session lasts without activity.
pub const DEFAULT_COOKIE_DURATION: Duration = Duration::minutes(30);

/// Add a session cookie for `user_id` that expires `duration` from now.
///
/// # Errors
/// Returns [Error::SessionError] if the token cannot be serialized.
pub fn set_auth_cookie(
    jar: PrivateCookieJar,
    user_id: UserID,
    duration: Duration,
) -> Result<PrivateCookieJar, Error> {
    let expires_at = OffsetDateTime::now_utc() + duration;

    set_token(jar, Token {
        user_id,
        expires_at,
    })
}

fn set_token(jar: PrivateCookieJar, token: Token) -> Result<PrivateCookieJar, Error> {
    let value =
        serde_json::to_string(&token).map_err(|error| Error::SessionError(error.to_string()))?;

    Ok(jar.add(
        Cookie::build((COOKIE_TOKEN, value))
            .path("/")
            .expires(token.expires_at)
            .http_only(true)
            .same_site(SameSite::Strict),
    ))
}

/// Overwrite the session cookie with an expired placeholder so the client drops it.
pub fn invalidate_auth_cookie(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.add(
        Cookie::build((COOKIE_TOKEN, "deleted"))
            .path("/")
            .expires(OffsetDateTime::UNIX_EPOCH)
            .max_age(Duration::ZERO)
            .http_only(true)
            .same_site(SameSite::Strict),
    )
}

/// Read the session token from `jar`.
///
/// # Errors
/// Returns [Error::Unauthenticated] if the cookie is missing, cannot be
/// decrypted or parsed, or has expired.
pub fn get_token_from_cookies(jar: &PrivateCookieJar) -> Result<Token, Error> {
    let cookie = jar.get(COOKIE_TOKEN).ok_or(Error::Unauthenticated)?;
    let token: Token =
        serde_json::from_str(cookie.value_trimmed()).map_err(|_| Error::Unauthenticated)?;

    if token.is_expired(OffsetDateTime::now_utc()) {
        return Err(Error::Unauthenticated);
    }

    Ok(token)
}

/// Push the session expiry out to `duration` from now, unless it already
/// expires later than that.
///
/// # Errors
/// Returns [Error::Unauthenticated] if there is no valid session. The jar is
/// not modified if an error is returned.
pub fn extend_auth_cookie_duration_if_needed(
    jar: PrivateCookieJar,
    duration: Duration,
) -> Result<PrivateCookieJar, Error> {
    let token = get_token_from_cookies(&jar)?;
    let new_expiry = OffsetDateTime::now_utc()
        .checked_add(duration)
        .ok_or_else(|| Error::SessionError("session expiry overflowed".to_owned()))?;

    set_token(jar, Token {
        user_id: token.user_id,
        expires_at: max(token.expires_at, new_expiry),
    })
}
