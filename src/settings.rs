//! Route handlers for reading and changing the session user's settings.

use rusqlite::types::Value;
use serde::Deserialize;
use serde_json::json;

use crate::{
    AppState, Error,
    api_response::ApiResponse,
    auth::{Email, User, find_taken_field, get_user_by_id, validate_currency, validate_username},
    currency,
    error::Validator,
    expense::session_user,
    gateway::Gateway,
    router::{Reply, RequestContext},
};

/// The body of a currency change.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyForm {
    #[serde(default)]
    pub currency: String,
}

/// The body of a profile change. Fields left out are not changed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileForm {
    #[serde(default, alias = "name")]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A route handler returning the user's profile and the supported currencies.
pub fn get_settings(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let connection = state.db();
    let user = session_user(context, &Gateway::new(&connection, &context.queries))?;

    Ok(json!({
        "user": user,
        "currency": currency::get(&user.currency),
        "currencies": currency::all(),
    })
    .into())
}

/// A route handler for changing the currency amounts are shown in.
pub fn update_currency(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let user_id = context.user_id()?;
    let form: CurrencyForm = context.json()?;

    if form.currency.trim().is_empty() {
        return Err(Error::field("currency", "Currency is required"));
    }

    let code = validate_currency(Some(&form.currency))?;

    let connection = state.db();
    let users = Gateway::<User>::new(&connection, &context.queries);

    if !users.update(user_id.as_i64(), &[("currency", Value::Text(code.clone()))])? {
        return Err(Error::Unauthenticated);
    }

    tracing::info!("user {user_id} changed their currency to {code}");
    let user = get_user_by_id(user_id, &users)?.ok_or(Error::Unauthenticated)?;

    Ok(ApiResponse::success(json!(user))
        .with_message("Currency updated")
        .into())
}

/// A route handler for changing the user name and/or email.
///
/// The new values follow the same rules as registration and must not belong
/// to another user.
pub fn update_profile(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let user_id = context.user_id()?;
    let form: ProfileForm = context.json()?;

    if form.username.is_none() && form.email.is_none() {
        return Err(Error::BadRequest(
            "Provide a username or email to change".to_owned(),
        ));
    }

    let mut validator = Validator::new();
    let name = match &form.username {
        Some(name) => validator.check(validate_username(name))?,
        None => None,
    };
    let email = match &form.email {
        Some(email) => validator.check(Email::new(email))?,
        None => None,
    };
    validator.finish()?;

    let connection = state.db();
    let users = Gateway::<User>::new(&connection, &context.queries);

    match find_taken_field(
        name.as_deref(),
        email.as_ref().map(Email::as_str),
        Some(user_id),
        &users,
    )? {
        Some("username") => {
            return Err(Error::Conflict("That username is already taken".to_owned()));
        }
        Some(_) => {
            return Err(Error::Conflict(
                "That email address is already registered".to_owned(),
            ));
        }
        None => {}
    }

    let mut changes = Vec::new();
    if let Some(name) = name {
        changes.push(("name", Value::Text(name)));
    }
    if let Some(email) = email {
        changes.push(("email", Value::Text(email.to_string())));
    }

    if !users.update(user_id.as_i64(), &changes)? {
        return Err(Error::Unauthenticated);
    }

    let user = get_user_by_id(user_id, &users)?.ok_or(Error::Unauthenticated)?;

    Ok(ApiResponse::success(json!(user))
        .with_message("Profile updated")
        .into())
}
