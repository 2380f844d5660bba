//! The auth service: who is logged in, logging in and out, and registration.

use serde::Deserialize;

use crate::{
    AppState, Error,
    auth::{
        Email, PasswordHash, User, UserID, ValidatedPassword,
        cookie::{invalidate_auth_cookie, set_auth_cookie},
        user::{
            NewUser, create_user, find_taken_field, find_user_by_login, get_user_by_id,
            touch_last_login, validate_username,
        },
    },
    currency,
    error::Validator,
    gateway::Gateway,
    router::RequestContext,
};

/// The registration form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
    /// Also accepted as `name`.
    #[serde(default, alias = "name")]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    /// Must equal `password` when given.
    pub confirm_password: Option<String>,
    /// An ISO 4217 code, defaulting to [currency::DEFAULT_CURRENCY].
    pub currency: Option<String>,
}

/// Session and account operations for the request in `context`.
pub struct Auth<'a> {
    state: &'a AppState,
    context: &'a mut RequestContext,
}

impl<'a> Auth<'a> {
    /// Wrap the request in `context`. Changes to the session are written to its cookie jar.
    pub fn new(state: &'a AppState, context: &'a mut RequestContext) -> Self {
        Self { state, context }
    }

    /// Whether the request has a valid session.
    pub fn check(&self) -> bool {
        self.context.user_id.is_some()
    }

    /// The ID of the logged in user, if any.
    pub fn id(&self) -> Option<UserID> {
        self.context.user_id
    }

    /// The logged in user, if any.
    ///
    /// # Errors
    /// Returns an error if the user could not be read from the database.
    pub fn user(&self) -> Result<Option<User>, Error> {
        let Some(user_id) = self.id() else {
            return Ok(None);
        };

        let connection = self.state.db();
        get_user_by_id(user_id, &Gateway::new(&connection, &self.context.queries))
    }

    /// Check `password` for the user whose name or email is `identifier` and
    /// start a session for them.
    ///
    /// # Errors
    /// Returns [Error::InvalidCredentials] if no user matches or the password
    /// is wrong. Both cases look the same to the client.
    pub fn log_in(&mut self, identifier: &str, password: &str) -> Result<User, Error> {
        if identifier.trim().is_empty() || password.is_empty() {
            return Err(Error::InvalidCredentials);
        }

        let user = {
            let connection = self.state.db();
            let users = Gateway::<User>::new(&connection, &self.context.queries);

            let user = find_user_by_login(identifier, &users)?.ok_or(Error::InvalidCredentials)?;

            if !user.password_hash.verify(password)? {
                return Err(Error::InvalidCredentials);
            }

            touch_last_login(user.id, &users)?;
            get_user_by_id(user.id, &users)?.ok_or(Error::InvalidCredentials)?
        };

        self.start_session(user.id)?;
        tracing::info!("user {} logged in", user.id);

        Ok(user)
    }

    /// Validate `registration`, create the user and start a session for them.
    ///
    /// Every invalid field is reported at once.
    ///
    /// # Errors
    /// Returns [Error::Validation] for invalid fields, [Error::Conflict] if
    /// the name or email is already registered.
    pub fn register(&mut self, registration: Registration) -> Result<User, Error> {
        let mut validator = Validator::new();

        let name = validator.check(validate_username(&registration.username))?;
        let email = validator.check(Email::new(&registration.email))?;
        let password = validator.check(ValidatedPassword::new(&registration.password))?;

        if let Some(confirm_password) = &registration.confirm_password {
            if *confirm_password != registration.password {
                validator.add("confirm_password", "Passwords do not match");
            }
        }

        let currency = validator.check(validate_currency(registration.currency.as_deref()))?;

        validator.finish()?;
        let (Some(name), Some(email), Some(password), Some(currency)) =
            (name, email, password, currency)
        else {
            return Err(Error::BadRequest("The registration is incomplete".to_owned()));
        };

        let user = {
            let connection = self.state.db();
            let users = Gateway::<User>::new(&connection, &self.context.queries);

            match find_taken_field(Some(&name), Some(email.as_str()), None, &users)? {
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

            let password_hash = PasswordHash::new(password, self.state.config.password_cost)?;

            create_user(
                NewUser {
                    name,
                    email,
                    password_hash,
                    currency,
                },
                &users,
            )?
        };

        self.start_session(user.id)?;
        tracing::info!("registered user {}", user.id);

        Ok(user)
    }

    /// End the session.
    pub fn log_out(&mut self) {
        if let Some(user_id) = self.context.user_id.take() {
            tracing::info!("user {user_id} logged out");
        }

        self.context.jar = invalidate_auth_cookie(self.context.jar.clone());
    }

    fn start_session(&mut self, user_id: UserID) -> Result<(), Error> {
        self.context.jar =
            set_auth_cookie(self.context.jar.clone(), user_id, self.state.cookie_duration)?;
        self.context.user_id = Some(user_id);

        Ok(())
    }
}

/// Check a currency code, defaulting to [currency::DEFAULT_CURRENCY].
///
/// # Errors
/// Returns a validation error on the "currency" field for unsupported codes.
pub fn validate_currency(code: Option<&str>) -> Result<String, Error> {
    let code = code
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .unwrap_or(currency::DEFAULT_CURRENCY)
        .to_uppercase();

    if currency::is_valid(&code) {
        Ok(code)
    } else {
        Err(Error::field("currency", format!("{code} is not a supported currency")))
    }
}
