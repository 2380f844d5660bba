//! Defines the app level error type and how each error maps onto an HTTP status.

use std::{collections::BTreeMap, time::Duration};

use axum::http::StatusCode;
use rusqlite::ErrorCode;

/// Field name to human-readable message, e.g. `{"amount": "Amount must be greater than zero"}`.
pub type FieldErrors = BTreeMap<String, String>;

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// One or more fields in the request body failed validation.
    #[error("validation failed")]
    Validation(FieldErrors),

    /// The user provided an unknown username/email or the wrong password.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// The route requires a session and the request did not carry a valid one.
    #[error("authentication required")]
    Unauthenticated,

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// The request clashes with existing data, e.g. a duplicate username.
    #[error("{0}")]
    Conflict(String),

    /// The request could not be understood, e.g. a malformed JSON body.
    #[error("{0}")]
    BadRequest(String),

    /// An unexpected error occurred with the underlying hashing library.
    ///
    /// The error string should only be logged for debugging on the server.
    #[error("hashing failed: {0}")]
    HashingError(String),

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(#[source] rusqlite::Error),

    /// A statement ran past the gateway's statement timeout and was interrupted.
    #[error("the statement was interrupted after {0:?}")]
    QueryTimeout(Duration),

    /// A column name given to the record gateway is not a plain identifier.
    #[error("\"{0}\" is not a valid column name")]
    InvalidColumn(String),

    /// An error occurred while getting the local timezone from a canonical timezone string.
    #[error("invalid timezone {0}")]
    InvalidTimezoneError(String),

    /// An error occurred while serializing a struct as JSON
    #[error("could not serialize as JSON: {0}")]
    JSONSerializationError(String),

    /// The session cookie could not be created.
    #[error("could not create the session cookie: {0}")]
    SessionError(String),

    /// An export document could not be produced.
    #[error("could not render the export: {0}")]
    ExportError(String),

    /// Reading or writing the request log failed.
    #[error("request log I/O failed: {0}")]
    LogIoError(String),
}

impl Error {
    /// Shortcut for a [Error::Validation] with a single field error.
    pub fn field(name: &str, message: impl Into<String>) -> Self {
        Self::Validation(FieldErrors::from([(name.to_owned(), message.into())]))
    }

    /// The HTTP status code the error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidCredentials | Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::Conflict(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message shown to the client.
    ///
    /// Internal errors are replaced with a generic message, the details are
    /// only exposed through the debug block.
    pub fn client_message(&self) -> String {
        match self {
            Error::Validation(_)
            | Error::InvalidCredentials
            | Error::Unauthenticated
            | Error::NotFound
            | Error::Conflict(_)
            | Error::BadRequest(_) => self.to_string(),
            _ => "An unexpected error occurred".to_owned(),
        }
    }

    /// The name of the variant, used in debug output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::InvalidCredentials | Error::Unauthenticated => "AuthError",
            Error::NotFound => "NotFoundError",
            Error::Conflict(_) => "ConflictError",
            Error::BadRequest(_) => "BadRequestError",
            Error::SqlError(_) | Error::QueryTimeout(_) | Error::InvalidColumn(_) => "StoreError",
            _ => "InternalError",
        }
    }
}

/// Collects the field errors of several validations so they are reported together.
///
/// ```ignore
/// let mut validator = Validator::new();
/// let name = validator.check(validate_username(&input.username))?;
/// let email = validator.check(Email::new(&input.email))?;
/// validator.finish()?;
/// ```
#[derive(Debug, Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    /// Create a validator with no errors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the field errors of `result`, returning the value if it was valid.
    ///
    /// # Errors
    /// Errors other than [Error::Validation] are returned as-is.
    pub fn check<T>(&mut self, result: Result<T, Error>) -> Result<Option<T>, Error> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(Error::Validation(errors)) => {
                for (field, message) in errors {
                    self.errors.entry(field).or_insert(message);
                }
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Record an error for `field`. The first error recorded for a field wins.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_owned())
            .or_insert_with(|| message.into());
    }

    /// Whether any field has failed validation.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// # Errors
    /// Returns [Error::Validation] with every recorded field error, if there are any.
    pub fn finish(self) -> Result<(), Error> {
        if self.has_errors() {
            Err(Error::Validation(self.errors))
        } else {
            Ok(())
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
                },
                Some(ref desc),
            ) if desc.contains("users.name") => {
                Error::Conflict("That username is already taken".to_owned())
            }
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
                },
                Some(ref desc),
            ) if desc.contains("users.email") => {
                Error::Conflict("That email address is already registered".to_owned())
            }
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY,
                },
                _,
            ) => Error::field("category", "The selected category does not exist"),
            ref error if error.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) => {
                Error::QueryTimeout(crate::gateway::STATEMENT_TIMEOUT)
            }
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::JSONSerializationError(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use rusqlite::Connection;

    use crate::{Error, error::Validator};

    #[test]
    fn no_rows_maps_to_not_found() {
        let connection = Connection::open_in_memory().unwrap();

        let error: Error = connection
            .query_row("SELECT 1 WHERE 1 = 0", [], |row| row.get::<_, i64>(0))
            .unwrap_err()
            .into();

        assert_eq!(error, Error::NotFound);
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unique_user_name_maps_to_conflict() {
        let connection = Connection::open_in_memory().unwrap();
        connection
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT UNIQUE)", ())
            .unwrap();
        connection
            .execute("INSERT INTO users (name) VALUES ('alice')", ())
            .unwrap();

        let error: Error = connection
            .execute("INSERT INTO users (name) VALUES ('alice')", ())
            .unwrap_err()
            .into();

        assert!(matches!(error, Error::Conflict(_)), "got {error:?}");
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_errors_hide_details_from_client() {
        let error = Error::HashingError("salt exploded".to_owned());

        assert_eq!(error.client_message(), "An unexpected error occurred");
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn validation_error_is_unprocessable() {
        let error = Error::field("amount", "Amount must be greater than zero");

        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error.kind(), "ValidationError");
    }

    #[test]
    fn validator_collects_every_field() {
        let mut validator = Validator::new();

        let amount: Option<f64> = validator
            .check(Err(Error::field("amount", "Amount is required")))
            .unwrap();
        let date = validator.check(Ok("2025-01-01")).unwrap();
        validator.add("category", "Category is required");
        validator.add("amount", "ignored, amount already has an error");

        assert_eq!(amount, None);
        assert_eq!(date, Some("2025-01-01"));
        let Err(Error::Validation(errors)) = validator.finish() else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(errors["amount"], "Amount is required");
        assert_eq!(errors["category"], "Category is required");
    }

    #[test]
    fn validator_passes_through_other_errors() {
        let mut validator = Validator::new();

        let result: Result<Option<i64>, Error> = validator.check(Err(Error::NotFound));

        assert_eq!(result, Err(Error::NotFound));
        assert_eq!(validator.finish(), Ok(()));
    }
}
