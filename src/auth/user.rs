//! The user model, its table and the queries the auth service needs.

use std::fmt::Display;

use rusqlite::{Connection, Row, types::Value};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    Error,
    auth::{Email, PasswordHash},
    db::{optional_timestamp_from_row, timestamp_from_row, timestamp_value},
    gateway::{Gateway, Record},
};

/// The shortest and longest user names accepted.
pub const USERNAME_LENGTH: (usize, usize) = (3, 30);

/// A newtype wrapper for integer user IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserID(i64);

impl UserID {
    /// Create a new user ID.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Cast the user ID to a 64 bit integer.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for UserID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A user of the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    /// The user's ID in the database.
    pub id: UserID,
    /// The user name, unique ignoring case.
    pub name: String,
    /// The email address, unique ignoring case.
    pub email: String,
    /// Never sent to clients.
    #[serde(skip_serializing)]
    pub password_hash: PasswordHash,
    /// The ISO 4217 code amounts are shown in, e.g. "USD".
    pub currency: String,
    /// When the user registered.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the user last logged in, if ever.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
}

impl Record for User {
    const MODEL: &'static str = "User";
    const TABLE: &'static str = "users";
    const COLUMNS: &'static str = "id, name, email, password, currency, created_at, last_login_at";

    fn map_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let raw_password_hash: String = row.get(3)?;

        Ok(Self {
            id: UserID::new(row.get(0)?),
            name: row.get(1)?,
            email: row.get(2)?,
            password_hash: PasswordHash::new_unchecked(&raw_password_hash),
            currency: row.get(4)?,
            created_at: timestamp_from_row(row, 5)?,
            last_login_at: optional_timestamp_from_row(row, 6)?,
        })
    }
}

/// Create the user table.
///
/// Names and emails are unique regardless of case.
///
/// # Errors
/// Returns an error if the table already exists or if there is an SQL error.
pub fn create_user_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password TEXT NOT NULL,
                currency TEXT NOT NULL DEFAULT 'USD',
                created_at INTEGER NOT NULL,
                last_login_at INTEGER
                )",
        (),
    )?;

    Ok(())
}

/// Check a user name: 3 to 30 letters, digits or underscores.
///
/// # Errors
/// Returns a validation error on the "username" field.
pub fn validate_username(raw_name: &str) -> Result<String, Error> {
    let name = raw_name.trim();
    let (min, max) = USERNAME_LENGTH;
    let length = name.chars().count();

    if length < min || length > max {
        return Err(Error::field(
            "username",
            format!("Username must be between {min} and {max} characters"),
        ));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::field(
            "username",
            "Username may only contain letters, numbers and underscores",
        ));
    }

    Ok(name.to_owned())
}

/// The fields needed to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// A name that passed [validate_username].
    pub name: String,
    pub email: Email,
    pub password_hash: PasswordHash,
    /// An ISO 4217 code.
    pub currency: String,
}

/// Insert a user and return it.
///
/// # Errors
/// Returns [Error::Conflict] if the name or email is taken, or an SQL error.
pub fn create_user(new_user: NewUser, users: &Gateway<User>) -> Result<User, Error> {
    let created_at = OffsetDateTime::now_utc();

    let id = users.create(&[
        ("name", Value::Text(new_user.name)),
        ("email", Value::Text(new_user.email.to_string())),
        ("password", Value::Text(new_user.password_hash.to_string())),
        ("currency", Value::Text(new_user.currency)),
        ("created_at", timestamp_value(created_at)),
    ])?;

    users.find(id)?.ok_or(Error::NotFound)
}

/// Get the user with `id`.
pub fn get_user_by_id(id: UserID, users: &Gateway<User>) -> Result<Option<User>, Error> {
    users.find(id.as_i64())
}

/// Find a user by name or email, ignoring case.
pub fn find_user_by_login(identifier: &str, users: &Gateway<User>) -> Result<Option<User>, Error> {
    let sql = format!(
        "SELECT {} FROM users WHERE name = ?1 COLLATE NOCASE OR email = ?1 COLLATE NOCASE LIMIT 1",
        User::COLUMNS
    );

    users.query_one(&sql, &[Value::Text(identifier.trim().to_owned())], User::map_row)
}

/// Whether another user already has `name` or `email`, ignoring case.
///
/// Returns the field that clashes, if any.
pub fn find_taken_field(
    name: Option<&str>,
    email: Option<&str>,
    except: Option<UserID>,
    users: &Gateway<User>,
) -> Result<Option<&'static str>, Error> {
    let except = Value::Integer(except.map(|id| id.as_i64()).unwrap_or(-1));

    if let Some(name) = name {
        let taken = users.query_one(
            "SELECT 1 FROM users WHERE name = ?1 COLLATE NOCASE AND id != ?2",
            &[Value::Text(name.to_owned()), except.clone()],
            |row| row.get::<_, i64>(0),
        )?;
        if taken.is_some() {
            return Ok(Some("username"));
        }
    }

    if let Some(email) = email {
        let taken = users.query_one(
            "SELECT 1 FROM users WHERE email = ?1 COLLATE NOCASE AND id != ?2",
            &[Value::Text(email.to_owned()), except],
            |row| row.get::<_, i64>(0),
        )?;
        if taken.is_some() {
            return Ok(Some("email"));
        }
    }

    Ok(None)
}

/// Record that the user just logged in.
pub fn touch_last_login(id: UserID, users: &Gateway<User>) -> Result<bool, Error> {
    users.update(
        id.as_i64(),
        &[("last_login_at", timestamp_value(OffsetDateTime::now_utc()))],
    )
}
