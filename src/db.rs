//! Creates the application tables and holds small helpers for mapping column types.

use std::path::Path;

use rusqlite::{Connection, Row, TransactionBehavior, types::Type, types::Value};
use time::OffsetDateTime;

use crate::{
    Error,
    auth::create_user_table,
    category::{create_category_table, seed_categories},
    expense::create_expense_table,
    gateway::STATEMENT_TIMEOUT,
};

/// Open the SQLite database at `path` with the connection settings the app expects.
///
/// # Errors
/// Returns an error if the file cannot be opened as a SQLite database.
pub fn open(path: impl AsRef<Path>) -> Result<Connection, Error> {
    let connection = Connection::open(path)?;
    connection.busy_timeout(STATEMENT_TIMEOUT)?;

    Ok(connection)
}

/// Create the tables for the domain models and seed the default categories.
///
/// Safe to call on an already initialized database.
///
/// # Errors
/// Returns an error if a table cannot be created or if there is an SQL error.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    // Foreign keys are off by default in SQLite and the pragma is a no-op inside a transaction.
    connection.pragma_update(None, "foreign_keys", "ON")?;

    let transaction = rusqlite::Transaction::new_unchecked(connection, TransactionBehavior::Exclusive)?;

    create_user_table(&transaction)?;
    create_category_table(&transaction)?;
    create_expense_table(&transaction)?;
    seed_categories(&transaction)?;

    transaction.commit()?;

    Ok(())
}

/// Store a timestamp as whole seconds since the Unix epoch.
pub(crate) fn timestamp_value(timestamp: OffsetDateTime) -> Value {
    Value::Integer(timestamp.unix_timestamp())
}

/// Read a timestamp stored with [timestamp_value].
pub(crate) fn timestamp_from_row(row: &Row, index: usize) -> Result<OffsetDateTime, rusqlite::Error> {
    let seconds: i64 = row.get(index)?;

    OffsetDateTime::from_unix_timestamp(seconds).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Integer, Box::new(error))
    })
}

/// Read an optional timestamp stored with [timestamp_value].
pub(crate) fn optional_timestamp_from_row(
    row: &Row,
    index: usize,
) -> Result<Option<OffsetDateTime>, rusqlite::Error> {
    let seconds: Option<i64> = row.get(index)?;

    seconds
        .map(|seconds| {
            OffsetDateTime::from_unix_timestamp(seconds).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(index, Type::Integer, Box::new(error))
            })
        })
        .transpose()
}
