//! The record gateway: generic CRUD helpers over the application database.
//!
//! Every statement executed through a [Gateway] is timed and appended to the
//! [QueryLog] of the request that issued it, so the debug block of a response
//! can show exactly which SQL ran for that request and nothing else.

use std::{
    marker::PhantomData,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use rusqlite::{Connection, Row, params_from_iter, types::Value};
use serde::Serialize;
use time::OffsetDateTime;

use crate::Error;

/// The longest a single statement may run before SQLite interrupts it.
pub const STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// How many SQLite virtual machine instructions run between timeout checks.
const PROGRESS_HANDLER_PERIOD: i32 = 1_000;

/// A record of one statement executed through the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTrace {
    /// The model that issued the statement, e.g. "Expense".
    pub model: &'static str,
    /// The table the model is stored in.
    pub table: &'static str,
    /// The SQL text.
    pub sql: String,
    /// The bound parameters, in order.
    pub params: Vec<serde_json::Value>,
    /// Wall-clock time spent executing the statement and reading its rows.
    pub elapsed_ms: f64,
    /// When the statement finished.
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
}

/// The statements executed while handling a single request.
///
/// A fresh log is created by the dispatcher for every request, which keeps
/// one request's queries out of another request's debug output. Clones share
/// the same underlying list.
#[derive(Debug, Clone, Default)]
pub struct QueryLog(Arc<Mutex<Vec<QueryTrace>>>);

impl QueryLog {
    /// Create an empty query log.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, trace: QueryTrace) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(trace);
    }

    /// A copy of the traces recorded so far, in execution order.
    pub fn snapshot(&self) -> Vec<QueryTrace> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The number of traces recorded so far.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no statements have been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all recorded traces.
    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// A type that is stored as one row of a database table.
pub trait Record: Sized {
    /// The name of the model shown in query traces.
    const MODEL: &'static str;
    /// The table the records live in.
    const TABLE: &'static str;
    /// The columns selected for [Record::map_row], in the order it reads them.
    const COLUMNS: &'static str;

    /// Convert a row selected with [Record::COLUMNS] into the record.
    ///
    /// # Errors
    /// Returns an error if a column cannot be converted into the corresponding rust type.
    fn map_row(row: &Row) -> Result<Self, rusqlite::Error>;
}

/// Generic persistence helpers for the record type `R`.
///
/// ```ignore
/// let expenses = Gateway::<Expense>::new(&connection, &context.queries);
/// let expense = expenses.find(42)?;
/// ```
pub struct Gateway<'a, R> {
    connection: &'a Connection,
    queries: &'a QueryLog,
    timeout: Duration,
    record: PhantomData<R>,
}

impl<'a, R: Record> Gateway<'a, R> {
    /// Create a gateway that records its statements in `queries`.
    pub fn new(connection: &'a Connection, queries: &'a QueryLog) -> Self {
        Self {
            connection,
            queries,
            timeout: STATEMENT_TIMEOUT,
            record: PhantomData,
        }
    }

    /// Interrupt statements after `timeout` instead of [STATEMENT_TIMEOUT].
    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the record with the primary key `id`.
    ///
    /// Returns `Ok(None)` when no such row exists; store failures are errors.
    pub fn find(&self, id: i64) -> Result<Option<R>, Error> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            R::COLUMNS,
            R::TABLE
        );

        self.query_one(&sql, &[Value::Integer(id)], R::map_row)
    }

    /// Get every record in the table.
    pub fn all(&self) -> Result<Vec<R>, Error> {
        let sql = format!("SELECT {} FROM {} ORDER BY id", R::COLUMNS, R::TABLE);

        self.query(&sql, &[], R::map_row)
    }

    /// Get the records whose `column` equals `value`.
    ///
    /// # Errors
    /// Returns [Error::InvalidColumn] if `column` is not a plain identifier.
    pub fn where_eq(&self, column: &str, value: impl Into<Value>) -> Result<Vec<R>, Error> {
        check_column(column)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {column} = ?1 ORDER BY id",
            R::COLUMNS,
            R::TABLE
        );

        self.query(&sql, &[value.into()], R::map_row)
    }

    /// Insert a row from column/value pairs.
    ///
    /// Returns the `id` given in `data`, otherwise the key generated by the store.
    pub fn create(&self, data: &[(&str, Value)]) -> Result<i64, Error> {
        for (column, _) in data {
            check_column(column)?;
        }

        let columns = data
            .iter()
            .map(|(column, _)| *column)
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=data.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            R::TABLE
        );
        let params: Vec<Value> = data.iter().map(|(_, value)| value.clone()).collect();

        self.execute(&sql, &params)?;

        let given_id = data.iter().find_map(|(column, value)| match value {
            Value::Integer(id) if *column == "id" => Some(*id),
            _ => None,
        });

        Ok(given_id.unwrap_or_else(|| self.connection.last_insert_rowid()))
    }

    /// Update the columns in `data` for the row with primary key `id`.
    ///
    /// Returns `false` if no row has the key `id`.
    pub fn update(&self, id: i64, data: &[(&str, Value)]) -> Result<bool, Error> {
        if data.is_empty() {
            return Ok(self.find(id)?.is_some());
        }

        for (column, _) in data {
            check_column(column)?;
        }

        let assignments = data
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE id = ?{}",
            R::TABLE,
            data.len() + 1
        );
        let mut params: Vec<Value> = data.iter().map(|(_, value)| value.clone()).collect();
        params.push(Value::Integer(id));

        Ok(self.execute(&sql, &params)? > 0)
    }

    /// Delete the row with primary key `id`.
    ///
    /// Returns `false` if no row has the key `id`, e.g. when it was already deleted.
    pub fn delete(&self, id: i64) -> Result<bool, Error> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", R::TABLE);

        Ok(self.execute(&sql, &[Value::Integer(id)])? > 0)
    }

    /// Run an arbitrary statement that returns no rows, returning the number of rows changed.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, Error> {
        self.traced(sql, params, |connection| {
            connection.execute(sql, params_from_iter(params.iter()))
        })
    }

    /// Run an arbitrary query, e.g. a join or an aggregate, mapping each row with `map`.
    pub fn query<T, F>(&self, sql: &str, params: &[Value], map: F) -> Result<Vec<T>, Error>
    where
        F: FnMut(&Row) -> Result<T, rusqlite::Error>,
    {
        self.traced(sql, params, |connection| {
            connection
                .prepare(sql)?
                .query_map(params_from_iter(params.iter()), map)?
                .collect()
        })
    }

    /// Run an arbitrary query and map the first row, if any.
    pub fn query_one<T, F>(&self, sql: &str, params: &[Value], map: F) -> Result<Option<T>, Error>
    where
        F: FnOnce(&Row) -> Result<T, rusqlite::Error>,
    {
        self.traced(sql, params, |connection| {
            let mut statement = connection.prepare(sql)?;
            let mut rows = statement.query(params_from_iter(params.iter()))?;

            match rows.next()? {
                Some(row) => map(row).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Run `operation` under the statement timeout and record it in the query log.
    fn traced<T>(
        &self,
        sql: &str,
        params: &[Value],
        operation: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, Error> {
        let start = Instant::now();
        let deadline = start + self.timeout;
        self.connection.progress_handler(
            PROGRESS_HANDLER_PERIOD,
            Some(move || Instant::now() > deadline),
        );

        let result = operation(self.connection);

        self.connection
            .progress_handler(PROGRESS_HANDLER_PERIOD, None::<fn() -> bool>);

        self.queries.push(QueryTrace {
            model: R::MODEL,
            table: R::TABLE,
            sql: sql.to_owned(),
            params: params.iter().map(value_to_json).collect(),
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            captured_at: OffsetDateTime::now_utc(),
        });

        result.map_err(|error| {
            tracing::error!("{} query failed: {error}\nSQL: {sql}", R::MODEL);
            match Error::from(error) {
                Error::QueryTimeout(_) => Error::QueryTimeout(self.timeout),
                error => error,
            }
        })
    }
}

/// Reject anything that is not a plain SQL identifier, since column names are
/// interpolated into the statement text.
fn check_column(column: &str) -> Result<(), Error> {
    let mut chars = column.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');

    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(Error::InvalidColumn(column.to_owned()))
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(integer) => (*integer).into(),
        Value::Real(real) => (*real).into(),
        Value::Text(text) => text.clone().into(),
        Value::Blob(blob) => format!("<{} byte blob>", blob.len()).into(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use rusqlite::{Connection, Row, types::Value};

    use crate::Error;

    use super::{Gateway, QueryLog, Record, check_column};

    #[derive(Debug, PartialEq)]
    struct Note {
        id: i64,
        text: String,
    }

    impl Record for Note {
        const MODEL: &'static str = "Note";
        const TABLE: &'static str = "notes";
        const COLUMNS: &'static str = "id, text";

        fn map_row(row: &Row) -> Result<Self, rusqlite::Error> {
            Ok(Self {
                id: row.get(0)?,
                text: row.get(1)?,
            })
        }
    }

    fn get_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        connection
            .execute(
                "CREATE TABLE notes (id INTEGER PRIMARY KEY, text TEXT NOT NULL)",
                (),
            )
            .unwrap();
        connection
    }

    #[test]
    fn create_then_find() {
        let connection = get_connection();
        let queries = QueryLog::new();
        let notes = Gateway::<Note>::new(&connection, &queries);

        let id = notes
            .create(&[("text", Value::Text("hello".to_owned()))])
            .unwrap();

        assert_eq!(
            notes.find(id).unwrap(),
            Some(Note {
                id,
                text: "hello".to_owned()
            })
        );
    }

    #[test]
    fn create_returns_caller_provided_id() {
        let connection = get_connection();
        let queries = QueryLog::new();
        let notes = Gateway::<Note>::new(&connection, &queries);

        let id = notes
            .create(&[
                ("id", Value::Integer(42)),
                ("text", Value::Text("hello".to_owned())),
            ])
            .unwrap();

        assert_eq!(id, 42);
    }

    #[test]
    fn find_missing_row_is_none_not_error() {
        let connection = get_connection();
        let queries = QueryLog::new();
        let notes = Gateway::<Note>::new(&connection, &queries);

        assert_eq!(notes.find(7), Ok(None));
    }

    #[test]
    fn find_on_broken_table_is_an_error() {
        let connection = Connection::open_in_memory().unwrap();
        let queries = QueryLog::new();
        let notes = Gateway::<Note>::new(&connection, &queries);

        assert!(matches!(notes.find(7), Err(Error::SqlError(_))));
    }

    #[test]
    fn runaway_statement_is_interrupted() {
        let connection = get_connection();
        let queries = QueryLog::new();
        let timeout = Duration::from_millis(200);
        let notes = Gateway::<Note>::new(&connection, &queries).with_timeout(timeout);
        let started = Instant::now();

        let result = notes.query_one(
            "WITH RECURSIVE counter(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM counter)
             SELECT count(*) FROM counter",
            &[],
            |row| row.get::<_, i64>(0),
        );

        assert_eq!(result, Err(Error::QueryTimeout(timeout)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(queries.len(), 1);

        // The connection is usable again once the handler is cleared.
        assert_eq!(notes.find(1), Ok(None));
    }

    #[test]
    fn delete_twice_returns_false_the_second_time() {
        let connection = get_connection();
        let queries = QueryLog::new();
        let notes = Gateway::<Note>::new(&connection, &queries);
        let id = notes
            .create(&[("text", Value::Text("bye".to_owned()))])
            .unwrap();

        assert_eq!(notes.delete(id), Ok(true));
        assert_eq!(notes.delete(id), Ok(false));
    }

    #[test]
    fn update_changes_only_given_columns() {
        let connection = get_connection();
        let queries = QueryLog::new();
        let notes = Gateway::<Note>::new(&connection, &queries);
        let id = notes
            .create(&[("text", Value::Text("before".to_owned()))])
            .unwrap();

        assert_eq!(
            notes.update(id, &[("text", Value::Text("after".to_owned()))]),
            Ok(true)
        );
        assert_eq!(notes.find(id).unwrap().unwrap().text, "after");
        assert_eq!(
            notes.update(id + 1, &[("text", Value::Text("nope".to_owned()))]),
            Ok(false)
        );
    }

    #[test]
    fn where_eq_filters_rows() {
        let connection = get_connection();
        let queries = QueryLog::new();
        let notes = Gateway::<Note>::new(&connection, &queries);
        notes.create(&[("text", Value::Text("a".to_owned()))]).unwrap();
        notes.create(&[("text", Value::Text("b".to_owned()))]).unwrap();
        notes.create(&[("text", Value::Text("a".to_owned()))]).unwrap();

        let got = notes.where_eq("text", "a".to_owned()).unwrap();

        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|note| note.text == "a"));
        assert_eq!(notes.all().unwrap().len(), 3);
    }

    #[test]
    fn rejects_column_names_that_are_not_identifiers() {
        let connection = get_connection();
        let queries = QueryLog::new();
        let notes = Gateway::<Note>::new(&connection, &queries);

        let result = notes.where_eq("text = text OR 1", 1);

        assert_eq!(
            result,
            Err(Error::InvalidColumn("text = text OR 1".to_owned()))
        );
        assert!(check_column("user_id").is_ok());
        assert!(check_column("1abc").is_err());
        assert!(check_column("").is_err());
    }

    #[test]
    fn every_call_is_traced_in_order() {
        let connection = get_connection();
        let queries = QueryLog::new();
        let notes = Gateway::<Note>::new(&connection, &queries);

        let id = notes
            .create(&[("text", Value::Text("traced".to_owned()))])
            .unwrap();
        notes.find(id).unwrap();
        notes.all().unwrap();
        notes
            .query_one("SELECT COUNT(*) FROM notes", &[], |row| {
                row.get::<_, i64>(0)
            })
            .unwrap();

        let traces = queries.snapshot();
        assert_eq!(traces.len(), 4);
        assert!(traces[0].sql.starts_with("INSERT INTO notes"));
        assert_eq!(traces[0].params, vec![serde_json::json!("traced")]);
        assert!(traces[1].sql.contains("WHERE id = ?1"));
        assert_eq!(traces[1].params, vec![serde_json::json!(id)]);
        assert!(traces[2].sql.contains("ORDER BY id"));
        assert_eq!(traces[3].sql, "SELECT COUNT(*) FROM notes");
        assert!(traces.iter().all(|trace| trace.model == "Note"));
        assert!(traces.iter().all(|trace| trace.table == "notes"));
    }

    #[test]
    fn failed_statements_are_traced_too() {
        let connection = Connection::open_in_memory().unwrap();
        let queries = QueryLog::new();
        let notes = Gateway::<Note>::new(&connection, &queries);

        let _ = notes.all();

        assert_eq!(queries.len(), 1);
    }

    #[test]
    fn clones_share_the_same_log() {
        let queries = QueryLog::new();
        let connection = get_connection();
        let clone = queries.clone();
        Gateway::<Note>::new(&connection, &clone).all().unwrap();

        assert_eq!(queries.len(), 1);

        queries.clear();
        assert!(clone.is_empty());
    }
}
