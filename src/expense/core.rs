//! Defines the expense model, its validation rules and the queries scoped to a user.

use rusqlite::{Connection, Row, types::Value};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, macros::format_description};

use crate::{
    Error, UserID,
    category::{Category, find_category},
    currency,
    db::{timestamp_from_row, timestamp_value},
    error::Validator,
    gateway::{Gateway, Record},
};

// ============================================================================
// MODELS
// ============================================================================

/// The largest amount a single expense may have.
pub const MAX_AMOUNT: f64 = 1_000_000_000.0;

/// The longest a description may be, in characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 255;

/// Money that a user spent.
#[derive(Debug, Clone, PartialEq)]
pub struct Expense {
    /// The expense's ID in the database.
    pub id: i64,
    /// The user that owns the expense.
    pub user_id: UserID,
    /// The [Category] the expense is filed under.
    pub category_id: i64,
    /// The amount spent, always positive.
    pub amount: f64,
    /// What the money was spent on, possibly empty.
    pub description: String,
    /// The day the money was spent.
    pub date: Date,
    /// When the expense was recorded.
    pub created_at: OffsetDateTime,
    /// When the expense was last changed.
    pub updated_at: OffsetDateTime,
}

impl Record for Expense {
    const MODEL: &'static str = "Expense";
    const TABLE: &'static str = "expenses";
    const COLUMNS: &'static str =
        "id, user_id, category_id, amount, description, date, created_at, updated_at";

    fn map_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            user_id: UserID::new(row.get(1)?),
            category_id: row.get(2)?,
            amount: row.get(3)?,
            description: row.get(4)?,
            date: row.get(5)?,
            created_at: timestamp_from_row(row, 6)?,
            updated_at: timestamp_from_row(row, 7)?,
        })
    }
}

/// An expense joined with its category, as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpenseView {
    /// The expense's ID in the database.
    pub id: i64,
    /// The amount spent, rounded to cents.
    pub amount: f64,
    /// The amount written in the owner's currency, e.g. "$12.50".
    pub formatted_amount: String,
    /// What the money was spent on.
    pub description: String,
    /// The day the money was spent, serialized as `YYYY-MM-DD`.
    pub date: Date,
    /// The full category rather than just its ID.
    pub category: Category,
    /// When the expense was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the expense was last changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

const VIEW_QUERY: &str = "SELECT e.id, e.amount, e.description, e.date, e.created_at, e.updated_at, \
    c.id, c.slug, c.name, c.icon \
    FROM expenses e INNER JOIN categories c ON c.id = e.category_id";

fn map_view_row(row: &Row, currency_code: &str) -> Result<ExpenseView, rusqlite::Error> {
    let amount: f64 = row.get(1)?;

    Ok(ExpenseView {
        id: row.get(0)?,
        amount,
        formatted_amount: currency::format(amount, currency_code),
        description: row.get(2)?,
        date: row.get(3)?,
        created_at: timestamp_from_row(row, 4)?,
        updated_at: timestamp_from_row(row, 5)?,
        category: Category {
            id: row.get(6)?,
            slug: row.get(7)?,
            name: row.get(8)?,
            icon: row.get(9)?,
        },
    })
}

/// Create the expense table.
///
/// Expenses are deleted with their user, and a category cannot be deleted
/// while expenses still reference it.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_expense_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS expenses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL,
                amount REAL NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                date TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY(user_id) REFERENCES users(id) ON UPDATE CASCADE ON DELETE CASCADE,
                FOREIGN KEY(category_id) REFERENCES categories(id) ON UPDATE CASCADE ON DELETE RESTRICT
                )",
        (),
    )?;

    // Listing and the stats always filter by user and sort or group by date.
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_expenses_user_date ON expenses(user_id, date);",
        (),
    )?;

    Ok(())
}

// ============================================================================
// VALIDATION
// ============================================================================

/// The expense fields of a create or update request.
///
/// `amount` and `category` are kept as raw JSON so both `12.5` and `"12.5"`,
/// or both `"food"` and `1`, are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpenseInput {
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    #[serde(default, alias = "category_id")]
    pub category: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// A fully validated new expense.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpense {
    pub category_id: i64,
    pub amount: f64,
    pub description: String,
    pub date: Date,
}

/// Check an amount given as a JSON number or numeric string.
///
/// The amount is rounded to cents.
///
/// # Errors
/// Returns a validation error on the "amount" field.
pub fn parse_amount(value: &serde_json::Value) -> Result<f64, Error> {
    let amount = match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|amount| amount.is_finite())
    .ok_or_else(|| Error::field("amount", "Amount must be a number"))?;

    let amount = (amount * 100.0).round() / 100.0;

    if amount <= 0.0 {
        return Err(Error::field("amount", "Amount must be greater than zero"));
    }

    if amount > MAX_AMOUNT {
        return Err(Error::field(
            "amount",
            "Amount cannot be more than 1,000,000,000",
        ));
    }

    Ok(amount)
}

/// Look up the category given as a slug or an ID.
///
/// # Errors
/// Returns a validation error on the "category" field if no category matches.
pub fn resolve_category(
    value: &serde_json::Value,
    categories: &Gateway<Category>,
) -> Result<Category, Error> {
    let category = match value {
        serde_json::Value::String(key) if !key.trim().is_empty() => {
            find_category(key, categories)?
        }
        serde_json::Value::Number(number) => match number.as_i64() {
            Some(id) => categories.find(id)?,
            None => None,
        },
        _ => return Err(Error::field("category", "Category is required")),
    };

    category.ok_or_else(|| Error::field("category", "The selected category does not exist"))
}

/// Trim a description and check its length.
///
/// # Errors
/// Returns a validation error on the "description" field.
pub fn validate_description(raw: &str) -> Result<String, Error> {
    let description = raw.trim();

    if description.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(Error::field(
            "description",
            format!("Description cannot be longer than {MAX_DESCRIPTION_LENGTH} characters"),
        ));
    }

    Ok(description.to_owned())
}

/// Parse a `YYYY-MM-DD` date that is not after `today`.
///
/// # Errors
/// Returns a validation error on the "date" field.
pub fn parse_expense_date(raw: &str, today: Date) -> Result<Date, Error> {
    let date = parse_iso_date(raw).ok_or_else(|| Error::field("date", "Date must be in the format YYYY-MM-DD"))?;

    if date > today {
        return Err(Error::field("date", "Date cannot be in the future"));
    }

    Ok(date)
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_iso_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]")).ok()
}

/// Validate every field of a new expense, reporting all invalid fields at once.
///
/// A missing date defaults to `today`.
///
/// # Errors
/// Returns [Error::Validation] for invalid or missing fields.
pub fn validate_new_expense(
    input: &ExpenseInput,
    categories: &Gateway<Category>,
    today: Date,
) -> Result<NewExpense, Error> {
    let mut validator = Validator::new();

    let amount = match &input.amount {
        Some(amount) => validator.check(parse_amount(amount))?,
        None => {
            validator.add("amount", "Amount is required");
            None
        }
    };

    let category = match &input.category {
        Some(category) => validator.check(resolve_category(category, categories))?,
        None => {
            validator.add("category", "Category is required");
            None
        }
    };

    let description =
        validator.check(validate_description(input.description.as_deref().unwrap_or("")))?;

    let date = match input.date.as_deref().filter(|date| !date.trim().is_empty()) {
        Some(date) => validator.check(parse_expense_date(date, today))?,
        None => Some(today),
    };

    validator.finish()?;

    match (amount, category, description, date) {
        (Some(amount), Some(category), Some(description), Some(date)) => Ok(NewExpense {
            category_id: category.id,
            amount,
            description,
            date,
        }),
        _ => Err(Error::BadRequest("The expense is incomplete".to_owned())),
    }
}

/// Validate only the fields present in `input`, returning the columns to update.
///
/// # Errors
/// Returns [Error::Validation] for invalid fields.
pub fn validate_expense_changes(
    input: &ExpenseInput,
    categories: &Gateway<Category>,
    today: Date,
) -> Result<Vec<(&'static str, Value)>, Error> {
    let mut validator = Validator::new();
    let mut changes = Vec::new();

    if let Some(amount) = &input.amount {
        if let Some(amount) = validator.check(parse_amount(amount))? {
            changes.push(("amount", Value::Real(amount)));
        }
    }

    if let Some(category) = &input.category {
        if let Some(category) = validator.check(resolve_category(category, categories))? {
            changes.push(("category_id", Value::Integer(category.id)));
        }
    }

    if let Some(description) = &input.description {
        if let Some(description) = validator.check(validate_description(description))? {
            changes.push(("description", Value::Text(description)));
        }
    }

    if let Some(date) = &input.date {
        if let Some(date) = validator.check(parse_expense_date(date, today))? {
            changes.push(("date", Value::Text(date.to_string())));
        }
    }

    validator.finish()?;

    Ok(changes)
}

// ============================================================================
// QUERIES
// ============================================================================

/// Which of a user's expenses to list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpenseFilter {
    /// Only list expenses in this category.
    pub category_id: Option<i64>,
    /// The earliest date, inclusive.
    pub from: Option<Date>,
    /// The latest date, inclusive.
    pub to: Option<Date>,
    /// `None` lists every matching expense.
    pub limit: Option<u32>,
    /// How many matching expenses to skip.
    pub offset: u32,
}

/// Insert an expense for `user_id`, returning its ID.
///
/// # Errors
/// Returns an error if the category does not exist or there is an SQL error.
pub fn create_expense(
    user_id: UserID,
    expense: NewExpense,
    expenses: &Gateway<Expense>,
) -> Result<i64, Error> {
    let now = timestamp_value(OffsetDateTime::now_utc());

    expenses.create(&[
        ("user_id", Value::Integer(user_id.as_i64())),
        ("category_id", Value::Integer(expense.category_id)),
        ("amount", Value::Real(expense.amount)),
        ("description", Value::Text(expense.description)),
        ("date", Value::Text(expense.date.to_string())),
        ("created_at", now.clone()),
        ("updated_at", now),
    ])
}

/// Get the expense `id` if it belongs to `user_id`.
///
/// Another user's expense is treated the same as a missing one.
pub fn get_expense_for_user(
    id: i64,
    user_id: UserID,
    currency_code: &str,
    expenses: &Gateway<Expense>,
) -> Result<Option<ExpenseView>, Error> {
    let sql = format!("{VIEW_QUERY} WHERE e.id = ?1 AND e.user_id = ?2");

    expenses.query_one(
        &sql,
        &[Value::Integer(id), Value::Integer(user_id.as_i64())],
        |row| map_view_row(row, currency_code),
    )
}

/// List the expenses of `user_id` that match `filter`, newest first.
pub fn list_expenses_for_user(
    user_id: UserID,
    filter: &ExpenseFilter,
    currency_code: &str,
    expenses: &Gateway<Expense>,
) -> Result<Vec<ExpenseView>, Error> {
    let mut conditions = vec!["e.user_id = ?1".to_owned()];
    let mut params = vec![Value::Integer(user_id.as_i64())];

    if let Some(category_id) = filter.category_id {
        params.push(Value::Integer(category_id));
        conditions.push(format!("e.category_id = ?{}", params.len()));
    }

    if let Some(from) = filter.from {
        params.push(Value::Text(from.to_string()));
        conditions.push(format!("e.date >= ?{}", params.len()));
    }

    if let Some(to) = filter.to {
        params.push(Value::Text(to.to_string()));
        conditions.push(format!("e.date <= ?{}", params.len()));
    }

    // Sort by date, and then ID so expenses on the same day stay in the order they were added.
    let mut sql = format!(
        "{VIEW_QUERY} WHERE {} ORDER BY e.date DESC, e.id DESC",
        conditions.join(" AND ")
    );

    // SQLite only accepts OFFSET after a LIMIT, where -1 means no limit.
    if filter.limit.is_some() || filter.offset > 0 {
        params.push(Value::Integer(filter.limit.map_or(-1, i64::from)));
        params.push(Value::Integer(i64::from(filter.offset)));
        sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", params.len() - 1, params.len()));
    }

    expenses.query(&sql, &params, |row| map_view_row(row, currency_code))
}

/// Update the columns in `changes` and bump `updated_at`.
///
/// The caller must have checked that the expense belongs to the session user.
///
/// Returns `false` if the expense does not exist.
pub fn update_expense(
    id: i64,
    mut changes: Vec<(&'static str, Value)>,
    expenses: &Gateway<Expense>,
) -> Result<bool, Error> {
    changes.push(("updated_at", timestamp_value(OffsetDateTime::now_utc())));

    expenses.update(id, &changes)
}
