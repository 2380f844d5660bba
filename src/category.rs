//! Expense categories: the table, the default set and lookups.

use rusqlite::{Connection, Row, types::Value};
use serde::Serialize;

use crate::{
    AppState, Error,
    gateway::{Gateway, Record},
    router::{Reply, RequestContext},
};

/// A category that expenses are filed under, e.g. "Food".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    /// The ID of the category.
    pub id: i64,
    /// The stable short name used by API clients, e.g. "food".
    pub slug: String,
    /// The display name, e.g. "Food & Dining".
    pub name: String,
    /// An emoji shown next to the name.
    pub icon: String,
}

impl Record for Category {
    const MODEL: &'static str = "Category";
    const TABLE: &'static str = "categories";
    const COLUMNS: &'static str = "id, slug, name, icon";

    fn map_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            icon: row.get(3)?,
        })
    }
}

/// The categories every database starts with: (slug, name, icon).
pub const DEFAULT_CATEGORIES: [(&str, &str, &str); 10] = [
    ("food", "Food & Dining", "🍔"),
    ("transport", "Transport", "🚌"),
    ("housing", "Housing", "🏠"),
    ("utilities", "Utilities", "💡"),
    ("entertainment", "Entertainment", "🎬"),
    ("health", "Health", "💊"),
    ("shopping", "Shopping", "🛍️"),
    ("education", "Education", "📚"),
    ("travel", "Travel", "✈️"),
    ("other", "Other", "📦"),
];

/// Create the category table.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_category_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                icon TEXT NOT NULL DEFAULT ''
                )",
        (),
    )?;

    Ok(())
}

/// Insert any of [DEFAULT_CATEGORIES] that are missing.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn seed_categories(connection: &Connection) -> Result<(), rusqlite::Error> {
    let mut statement = connection
        .prepare("INSERT OR IGNORE INTO categories (slug, name, icon) VALUES (?1, ?2, ?3)")?;

    for (slug, name, icon) in DEFAULT_CATEGORIES {
        statement.execute((slug, name, icon))?;
    }

    Ok(())
}

/// Find a category by its slug or, if `key` is a number, by its ID.
///
/// Returns `Ok(None)` if no category matches.
pub fn find_category(key: &str, categories: &Gateway<Category>) -> Result<Option<Category>, Error> {
    let key = key.trim();

    if let Ok(id) = key.parse::<i64>() {
        return categories.find(id);
    }

    Ok(categories
        .where_eq("slug", Value::Text(key.to_lowercase()))?
        .into_iter()
        .next())
}

/// A route handler that lists every category.
pub fn list_categories(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let connection = state.db();
    let categories = Gateway::<Category>::new(&connection, &context.queries).all()?;

    Ok(serde_json::to_value(categories)?.into())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use crate::{
        db::initialize,
        gateway::{Gateway, QueryLog},
    };

    use super::{Category, DEFAULT_CATEGORIES, find_category};

    fn get_connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        connection
    }

    #[test]
    fn seeds_default_categories_in_order() {
        let connection = get_connection();
        let queries = QueryLog::new();

        let categories = Gateway::<Category>::new(&connection, &queries).all().unwrap();

        let slugs: Vec<_> = categories.iter().map(|c| c.slug.as_str()).collect();
        let want: Vec<_> = DEFAULT_CATEGORIES.iter().map(|(slug, _, _)| *slug).collect();
        assert_eq!(slugs, want);
    }

    #[test]
    fn finds_category_by_slug_case_insensitively() {
        let connection = get_connection();
        let queries = QueryLog::new();
        let categories = Gateway::<Category>::new(&connection, &queries);

        let category = find_category(" Food ", &categories).unwrap().unwrap();

        assert_eq!(category.slug, "food");
    }

    #[test]
    fn finds_category_by_id() {
        let connection = get_connection();
        let queries = QueryLog::new();
        let categories = Gateway::<Category>::new(&connection, &queries);

        let category = find_category("2", &categories).unwrap().unwrap();

        assert_eq!(category.id, 2);
        assert_eq!(category.slug, "transport");
    }

    #[test]
    fn unknown_category_is_none() {
        let connection = get_connection();
        let queries = QueryLog::new();
        let categories = Gateway::<Category>::new(&connection, &queries);

        assert_eq!(find_category("caviar", &categories), Ok(None));
        assert_eq!(find_category("999", &categories), Ok(None));
    }
}
