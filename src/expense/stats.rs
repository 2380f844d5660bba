//! Aggregates over a user's expenses for the summary, category and dashboard endpoints.

use rusqlite::types::Value;
use serde::Serialize;
use time::Date;

use crate::{
    Error, UserID,
    category::Category,
    currency,
    gateway::Gateway,
};

use super::core::Expense;

/// Totals across all of a user's expenses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    /// The sum of every expense.
    pub total: f64,
    /// The number of expenses.
    pub count: i64,
    /// The mean amount, or zero without expenses.
    pub average: f64,
    /// The largest single amount, or zero without expenses.
    pub largest: f64,
    /// The total of the expenses dated in the current calendar month.
    pub this_month: f64,
    /// The ISO 4217 code of the user's currency.
    pub currency: String,
    /// The amounts above, formatted for display.
    pub formatted: FormattedSummary,
}

/// The amounts of a [Summary] written in the user's currency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedSummary {
    pub total: String,
    pub average: String,
    pub largest: String,
    pub this_month: String,
}

/// The total spent in one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub category: Category,
    /// The sum of the category's expenses.
    pub total: f64,
    /// The number of expenses in the category.
    pub count: i64,
    /// Share of the user's total spending, 0 to 100.
    pub percentage: f64,
    /// `total` in the user's currency.
    pub formatted_total: String,
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Compute the summary for `user_id`, where `today` decides the current month.
pub fn get_summary(
    user_id: UserID,
    today: Date,
    currency_code: &str,
    expenses: &Gateway<Expense>,
) -> Result<Summary, Error> {
    let month_start = today.replace_day(1).unwrap_or(today);

    let (total, count, largest, this_month) = expenses
        .query_one(
            "SELECT COALESCE(SUM(amount), 0.0), COUNT(id), COALESCE(MAX(amount), 0.0), \
             COALESCE(SUM(CASE WHEN date BETWEEN ?2 AND ?3 THEN amount END), 0.0) \
             FROM expenses WHERE user_id = ?1",
            &[
                Value::Integer(user_id.as_i64()),
                Value::Text(month_start.to_string()),
                Value::Text(today.to_string()),
            ],
            |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            },
        )?
        .unwrap_or((0.0, 0, 0.0, 0.0));

    let total = round_cents(total);
    let this_month = round_cents(this_month);
    let average = if count > 0 {
        round_cents(total / count as f64)
    } else {
        0.0
    };

    Ok(Summary {
        total,
        count,
        average,
        largest,
        this_month,
        currency: currency_code.to_owned(),
        formatted: FormattedSummary {
            total: currency::format(total, currency_code),
            average: currency::format(average, currency_code),
            largest: currency::format(largest, currency_code),
            this_month: currency::format(this_month, currency_code),
        },
    })
}

/// Total and count per category for `user_id`, largest total first.
///
/// Categories without expenses are left out.
pub fn get_category_totals(
    user_id: UserID,
    currency_code: &str,
    expenses: &Gateway<Expense>,
) -> Result<Vec<CategoryTotal>, Error> {
    let rows = expenses.query(
        "SELECT c.id, c.slug, c.name, c.icon, SUM(e.amount), COUNT(e.id) \
         FROM expenses e INNER JOIN categories c ON c.id = e.category_id \
         WHERE e.user_id = ?1 \
         GROUP BY c.id \
         ORDER BY SUM(e.amount) DESC, c.id ASC",
        &[Value::Integer(user_id.as_i64())],
        |row| {
            Ok((
                Category {
                    id: row.get(0)?,
                    slug: row.get(1)?,
                    name: row.get(2)?,
                    icon: row.get(3)?,
                },
                row.get::<_, f64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        },
    )?;

    let grand_total: f64 = rows.iter().map(|(_, total, _)| total).sum();

    Ok(rows
        .into_iter()
        .map(|(category, total, count)| {
            let total = round_cents(total);
            let percentage = if grand_total > 0.0 {
                round_cents(total / grand_total * 100.0)
            } else {
                0.0
            };

            CategoryTotal {
                category,
                total,
                count,
                percentage,
                formatted_total: currency::format(total, currency_code),
            }
        })
        .collect())
}
