//! Expenses: the model, validation, queries, stats and route handlers.

mod core;
mod endpoints;
mod stats;

pub use core::{Expense, ExpenseFilter, ExpenseView, create_expense_table, list_expenses_for_user};
pub use endpoints::{
    create_expense_endpoint, delete_expense_endpoint, get_dashboard, get_expense,
    get_expense_category_stats, get_expense_summary, list_expenses, update_expense_endpoint,
};
pub(crate) use endpoints::session_user;
