//! The API endpoints URIs.

/// Log in with a user name or email and a password.
pub const LOG_IN: &str = "/api/auth/login";
/// Create an account.
pub const REGISTER: &str = "/api/auth/register";
/// End the session.
pub const LOG_OUT: &str = "/api/auth/logout";
/// The logged in user.
pub const CURRENT_USER: &str = "/api/auth/me";

/// List or create expenses.
pub const EXPENSES: &str = "/api/expenses";
/// Totals across all of the user's expenses.
pub const EXPENSE_SUMMARY: &str = "/api/expenses/stats/summary";
/// Totals per category.
pub const EXPENSE_CATEGORY_STATS: &str = "/api/expenses/stats/categories";
/// Get, update or delete a single expense.
pub const EXPENSE: &str = "/api/expenses/{id}";
/// The user, their totals and their most recent expenses in one response.
pub const DASHBOARD: &str = "/api/dashboard";
/// The expense categories.
pub const CATEGORIES: &str = "/api/categories";

/// The user's profile and the supported currencies.
pub const SETTINGS: &str = "/api/settings";
/// Change the display currency.
pub const SETTINGS_CURRENCY: &str = "/api/settings/currency";
/// Change the user name or email.
pub const SETTINGS_PROFILE: &str = "/api/settings/profile";

/// Download the user's expenses as a file.
pub const EXPORT: &str = "/api/export/{format}";

/// Recent entries from the request audit log.
pub const LOGS: &str = "/api/logs";
/// Counts over recent audit log entries.
pub const LOG_STATS: &str = "/api/logs/stats";

/// Liveness and database status.
pub const HEALTH: &str = "/api/health";
/// The registered routes.
pub const ROUTES: &str = "/api/routes";

/// Replace the parameter in `endpoint_path` with `id`.
///
/// Assumes that `endpoint_path` has exactly one parameter enclosed in braces,
/// e.g. "/api/expenses/{id}".
/// Returns `endpoint_path` unchanged if it has no parameter.
#[cfg(test)]
pub fn format_endpoint(endpoint_path: &str, id: impl ToString) -> String {
    match (endpoint_path.find('{'), endpoint_path.find('}')) {
        (Some(start), Some(end)) if start < end => format!(
            "{}{}{}",
            &endpoint_path[..start],
            id.to_string(),
            &endpoint_path[end + 1..]
        ),
        _ => endpoint_path.to_owned(),
    }
}
