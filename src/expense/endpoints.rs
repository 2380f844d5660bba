//! Route handlers for expenses, their stats and the dashboard.
//!
//! Every handler reads and writes only the session user's expenses. An
//! expense that belongs to someone else is reported as not found.

use serde_json::json;

use crate::{
    AppState, Error, UserID,
    api_response::ApiResponse,
    auth::{User, get_user_by_id},
    category::{Category, find_category},
    error::Validator,
    gateway::Gateway,
    router::{Reply, RequestContext},
    timezone::local_today,
};

use super::{
    core::{
        Expense, ExpenseFilter, ExpenseInput, create_expense, get_expense_for_user,
        list_expenses_for_user, parse_iso_date, update_expense, validate_expense_changes,
        validate_new_expense,
    },
    stats::{get_category_totals, get_summary},
};

/// How many expenses a listing returns when no limit is given.
pub const DEFAULT_LIST_LIMIT: u32 = 100;
/// The largest limit a listing accepts.
pub const MAX_LIST_LIMIT: u32 = 1000;
/// How many expenses the dashboard shows.
pub const RECENT_EXPENSE_COUNT: u32 = 5;

/// The session user, who must still exist.
pub(crate) fn session_user(context: &RequestContext, users: &Gateway<User>) -> Result<User, Error> {
    get_user_by_id(context.user_id()?, users)?.ok_or(Error::Unauthenticated)
}

fn currency_for(user_id: UserID, users: &Gateway<User>) -> Result<String, Error> {
    Ok(get_user_by_id(user_id, users)?
        .ok_or(Error::Unauthenticated)?
        .currency)
}

/// Read the listing filter from the query string.
fn filter_from_query(
    context: &RequestContext,
    categories: &Gateway<Category>,
) -> Result<ExpenseFilter, Error> {
    let mut validator = Validator::new();
    let mut filter = ExpenseFilter {
        limit: Some(DEFAULT_LIST_LIMIT),
        ..Default::default()
    };

    if let Some(category) = context.query_param("category") {
        match find_category(category, categories)? {
            Some(category) => filter.category_id = Some(category.id),
            None => validator.add("category", "The selected category does not exist"),
        }
    }

    for (name, target) in [("from", &mut filter.from), ("to", &mut filter.to)] {
        if let Some(raw) = context.query_param(name) {
            match parse_iso_date(raw) {
                Some(date) => *target = Some(date),
                None => validator.add(name, "Date must be in the format YYYY-MM-DD"),
            }
        }
    }

    if let Some(raw) = context.query_param("limit") {
        match raw.parse::<u32>() {
            Ok(limit) if (1..=MAX_LIST_LIMIT).contains(&limit) => filter.limit = Some(limit),
            _ => validator.add(
                "limit",
                format!("Limit must be a number between 1 and {MAX_LIST_LIMIT}"),
            ),
        }
    }

    if let Some(raw) = context.query_param("offset") {
        match raw.parse::<u32>() {
            Ok(offset) => filter.offset = offset,
            Err(_) => validator.add("offset", "Offset must be a whole number"),
        }
    }

    validator.finish()?;

    Ok(filter)
}

/// A route handler listing the session user's expenses, newest first.
///
/// Accepts the query parameters `category`, `from`, `to`, `limit` and `offset`.
pub fn list_expenses(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let user_id = context.user_id()?;
    let connection = state.db();

    let filter = filter_from_query(context, &Gateway::new(&connection, &context.queries))?;
    let currency = currency_for(user_id, &Gateway::new(&connection, &context.queries))?;
    let expenses = list_expenses_for_user(
        user_id,
        &filter,
        &currency,
        &Gateway::new(&connection, &context.queries),
    )?;

    Ok(serde_json::to_value(expenses)?.into())
}

/// A route handler for getting one expense.
pub fn get_expense(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let user_id = context.user_id()?;
    let id: i64 = context.param("id")?;
    let connection = state.db();

    let currency = currency_for(user_id, &Gateway::new(&connection, &context.queries))?;
    let expense = get_expense_for_user(
        id,
        user_id,
        &currency,
        &Gateway::new(&connection, &context.queries),
    )?
    .ok_or(Error::NotFound)?;

    Ok(serde_json::to_value(expense)?.into())
}

/// A route handler for adding an expense.
pub fn create_expense_endpoint(
    state: &AppState,
    context: &mut RequestContext,
) -> Result<Reply, Error> {
    let user_id = context.user_id()?;
    let input: ExpenseInput = context.json()?;
    let today = local_today(&state.config.local_timezone)?;

    let connection = state.db();
    let expenses = Gateway::<Expense>::new(&connection, &context.queries);

    let new_expense =
        validate_new_expense(&input, &Gateway::new(&connection, &context.queries), today)?;
    let id = create_expense(user_id, new_expense, &expenses)?;

    let currency = currency_for(user_id, &Gateway::new(&connection, &context.queries))?;
    let expense = get_expense_for_user(id, user_id, &currency, &expenses)?.ok_or(Error::NotFound)?;

    tracing::debug!("user {user_id} added expense {id}");

    Ok(ApiResponse::created(json!(expense))
        .with_message("Expense added")
        .into())
}

/// A route handler for changing some or all fields of an expense.
pub fn update_expense_endpoint(
    state: &AppState,
    context: &mut RequestContext,
) -> Result<Reply, Error> {
    let user_id = context.user_id()?;
    let id: i64 = context.param("id")?;
    let today = local_today(&state.config.local_timezone)?;

    let connection = state.db();
    let expenses = Gateway::<Expense>::new(&connection, &context.queries);
    let currency = currency_for(user_id, &Gateway::new(&connection, &context.queries))?;

    if get_expense_for_user(id, user_id, &currency, &expenses)?.is_none() {
        return Err(Error::NotFound);
    }

    let input: ExpenseInput = context.json()?;
    let changes =
        validate_expense_changes(&input, &Gateway::new(&connection, &context.queries), today)?;

    if !update_expense(id, changes, &expenses)? {
        return Err(Error::NotFound);
    }

    let expense = get_expense_for_user(id, user_id, &currency, &expenses)?.ok_or(Error::NotFound)?;

    Ok(ApiResponse::success(json!(expense))
        .with_message("Expense updated")
        .into())
}

/// A route handler for deleting an expense.
pub fn delete_expense_endpoint(
    state: &AppState,
    context: &mut RequestContext,
) -> Result<Reply, Error> {
    let user_id = context.user_id()?;
    let id: i64 = context.param("id")?;

    let connection = state.db();
    let expenses = Gateway::<Expense>::new(&connection, &context.queries);

    let is_owner = expenses
        .find(id)?
        .is_some_and(|expense| expense.user_id == user_id);

    if !is_owner || !expenses.delete(id)? {
        return Err(Error::NotFound);
    }

    tracing::debug!("user {user_id} deleted expense {id}");

    Ok(ApiResponse::success(json!({ "id": id }))
        .with_message("Expense deleted")
        .into())
}

/// A route handler for the totals across the session user's expenses.
pub fn get_expense_summary(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let user_id = context.user_id()?;
    let today = local_today(&state.config.local_timezone)?;
    let connection = state.db();

    let currency = currency_for(user_id, &Gateway::new(&connection, &context.queries))?;
    let summary = get_summary(
        user_id,
        today,
        &currency,
        &Gateway::new(&connection, &context.queries),
    )?;

    Ok(serde_json::to_value(summary)?.into())
}

/// A route handler for the totals per category.
pub fn get_expense_category_stats(
    state: &AppState,
    context: &mut RequestContext,
) -> Result<Reply, Error> {
    let user_id = context.user_id()?;
    let connection = state.db();

    let currency = currency_for(user_id, &Gateway::new(&connection, &context.queries))?;
    let totals = get_category_totals(
        user_id,
        &currency,
        &Gateway::new(&connection, &context.queries),
    )?;

    Ok(serde_json::to_value(totals)?.into())
}

/// A route handler for the dashboard: the user, their summary, category
/// totals and most recent expenses in one response.
pub fn get_dashboard(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let today = local_today(&state.config.local_timezone)?;
    let connection = state.db();

    let user = session_user(context, &Gateway::new(&connection, &context.queries))?;
    let expenses = Gateway::<Expense>::new(&connection, &context.queries);

    let summary = get_summary(user.id, today, &user.currency, &expenses)?;
    let categories = get_category_totals(user.id, &user.currency, &expenses)?;
    let recent_expenses = list_expenses_for_user(
        user.id,
        &ExpenseFilter {
            limit: Some(RECENT_EXPENSE_COUNT),
            ..Default::default()
        },
        &user.currency,
        &expenses,
    )?;

    Ok(json!({
        "user": user,
        "summary": summary,
        "categories": categories,
        "recent_expenses": recent_expenses,
    })
    .into())
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    use crate::{
        endpoints::{self, format_endpoint},
        test_utils::{get_test_server, register_user},
    };

    #[tokio::test]
    async fn create_then_get_expense() {
        let server = get_test_server();
        let cookie = register_user(&server, "alice_01", "a@x.com").await;

        let response = server
            .post(endpoints::EXPENSES)
            .add_cookie(cookie.clone())
            .json(&json!({"amount": "12.50", "category": "food", "description": "Lunch"}))
            .await;

        response.assert_status(StatusCode::CREATED);
        let body = response.json::<Value>();
        assert_eq!(body["message"], json!("Expense added"));
        assert_eq!(body["data"]["amount"], json!(12.5));
        assert_eq!(body["data"]["formatted_amount"], json!("$12.50"));
        assert_eq!(body["data"]["category"]["slug"], json!("food"));

        let id = body["data"]["id"].as_i64().unwrap();
        let response = server
            .get(&format_endpoint(endpoints::EXPENSE, id))
            .add_cookie(cookie)
            .await;

        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["data"]["description"], json!("Lunch"));
    }

    #[tokio::test]
    async fn negative_amount_is_a_field_error() {
        let server = get_test_server();
        let cookie = register_user(&server, "alice_01", "a@x.com").await;

        let response = server
            .post(endpoints::EXPENSES)
            .add_cookie(cookie)
            .json(&json!({"amount": -5, "category": "food"}))
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body = response.json::<Value>();
        assert_eq!(body["success"], json!(false));
        assert!(body["errors"]["amount"].is_string());
    }

    #[tokio::test]
    async fn expenses_require_a_session() {
        let server = get_test_server();

        server
            .get(endpoints::EXPENSES)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn users_only_see_their_own_expenses() {
        let server = get_test_server();
        let alice = register_user(&server, "alice_01", "a@x.com").await;
        let bob = register_user(&server, "bob_01", "b@x.com").await;

        server
            .post(endpoints::EXPENSES)
            .add_cookie(alice.clone())
            .json(&json!({"amount": 10, "category": "food", "description": "alice"}))
            .await
            .assert_status(StatusCode::CREATED);
        let bobs_expense = server
            .post(endpoints::EXPENSES)
            .add_cookie(bob.clone())
            .json(&json!({"amount": 20, "category": "travel", "description": "bob"}))
            .await
            .json::<Value>()["data"]["id"]
            .as_i64()
            .unwrap();

        let response = server.get(endpoints::EXPENSES).add_cookie(alice.clone()).await;

        response.assert_status_ok();
        let expenses = response.json::<Value>()["data"].as_array().unwrap().clone();
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0]["description"], json!("alice"));

        let bobs_path = format_endpoint(endpoints::EXPENSE, bobs_expense);
        server
            .get(&bobs_path)
            .add_cookie(alice.clone())
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .put(&bobs_path)
            .add_cookie(alice.clone())
            .json(&json!({"amount": 1}))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .delete(&bobs_path)
            .add_cookie(alice)
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .get(&bobs_path)
            .add_cookie(bob)
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn put_changes_only_supplied_fields() {
        let server = get_test_server();
        let cookie = register_user(&server, "alice_01", "a@x.com").await;
        let id = server
            .post(endpoints::EXPENSES)
            .add_cookie(cookie.clone())
            .json(&json!({"amount": 10, "category": "food", "description": "Lunch"}))
            .await
            .json::<Value>()["data"]["id"]
            .as_i64()
            .unwrap();

        let response = server
            .put(&format_endpoint(endpoints::EXPENSE, id))
            .add_cookie(cookie)
            .json(&json!({"category": "transport"}))
            .await;

        response.assert_status_ok();
        let data = &response.json::<Value>()["data"];
        assert_eq!(data["category"]["slug"], json!("transport"));
        assert_eq!(data["amount"], json!(10.0));
        assert_eq!(data["description"], json!("Lunch"));
    }

    #[tokio::test]
    async fn delete_twice_is_not_found_the_second_time() {
        let server = get_test_server();
        let cookie = register_user(&server, "alice_01", "a@x.com").await;
        let id = server
            .post(endpoints::EXPENSES)
            .add_cookie(cookie.clone())
            .json(&json!({"amount": 10, "category": "food"}))
            .await
            .json::<Value>()["data"]["id"]
            .as_i64()
            .unwrap();
        let path = format_endpoint(endpoints::EXPENSE, id);

        server
            .delete(&path)
            .add_cookie(cookie.clone())
            .await
            .assert_status_ok();
        server
            .delete(&path)
            .add_cookie(cookie)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_rejects_bad_filters() {
        let server = get_test_server();
        let cookie = register_user(&server, "alice_01", "a@x.com").await;

        let response = server
            .get(endpoints::EXPENSES)
            .add_query_params([("from", "yesterday"), ("limit", "0")])
            .add_cookie(cookie)
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let errors = &response.json::<Value>()["errors"];
        assert!(errors["from"].is_string());
        assert!(errors["limit"].is_string());
    }

    #[tokio::test]
    async fn dashboard_bundles_user_summary_and_recent_expenses() {
        let server = get_test_server();
        let cookie = register_user(&server, "alice_01", "a@x.com").await;
        for amount in 1..=6 {
            server
                .post(endpoints::EXPENSES)
                .add_cookie(cookie.clone())
                .json(&json!({"amount": amount, "category": "food"}))
                .await
                .assert_status(StatusCode::CREATED);
        }

        let response = server.get(endpoints::DASHBOARD).add_cookie(cookie).await;

        response.assert_status_ok();
        let data = &response.json::<Value>()["data"];
        assert_eq!(data["user"]["name"], json!("alice_01"));
        assert_eq!(data["summary"]["count"], json!(6));
        assert_eq!(data["summary"]["total"], json!(21.0));
        assert_eq!(data["categories"][0]["percentage"], json!(100.0));
        assert_eq!(data["recent_expenses"].as_array().unwrap().len(), 5);
    }
}
