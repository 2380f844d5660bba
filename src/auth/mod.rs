//! Users, sessions and the auth service.

mod cookie;
mod email;
mod log_in;
mod log_out;
mod middleware;
mod password;
mod register_user;
mod service;
mod token;
mod user;

#[cfg(test)]
pub(crate) use cookie::COOKIE_TOKEN;
pub use cookie::DEFAULT_COOKIE_DURATION;
pub use email::Email;
pub use log_in::{get_current_user, post_log_in};
pub use log_out::post_log_out;
pub use middleware::session_middleware;
pub use password::{PasswordHash, ValidatedPassword};
pub use register_user::register_user;
pub use service::{Auth, Registration, validate_currency};
pub(crate) use token::Token;
pub use user::{
    User, UserID, create_user_table, find_taken_field, get_user_by_id, validate_username,
};
