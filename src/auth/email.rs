use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::Error;

/// An email address that has the shape `local@domain.tld`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    /// Create and validate an email address.
    ///
    /// Surrounding whitespace is trimmed.
    ///
    /// # Errors
    ///
    /// Returns a validation error on the "email" field if `raw_email` is not
    /// a plausible email address.
    pub fn new(raw_email: &str) -> Result<Self, Error> {
        let raw_email = raw_email.trim();

        if is_plausible_email(raw_email) {
            Ok(Self(raw_email.to_string()))
        } else {
            Err(Error::field("email", "Please enter a valid email address"))
        }
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    let valid_domain = domain
        .split_once('.')
        .is_some_and(|(name, tld)| !name.is_empty() && !tld.is_empty())
        && !domain.ends_with('.')
        && !domain.contains("..");

    !local.is_empty()
        && valid_domain
        && email.len() <= 254
        && !email.chars().any(char::is_whitespace)
        && !domain.contains('@')
}

impl Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
