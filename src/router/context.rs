//! Everything a handler may need to know about the request it is serving.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use axum::{
    body::Bytes,
    http::{HeaderMap, Method},
};
use axum_extra::extract::{PrivateCookieJar, cookie::Key};
use serde::de::DeserializeOwned;

use crate::{Error, UserID, gateway::QueryLog, router::RouteSummary};

/// Request-scoped data passed to middleware and handlers.
///
/// A new context, and with it a new [QueryLog], is created for every request.
pub struct RequestContext {
    /// A unique ID for the request, also used to correlate audit log entries.
    pub request_id: String,
    /// The request method.
    pub method: Method,
    /// The normalized request path the route was matched against.
    pub path: String,
    /// The request headers.
    pub headers: HeaderMap,
    /// The decoded query string.
    pub query: HashMap<String, String>,
    /// The raw request body.
    pub body: Bytes,
    /// Parameters captured from the path template.
    pub params: HashMap<String, String>,
    /// The private cookie jar. Handlers that change cookies, e.g. log-in,
    /// replace the jar and the dispatcher sends the changes.
    pub jar: PrivateCookieJar,
    /// The user of the current session, set by the session middleware.
    pub user_id: Option<UserID>,
    /// The statements executed for this request.
    pub queries: QueryLog,
    /// The registered routes, for introspection.
    pub routes: Arc<[RouteSummary]>,
}

impl RequestContext {
    /// Create a context for a request with no body, parameters or session.
    pub fn new(method: Method, path: &str, cookie_key: Key) -> Self {
        Self {
            request_id: ulid::Ulid::new().to_string(),
            method,
            path: path.to_owned(),
            headers: HeaderMap::new(),
            query: HashMap::new(),
            body: Bytes::new(),
            params: HashMap::new(),
            jar: PrivateCookieJar::new(cookie_key),
            user_id: None,
            queries: QueryLog::new(),
            routes: Arc::from(Vec::new()),
        }
    }

    /// Parse the path parameter `name`.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if the parameter is missing or does not
    /// parse, e.g. "/api/expenses/abc" for a numeric ID.
    pub fn param<T: FromStr>(&self, name: &str) -> Result<T, Error> {
        self.params
            .get(name)
            .and_then(|value| value.parse().ok())
            .ok_or(Error::NotFound)
    }

    /// Deserialize the request body as JSON.
    ///
    /// # Errors
    /// Returns [Error::BadRequest] if the body is empty or not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::BadRequest("Request body must be a JSON object".to_owned()));
        }

        serde_json::from_slice(&self.body)
            .map_err(|error| Error::BadRequest(format!("Invalid JSON body: {error}")))
    }

    /// A query parameter, ignoring empty values.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// The user of the current session.
    ///
    /// # Errors
    /// Returns [Error::Unauthenticated] if the request has no valid session.
    pub fn user_id(&self) -> Result<UserID, Error> {
        self.user_id.ok_or(Error::Unauthenticated)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("params", &self.params)
            .field("user_id", &self.user_id)
            .field("queries", &self.queries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Bytes, http::Method};
    use serde::Deserialize;

    use crate::{Error, UserID, app_state::create_cookie_key};

    use super::RequestContext;

    fn get_context() -> RequestContext {
        RequestContext::new(Method::GET, "/api/test", create_cookie_key("foobar"))
    }

    #[test]
    fn parses_path_parameter() {
        let mut context = get_context();
        context.params.insert("id".to_owned(), "42".to_owned());

        assert_eq!(context.param::<i64>("id"), Ok(42));
    }

    #[test]
    fn unparseable_or_missing_parameter_is_not_found() {
        let mut context = get_context();
        context.params.insert("id".to_owned(), "abc".to_owned());

        assert_eq!(context.param::<i64>("id"), Err(Error::NotFound));
        assert_eq!(context.param::<i64>("other"), Err(Error::NotFound));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Body {
        name: String,
    }

    #[test]
    fn parses_json_body() {
        let mut context = get_context();
        context.body = Bytes::from_static(br#"{"name": "alice"}"#);

        assert_eq!(
            context.json::<Body>(),
            Ok(Body {
                name: "alice".to_owned()
            })
        );
    }

    #[test]
    fn empty_or_invalid_body_is_bad_request() {
        let mut context = get_context();

        assert!(matches!(context.json::<Body>(), Err(Error::BadRequest(_))));

        context.body = Bytes::from_static(b"{not json");
        assert!(matches!(context.json::<Body>(), Err(Error::BadRequest(_))));
    }

    #[test]
    fn blank_query_parameter_is_none() {
        let mut context = get_context();
        context.query.insert("category".to_owned(), "  ".to_owned());
        context.query.insert("limit".to_owned(), "10".to_owned());

        assert_eq!(context.query_param("category"), None);
        assert_eq!(context.query_param("limit"), Some("10"));
    }

    #[test]
    fn user_id_requires_session() {
        let mut context = get_context();

        assert_eq!(context.user_id(), Err(Error::Unauthenticated));

        context.user_id = Some(UserID::new(3));
        assert_eq!(context.user_id(), Ok(UserID::new(3)));
    }
}
