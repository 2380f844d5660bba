//! The ordered route table: templates compiled to regexes at registration and matched first-wins.

use std::{collections::HashMap, fmt};

use axum::http::Method;
use regex::Regex;
use serde::Serialize;

use crate::{AppState, Error, router::{Reply, RequestContext}};

/// A boxed route handler.
///
/// Handlers are plain synchronous functions: the dispatcher runs the whole
/// request on a blocking thread, so they may lock the database directly.
pub type Handler =
    Box<dyn Fn(&AppState, &mut RequestContext) -> Result<Reply, Error> + Send + Sync + 'static>;

/// A method and path template bound to a handler.
pub struct Route {
    method: Method,
    template: String,
    matcher: Regex,
    param_names: Vec<String>,
    handler: Handler,
    handler_name: &'static str,
    public: bool,
}

impl Route {
    /// Allow requests without a session to reach this route.
    pub fn public(&mut self) -> &mut Self {
        self.public = true;
        self
    }

    /// Whether the route is reachable without a session.
    pub fn is_public(&self) -> bool {
        self.public
    }

    /// The HTTP method the route answers.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path template the route was registered with, e.g. "/api/expenses/{id}".
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The Rust path of the handler function, shown in debug output.
    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    /// Call the handler.
    pub fn call(&self, state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
        (self.handler)(state, context)
    }

    /// "METHOD /template", the form used in route listings.
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.template)
    }

    fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.matcher.captures(path)?;

        Some(
            self.param_names
                .iter()
                .zip(captures.iter().skip(1))
                .filter_map(|(name, value)| Some((name.clone(), value?.as_str().to_owned())))
                .collect(),
        )
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("template", &self.template)
            .field("matcher", &self.matcher.as_str())
            .field("handler", &self.handler_name)
            .field("public", &self.public)
            .finish()
    }
}

/// A serializable description of a route for the route listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSummary {
    /// The HTTP method, e.g. "GET".
    pub method: String,
    /// The path template.
    pub path: String,
    /// The Rust path of the handler function.
    pub handler: &'static str,
    /// Whether the route is reachable without a session.
    pub public: bool,
}

impl From<&Route> for RouteSummary {
    fn from(route: &Route) -> Self {
        Self {
            method: route.method.to_string(),
            path: route.template.clone(),
            handler: route.handler_name,
            public: route.public,
        }
    }
}

/// The route that matched a request and the parameters captured from its path.
#[derive(Debug)]
pub struct MatchResult<'a> {
    /// The first registered route that matched.
    pub route: &'a Route,
    /// Path parameters by name, e.g. `{"id": "42"}`.
    pub params: HashMap<String, String>,
}

/// Routes in registration order, which is also their match priority.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Create an empty route table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route and return it so it can be configured further, e.g. with [Route::public].
    ///
    /// Overlapping routes are allowed: whichever was registered first wins.
    ///
    /// # Panics
    /// Panics if `template` does not start with '/', if a placeholder does not
    /// fill a whole path segment or if a placeholder name is used twice.
    pub fn register<H>(&mut self, method: Method, template: &str, handler: H) -> &mut Route
    where
        H: Fn(&AppState, &mut RequestContext) -> Result<Reply, Error> + Send + Sync + 'static,
    {
        let (matcher, param_names) = compile_template(template);

        self.routes.push(Route {
            method,
            template: template.to_owned(),
            matcher,
            param_names,
            handler: Box::new(handler),
            handler_name: std::any::type_name::<H>(),
            public: false,
        });

        let last = self.routes.len() - 1;
        &mut self.routes[last]
    }

    /// Register a GET route.
    pub fn get<H>(&mut self, template: &str, handler: H) -> &mut Route
    where
        H: Fn(&AppState, &mut RequestContext) -> Result<Reply, Error> + Send + Sync + 'static,
    {
        self.register(Method::GET, template, handler)
    }

    /// Register a POST route.
    pub fn post<H>(&mut self, template: &str, handler: H) -> &mut Route
    where
        H: Fn(&AppState, &mut RequestContext) -> Result<Reply, Error> + Send + Sync + 'static,
    {
        self.register(Method::POST, template, handler)
    }

    /// Register a PUT route.
    pub fn put<H>(&mut self, template: &str, handler: H) -> &mut Route
    where
        H: Fn(&AppState, &mut RequestContext) -> Result<Reply, Error> + Send + Sync + 'static,
    {
        self.register(Method::PUT, template, handler)
    }

    /// Register a PATCH route.
    pub fn patch<H>(&mut self, template: &str, handler: H) -> &mut Route
    where
        H: Fn(&AppState, &mut RequestContext) -> Result<Reply, Error> + Send + Sync + 'static,
    {
        self.register(Method::PATCH, template, handler)
    }

    /// Register a DELETE route.
    pub fn delete<H>(&mut self, template: &str, handler: H) -> &mut Route
    where
        H: Fn(&AppState, &mut RequestContext) -> Result<Reply, Error> + Send + Sync + 'static,
    {
        self.register(Method::DELETE, template, handler)
    }

    /// Find the first route whose method and template match.
    pub fn match_route(&self, method: &Method, path: &str) -> Option<MatchResult<'_>> {
        self.routes
            .iter()
            .filter(|route| route.method == *method)
            .find_map(|route| {
                route
                    .captures(path)
                    .map(|params| MatchResult { route, params })
            })
    }

    /// The registered routes, in match order.
    #[cfg(test)]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Every route as "METHOD /template".
    pub fn describe(&self) -> Vec<String> {
        self.routes.iter().map(Route::describe).collect()
    }

    /// Every route as a [RouteSummary].
    pub fn summaries(&self) -> Vec<RouteSummary> {
        self.routes.iter().map(RouteSummary::from).collect()
    }
}

/// Turn "/api/expenses/{id}" into `^/api/expenses/([^/]+)$` and `["id"]`.
fn compile_template(template: &str) -> (Regex, Vec<String>) {
    assert!(
        template.starts_with('/'),
        "route template \"{template}\" must start with '/'"
    );

    let mut pattern = String::with_capacity(template.len() + 8);
    pattern.push('^');
    let mut param_names: Vec<String> = Vec::new();

    for segment in template.split('/').skip(1) {
        pattern.push('/');

        if let Some(name) = segment
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
        {
            assert!(
                is_param_name(name),
                "invalid placeholder \"{segment}\" in route template \"{template}\""
            );
            assert!(
                !param_names.iter().any(|existing| existing == name),
                "placeholder \"{name}\" is used more than once in route template \"{template}\""
            );

            pattern.push_str("([^/]+)");
            param_names.push(name.to_owned());
        } else {
            assert!(
                !segment.contains(['{', '}']),
                "placeholders must fill a whole path segment in route template \"{template}\""
            );

            pattern.push_str(&regex::escape(segment));
        }
    }

    pattern.push('$');

    let matcher = Regex::new(&pattern)
        .unwrap_or_else(|error| panic!("route template \"{template}\" is invalid: {error}"));

    (matcher, param_names)
}

fn is_param_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
