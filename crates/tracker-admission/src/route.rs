//! Route templates and the table of registered routes.
//!
//! A template is a literal path in which `{name}` placeholders stand for
//! exactly one non-empty path segment: `/jobs/{id}` matches `/jobs/17` but
//! neither `/jobs/` nor `/jobs/17/notes`.

use std::fmt;

use http::Method;
use regex::Regex;
use thiserror::Error;

/// Template could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("route template must start with '/': {0}")]
    NotAbsolute(String),
    #[error("route template has an empty placeholder: {0}")]
    EmptyPlaceholder(String),
    #[error("route template has unbalanced braces: {0}")]
    UnbalancedBraces(String),
}

/// A compiled route template such as `/api/v1/jobs/{jobId}/interview`.
#[derive(Clone)]
pub struct RouteTemplate {
    raw: String,
    pattern: Regex,
}

impl RouteTemplate {
    /// Compile a template.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if the template is not absolute, has an
    /// empty `{}` placeholder, or has a stray brace.
    pub fn new(template: &str) -> Result<Self, TemplateError> {
        if !template.starts_with('/') {
            return Err(TemplateError::NotAbsolute(template.to_owned()));
        }

        let unbalanced = || TemplateError::UnbalancedBraces(template.to_owned());

        let mut pattern = String::with_capacity(template.len() + 8);
        pattern.push('^');
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            let (head, tail) = rest.split_at(open);
            let close = tail.find('}').ok_or_else(unbalanced)?;
            let name = &tail[1..close];
            if name.contains(['{', '/']) {
                return Err(unbalanced());
            }
            if name.trim().is_empty() {
                return Err(TemplateError::EmptyPlaceholder(template.to_owned()));
            }
            pattern.push_str(&literal(head).ok_or_else(unbalanced)?);
            pattern.push_str("[^/]+");
            rest = &tail[close + 1..];
        }
        pattern.push_str(&literal(rest).ok_or_else(unbalanced)?);
        pattern.push('$');

        let pattern = Regex::new(&pattern).map_err(|_| unbalanced())?;
        Ok(Self {
            raw: template.to_owned(),
            pattern,
        })
    }

    /// Whether `path` matches this template.
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn literal(segment: &str) -> Option<String> {
    (!segment.contains('}')).then(|| regex::escape(segment))
}

impl fmt::Debug for RouteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RouteTemplate").field(&self.raw).finish()
    }
}

impl fmt::Display for RouteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for RouteTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for RouteTemplate {}

/// Whether a route demands a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Anonymous callers are admitted (and throttled harder)
    Public,
    /// A valid, current token is required
    Protected,
}

/// One registered endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub template: RouteTemplate,
    pub method: Method,
    pub access: Access,
}

/// Registered routes, consulted in registration order.
///
/// Requests that match no registered route are treated as protected.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteSpec>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route that admits anonymous callers.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if the template does not compile.
    pub fn public(self, method: Method, template: &str) -> Result<Self, TemplateError> {
        self.route(method, template, Access::Public)
    }

    /// Register a route that requires a token.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if the template does not compile.
    pub fn protected(self, method: Method, template: &str) -> Result<Self, TemplateError> {
        self.route(method, template, Access::Protected)
    }

    /// Register a route.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] if the template does not compile.
    pub fn route(
        mut self,
        method: Method,
        template: &str,
        access: Access,
    ) -> Result<Self, TemplateError> {
        self.routes.push(RouteSpec {
            template: RouteTemplate::new(template)?,
            method,
            access,
        });
        Ok(self)
    }

    /// First registered route matching both path and method.
    ///
    /// A `HEAD` request with no `HEAD` route of its own matches the `GET`
    /// route for the same path.
    pub fn lookup(&self, path: &str, method: &Method) -> Option<&RouteSpec> {
        let find = |method: &Method| {
            self.routes
                .iter()
                .find(|r| r.method == *method && r.template.matches(path))
        };
        find(method).or_else(|| {
            if *method == Method::HEAD {
                find(&Method::GET)
            } else {
                None
            }
        })
    }

    /// Access level for a request; unregistered routes are protected.
    pub fn access(&self, path: &str, method: &Method) -> Access {
        self.lookup(path, method)
            .map_or(Access::Protected, |r| r.access)
    }

    pub fn routes(&self) -> &[RouteSpec] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_placeholder_matches_one_segment() {
        let t = RouteTemplate::new("/api/v1/jobs/{jobId}/interview").unwrap();

        assert!(t.matches("/api/v1/jobs/42/interview"));
        assert!(t.matches("/api/v1/jobs/abc-def/interview"));
        assert!(!t.matches("/api/v1/jobs//interview"));
        assert!(!t.matches("/api/v1/jobs/42/7/interview"));
        assert!(!t.matches("/api/v1/jobs/42/interview/extra"));
        assert!(!t.matches("/prefix/api/v1/jobs/42/interview"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let t = RouteTemplate::new("/files/report.v1/{name}").unwrap();
        assert!(t.matches("/files/report.v1/q3"));
        assert!(!t.matches("/files/reportXv1/q3"));
    }

    #[test]
    fn test_multiple_placeholders() {
        let t = RouteTemplate::new("/users/{userId}/jobs/{jobId}").unwrap();
        assert!(t.matches("/users/u1/jobs/j2"));
        assert!(!t.matches("/users/u1/jobs"));
    }

    #[test]
    fn test_invalid_templates() {
        assert!(matches!(
            RouteTemplate::new("jobs/{id}"),
            Err(TemplateError::NotAbsolute(_))
        ));
        assert!(matches!(
            RouteTemplate::new("/jobs/{}"),
            Err(TemplateError::EmptyPlaceholder(_))
        ));
        assert!(matches!(
            RouteTemplate::new("/jobs/{id"),
            Err(TemplateError::UnbalancedBraces(_))
        ));
    }

    #[test]
    fn test_lookup_is_first_match_on_path_and_method() {
        let table = RouteTable::new()
            .public(Method::POST, "/api/v1/user/register")
            .unwrap()
            .protected(Method::GET, "/api/v1/jobs/{jobId}")
            .unwrap()
            .public(Method::GET, "/api/v1/jobs/featured")
            .unwrap();

        let spec = table.lookup("/api/v1/jobs/featured", &Method::GET).unwrap();
        assert_eq!(spec.template.as_str(), "/api/v1/jobs/{jobId}");
        assert_eq!(spec.access, Access::Protected);

        assert!(table.lookup("/api/v1/user/register", &Method::GET).is_none());
    }

    #[test]
    fn test_head_falls_back_to_get_route() {
        let table = RouteTable::new()
            .public(Method::GET, "/health")
            .unwrap()
            .protected(Method::HEAD, "/status")
            .unwrap()
            .public(Method::GET, "/status")
            .unwrap();

        let spec = table.lookup("/health", &Method::HEAD).unwrap();
        assert_eq!(spec.method, Method::GET);
        assert_eq!(table.access("/health", &Method::HEAD), Access::Public);

        // An explicit HEAD route takes precedence
        assert_eq!(table.access("/status", &Method::HEAD), Access::Protected);

        // Only HEAD borrows from GET
        assert!(table.lookup("/health", &Method::POST).is_none());
    }

    #[test]
    fn test_unregistered_routes_are_protected() {
        let table = RouteTable::new();
        assert_eq!(table.access("/anything", &Method::GET), Access::Protected);
    }

    proptest! {
        #[test]
        fn prop_any_single_segment_matches(segment in "[A-Za-z0-9._~-]{1,24}") {
            let t = RouteTemplate::new("/api/v1/jobs/{jobId}/interview").unwrap();
            let path = format!("/api/v1/jobs/{segment}/interview");
            prop_assert!(t.matches(&path));
        }

        #[test]
        fn prop_slash_never_matches_placeholder(
            a in "[a-z0-9]{1,8}",
            b in "[a-z0-9]{1,8}",
        ) {
            let t = RouteTemplate::new("/api/v1/jobs/{jobId}/interview").unwrap();
            let path = format!("/api/v1/jobs/{a}/{b}/interview");
            prop_assert!(!t.matches(&path));
        }
    }
}
