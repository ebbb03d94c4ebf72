//! Route protection classification
//!
//! A path is protected when it falls under a protected prefix and is not one
//! of that prefix's carved-out exceptions. Everything else is public.

use std::borrow::Cow;

use serde::Serialize;

use crate::config::{ProtectedRouteConfig, RoutesConfig};

/// Classification of a request path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteClass {
    /// No session required
    Public,
    /// Valid session required before the handler runs
    Protected,
}

/// A protected prefix with public exceptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    prefix: String,
    except: Vec<String>,
}

impl RoutePattern {
    /// Protect everything starting with `prefix`
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            except: Vec::new(),
        }
    }

    /// Keep exactly `path` public
    #[must_use]
    pub fn except(mut self, path: impl Into<String>) -> Self {
        self.except.push(path.into());
        self
    }

    /// Whether `path` falls under this pattern's prefix.
    ///
    /// The prefix is a plain string prefix, so `/admin` also covers
    /// `/administrator`.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    /// Whether `path` is one of the carved-out exceptions.
    /// Only the exact path matches, with or without one trailing slash.
    #[must_use]
    pub fn is_exception(&self, path: &str) -> bool {
        self.except.iter().any(|e| is_same_path(path, e))
    }
}

impl From<&ProtectedRouteConfig> for RoutePattern {
    fn from(config: &ProtectedRouteConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            except: config.except.clone(),
        }
    }
}

fn is_same_path(path: &str, exception: &str) -> bool {
    let exception = exception.trim_end_matches('/');
    match path.strip_prefix(exception) {
        Some(rest) => rest.is_empty() || rest == "/",
        None => false,
    }
}

/// Immutable, ordered set of protection rules
#[derive(Debug, Clone, Default)]
pub struct RouteClassifier {
    patterns: Vec<RoutePattern>,
}

impl RouteClassifier {
    /// Create a classifier from ordered patterns
    #[must_use]
    pub fn new(patterns: Vec<RoutePattern>) -> Self {
        Self { patterns }
    }

    /// Create a classifier from configuration
    #[must_use]
    pub fn from_config(config: &RoutesConfig) -> Self {
        Self::new(config.protected.iter().map(RoutePattern::from).collect())
    }

    /// Classify a request path. Total: unmatched paths are public.
    ///
    /// The first pattern whose prefix matches decides.
    #[must_use]
    pub fn classify(&self, path: &str) -> RouteClass {
        let path = collapse_slashes(path);
        match self.patterns.iter().find(|p| p.matches(&path)) {
            Some(pattern) if !pattern.is_exception(&path) => RouteClass::Protected,
            _ => RouteClass::Public,
        }
    }

    /// The configured patterns
    #[must_use]
    pub fn patterns(&self) -> &[RoutePattern] {
        &self.patterns
    }
}

/// `//admin///users` -> `/admin/users`
fn collapse_slashes(path: &str) -> Cow<'_, str> {
    if !path.contains("//") {
        return Cow::Borrowed(path);
    }
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' && prev_slash {
            continue;
        }
        prev_slash = c == '/';
        out.push(c);
    }
    Cow::Owned(out)
}
