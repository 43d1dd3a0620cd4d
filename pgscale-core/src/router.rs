//! Routing of request lines to canned responses or query dispatches.
//!
//! A [`RouteTable`] owns a single namespace prefix (`/<namespace>/`) and a
//! [`DispatchPolicy`] deciding which view a matching target resolves to.
//! The router never touches the engine; it only produces an [`Outcome`].

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Longest view name accepted by the parametrized policy.
pub const DEFAULT_MAX_NAME_LEN: usize = 40;

/// Why a view name taken from a request target was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteRejection {
    #[error("view name is empty")]
    EmptyName,
    #[error("view name is {len} bytes long, max {max}")]
    NameTooLong { len: usize, max: usize },
    #[error("view name contains unsupported character {0:?}")]
    UnsafeCharacter(char),
}

/// A validated view identifier, safe to splice into query text.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to a caller-supplied length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewName(String);

impl ViewName {
    pub fn parse(name: &str, max_len: usize) -> Result<Self, RouteRejection> {
        if name.is_empty() {
            return Err(RouteRejection::EmptyName);
        }
        // Length is checked before the contents are inspected at all.
        if name.len() > max_len {
            return Err(RouteRejection::NameTooLong {
                len: name.len(),
                max: max_len,
            });
        }

        let mut chars = name.chars();
        if let Some(first) = chars.next() {
            if !(first.is_ascii_alphabetic() || first == '_') {
                return Err(RouteRejection::UnsafeCharacter(first));
            }
        }
        if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
            return Err(RouteRejection::UnsafeCharacter(bad));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolved query for a dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryId {
    view: ViewName,
}

impl QueryId {
    pub fn new(view: ViewName) -> Self {
        Self { view }
    }

    pub fn view(&self) -> &ViewName {
        &self.view
    }

    /// Query text handed to the executor.
    pub fn sql(&self) -> String {
        format!("select * from {}", self.view)
    }
}

/// Which dispatch policy a route table uses, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Parametrized,
    Fixed,
}

/// How the remainder of a matching target becomes a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// The trailing segment names the view to select from.
    Parametrized { max_name_len: usize },
    /// Trailing content is ignored; every match resolves to the same view.
    Fixed { view: ViewName },
}

/// Result of routing one request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    MethodNotSupported,
    NotFound,
    Rejected(RouteRejection),
    Dispatch(QueryId),
}

/// Route table for the statistics namespace.
#[derive(Debug, Clone)]
pub struct RouteTable {
    prefix: String,
    policy: DispatchPolicy,
    allowed_views: Option<Vec<String>>,
}

impl RouteTable {
    pub fn new(namespace: &str, policy: DispatchPolicy) -> Self {
        Self {
            prefix: format!("/{}/", namespace.trim_matches('/')),
            policy,
            allowed_views: None,
        }
    }

    /// Route `/<namespace>/<name>` to `select * from <name>`.
    pub fn parametrized(namespace: &str) -> Self {
        Self::new(
            namespace,
            DispatchPolicy::Parametrized {
                max_name_len: DEFAULT_MAX_NAME_LEN,
            },
        )
    }

    /// Route everything under `/<namespace>/` to a single view.
    pub fn fixed(namespace: &str, view: ViewName) -> Self {
        Self::new(namespace, DispatchPolicy::Fixed { view })
    }

    /// Restrict the parametrized policy to the given view names.
    ///
    /// Names outside the list resolve to [`Outcome::NotFound`].
    pub fn with_allowed_views<I, S>(mut self, views: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_views = Some(views.into_iter().map(Into::into).collect());
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn route(&self, method: &str, target: &str) -> Outcome {
        if method != "GET" {
            return Outcome::MethodNotSupported;
        }

        let Some(rest) = target.strip_prefix(self.prefix.as_str()) else {
            return Outcome::NotFound;
        };

        match &self.policy {
            DispatchPolicy::Fixed { view } => Outcome::Dispatch(QueryId::new(view.clone())),
            DispatchPolicy::Parametrized { max_name_len } => {
                let view = match ViewName::parse(rest, *max_name_len) {
                    Ok(view) => view,
                    Err(reason) => return Outcome::Rejected(reason),
                };
                if let Some(allowed) = &self.allowed_views {
                    if !allowed.iter().any(|v| v == view.as_str()) {
                        return Outcome::NotFound;
                    }
                }
                Outcome::Dispatch(QueryId::new(view))
            }
        }
    }
}
