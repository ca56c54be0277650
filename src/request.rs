//! # Reconciliation requests.
//!
//! A [`Request`] names *what* must be reconciled: a resource kind, a name and an
//! optional [`Tenancy`]. It is a plain value (no handles, no interior mutability)
//! so it can key the work queue's sets, the rate limiter's failure map and the
//! trigger registry directly.
//!
//! Two requests with equal `(kind, name, tenancy)` are the same work item:
//! enqueueing both before a worker picks them up results in one reconciliation.
//!
//! ## Example
//! ```rust
//! use reconcile_engine::{Request, Tenancy};
//!
//! let a = Request::new("api-gateway", "edge");
//! let b = Request::new("api-gateway", "edge");
//! assert_eq!(a, b);
//!
//! let scoped = Request::new("api-gateway", "edge").with_tenancy(Tenancy::new("eu", "web"));
//! assert_ne!(a, scoped);
//! assert_eq!(scoped.to_string(), "api-gateway/eu/web/edge");
//! ```

use std::fmt;

/// Partition and namespace qualifying a resource name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tenancy {
    /// Administrative partition.
    pub partition: String,
    /// Namespace within the partition.
    pub namespace: String,
}

impl Tenancy {
    /// Creates a tenancy from a partition and a namespace.
    pub fn new(partition: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            namespace: namespace.into(),
        }
    }
}

impl Default for Tenancy {
    /// Returns the `default/default` tenancy.
    fn default() -> Self {
        Self::new("default", "default")
    }
}

/// Identity of one unit of reconciliation work.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Request {
    /// Resource type tag (e.g. `"http-route"`).
    pub kind: String,
    /// Resource name.
    pub name: String,
    /// Optional tenancy qualifier.
    pub tenancy: Option<Tenancy>,
}

impl Request {
    /// Creates an unscoped request.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            tenancy: None,
        }
    }

    /// Returns the same request qualified by `tenancy`.
    #[must_use]
    pub fn with_tenancy(mut self, tenancy: Tenancy) -> Self {
        self.tenancy = Some(tenancy);
        self
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tenancy {
            Some(t) => write!(f, "{}/{}/{}/{}", self.kind, t.partition, t.namespace, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}
