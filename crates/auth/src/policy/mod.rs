//! Role-based access-control policy engine, using Casbin for enforcement.
//!
//! - `model`: the textual policy model (request/policy/role definitions,
//!   effect, matcher)
//! - `store`: durable rule storage contract
//! - `adapter`: casbin adapter over a [`PolicyStore`]
//! - `engine`: the decision point holding the current enforcer

pub mod adapter;
pub mod engine;
pub mod model;
pub mod store;

use casbin::error::AdapterError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use adapter::StoreAdapter;
pub use engine::{Decision, PolicyEngine};
pub use model::{DEFAULT_MODEL, PolicyModel};
pub use store::{AddOutcome, PolicySet, PolicyStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The textual model is invalid.
    #[error("invalid policy model: {0}")]
    Model(String),

    /// The matcher expression does not parse or type-check.
    #[error("invalid matcher: {0}")]
    Matcher(String),

    /// The backing store failed.
    #[error("policy store error: {0}")]
    Store(String),
}

/// Adapter failures carry the store's own error back out.
pub(crate) fn casbin_error(err: casbin::Error) -> PolicyError {
    match err {
        casbin::Error::ModelError(e) => PolicyError::Model(e.to_string()),
        casbin::Error::RequestError(e) => PolicyError::Model(e.to_string()),
        casbin::Error::RhaiError(e) => PolicyError::Matcher(e.to_string()),
        casbin::Error::RhaiParseError(e) => PolicyError::Matcher(e.to_string()),
        casbin::Error::AdapterError(AdapterError(inner)) => match inner.downcast::<PolicyError>() {
            Ok(policy) => *policy,
            Err(other) => PolicyError::Store(other.to_string()),
        },
        other => PolicyError::Store(other.to_string()),
    }
}

/// An allow rule `(subject, object, action)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyRule {
    pub subject: String,
    pub object: String,
    pub action: String,
}

impl PolicyRule {
    pub fn new(subject: impl Into<String>, object: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    pub(crate) fn values(&self) -> Vec<String> {
        vec![self.subject.clone(), self.object.clone(), self.action.clone()]
    }

    pub(crate) fn from_values(values: &[String]) -> Option<Self> {
        match values {
            [subject, object, action, ..] => Some(Self::new(subject.as_str(), object.as_str(), action.as_str())),
            _ => None,
        }
    }
}

impl core::fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.object, self.action)
    }
}

/// `child` inherits every rule granted to `parent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleGrouping {
    pub child: String,
    pub parent: String,
}

impl RoleGrouping {
    pub fn new(child: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            child: child.into(),
            parent: parent.into(),
        }
    }

    pub(crate) fn values(&self) -> Vec<String> {
        vec![self.child.clone(), self.parent.clone()]
    }

    pub(crate) fn from_values(values: &[String]) -> Option<Self> {
        match values {
            [child, parent, ..] => Some(Self::new(child.as_str(), parent.as_str())),
            _ => None,
        }
    }
}

impl core::fmt::Display for RoleGrouping {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({} -> {})", self.child, self.parent)
    }
}
