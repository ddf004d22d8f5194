//! Central error types for the fencing operator
//!
//! Uses `thiserror` for ergonomic, type-safe error handling with
//! automatic `Display` and `Error` trait implementations.

use thiserror::Error;

/// Central error type for the fencing operator
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error from kube-rs that has no more specific mapping
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Operator configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Mechanism or request validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Resource not found in the cluster
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Resource already exists (create conflict)
    #[error("Resource already exists: {kind}/{name}")]
    AlreadyExists { kind: String, name: String },

    /// A dynamic config field has no value for the target and no default
    #[error("No value of '{field}' found for '{target}'")]
    MissingDynamicConfig { field: String, target: String },

    /// Mechanism driver name is not one of the supported drivers
    #[error("Driver {0} not supported")]
    UnsupportedDriver(String),

    /// Retry budget spent without success
    #[error("Gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },
}

/// Result type alias for operator operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Check if this error is a transient store error worth retrying
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::KubeError(_))
    }

    /// Check if this error means the resource is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this error is a create conflict
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    /// Translate a kube-rs error, lifting 404 and 409 responses into
    /// `NotFound` and `AlreadyExists`
    pub fn from_kube(e: kube::Error, kind: &str, namespace: &str, name: &str) -> Self {
        match e {
            kube::Error::Api(resp) if resp.code == 404 => Error::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
            kube::Error::Api(resp) if resp.code == 409 => Error::AlreadyExists {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            other => Error::KubeError(other),
        }
    }
}
