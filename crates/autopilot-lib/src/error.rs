//! Error types shared across the control plane
//!
//! Library seams return these structured errors; the service binary and
//! the CLI wrap them in `anyhow` at the edges.

use thiserror::Error;

/// Errors raised by the Cluster State Accessor
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The requested object does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// Transport or API-level failure from the Kubernetes client
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The orchestrator rejected or failed the request
    #[error("orchestrator request failed: {0}")]
    Api(String),

    /// An object was returned without a field the control plane relies on
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Executing a command inside a pod failed
    #[error("exec in pod {pod} failed: {message}")]
    Exec { pod: String, message: String },

    /// An operation did not finish within its deadline
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// A node lifecycle command exited unsuccessfully
    #[error("command `{command}` failed with exit code {code:?}: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl ClusterError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ClusterError::NotFound {
            kind,
            name: name.into(),
        }
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors raised by the scheduling store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),
}

/// Errors raised when talking to a backend peer
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("request to peer {peer} failed: {source}")]
    Http {
        peer: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("peer {peer} answered {status}: {body}")]
    Status {
        peer: String,
        status: u16,
        body: String,
    },

    #[error("peer {peer} did not answer within {secs}s")]
    Timeout { peer: String, secs: u64 },
}

/// Validation failures for application registrations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("ports is empty")]
    EmptyPorts,

    #[error("ports is not a map")]
    PortsNotMap,

    #[error("port {name} value is not an integer")]
    PortNotInteger { name: String },

    #[error("port {name}={port} is outside {min}-{max}")]
    PortOutOfRange {
        name: String,
        port: i64,
        min: u16,
        max: u16,
    },

    #[error("field {0} must not be empty")]
    MissingField(&'static str),
}

/// Errors raised by the backend latency scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid registration: {0}")]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}
