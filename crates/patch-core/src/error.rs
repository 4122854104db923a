//! Error types for the routing core

use std::collections::TryReserveError;

use thiserror::Error;

/// Errors reported by backend implementations
#[derive(Debug, Error)]
pub enum BackendError {
    /// I/O error on a backend-owned resource
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A channel specification could not be parsed
    #[error("invalid channel specification: {0}")]
    InvalidChannel(String),

    /// An instance option was malformed or unknown
    #[error("invalid option {key}: {reason}")]
    InvalidOption {
        /// Option key as written in the configuration
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// Backend-specific failure
    #[error("{0}")]
    Other(String),
}

/// Errors that can occur in the routing core
///
/// There is no retry policy: every error during steady-state operation is
/// fatal and leads to an ordered teardown.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Growing the mapping table, registry, or an event buffer failed
    #[error("out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),

    /// No backend instance is registered under the given name
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// A backend rejected a channel specification
    #[error("backend {backend} rejected channel: {source}")]
    InvalidChannel {
        /// Instance name
        backend: String,
        /// Backend-reported cause
        source: BackendError,
    },

    /// A backend failed to start
    #[error("backend {backend} failed to start: {source}")]
    BackendStart {
        /// Instance name
        backend: String,
        /// Backend-reported cause
        source: BackendError,
    },

    /// The descriptor-readiness wait failed
    #[error("descriptor wait failed: {0}")]
    IoWait(#[source] std::io::Error),

    /// A backend failed while handling input readiness
    #[error("backend {backend} failed to handle input: {source}")]
    BackendHandle {
        /// Instance name
        backend: String,
        /// Backend-reported cause
        source: BackendError,
    },

    /// A backend failed while applying an output batch
    #[error("backend {backend} failed to apply output: {source}")]
    BackendNotify {
        /// Instance name
        backend: String,
        /// Backend-reported cause
        source: BackendError,
    },
}
