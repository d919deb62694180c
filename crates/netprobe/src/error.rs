//! Error types for diagnostic operations.
//!
//! Only call-level failures live here. A probe that cannot reach its target
//! is not an error; it is a result with `success == false`.

use thiserror::Error;

/// Call-level failures that terminate a whole operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Required input is missing (empty host or target).
    #[error("{0}")]
    InvalidArgument(String),

    /// The requested operation is disabled by configuration.
    #[error("{0}")]
    Unimplemented(String),

    /// The process environment lacks something the operation needs.
    #[error("{0}")]
    FailedPrecondition(String),

    /// A collaborator is missing or an infrastructure call failed.
    #[error("{0}")]
    Internal(String),
}

impl ProbeError {
    /// Canonical code for this error, used in transport responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Unimplemented(_) => "unimplemented",
            Self::FailedPrecondition(_) => "failed_precondition",
            Self::Internal(_) => "internal",
        }
    }

    /// Human-readable message without the code.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArgument(m)
            | Self::Unimplemented(m)
            | Self::FailedPrecondition(m)
            | Self::Internal(m) => m,
        }
    }
}

/// Errors raised by sibling discovery infrastructure.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Kubernetes API request failed.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The service account namespace file could not be read.
    #[error("failed to read namespace file {path}: {source}")]
    Namespace {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
