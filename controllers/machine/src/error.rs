//! Controller-specific error types.
//!
//! Machine operations fail with [`ActuatorError::Machine`], which carries the
//! machine's namespace and name together with a coarse [`FailureReason`]
//! used for the Kubernetes event.

use std::fmt;

use kube::Error as KubeError;
use thiserror::Error;

/// Failure class reported in machine events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The provider config could not be decoded or is invalid
    InvalidConfiguration,
    /// Creating the domain or one of its volumes failed
    CreateError,
    /// Tearing the machine down failed
    DeleteError,
    /// Refreshing the machine failed
    UpdateError,
}

impl FailureReason {
    /// Event note for this failure class
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "InvalidConfiguration",
            Self::CreateError => "CreateError",
            Self::DeleteError => "DeleteError",
            Self::UpdateError => "UpdateError",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the machine controller.
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid controller configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics endpoint failed
    #[error("Metrics server error: {0}")]
    Metrics(String),

    /// Adding or removing the machine finalizer failed
    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<kube_runtime::finalizer::Error<ActuatorError>>),

    /// An operation on a machine failed
    #[error("{namespace}/{name}: {message}: {source}")]
    Machine {
        /// Namespace of the machine
        namespace: String,
        /// Name of the machine
        name: String,
        /// What was being done
        message: String,
        /// Failure class
        reason: FailureReason,
        /// Underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ActuatorError {
    /// Failure class of a machine error
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            Self::Machine { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
