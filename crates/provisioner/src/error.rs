//! Provisioning errors

use libvirt_client::LibvirtError;
use thiserror::Error;

/// Errors raised while provisioning volumes and domains
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The machine spec is missing or contradicts required settings
    #[error("{0}")]
    InvalidConfig(String),

    /// The domain does not exist
    #[error("Domain not found")]
    DomainNotFound,

    /// The volume does not exist
    #[error("Volume not found")]
    VolumeNotFound,

    /// A hypervisor call failed
    #[error("{context}: {source}")]
    Libvirt {
        /// What was being done
        context: String,
        /// The hypervisor error
        #[source]
        source: LibvirtError,
    },

    /// Host capabilities did not describe a usable guest
    #[error("{0}")]
    Capabilities(String),

    /// An XML document could not be read or written
    #[error("XML error: {0}")]
    Xml(String),

    /// Secret lookup failed
    #[error("{0}")]
    Secret(String),

    /// An external tool (mkisofs, guestfish, ssh) failed
    #[error("{0}")]
    Tool(String),

    /// Local I/O failed
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// The I/O error
        #[source]
        source: std::io::Error,
    },

    /// Fetching an image over HTTP failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A retried operation did not succeed before the deadline
    #[error("{0}")]
    Timeout(String),
}

impl ProvisionError {
    /// Whether the error was caused by the machine spec rather than the infrastructure
    pub fn is_invalid_config(&self) -> bool {
        matches!(self, Self::InvalidConfig(_))
    }

    /// Whether the error reports a missing domain or volume
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::DomainNotFound | Self::VolumeNotFound => true,
            Self::Libvirt { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Attach context to hypervisor errors
pub(crate) trait LibvirtResultExt<T> {
    fn with_context<F, S>(self, context: F) -> Result<T, ProvisionError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> LibvirtResultExt<T> for Result<T, LibvirtError> {
    fn with_context<F, S>(self, context: F) -> Result<T, ProvisionError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| ProvisionError::Libvirt {
            context: context().into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(ProvisionError::DomainNotFound.is_not_found());
        assert!(ProvisionError::VolumeNotFound.is_not_found());

        let wrapped: Result<(), _> = Err(LibvirtError::NotFound("no domain".to_string()));
        let err = wrapped.with_context(|| "lookup").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "lookup: Not found: no domain");

        assert!(!ProvisionError::config("x").is_not_found());
        assert!(ProvisionError::config("x").is_invalid_config());
    }
}
