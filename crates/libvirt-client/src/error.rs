//! libvirt client errors

use thiserror::Error;

/// Errors that can occur when talking to libvirt
#[derive(Debug, Error)]
pub enum LibvirtError {
    /// Domain, volume, pool or network does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// libvirt refused the operation in the object's current state
    #[error("Requested operation is not valid: {0}")]
    OperationInvalid(String),

    /// The hypervisor driver does not support the call or flag
    #[error("this function is not supported: {0}")]
    NoSupport(String),

    /// An argument or flag was rejected
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Any other failure reported by libvirt
    #[error("command '{command}' failed ({status}): {stderr}")]
    Command {
        /// The command line that failed
        command: String,
        /// Exit status
        status: String,
        /// Error output
        stderr: String,
    },

    /// Output could not be understood
    #[error("Parse error: {0}")]
    Parse(String),

    /// Connection URI could not be parsed
    #[error("invalid connection URI {0:?}")]
    InvalidUri(String),

    /// Local I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LibvirtError {
    /// Whether the error reports a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Classify libvirt's error output
    pub fn from_stderr(command: String, status: String, stderr: &str) -> Self {
        let message = stderr
            .lines()
            .map(|l| l.trim_start_matches("error:").trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(": ");
        let lower = message.to_ascii_lowercase();

        if lower.contains("not found") || lower.contains("no storage vol with matching") {
            Self::NotFound(message)
        } else if lower.contains("requested operation is not valid") {
            Self::OperationInvalid(message)
        } else if lower.contains("not supported") {
            Self::NoSupport(message)
        } else if lower.contains("invalid argument") {
            Self::InvalidArg(message)
        } else {
            Self::Command {
                command,
                status,
                stderr: message,
            }
        }
    }
}
