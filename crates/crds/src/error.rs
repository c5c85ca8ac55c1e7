//! Provider codec errors

use thiserror::Error;

/// Errors raised while decoding or encoding provider documents
#[derive(Debug, Error)]
pub enum CodecError {
    /// The machine carries no provider config value
    #[error("no Value in ProviderConfig")]
    MissingValue,

    /// The document is not the expected apiVersion/kind
    #[error("unexpected object when parsing provider document: apiVersion={api_version:?} kind={kind:?}")]
    UnexpectedObject {
        /// apiVersion found in the document
        api_version: String,
        /// kind found in the document
        kind: String,
    },

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A resource quantity could not be converted to bytes
    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),
}
