//! Machine actuator CRD definitions
//!
//! The cluster-api `Machine` resource and the libvirt provider documents it
//! carries, together with the codec converting between them.

pub mod codec;
pub mod error;
pub mod machine;
pub mod provider_config;
pub mod provider_status;
pub mod quantity;

pub use codec::*;
pub use error::CodecError;
pub use machine::*;
pub use provider_config::*;
pub use provider_status::*;
