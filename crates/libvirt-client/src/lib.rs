//! libvirt client
//!
//! A small, mockable client for the libvirt operations the machine actuator
//! needs: domain lifecycle, storage volumes, network DHCP host entries and
//! host capabilities.
//!
//! # Example
//!
//! ```no_run
//! use libvirt_client::{ClientBuilder, VirshClientBuilder, UndefineFlags};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = VirshClientBuilder::new().build("qemu:///system", "default").await?;
//!
//! let state = client.domain_state("worker-0").await?;
//! println!("worker-0 is {}", state.as_virsh());
//!
//! client.undefine_domain("worker-0", UndefineFlags { nvram: true }).await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **virsh backend**: one `virsh` process per call, no C library needed at build time
//! - **Error classification**: not-found, invalid-operation and unsupported failures are distinct variants
//! - **test-util**: `MockLibvirtClient`, an in-memory hypervisor for unit tests

pub mod builder;
pub mod error;
#[path = "trait.rs"]
pub mod libvirt_trait;
#[cfg(feature = "test-util")]
pub mod mock;
pub mod parse;
pub mod types;
pub mod uri;
pub mod virsh;

pub use builder::{ClientBuilder, VirshClientBuilder};
#[cfg(feature = "test-util")]
pub use builder::MockClientBuilder;
pub use error::LibvirtError;
pub use libvirt_trait::LibvirtClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockLibvirtClient, NetworkHost};
pub use types::*;
pub use uri::{ConnectionUri, Transport};
pub use virsh::VirshClient;
