//! Controller configuration from environment variables

use std::net::SocketAddr;
use std::path::PathBuf;

use provisioner::{BootstrapSettings, DEFAULT_DOMAIN_TYPE, DomainSettings, GuestfishSettings, RestrictedIgnition};

use crate::error::ActuatorError;
use crate::events::DEFAULT_REPORTER;

/// Default listen address of the metrics and probes endpoint
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Settings of the machine controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorConfig {
    /// Namespace to watch, `None` for the default namespace
    pub namespace: Option<String>,
    /// Hypervisor type written into domain definitions
    pub domain_type: String,
    /// Ignition method on architectures without fw_cfg
    pub restricted_ignition: RestrictedIgnition,
    /// virsh binary
    pub virsh: Option<PathBuf>,
    /// ISO builder for cloud-init
    pub mkisofs: PathBuf,
    /// guestfish binary
    pub guestfish: PathBuf,
    /// Reporting component of machine events
    pub event_reporter: String,
    /// Metrics and probes listen address
    pub metrics_addr: SocketAddr,
}

impl ActuatorConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ActuatorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ActuatorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let restricted_ignition = match get("RESTRICTED_ARCH_IGNITION") {
            Some(value) => value
                .parse()
                .map_err(|e: provisioner::ProvisionError| ActuatorError::InvalidConfig(e.to_string()))?,
            None => RestrictedIgnition::default(),
        };

        let metrics_addr = get("METRICS_ADDR")
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string())
            .parse()
            .map_err(|e| ActuatorError::InvalidConfig(format!("METRICS_ADDR: {e}")))?;

        Ok(Self {
            namespace: get("WATCH_NAMESPACE"),
            domain_type: get("LIBVIRT_DOMAIN_TYPE")
                .or_else(|| get("TERRAFORM_LIBVIRT_TEST_DOMAIN_TYPE"))
                .unwrap_or_else(|| DEFAULT_DOMAIN_TYPE.to_string()),
            restricted_ignition,
            virsh: get("VIRSH_PATH").map(PathBuf::from),
            mkisofs: PathBuf::from(get("MKISOFS_PATH").unwrap_or_else(|| "mkisofs".to_string())),
            guestfish: PathBuf::from(get("GUESTFISH_PATH").unwrap_or_else(|| "guestfish".to_string())),
            event_reporter: get("EVENT_REPORTER").unwrap_or_else(|| DEFAULT_REPORTER.to_string()),
            metrics_addr,
        })
    }

    /// Domain build settings derived from this configuration
    pub fn domain_settings(&self) -> DomainSettings {
        DomainSettings {
            domain_type: self.domain_type.clone(),
            bootstrap: BootstrapSettings {
                restricted_ignition: self.restricted_ignition,
                mkisofs: self.mkisofs.clone(),
                guestfish: GuestfishSettings {
                    binary: self.guestfish.clone(),
                    ..GuestfishSettings::default()
                },
            },
        }
    }
}
