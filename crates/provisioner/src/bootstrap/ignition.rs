//! Ignition config staging and attachment

use std::io::Write;

use tempfile::NamedTempFile;

use crate::domain::{DomainDef, Disk};
use crate::error::ProvisionError;

/// fw_cfg key Ignition reads its config from
pub const FW_CFG_NAME: &str = "opt/com.coreos/config";

/// How an Ignition config reaches the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnitionAttach {
    /// qemu firmware configuration device
    FirmwareConfig,
    /// Read-only virtio disk with serial `ignition`
    VirtioDisk,
    /// Written into the boot filesystem of the primary disk with guestfish
    Guestfish,
}

/// Injection method for architectures without fw_cfg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestrictedIgnition {
    /// Attach a virtio disk
    #[default]
    Disk,
    /// Inject with guestfish (s390 only)
    Guestfish,
}

impl std::str::FromStr for RestrictedIgnition {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disk" => Ok(Self::Disk),
            "guestfish" => Ok(Self::Guestfish),
            other => Err(ProvisionError::config(format!(
                "unknown ignition injection method {other:?}, expected \"disk\" or \"guestfish\""
            ))),
        }
    }
}

impl IgnitionAttach {
    /// Strategy for an Ignition config taken from a secret
    pub fn for_arch(arch: &str, restricted: RestrictedIgnition) -> Self {
        if !crate::capabilities::is_restricted_arch(arch) {
            Self::FirmwareConfig
        } else if arch.starts_with("s390") && restricted == RestrictedIgnition::Guestfish {
            Self::Guestfish
        } else {
            Self::VirtioDisk
        }
    }

    /// Strategy for a pre-uploaded Ignition volume
    pub fn for_legacy_volume(arch: &str) -> Self {
        if crate::capabilities::is_restricted_arch(arch) {
            Self::VirtioDisk
        } else {
            Self::FirmwareConfig
        }
    }

    /// Attach the config at `path` for the strategies that only touch the definition
    pub(crate) fn attach_to_definition(self, domain: &mut DomainDef, path: &str) {
        match self {
            Self::FirmwareConfig => {
                domain.qemu_args = vec!["-fw_cfg".to_string(), format!("name={FW_CFG_NAME},file={path}")];
            }
            Self::VirtioDisk => domain.disks.push(Disk::ignition(path)),
            Self::Guestfish => {}
        }
    }
}

/// Copy Ignition content into a temporary file.
///
/// `content` is either the path of an existing file or a JSON object.
pub fn stage_content(content: &[u8]) -> Result<NamedTempFile, ProvisionError> {
    let text = String::from_utf8_lossy(content);
    let existing = std::path::Path::new(text.as_ref());

    let mut staged =
        NamedTempFile::new().map_err(|e| ProvisionError::io("Cannot create tmp file for Ignition", e))?;

    if existing.is_file() {
        let mut source = std::fs::File::open(existing)
            .map_err(|e| ProvisionError::io(format!("Error opening supplied Ignition file {text}"), e))?;
        std::io::copy(&mut source, &mut staged)
            .map_err(|e| ProvisionError::io(format!("Error copying supplied Ignition file {text}"), e))?;
    } else {
        let is_object = serde_json::from_slice::<serde_json::Value>(content).is_ok_and(|v| v.is_object());
        if !is_object {
            return Err(ProvisionError::config(format!(
                "coreos_ignition 'content' is neither a file nor a valid json object {text}"
            )));
        }
        staged
            .write_all(content)
            .map_err(|e| ProvisionError::io("Cannot write Ignition object to temporary ignition file", e))?;
    }

    staged
        .flush()
        .map_err(|e| ProvisionError::io("Cannot write Ignition object to temporary ignition file", e))?;
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_per_arch() {
        assert_eq!(
            IgnitionAttach::for_arch("x86_64", RestrictedIgnition::Guestfish),
            IgnitionAttach::FirmwareConfig
        );
        assert_eq!(
            IgnitionAttach::for_arch("s390x", RestrictedIgnition::Disk),
            IgnitionAttach::VirtioDisk
        );
        assert_eq!(
            IgnitionAttach::for_arch("s390x", RestrictedIgnition::Guestfish),
            IgnitionAttach::Guestfish
        );
        assert_eq!(
            IgnitionAttach::for_arch("ppc64le", RestrictedIgnition::Guestfish),
            IgnitionAttach::VirtioDisk
        );
        assert_eq!(IgnitionAttach::for_legacy_volume("s390x"), IgnitionAttach::VirtioDisk);
    }

    #[test]
    fn test_parse_restricted_ignition() {
        assert_eq!("disk".parse::<RestrictedIgnition>().unwrap(), RestrictedIgnition::Disk);
        assert_eq!(
            "guestfish".parse::<RestrictedIgnition>().unwrap(),
            RestrictedIgnition::Guestfish
        );
        assert!("fw_cfg".parse::<RestrictedIgnition>().is_err());
    }

    #[test]
    fn test_stage_json_object() {
        let staged = stage_content(br#"{"ignition":{"version":"3.2.0"}}"#).unwrap();
        let written = std::fs::read(staged.path()).unwrap();
        assert_eq!(written, br#"{"ignition":{"version":"3.2.0"}}"#);
    }

    #[test]
    fn test_stage_existing_file() {
        let mut source = NamedTempFile::new().unwrap();
        source.write_all(b"{\"from\":\"file\"}").unwrap();

        let staged = stage_content(source.path().display().to_string().as_bytes()).unwrap();
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"{\"from\":\"file\"}");
    }

    #[test]
    fn test_stage_rejects_other_content() {
        let err = stage_content(b"#!/bin/bash").unwrap_err();
        assert!(err.is_invalid_config());
        assert!(err
            .to_string()
            .starts_with("coreos_ignition 'content' is neither a file nor a valid json object"));
        assert!(stage_content(b"[1, 2]").is_err());
    }

    #[test]
    fn test_firmware_config_args() {
        let mut domain = DomainDef::new("worker-0", "kvm");
        IgnitionAttach::FirmwareConfig.attach_to_definition(&mut domain, "/var/lib/libvirt/images/worker-0.ignition");
        assert_eq!(
            domain.qemu_args,
            vec![
                "-fw_cfg".to_string(),
                "name=opt/com.coreos/config,file=/var/lib/libvirt/images/worker-0.ignition".to_string()
            ]
        );
    }
}
