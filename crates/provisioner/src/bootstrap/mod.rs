//! Bootstrap injection
//!
//! Every machine boots with exactly one bootstrap source: an Ignition config
//! from a secret, a pre-uploaded Ignition volume, or a cloud-init ISO. The
//! source is selected from the provider config before anything is created.

pub mod cloudinit;
pub mod guestfish;
pub mod ignition;

use std::path::PathBuf;

use crds::{CloudInit, LibvirtMachineProviderConfig};
use libvirt_client::StorageVolume;
use tracing::info;

use crate::domain::{Disk, DomainDef};
use crate::error::ProvisionError;
use crate::secrets::{SecretStore, user_data};
use crate::volume::VolumeManager;
use guestfish::{Guestfish, GuestfishSettings};
use ignition::{IgnitionAttach, RestrictedIgnition};

/// Name of the cloud-init ISO volume of a machine
pub fn cloud_init_volume_name(machine: &str) -> String {
    format!("{machine}_cloud-init")
}

/// Name of the Ignition volume of a machine
pub fn ignition_volume_name(machine: &str) -> String {
    format!("{machine}.ignition")
}

/// The bootstrap source of a machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapPlan {
    /// Ignition config read from the `userData` key of a secret
    Ignition {
        /// Secret name
        user_data_secret: String,
    },
    /// Name or key of an Ignition volume uploaded out of band
    IgnKey(String),
    /// cloud-init NoCloud ISO
    CloudInit(CloudInit),
}

impl BootstrapPlan {
    /// Pick the bootstrap source: Ignition secret, then `ignKey`, then cloud-init
    pub fn select(config: &LibvirtMachineProviderConfig) -> Result<Self, ProvisionError> {
        if let Some(ignition) = &config.ignition {
            if ignition.user_data_secret.is_empty() {
                return Err(ProvisionError::config("ignition.userDataSecret not set"));
            }
            return Ok(Self::Ignition {
                user_data_secret: ignition.user_data_secret.clone(),
            });
        }
        if let Some(key) = config.ign_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(Self::IgnKey(key.clone()));
        }
        if let Some(cloud_init) = &config.cloud_init {
            return Ok(Self::CloudInit(cloud_init.clone()));
        }
        Err(ProvisionError::config("machine does not has a IgnKey nor CloudInit value"))
    }
}

/// Tools and strategy choices for bootstrap injection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapSettings {
    /// Ignition method on hosts without fw_cfg
    pub restricted_ignition: RestrictedIgnition,
    /// ISO builder
    pub mkisofs: PathBuf,
    /// guestfish invocation
    pub guestfish: GuestfishSettings,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            restricted_ignition: RestrictedIgnition::default(),
            mkisofs: PathBuf::from("mkisofs"),
            guestfish: GuestfishSettings::default(),
        }
    }
}

/// Machine the bootstrap artifact is built for
#[derive(Debug, Clone, Copy)]
pub struct BootstrapTarget<'a> {
    /// Namespace of the machine, used for secret lookups
    pub namespace: &'a str,
    /// Machine (and domain) name
    pub machine: &'a str,
    /// Storage pool for auxiliary volumes
    pub pool: &'a str,
    /// Host architecture
    pub arch: &'a str,
}

/// Builds bootstrap artifacts and wires them into a domain definition
pub struct BootstrapInjector<'a> {
    volumes: &'a VolumeManager,
    secrets: &'a dyn SecretStore,
    settings: &'a BootstrapSettings,
}

impl std::fmt::Debug for BootstrapInjector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapInjector")
            .field("settings", self.settings)
            .finish_non_exhaustive()
    }
}

impl<'a> BootstrapInjector<'a> {
    /// Injector creating volumes through `volumes`
    pub fn new(volumes: &'a VolumeManager, secrets: &'a dyn SecretStore, settings: &'a BootstrapSettings) -> Self {
        Self {
            volumes,
            secrets,
            settings,
        }
    }

    /// Apply `plan` to `domain`.
    ///
    /// Returns the auxiliary volume created for the machine, if any.
    pub async fn apply(
        &self,
        plan: &BootstrapPlan,
        target: BootstrapTarget<'_>,
        domain: &mut DomainDef,
    ) -> Result<Option<StorageVolume>, ProvisionError> {
        match plan {
            BootstrapPlan::Ignition { user_data_secret } => {
                self.ignition_from_secret(user_data_secret, target, domain).await.map(Some)
            }
            BootstrapPlan::IgnKey(key) => {
                self.ignition_from_volume(key, target, domain).await?;
                Ok(None)
            }
            BootstrapPlan::CloudInit(cloud_init) => self.cloud_init(cloud_init, target, domain).await,
        }
    }

    async fn ignition_from_secret(
        &self,
        secret: &str,
        target: BootstrapTarget<'_>,
        domain: &mut DomainDef,
    ) -> Result<StorageVolume, ProvisionError> {
        info!(machine = target.machine, "Creating ignition file");
        let content = user_data(self.secrets, target.namespace, secret).await?;
        let staged = ignition::stage_content(&content)?;

        let volume = self
            .volumes
            .upload_raw(target.pool, &ignition_volume_name(target.machine), staged.path())
            .await?;

        match IgnitionAttach::for_arch(target.arch, self.settings.restricted_ignition) {
            IgnitionAttach::Guestfish => {
                let disk = domain
                    .disks
                    .first()
                    .map(|d| d.source.clone())
                    .ok_or_else(|| ProvisionError::config("no primary disk to inject ignition into"))?;
                Guestfish::for_uri(self.settings.guestfish.clone(), self.volumes.client().uri())?
                    .inject(&disk, &volume.key)
                    .await?;
            }
            attach => attach.attach_to_definition(domain, &volume.key),
        }
        Ok(volume)
    }

    async fn ignition_from_volume(
        &self,
        key: &str,
        target: BootstrapTarget<'_>,
        domain: &mut DomainDef,
    ) -> Result<(), ProvisionError> {
        if key.is_empty() {
            return Err(ProvisionError::config("error setting coreos ignition, ignKey is empty"));
        }
        let volume = match self.volumes.lookup_volume(target.pool, key).await {
            Ok(volume) => volume,
            Err(ProvisionError::VolumeNotFound) => {
                return Err(ProvisionError::config(format!(
                    "error getting ignition volume: volume {key} not found"
                )));
            }
            Err(e) => return Err(e),
        };
        IgnitionAttach::for_legacy_volume(target.arch).attach_to_definition(domain, &volume.path);
        Ok(())
    }

    async fn cloud_init(
        &self,
        cloud_init: &CloudInit,
        target: BootstrapTarget<'_>,
        domain: &mut DomainDef,
    ) -> Result<Option<StorageVolume>, ProvisionError> {
        let secret = cloud_init.user_data_secret.as_deref().filter(|s| !s.is_empty());
        if secret.is_none() && !cloud_init.ssh_access && cloud_init.iso_image_path.is_none() {
            return Ok(None);
        }

        let name = cloud_init_volume_name(target.machine);
        let volume = if let Some(iso) = &cloud_init.iso_image_path {
            self.volumes
                .upload_raw(target.pool, &name, std::path::Path::new(iso))
                .await?
        } else {
            let script = match secret {
                Some(secret) => user_data(self.secrets, target.namespace, secret).await?,
                None => cloudinit::DEFAULT_USER_DATA.to_vec(),
            };
            let user_data = cloudinit::render_user_data(&script, cloud_init.ssh_access);
            let meta_data = cloudinit::render_meta_data(target.machine);

            let dir = tempfile::Builder::new()
                .prefix("cloudinit")
                .tempdir()
                .map_err(|e| ProvisionError::io("Cannot create tmp directory for cloudinit ISO generation", e))?;
            let iso = cloudinit::create_iso(&self.settings.mkisofs, dir.path(), &name, &user_data, &meta_data)
                .await
                .map_err(|e| ProvisionError::Tool(format!("unable to create ISO {name}: {e}")))?;
            self.volumes.upload_raw(target.pool, &name, &iso).await?
        };

        domain.disks.push(Disk::cdrom(&volume.key));
        Ok(Some(volume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool_lock::PoolLocks;
    use crate::retry::RetryPolicy;
    use crate::secrets::MemorySecretStore;
    use crds::Ignition;
    use libvirt_client::MockLibvirtClient;
    use std::sync::Arc;

    fn mock() -> MockLibvirtClient {
        let client = MockLibvirtClient::new("qemu:///system");
        client.add_pool("default");
        client
    }

    fn target(arch: &str) -> BootstrapTarget<'_> {
        BootstrapTarget {
            namespace: "default",
            machine: "worker-0",
            pool: "default",
            arch,
        }
    }

    fn domain() -> DomainDef {
        let mut domain = DomainDef::new("worker-0", "kvm");
        domain.disks.push(Disk::virtio(0, "/var/lib/libvirt/images/default/worker-0"));
        domain
    }

    #[test]
    fn test_select_priority() {
        let mut config = LibvirtMachineProviderConfig {
            ignition: Some(Ignition {
                user_data_secret: "worker-user-data".to_string(),
            }),
            ign_key: Some("worker.ign".to_string()),
            cloud_init: Some(CloudInit::default()),
            ..Default::default()
        };
        assert!(matches!(BootstrapPlan::select(&config).unwrap(), BootstrapPlan::Ignition { .. }));

        config.ignition = None;
        assert_eq!(
            BootstrapPlan::select(&config).unwrap(),
            BootstrapPlan::IgnKey("worker.ign".to_string())
        );

        config.ign_key = Some(String::new());
        assert!(matches!(BootstrapPlan::select(&config).unwrap(), BootstrapPlan::CloudInit(_)));
    }

    #[test]
    fn test_select_requires_a_source() {
        let err = BootstrapPlan::select(&LibvirtMachineProviderConfig::default()).unwrap_err();
        assert!(err.is_invalid_config());
        assert_eq!(err.to_string(), "machine does not has a IgnKey nor CloudInit value");

        let config = LibvirtMachineProviderConfig {
            ignition: Some(Ignition::default()),
            ..Default::default()
        };
        assert_eq!(
            BootstrapPlan::select(&config).unwrap_err().to_string(),
            "ignition.userDataSecret not set"
        );
    }

    #[tokio::test]
    async fn test_ignition_secret_firmware_config() {
        let client = mock();
        let volumes = VolumeManager::new(Arc::new(client.clone()), PoolLocks::new(), RetryPolicy::default());
        let secrets = MemorySecretStore::new();
        secrets.insert("default", "worker-user-data", "userData", r#"{"ignition":{}}"#);
        let settings = BootstrapSettings::default();

        let mut domain = domain();
        let created = BootstrapInjector::new(&volumes, &secrets, &settings)
            .apply(
                &BootstrapPlan::Ignition {
                    user_data_secret: "worker-user-data".to_string(),
                },
                target("x86_64"),
                &mut domain,
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(created.name, "worker-0.ignition");
        assert_eq!(client.uploaded("default", "worker-0.ignition").unwrap(), br#"{"ignition":{}}"#);
        assert!(client.stored_volume_xml("default", "worker-0.ignition").unwrap().contains("<format type=\"raw\"/>"));
        assert_eq!(domain.qemu_args[1], format!("name=opt/com.coreos/config,file={}", created.key));
        assert_eq!(domain.disks.len(), 1);
    }

    #[tokio::test]
    async fn test_ignition_secret_virtio_disk_on_s390x() {
        let client = mock();
        let volumes = VolumeManager::new(Arc::new(client.clone()), PoolLocks::new(), RetryPolicy::default());
        let secrets = MemorySecretStore::new();
        secrets.insert("default", "worker-user-data", "userData", "{}");
        let settings = BootstrapSettings::default();

        let mut domain = domain();
        BootstrapInjector::new(&volumes, &secrets, &settings)
            .apply(
                &BootstrapPlan::Ignition {
                    user_data_secret: "worker-user-data".to_string(),
                },
                target("s390x"),
                &mut domain,
            )
            .await
            .unwrap();

        assert!(domain.qemu_args.is_empty());
        let disk = &domain.disks[1];
        assert_eq!(disk.target_dev, "vdb");
        assert_eq!(disk.serial.as_deref(), Some("ignition"));
        assert!(disk.readonly);
    }

    #[tokio::test]
    async fn test_missing_ignition_volume() {
        let client = mock();
        let volumes = VolumeManager::new(Arc::new(client.clone()), PoolLocks::new(), RetryPolicy::default());
        let secrets = MemorySecretStore::new();
        let settings = BootstrapSettings::default();

        let err = BootstrapInjector::new(&volumes, &secrets, &settings)
            .apply(&BootstrapPlan::IgnKey("missing.ign".to_string()), target("x86_64"), &mut domain())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("error getting ignition volume"));
    }

    #[tokio::test]
    async fn test_legacy_ignition_volume() {
        let client = mock();
        let ign = client.add_volume("default", "worker.ign", 10, 10, "raw");
        let volumes = VolumeManager::new(Arc::new(client.clone()), PoolLocks::new(), RetryPolicy::default());
        let secrets = MemorySecretStore::new();
        let settings = BootstrapSettings::default();

        let mut domain = domain();
        let created = BootstrapInjector::new(&volumes, &secrets, &settings)
            .apply(&BootstrapPlan::IgnKey("worker.ign".to_string()), target("x86_64"), &mut domain)
            .await
            .unwrap();
        assert!(created.is_none());
        assert_eq!(domain.qemu_args[1], format!("name=opt/com.coreos/config,file={}", ign.path));
    }

    #[tokio::test]
    async fn test_cloud_init_skipped_without_content() {
        let client = mock();
        let volumes = VolumeManager::new(Arc::new(client.clone()), PoolLocks::new(), RetryPolicy::default());
        let secrets = MemorySecretStore::new();
        let settings = BootstrapSettings::default();

        let mut domain = domain();
        let created = BootstrapInjector::new(&volumes, &secrets, &settings)
            .apply(&BootstrapPlan::CloudInit(CloudInit::default()), target("x86_64"), &mut domain)
            .await
            .unwrap();
        assert!(created.is_none());
        assert_eq!(domain.disks.len(), 1);
        assert!(client.volume_names("default").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cloud_init_iso_with_ssh_access() {
        use base64::Engine;
        use std::os::unix::fs::PermissionsExt;

        // Stand-in for mkisofs that "packs" only the user-data file
        let tools = tempfile::tempdir().unwrap();
        let mkisofs = tools.path().join("mkisofs");
        std::fs::write(&mkisofs, "#!/bin/sh\ncp \"$7\" \"$2\"\n").unwrap();
        std::fs::set_permissions(&mkisofs, std::fs::Permissions::from_mode(0o755)).unwrap();

        let client = mock();
        let volumes = VolumeManager::new(Arc::new(client.clone()), PoolLocks::new(), RetryPolicy::default());
        let secrets = MemorySecretStore::new();
        let settings = BootstrapSettings {
            mkisofs,
            ..Default::default()
        };

        let mut domain = domain();
        let plan = BootstrapPlan::CloudInit(CloudInit {
            user_data_secret: Some(String::new()),
            ssh_access: true,
            iso_image_path: None,
        });
        let created = BootstrapInjector::new(&volumes, &secrets, &settings)
            .apply(&plan, target("x86_64"), &mut domain)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(created.name, "worker-0_cloud-init");
        let user_data = String::from_utf8(client.uploaded("default", "worker-0_cloud-init").unwrap()).unwrap();
        assert!(user_data.contains("ssh_authorized_keys:"));
        let encoded = user_data
            .lines()
            .find(|l| l.contains("base64 -d | bash"))
            .and_then(|l| l.split('\'').nth(1))
            .unwrap();
        assert_eq!(base64::engine::general_purpose::STANDARD.decode(encoded).unwrap(), b":");

        let cdrom = &domain.disks[1];
        assert_eq!(cdrom.target_dev, "hdd");
        assert_eq!(cdrom.target_bus, "ide");
        assert_eq!(cdrom.source, created.key);
    }
}
