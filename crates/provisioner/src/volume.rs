//! Volume manager
//!
//! Creates machine disks inside a storage pool, either empty, filled from a
//! source image, or as a copy-on-write child of a base volume.

use std::sync::Arc;

use libvirt_client::{LibvirtClientTrait, LibvirtError, StorageVolume};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{LibvirtResultExt, ProvisionError};
use crate::image::ImageSource;
use crate::pool_lock::PoolLocks;
use crate::retry::RetryPolicy;
use crate::xml::XmlWriter;

/// Capacity of a volume created without a size
pub const DEFAULT_VOLUME_SIZE: u64 = 17_706_254_336;

const DEFAULT_FORMAT: &str = "qcow2";

/// What to create
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeRequest {
    /// Volume name, unique within the pool
    pub name: String,
    /// Storage pool
    pub pool: String,
    /// Name or key of the base volume to layer on
    pub base_volume: Option<String>,
    /// Image to fill the volume from
    pub source: Option<String>,
    /// Requested capacity in bytes
    pub size: Option<u64>,
    /// Volume format, `qcow2` by default
    pub format: Option<String>,
}

/// Volume definition as written to libvirt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDef {
    /// Volume name
    pub name: String,
    /// Capacity in bytes
    pub capacity: u64,
    /// Format type
    pub format: String,
    /// Backing store path and format
    pub backing_store: Option<(String, String)>,
}

impl VolumeDef {
    /// Definition with the default capacity and format
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: DEFAULT_VOLUME_SIZE,
            format: DEFAULT_FORMAT.to_string(),
            backing_store: None,
        }
    }

    /// Render the `<volume>` document
    pub fn to_xml(&self) -> Result<String, ProvisionError> {
        let capacity = self.capacity.to_string();
        let mut w = XmlWriter::new();
        w.start_element("volume", &[("type", "file")])?;
        w.write_text_element("name", &self.name)?;
        w.write_text_element_with_attrs("capacity", &capacity, &[("unit", "bytes")])?;
        w.start_element("target", &[])?;
        w.write_empty_element("format", &[("type", &self.format)])?;
        w.start_element("permissions", &[])?;
        w.write_text_element("mode", "644")?;
        w.end_element("permissions")?;
        w.end_element("target")?;
        if let Some((path, format)) = &self.backing_store {
            w.start_element("backingStore", &[])?;
            w.write_text_element("path", path)?;
            w.write_empty_element("format", &[("type", format)])?;
            w.end_element("backingStore")?;
        }
        w.end_element("volume")?;
        w.into_string()
    }
}

#[derive(Debug, Default, Deserialize)]
struct VolumeXml {
    #[serde(default)]
    target: Option<VolumeTargetXml>,
}

#[derive(Debug, Default, Deserialize)]
struct VolumeTargetXml {
    #[serde(default)]
    format: Option<VolumeFormatXml>,
}

#[derive(Debug, Default, Deserialize)]
struct VolumeFormatXml {
    #[serde(rename = "@type")]
    format_type: String,
}

/// Format type declared in a volume document
pub fn volume_format(xml: &str) -> Result<Option<String>, ProvisionError> {
    let doc: VolumeXml = quick_xml::de::from_str(xml).map_err(|e| ProvisionError::Xml(format!("volume: {e}")))?;
    Ok(doc.target.and_then(|t| t.format).map(|f| f.format_type))
}

/// Create, find and delete storage volumes
#[derive(Clone)]
pub struct VolumeManager {
    client: Arc<dyn LibvirtClientTrait>,
    locks: PoolLocks,
    retry: RetryPolicy,
}

impl std::fmt::Debug for VolumeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeManager")
            .field("uri", &self.client.uri())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl VolumeManager {
    /// Manager over `client`, serializing pool mutations through `locks`
    pub fn new(client: Arc<dyn LibvirtClientTrait>, locks: PoolLocks, retry: RetryPolicy) -> Self {
        Self { client, locks, retry }
    }

    /// The hypervisor client
    pub fn client(&self) -> &dyn LibvirtClientTrait {
        self.client.as_ref()
    }

    /// Refresh a pool, retrying while libvirt reports it busy
    pub async fn refresh_pool(&self, pool: &str) -> Result<(), ProvisionError> {
        self.retry
            .wait_for_success("Error refreshing pool for volume", || self.client.refresh_pool(pool))
            .await
    }

    /// Look a volume up by name in `pool`, falling back to a lookup by key
    pub async fn lookup_volume(&self, pool: &str, name_or_key: &str) -> Result<StorageVolume, ProvisionError> {
        match self.client.lookup_volume(pool, name_or_key).await {
            Ok(volume) => Ok(volume),
            Err(e) if e.is_not_found() => match self.client.lookup_volume_by_key(name_or_key).await {
                Ok(volume) => Ok(volume),
                Err(e) if e.is_not_found() => Err(ProvisionError::VolumeNotFound),
                Err(e) => Err(e).with_context(|| format!("can't retrieve volume {name_or_key}")),
            },
            Err(e) => Err(e).with_context(|| format!("can't retrieve volume {name_or_key} for pool {pool}")),
        }
    }

    /// Whether a volume named `name` exists in `pool`
    pub async fn volume_exists(&self, pool: &str, name: &str) -> Result<bool, ProvisionError> {
        match self.client.lookup_volume(pool, name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e).with_context(|| format!("can't check volume {name} in pool {pool}")),
        }
    }

    /// Create a volume and return its key
    pub async fn create_volume(&self, request: &VolumeRequest) -> Result<String, ProvisionError> {
        if request.source.is_some() && request.base_volume.is_some() {
            return Err(ProvisionError::config(
                "'base_volume_name' can't be specified when also 'source' is given",
            ));
        }

        let _guard = self.locks.lock(&request.pool).await;
        self.refresh_pool(&request.pool).await?;

        if self.volume_exists(&request.pool, &request.name).await? {
            return Err(ProvisionError::config(format!(
                "storage volume '{}' already exists",
                request.name
            )));
        }

        let mut def = VolumeDef::new(&request.name);
        if let Some(format) = &request.format {
            def.format.clone_from(format);
        }

        let mut image = None;
        if let Some(source) = &request.source {
            let img = ImageSource::parse(source);
            if img.is_qcow2().await? {
                def.format = DEFAULT_FORMAT.to_string();
            }
            def.capacity = img.size().await?;
            image = Some(img);
        } else if let Some(base) = &request.base_volume {
            self.layer_on_base(&mut def, &request.pool, base, request.size).await?;
        } else if let Some(size) = request.size {
            def.capacity = size;
        }

        let xml = def.to_xml()?;
        debug!(pool = %request.pool, "Creating volume:\n{}", xml);
        let volume = self
            .client
            .create_volume(&request.pool, &xml)
            .await
            .with_context(|| format!("Error creating libvirt volume {}", request.name))?;

        if let Some(img) = image {
            if let Err(e) = img.import(self.client.as_ref(), &volume, def.capacity).await {
                return Err(ProvisionError::Tool(format!("Error while uploading source {img}: {e}")));
            }
        }

        info!(volume = %volume, key = %volume.key, "Created volume");
        Ok(volume.key)
    }

    async fn layer_on_base(
        &self,
        def: &mut VolumeDef,
        pool: &str,
        base: &str,
        size_hint: Option<u64>,
    ) -> Result<(), ProvisionError> {
        let base_volume = match self.lookup_volume(pool, base).await {
            Err(ProvisionError::VolumeNotFound) => {
                return Err(ProvisionError::config(format!("Can't retrieve volume {base}")));
            }
            other => other?,
        };
        let base_xml = self
            .client
            .volume_xml(&base_volume)
            .await
            .with_context(|| format!("could not get XML description for volume {}", base_volume.name))?;
        let base_format = volume_format(&base_xml)?.unwrap_or_else(|| DEFAULT_FORMAT.to_string());

        def.capacity = [
            base_volume.capacity,
            base_volume.allocation,
            size_hint.unwrap_or(0),
            DEFAULT_VOLUME_SIZE,
        ]
        .into_iter()
        .max()
        .unwrap_or(DEFAULT_VOLUME_SIZE);
        def.format.clone_from(&base_format);
        def.backing_store = Some((base_volume.path.clone(), base_format));
        Ok(())
    }

    /// Create a raw volume holding the content of a local file and return the volume
    pub async fn upload_raw(
        &self,
        pool: &str,
        name: &str,
        file: &std::path::Path,
    ) -> Result<StorageVolume, ProvisionError> {
        let size = tokio::fs::metadata(file)
            .await
            .map_err(|e| ProvisionError::io(format!("Error while getting size of {}", file.display()), e))?
            .len();

        let _guard = self.locks.lock(pool).await;
        self.refresh_pool(pool)
            .await
            .map_err(|e| ProvisionError::Timeout(format!("timeout when calling waitForSuccess: {e}")))?;

        let def = VolumeDef {
            capacity: size,
            format: "raw".to_string(),
            ..VolumeDef::new(name)
        };
        let volume = self
            .client
            .create_volume(pool, &def.to_xml()?)
            .await
            .with_context(|| format!("Error creating libvirt volume for {name}"))?;

        crate::image::upload_file(self.client.as_ref(), &volume, file, size).await?;
        Ok(volume)
    }

    /// Delete a volume by name or key; `VolumeNotFound` when absent
    pub async fn delete_volume(&self, pool: &str, name_or_key: &str) -> Result<(), ProvisionError> {
        let volume = self.lookup_volume(pool, name_or_key).await?;

        let _guard = self.locks.lock(&volume.pool).await;
        self.refresh_pool(&volume.pool).await?;

        // Re-read the definition so a volume removed in the meantime is reported as missing
        match self.client.volume_xml(&volume).await {
            Ok(_) => {}
            Err(LibvirtError::NotFound(_)) => return Err(ProvisionError::VolumeNotFound),
            Err(e) => return Err(e).with_context(|| format!("Can't retrieve volume {volume}")),
        }

        match self.client.delete_volume(&volume).await {
            Ok(()) => {
                info!(volume = %volume, "Deleted volume");
                Ok(())
            }
            Err(LibvirtError::NotFound(_)) => Err(ProvisionError::VolumeNotFound),
            Err(e) => Err(e).with_context(|| format!("Can't delete volume {volume}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libvirt_client::MockLibvirtClient;
    use std::io::Write;
    use std::time::Duration;

    fn manager(client: &MockLibvirtClient) -> VolumeManager {
        let retry = RetryPolicy {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(20),
        };
        VolumeManager::new(Arc::new(client.clone()), PoolLocks::new(), retry)
    }

    fn mock() -> MockLibvirtClient {
        let client = MockLibvirtClient::new("qemu:///system");
        client.add_pool("default");
        client
    }

    #[test]
    fn test_volume_xml() {
        let def = VolumeDef {
            backing_store: Some(("/var/lib/libvirt/images/base".to_string(), "qcow2".to_string())),
            ..VolumeDef::new("worker-0")
        };
        let xml = def.to_xml().unwrap();
        assert!(xml.starts_with("<volume type=\"file\">"));
        assert!(xml.contains("<capacity unit=\"bytes\">17706254336</capacity>"));
        assert!(xml.contains("<mode>644</mode>"));
        assert!(xml.contains("<backingStore>\n    <path>/var/lib/libvirt/images/base</path>"));
        assert_eq!(volume_format(&xml).unwrap().as_deref(), Some("qcow2"));
    }

    #[tokio::test]
    async fn test_create_plain_volume() {
        let client = mock();
        let key = manager(&client)
            .create_volume(&VolumeRequest {
                name: "worker-0".to_string(),
                pool: "default".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(key, "/var/lib/libvirt/images/default/worker-0");
        let xml = client.stored_volume_xml("default", "worker-0").unwrap();
        assert!(xml.contains("17706254336"));
        assert!(!xml.contains("backingStore"));
    }

    #[tokio::test]
    async fn test_backing_store_inherits_base() {
        let client = mock();
        let base = client.add_volume("default", "coreos_base", 1024, 2048, "raw");

        manager(&client)
            .create_volume(&VolumeRequest {
                name: "worker-0".to_string(),
                pool: "default".to_string(),
                base_volume: Some("coreos_base".to_string()),
                size: Some(20 * 1024 * 1024 * 1024),
                ..Default::default()
            })
            .await
            .unwrap();

        let xml = client.stored_volume_xml("default", "worker-0").unwrap();
        assert!(xml.contains(&format!("<path>{}</path>", base.path)));
        assert!(xml.contains("<capacity unit=\"bytes\">21474836480</capacity>"));
        assert_eq!(xml.matches("<format type=\"raw\"/>").count(), 2);
    }

    #[tokio::test]
    async fn test_base_lookup_by_key() {
        let client = mock();
        let base = client.add_volume("default", "coreos_base", 1024, 0, "qcow2");

        manager(&client)
            .create_volume(&VolumeRequest {
                name: "worker-0".to_string(),
                pool: "default".to_string(),
                base_volume: Some(base.key.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(client.stored_volume_xml("default", "worker-0").unwrap().contains("<capacity unit=\"bytes\">17706254336"));
    }

    #[tokio::test]
    async fn test_duplicate_volume_rejected() {
        let client = mock();
        client.add_volume("default", "worker-0", 1, 1, "qcow2");

        let err = manager(&client)
            .create_volume(&VolumeRequest {
                name: "worker-0".to_string(),
                pool: "default".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "storage volume 'worker-0' already exists");
    }

    #[tokio::test]
    async fn test_source_and_base_conflict() {
        let client = mock();
        let err = manager(&client)
            .create_volume(&VolumeRequest {
                name: "worker-0".to_string(),
                pool: "default".to_string(),
                base_volume: Some("base".to_string()),
                source: Some("/tmp/image".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "'base_volume_name' can't be specified when also 'source' is given"
        );
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_from_source() {
        let client = mock();
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(b"QFI\xfbimage-bytes").unwrap();

        manager(&client)
            .create_volume(&VolumeRequest {
                name: "base".to_string(),
                pool: "default".to_string(),
                source: Some(image.path().display().to_string()),
                format: Some("raw".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let xml = client.stored_volume_xml("default", "base").unwrap();
        assert!(xml.contains("<format type=\"qcow2\"/>"));
        assert!(xml.contains("<capacity unit=\"bytes\">15</capacity>"));
        assert_eq!(client.uploaded("default", "base").unwrap(), b"QFI\xfbimage-bytes");
    }

    #[tokio::test]
    async fn test_delete_is_not_found_when_absent() {
        let client = mock();
        let manager = manager(&client);
        client.add_volume("default", "worker-0", 1, 1, "qcow2");

        manager.delete_volume("default", "worker-0").await.unwrap();
        assert!(!manager.volume_exists("default", "worker-0").await.unwrap());

        let err = manager.delete_volume("default", "worker-0").await.unwrap_err();
        assert!(matches!(err, ProvisionError::VolumeNotFound));
    }

    #[tokio::test]
    async fn test_refresh_timeout_surfaces() {
        let client = mock();
        client.fail_on("refresh_pool", || LibvirtError::OperationInvalid("pool is busy".to_string()));

        let err = manager(&client)
            .create_volume(&VolumeRequest {
                name: "worker-0".to_string(),
                pool: "default".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Timeout(_)));
        assert!(client.volume_names("default").is_empty());
    }
}
