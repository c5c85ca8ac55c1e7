//! Storage operations for MockLibvirtClient
//!
//! Volumes live under `/var/lib/libvirt/images/<pool>/`; the path doubles as
//! the volume key.

use std::path::Path;

use super::helpers::{element_text, lock};
use super::{MockLibvirtClient, MockVolume};
use crate::error::LibvirtError;
use crate::types::*;

fn volume_not_found(what: &str) -> LibvirtError {
    LibvirtError::NotFound(format!("Storage volume not found: no storage vol with matching name '{what}'"))
}

fn pool_not_found(pool: &str) -> LibvirtError {
    LibvirtError::NotFound(format!("Storage pool not found: no storage pool with matching name '{pool}'"))
}

pub(crate) fn new_volume(pool: &str, name: &str, capacity: u64, allocation: u64) -> StorageVolume {
    let path = format!("/var/lib/libvirt/images/{pool}/{name}");
    StorageVolume {
        pool: pool.to_string(),
        name: name.to_string(),
        key: path.clone(),
        path,
        capacity,
        allocation,
    }
}

pub fn lookup_pool(client: &MockLibvirtClient, pool: &str) -> Result<StoragePool, LibvirtError> {
    if lock(&client.pools).contains_key(pool) {
        Ok(StoragePool { name: pool.to_string() })
    } else {
        Err(pool_not_found(pool))
    }
}

pub fn lookup_volume(client: &MockLibvirtClient, pool: &str, name: &str) -> Result<StorageVolume, LibvirtError> {
    let pools = lock(&client.pools);
    let volumes = pools.get(pool).ok_or_else(|| pool_not_found(pool))?;
    volumes
        .get(name)
        .map(|v| v.volume.clone())
        .ok_or_else(|| volume_not_found(name))
}

pub fn lookup_volume_by_key(client: &MockLibvirtClient, key: &str) -> Result<StorageVolume, LibvirtError> {
    lock(&client.pools)
        .values()
        .flat_map(|vols| vols.values())
        .find(|v| v.volume.key == key)
        .map(|v| v.volume.clone())
        .ok_or_else(|| volume_not_found(key))
}

pub fn volume_xml(client: &MockLibvirtClient, volume: &StorageVolume) -> Result<String, LibvirtError> {
    lock(&client.pools)
        .get(&volume.pool)
        .and_then(|vols| vols.get(&volume.name))
        .map(|v| v.xml.clone())
        .ok_or_else(|| volume_not_found(&volume.name))
}

pub fn create_volume(client: &MockLibvirtClient, pool: &str, xml: &str) -> Result<StorageVolume, LibvirtError> {
    let name = element_text(xml, "name")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| LibvirtError::InvalidArg("missing volume name".to_string()))?;
    let capacity = element_text(xml, "capacity")
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| LibvirtError::InvalidArg("missing or invalid volume capacity".to_string()))?;

    let mut pools = lock(&client.pools);
    let volumes = pools.get_mut(pool).ok_or_else(|| pool_not_found(pool))?;
    if volumes.contains_key(name) {
        return Err(LibvirtError::Command {
            command: format!("vol-create {pool}"),
            status: "exit status: 1".to_string(),
            stderr: format!("storage volume name '{name}' already in use."),
        });
    }

    let volume = new_volume(pool, name, capacity, 0);
    volumes.insert(
        name.to_string(),
        MockVolume {
            volume: volume.clone(),
            xml: xml.to_string(),
            content: None,
        },
    );
    Ok(volume)
}

pub fn delete_volume(client: &MockLibvirtClient, volume: &StorageVolume) -> Result<(), LibvirtError> {
    lock(&client.pools)
        .get_mut(&volume.pool)
        .and_then(|vols| vols.remove(&volume.name))
        .map(|_| ())
        .ok_or_else(|| volume_not_found(&volume.name))
}

pub async fn upload_volume(
    client: &MockLibvirtClient,
    volume: &StorageVolume,
    source: &Path,
    length: u64,
) -> Result<(), LibvirtError> {
    let mut content = tokio::fs::read(source).await?;
    let length = usize::try_from(length).map_err(|_| LibvirtError::InvalidArg(format!("length {length}")))?;
    if content.len() < length {
        return Err(LibvirtError::Command {
            command: format!("vol-upload {volume}"),
            status: "exit status: 1".to_string(),
            stderr: format!("short read: {} of {length} bytes", content.len()),
        });
    }
    content.truncate(length);

    let mut pools = lock(&client.pools);
    let entry = pools
        .get_mut(&volume.pool)
        .and_then(|vols| vols.get_mut(&volume.name))
        .ok_or_else(|| volume_not_found(&volume.name))?;
    entry.volume.allocation = content.len() as u64;
    entry.content = Some(content);
    Ok(())
}
