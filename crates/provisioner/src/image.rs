//! Image sources and volume uploads
//!
//! A source is either a local file or an http(s) URL. Remote images are
//! staged in a temporary file first, because the upload channel needs the
//! exact byte count up front.

use std::path::{Path, PathBuf};

use libvirt_client::{LibvirtClientTrait, StorageVolume};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::{LibvirtResultExt, ProvisionError};

const QCOW2_MAGIC: &[u8; 4] = b"QFI\xfb";

/// Where an image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// File on the actuator's filesystem
    Local(PathBuf),
    /// http(s) URL
    Remote(reqwest::Url),
}

impl ImageSource {
    /// Classify a source string
    pub fn parse(source: &str) -> Self {
        match reqwest::Url::parse(source) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Remote(url),
            Ok(url) if url.scheme() == "file" => Self::Local(PathBuf::from(url.path())),
            _ => Self::Local(PathBuf::from(source)),
        }
    }

    /// Size of the image in bytes
    pub async fn size(&self) -> Result<u64, ProvisionError> {
        match self {
            Self::Local(path) => file_size(path).await,
            Self::Remote(url) => {
                let response = reqwest::Client::new().head(url.clone()).send().await?;
                if response.status() != reqwest::StatusCode::OK {
                    return Err(ProvisionError::Tool(format!(
                        "Error accessing remote resource: {url} - {}",
                        response.status()
                    )));
                }
                response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| {
                        ProvisionError::Tool(format!("Error accessing remote resource: {url} - no content length"))
                    })
            }
        }
    }

    /// Whether the image starts with the qcow2 magic
    pub async fn is_qcow2(&self) -> Result<bool, ProvisionError> {
        let header = match self {
            Self::Local(path) => {
                let mut file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| ProvisionError::io(format!("Error opening {}", path.display()), e))?;
                let mut header = [0u8; 4];
                match file.read_exact(&mut header).await {
                    Ok(_) => header.to_vec(),
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(false),
                    Err(e) => return Err(ProvisionError::io(format!("Error reading {}", path.display()), e)),
                }
            }
            Self::Remote(url) => reqwest::Client::new()
                .get(url.clone())
                .header(reqwest::header::RANGE, "bytes=0-3")
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?
                .to_vec(),
        };
        Ok(header.starts_with(QCOW2_MAGIC))
    }

    /// Copy the image into `volume`, which must hold exactly `size` bytes
    pub async fn import(
        &self,
        client: &dyn LibvirtClientTrait,
        volume: &StorageVolume,
        size: u64,
    ) -> Result<(), ProvisionError> {
        match self {
            Self::Local(path) => upload_file(client, volume, path, size).await,
            Self::Remote(url) => {
                let staged = tempfile::NamedTempFile::new()
                    .map_err(|e| ProvisionError::io("Cannot create tmp file for image", e))?;
                let copied = download(url, staged.path()).await?;
                if copied != size {
                    return Err(ProvisionError::Tool(format!(
                        "Error while copying source to volume {copied} bytes from {size} bytes"
                    )));
                }
                upload_file(client, volume, staged.path(), size).await
            }
        }
    }
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{url}"),
        }
    }
}

async fn file_size(path: &Path) -> Result<u64, ProvisionError> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| ProvisionError::io(format!("Error while getting size of {}", path.display()), e))
}

async fn download(url: &reqwest::Url, dest: &Path) -> Result<u64, ProvisionError> {
    let mut response = reqwest::Client::new().get(url.clone()).send().await?.error_for_status()?;
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| ProvisionError::io(format!("Error creating {}", dest.display()), e))?;

    let mut copied = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk)
            .await
            .map_err(|e| ProvisionError::io(format!("Error writing {}", dest.display()), e))?;
        copied += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| ProvisionError::io(format!("Error writing {}", dest.display()), e))?;

    debug!(%url, bytes = copied, "Downloaded image");
    Ok(copied)
}

/// Upload a local file into `volume`, refusing when the file is not exactly `size` bytes
pub async fn upload_file(
    client: &dyn LibvirtClientTrait,
    volume: &StorageVolume,
    path: &Path,
    size: u64,
) -> Result<(), ProvisionError> {
    let actual = file_size(path).await?;
    if actual != size {
        return Err(ProvisionError::Tool(format!(
            "Error while copying source to volume {actual} bytes from {size} bytes"
        )));
    }

    client
        .upload_volume(volume, path, size)
        .await
        .with_context(|| format!("Error while uploading {} to {volume}", path.display()))?;
    info!(volume = %volume, bytes = size, "Uploaded volume content");
    Ok(())
}
