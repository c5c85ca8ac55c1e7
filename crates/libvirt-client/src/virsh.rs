//! virsh-backed libvirt client
//!
//! Every trait call runs one `virsh -c <uri> ...` process. XML documents are
//! handed over through temporary files.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::LibvirtError;
use crate::libvirt_trait::LibvirtClientTrait;
use crate::parse;
use crate::types::*;
use crate::uri::ConnectionUri;

/// Default virsh binary, resolved through `PATH`
pub const DEFAULT_VIRSH: &str = "virsh";

/// libvirt client driving the `virsh` command line tool
#[derive(Debug, Clone)]
pub struct VirshClient {
    uri: String,
    virsh: PathBuf,
}

impl VirshClient {
    /// Create a client for `uri` without touching the hypervisor
    pub fn new(uri: impl Into<String>) -> Result<Self, LibvirtError> {
        let uri = uri.into();
        ConnectionUri::parse(&uri)?;
        Ok(Self {
            uri,
            virsh: PathBuf::from(DEFAULT_VIRSH),
        })
    }

    /// Use a specific virsh binary
    #[must_use]
    pub fn with_binary(mut self, virsh: impl Into<PathBuf>) -> Self {
        self.virsh = virsh.into();
        self
    }

    /// Create a client and verify the connection and the storage pool
    pub async fn connect(uri: impl Into<String>, pool: &str, virsh: impl Into<PathBuf>) -> Result<Self, LibvirtError> {
        let client = Self::new(uri)?.with_binary(virsh);
        let version = client.run(&["version", "--daemon"]).await?;
        debug!(uri = %client.uri, "Connected: {}", version.lines().last().unwrap_or_default().trim());

        if !pool.is_empty() {
            client.lookup_pool(pool).await.map_err(|e| match e {
                LibvirtError::NotFound(msg) => {
                    LibvirtError::NotFound(format!("can't find storage pool {pool:?}: {msg}"))
                }
                other => other,
            })?;
        }

        info!(uri = %client.uri, "Created libvirt connection");
        Ok(client)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.virsh);
        cmd.arg("-c").arg(&self.uri).args(args);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run virsh and return its standard output
    async fn run(&self, args: &[&str]) -> Result<String, LibvirtError> {
        debug!(uri = %self.uri, "virsh {}", args.join(" "));
        let output = self.command(args).output().await?;

        if !output.status.success() {
            return Err(LibvirtError::from_stderr(
                format!("virsh {}", args.join(" ")),
                output.status.to_string(),
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        String::from_utf8(output.stdout).map_err(|e| LibvirtError::Parse(format!("non UTF-8 virsh output: {e}")))
    }

    /// Run virsh with an XML document written to a temporary file appended to `args`
    async fn run_with_xml(&self, args: &[&str], xml: &str) -> Result<String, LibvirtError> {
        let file = tempfile::Builder::new().prefix("libvirt-").suffix(".xml").tempfile()?;
        tokio::fs::write(file.path(), xml).await?;

        let path = file.path().to_string_lossy().into_owned();
        let mut full = args.to_vec();
        full.push(&path);
        self.run(&full).await
    }

    async fn first_line(&self, args: &[&str]) -> Result<String, LibvirtError> {
        let output = self.run(args).await?;
        output
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or_else(|| LibvirtError::Parse(format!("empty output from virsh {}", args.join(" "))))
    }
}

#[async_trait::async_trait]
impl LibvirtClientTrait for VirshClient {
    fn uri(&self) -> &str {
        &self.uri
    }

    /// Every call runs its own virsh process, so there is no connection to release
    async fn close(&self) -> Result<(), LibvirtError> {
        debug!(uri = %self.uri, "Closing libvirt connection");
        Ok(())
    }

    async fn capabilities(&self) -> Result<String, LibvirtError> {
        self.run(&["capabilities"]).await
    }

    async fn define_domain(&self, xml: &str) -> Result<Domain, LibvirtError> {
        let output = self.run_with_xml(&["define"], xml).await?;
        let name = parse::parse_defined_domain(&output)?;
        self.lookup_domain(&name).await
    }

    async fn lookup_domain(&self, name: &str) -> Result<Domain, LibvirtError> {
        let uuid = self.first_line(&["domuuid", name]).await?;
        Ok(Domain {
            name: name.to_string(),
            uuid,
        })
    }

    async fn domain_state(&self, name: &str) -> Result<DomainState, LibvirtError> {
        let state = self.first_line(&["domstate", name]).await?;
        Ok(DomainState::from_virsh(&state))
    }

    async fn set_autostart(&self, name: &str, autostart: bool) -> Result<(), LibvirtError> {
        if autostart {
            self.run(&["autostart", name]).await?;
        } else {
            self.run(&["autostart", "--disable", name]).await?;
        }
        Ok(())
    }

    async fn start_domain(&self, name: &str) -> Result<(), LibvirtError> {
        self.run(&["start", name]).await.map(|_| ())
    }

    async fn destroy_domain(&self, name: &str) -> Result<(), LibvirtError> {
        self.run(&["destroy", name]).await.map(|_| ())
    }

    async fn undefine_domain(&self, name: &str, flags: UndefineFlags) -> Result<(), LibvirtError> {
        if flags.nvram {
            self.run(&["undefine", name, "--nvram"]).await?;
        } else {
            self.run(&["undefine", name]).await?;
        }
        Ok(())
    }

    async fn domain_interface_addresses(
        &self,
        name: &str,
        source: AddressSource,
    ) -> Result<Vec<DomainInterface>, LibvirtError> {
        let output = self.run(&["domifaddr", name, "--source", source.as_str()]).await?;
        parse::parse_domifaddr(&output)
    }

    async fn lookup_pool(&self, pool: &str) -> Result<StoragePool, LibvirtError> {
        self.run(&["pool-info", pool]).await?;
        Ok(StoragePool { name: pool.to_string() })
    }

    async fn refresh_pool(&self, pool: &str) -> Result<(), LibvirtError> {
        self.run(&["pool-refresh", pool]).await.map(|_| ())
    }

    async fn lookup_volume(&self, pool: &str, name: &str) -> Result<StorageVolume, LibvirtError> {
        let key = self.first_line(&["vol-key", "--pool", pool, name]).await?;
        let path = self.first_line(&["vol-path", "--pool", pool, name]).await?;
        let info = self.run(&["vol-info", "--bytes", "--pool", pool, name]).await?;
        let (capacity, allocation) = parse::parse_vol_info(&info)?;
        Ok(StorageVolume {
            pool: pool.to_string(),
            name: name.to_string(),
            key,
            path,
            capacity,
            allocation,
        })
    }

    async fn lookup_volume_by_key(&self, key: &str) -> Result<StorageVolume, LibvirtError> {
        let name = self.first_line(&["vol-name", key]).await?;
        let pool = self.first_line(&["vol-pool", key]).await?;
        self.lookup_volume(&pool, &name).await
    }

    async fn volume_xml(&self, volume: &StorageVolume) -> Result<String, LibvirtError> {
        self.run(&["vol-dumpxml", "--pool", &volume.pool, &volume.name]).await
    }

    async fn create_volume(&self, pool: &str, xml: &str) -> Result<StorageVolume, LibvirtError> {
        let output = self.run_with_xml(&["vol-create", pool], xml).await?;
        let name = parse::parse_created_volume(&output)?;
        self.lookup_volume(pool, &name).await
    }

    async fn delete_volume(&self, volume: &StorageVolume) -> Result<(), LibvirtError> {
        self.run(&["vol-delete", "--pool", &volume.pool, &volume.name]).await.map(|_| ())
    }

    async fn upload_volume(&self, volume: &StorageVolume, source: &Path, length: u64) -> Result<(), LibvirtError> {
        let file = source.to_string_lossy();
        let length = length.to_string();
        self.run(&[
            "vol-upload",
            "--pool",
            &volume.pool,
            &volume.name,
            &file,
            "--offset",
            "0",
            "--length",
            &length,
        ])
        .await
        .map(|_| ())
    }

    async fn network_xml(&self, network: &str) -> Result<String, LibvirtError> {
        self.run(&["net-dumpxml", network]).await
    }

    async fn update_network(
        &self,
        network: &str,
        command: NetworkUpdateCommand,
        section: NetworkSection,
        xml: &str,
    ) -> Result<(), LibvirtError> {
        let file = tempfile::Builder::new().prefix("net-update-").suffix(".xml").tempfile()?;
        tokio::fs::write(file.path(), xml).await?;
        let path = file.path().to_string_lossy().into_owned();

        self.run(&[
            "net-update",
            network,
            command.as_str(),
            section.as_str(),
            &path,
            "--current",
        ])
        .await
        .map(|_| ())
    }

    async fn network_dhcp_leases(&self, network: &str) -> Result<Vec<DhcpLease>, LibvirtError> {
        let output = self.run(&["net-dhcp-leases", network]).await?;
        parse::parse_dhcp_leases(&output)
    }
}
