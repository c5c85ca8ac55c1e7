//! Ignition injection with guestfish
//!
//! Used on s390 hosts, which have no firmware configuration device. A
//! guestfish server is started on the primary disk and driven through
//! `--remote` commands, either locally (through sudo) or over ssh on the
//! libvirt host.

use std::path::PathBuf;

use libvirt_client::ConnectionUri;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ProvisionError;

/// Where Ignition is placed inside the boot filesystem
pub const IGNITION_TARGET: &str = "/ignition/config.ign";

/// How guestfish is invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestfishSettings {
    /// guestfish binary
    pub binary: PathBuf,
    /// Run local guestfish through `sudo --preserve-env`
    pub sudo: bool,
    /// ssh binary for remote hosts
    pub ssh: PathBuf,
    /// Remote user
    pub ssh_user: String,
    /// Remote port
    pub ssh_port: u16,
    /// Private key, `~/.ssh/id_rsa` when unset
    pub ssh_key: Option<PathBuf>,
}

impl Default for GuestfishSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("guestfish"),
            sudo: true,
            ssh: PathBuf::from("ssh"),
            ssh_user: "root".to_string(),
            ssh_port: 22,
            ssh_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Local,
    Remote { host: String, key: PathBuf },
}

/// A guestfish session against one libvirt host
#[derive(Debug, Clone)]
pub struct Guestfish {
    settings: GuestfishSettings,
    target: Target,
}

/// Split `GUESTFISH_PID=4513; export GUESTFISH_PID` into the variable assignment
pub fn parse_listen_output(output: &str) -> Result<(String, String), ProvisionError> {
    let parts: Vec<&str> = output.split(';').collect();
    if parts.len() != 2 {
        return Err(ProvisionError::Tool(format!(
            "invalid output when starting guestfish: {output}"
        )));
    }
    match parts[0].trim().split('=').collect::<Vec<_>>().as_slice() {
        [name, value] => Ok(((*name).to_string(), (*value).to_string())),
        _ => Err(ProvisionError::Tool(format!(
            "failed to get the guestfish PID from {output}"
        ))),
    }
}

impl Guestfish {
    /// Session for the host behind `uri`: remote when the URI names a host
    pub fn for_uri(settings: GuestfishSettings, uri: &str) -> Result<Self, ProvisionError> {
        let parsed = ConnectionUri::parse(uri)
            .map_err(|e| ProvisionError::config(format!("invalid libvirt URI {uri}: {e}")))?;
        let target = match parsed.host() {
            Some(host) => {
                let key = match &settings.ssh_key {
                    Some(key) => key.clone(),
                    None => std::env::var_os("HOME")
                        .map(|home| PathBuf::from(home).join(".ssh/id_rsa"))
                        .ok_or_else(|| {
                            ProvisionError::Tool("SSH connect failed: cannot determine home directory".to_string())
                        })?,
                };
                Target::Remote {
                    host: host.to_string(),
                    key,
                }
            }
            None => Target::Local,
        };
        Ok(Self { settings, target })
    }

    /// Whether commands run over ssh
    pub fn is_remote(&self) -> bool {
        matches!(self.target, Target::Remote { .. })
    }

    /// Write the Ignition file at `ignition` (a path on the libvirt host)
    /// into the boot filesystem of `disk`
    pub async fn inject(&self, disk: &str, ignition: &str) -> Result<(), ProvisionError> {
        info!(disk, remote = self.is_remote(), "Injecting ignition configuration using guestfish");

        let listen = self.run(None, &["--listen", "-a", disk]).await?;
        let env = parse_listen_output(&listen)?;

        self.remote(&env, &["run"]).await?;

        let boot = self.remote(&env, &["findfs-label", "boot"]).await?;
        let boot = boot.trim();
        if boot.is_empty() {
            return Err(ProvisionError::Tool("failed to get the boot filesystem".to_string()));
        }

        self.remote(&env, &["mount", boot, "/"]).await?;
        self.remote(&env, &["mkdir-p", "/ignition"]).await?;
        self.remote(&env, &["upload", ignition, IGNITION_TARGET]).await?;
        self.remote(&env, &["umount-all"]).await?;
        self.remote(&env, &["exit"]).await?;
        Ok(())
    }

    async fn remote(&self, env: &(String, String), args: &[&str]) -> Result<String, ProvisionError> {
        let mut full = vec!["--remote", "--"];
        full.extend_from_slice(args);
        self.run(Some(env), &full).await
    }

    fn command(&self, env: Option<&(String, String)>, args: &[&str]) -> Command {
        match &self.target {
            Target::Local => {
                let mut command = if self.settings.sudo {
                    let mut sudo = Command::new("sudo");
                    sudo.arg("--preserve-env").arg(&self.settings.binary);
                    sudo
                } else {
                    Command::new(&self.settings.binary)
                };
                command.args(args);
                if let Some((name, value)) = env {
                    command.env(name, value);
                }
                command
            }
            Target::Remote { host, key } => {
                let mut line = String::new();
                if let Some((name, value)) = env {
                    line.push_str(&format!("{name}={value} "));
                }
                line.push_str(&self.settings.binary.display().to_string());
                for arg in args {
                    line.push(' ');
                    line.push_str(arg);
                }

                let mut command = Command::new(&self.settings.ssh);
                command
                    .arg("-i")
                    .arg(key)
                    .arg("-p")
                    .arg(self.settings.ssh_port.to_string())
                    .args(["-o", "StrictHostKeyChecking=no", "-o", "BatchMode=yes"])
                    .arg(format!("{}@{host}", self.settings.ssh_user))
                    .arg(line);
                command
            }
        }
    }

    async fn run(&self, env: Option<&(String, String)>, args: &[&str]) -> Result<String, ProvisionError> {
        let mut command = self.command(env, args);
        debug!(?command, "Running guestfish");

        let output = command
            .output()
            .await
            .map_err(|e| ProvisionError::io(format!("error running guestfish {}", args.join(" ")), e))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(ProvisionError::Tool(format!(
                "error running command 'guestfish {}': {}: {}{}",
                args.join(" "),
                output.status,
                stdout,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listen_output() {
        let (name, value) = parse_listen_output("GUESTFISH_PID=4513; export GUESTFISH_PID\n").unwrap();
        assert_eq!(name, "GUESTFISH_PID");
        assert_eq!(value, "4513");

        assert!(parse_listen_output("garbage").is_err());
        assert!(parse_listen_output("GUESTFISH_PID; export").is_err());
    }

    #[test]
    fn test_target_from_uri() {
        let local = Guestfish::for_uri(GuestfishSettings::default(), "qemu:///system").unwrap();
        assert!(!local.is_remote());

        let settings = GuestfishSettings {
            ssh_key: Some(PathBuf::from("/etc/actuator/id_rsa")),
            ..Default::default()
        };
        let remote = Guestfish::for_uri(settings, "qemu+ssh://root@kvm-host-1/system").unwrap();
        assert!(remote.is_remote());

        let command = remote.command(
            Some(&("GUESTFISH_PID".to_string(), "4513".to_string())),
            &["--remote", "--", "run"],
        );
        let args: Vec<_> = command.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args[0..4], ["-i", "/etc/actuator/id_rsa", "-p", "22"]);
        assert_eq!(args[args.len() - 2], "root@kvm-host-1");
        assert_eq!(args[args.len() - 1], "GUESTFISH_PID=4513 guestfish --remote -- run");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_injection_sequence() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let script = dir.path().join("guestfish");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$GUESTFISH_PID $*\" >> {log}\ncase \"$1\" in --listen) echo 'GUESTFISH_PID=4513; export GUESTFISH_PID';; esac\n[ \"$3\" = findfs-label ] && echo /dev/sda1\nexit 0\n",
                log = log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let settings = GuestfishSettings {
            binary: script,
            sudo: false,
            ..Default::default()
        };
        Guestfish::for_uri(settings, "qemu:///system")
            .unwrap()
            .inject("/var/lib/libvirt/images/worker-0", "/var/lib/libvirt/images/worker-0.ignition")
            .await
            .unwrap();

        let calls = std::fs::read_to_string(&log).unwrap();
        let calls: Vec<&str> = calls.lines().map(str::trim).collect();
        assert_eq!(
            calls,
            vec![
                "--listen -a /var/lib/libvirt/images/worker-0",
                "4513 --remote -- run",
                "4513 --remote -- findfs-label boot",
                "4513 --remote -- mount /dev/sda1 /",
                "4513 --remote -- mkdir-p /ignition",
                "4513 --remote -- upload /var/lib/libvirt/images/worker-0.ignition /ignition/config.ign",
                "4513 --remote -- umount-all",
                "4513 --remote -- exit",
            ]
        );
    }
}
