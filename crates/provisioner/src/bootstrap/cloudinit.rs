//! cloud-init NoCloud ISO
//!
//! Renders user-data and meta-data, packs them with `mkisofs` into a
//! `cidata` ISO and uploads it as a raw volume.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ProvisionError;

const USER_DATA_FILE: &str = "user-data";
const META_DATA_FILE: &str = "meta-data";
const NETWORK_CONFIG_FILE: &str = "network-config";

/// Public key injected when SSH access is requested
pub const GUEST_SSH_KEY: &str = "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAACAQCkvgGhhYwEjWjD+ACW8s+DIanHqYJIC7RbgBRrvAqJQuWE87jfTtREHuW+o0qU1eIPPJzebu58VPgy3SscnrN2fKuMT2PAkevmjj4ARQmdsR/BBrmzdibe/Wnd8WEMNX82L+YrkuHoVkgafFkreSZgf/j8glGNl7IQe5gi2XDG1e+BQ+e94dxAExeRlldhQsbFvQJ+qLmDhHE4zdf/d/CqY6PwoIHlrOVLux7/pBV5SGg5eKlGCPi80oEf23LbwHYjkUXzEreBqUrWSwsdp6jIQ9zzADRQJ0+C47K6uwxy1RIe3q6t7f1eJwjmOaYYS2Sc+U1cpPHrWY3OzZJkbIZ3Fva8qVdbqhMW2ASqJ7oGpdwiRp7FTvoKlEktcc6JUK19sZ6dft79PF9nRy8nfz4obKowCZn7aqVBOW41DhaoC5oB9pfBgSPnObGnpkXITWrx/oUQ1zwrPIH150X3XuDdYXfrmDk/k+cQS7hjG328pfJs8oBhqUmyikUxjnXvDX/LQzacwDF3XKCy6Xq98bemFp8lnAG7c3tW8tYpn3Non6M3XaS2W/ece9JRZKOOCaqC52U7sg6nL/Yv11Sg9WSfJtINzNN1cKxZsIaPvorPflwqNlLWH3dPCb4KQry/54HCBvsKm1+s/yud31zk9C/CI5bFV959bLq+6ra6hAMBTw== Libvirt guest key";

/// User data used when no secret is given: a shell no-op
pub const DEFAULT_USER_DATA: &[u8] = b":";

/// Render the cloud-config user-data document.
///
/// The user data script is embedded base64 encoded and piped to bash on
/// first boot.
pub fn render_user_data(user_data: &[u8], ssh_access: bool) -> String {
    let encoded = STANDARD.encode(user_data);
    let mut doc = format!(
        r#"
#cloud-config

# Hostname management
preserve_hostname: False
hostname: whatever
fqdn: whatever.example.local

runcmd:
  # Set the hostname to its IP address so every kubernetes node has unique name
  - hostnamectl set-hostname $(ip route get 1 | cut -d' ' -f7)
  # Run the user data script
  - echo '{encoded}' | base64 -d | bash
  # Remove cloud-init when finished with it
  - [ yum, -y, remove, cloud-init ]

# Configure where output will go
output:
  all: ">> /var/log/cloud-init.log"

"#
    );

    if ssh_access {
        doc.push_str(&format!(
            r"
# configure interaction with ssh server
ssh_svcname: ssh
ssh_deletekeys: True
ssh_genkeytypes: ['rsa', 'ecdsa']

# Install public ssh key to the first user-defined user configured
# in cloud.cfg in the template
ssh_authorized_keys:
  - {GUEST_SSH_KEY}
"
        ));
    }
    doc.push('\n');
    doc
}

/// Render the meta-data document
pub fn render_meta_data(instance_id: &str) -> String {
    format!("\ninstance-id: {instance_id}; local-hostname: {instance_id}\n")
}

/// Write the NoCloud files into `dir` and pack them into `dir/<iso_name>`
pub async fn create_iso(
    mkisofs: &Path,
    dir: &Path,
    iso_name: &str,
    user_data: &str,
    meta_data: &str,
) -> Result<std::path::PathBuf, ProvisionError> {
    for (file, content) in [
        (USER_DATA_FILE, user_data),
        (META_DATA_FILE, meta_data),
        (NETWORK_CONFIG_FILE, ""),
    ] {
        tokio::fs::write(dir.join(file), content)
            .await
            .map_err(|e| ProvisionError::io(format!("Error while writing {file} to file"), e))?;
    }

    let iso = dir.join(iso_name);
    let mut command = Command::new(mkisofs);
    command
        .arg("-output")
        .arg(&iso)
        .args(["-volid", "cidata", "-joliet", "-rock"])
        .arg(dir.join(USER_DATA_FILE))
        .arg(dir.join(META_DATA_FILE))
        .arg(dir.join(NETWORK_CONFIG_FILE));
    debug!(?command, "Creating cloud-init ISO");

    let output = command.output().await.map_err(|e| {
        ProvisionError::io("error while starting the creation of CloudInit's ISO image", e)
    })?;
    if !output.status.success() {
        return Err(ProvisionError::Tool(format!(
            "error while starting the creation of CloudInit's ISO image: {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    info!(iso = %iso.display(), "ISO created");
    Ok(iso)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runcmd_payload(doc: &str) -> Vec<u8> {
        let line = doc
            .lines()
            .find(|l| l.contains("| base64 -d | bash"))
            .unwrap();
        let encoded = line.split('\'').nth(1).unwrap();
        STANDARD.decode(encoded).unwrap()
    }

    #[test]
    fn test_default_user_data_is_noop() {
        let doc = render_user_data(DEFAULT_USER_DATA, true);
        assert!(doc.starts_with("\n#cloud-config\n"));
        assert_eq!(runcmd_payload(&doc), b":");
        assert!(doc.contains("ssh_authorized_keys:\n  - ssh-rsa "));
        assert!(doc.contains("Libvirt guest key"));
    }

    #[test]
    fn test_without_ssh_access() {
        let doc = render_user_data(b"echo hello", false);
        assert_eq!(runcmd_payload(&doc), b"echo hello");
        assert!(!doc.contains("ssh_authorized_keys"));
        assert!(doc.contains("hostnamectl set-hostname $(ip route get 1 | cut -d' ' -f7)"));
    }

    #[test]
    fn test_meta_data() {
        assert_eq!(
            render_meta_data("worker-0"),
            "\ninstance-id: worker-0; local-hostname: worker-0\n"
        );
    }
}
