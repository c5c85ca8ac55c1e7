//! libvirt connection URIs
//!
//! See <https://libvirt.org/uri.html>. A URI such as
//! `qemu+ssh://root@host/system` names a hypervisor driver (`qemu`), a
//! transport (`ssh`), a remote host and the name passed to the remote daemon.

use std::fmt;
use std::str::FromStr;

use reqwest::Url;

use crate::error::LibvirtError;

/// Transport used to reach libvirtd
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Local unix socket
    Unix,
    /// TLS over TCP
    Tls,
    /// Plain TCP
    Tcp,
    /// SSH tunnel
    Ssh,
    /// Anything else (`ext`, `libssh2`, ...)
    Other(String),
}

/// Parsed libvirt connection URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUri {
    url: Url,
}

impl ConnectionUri {
    /// Parse a connection URI
    pub fn parse(uri: &str) -> Result<Self, LibvirtError> {
        let url = Url::parse(uri).map_err(|e| LibvirtError::InvalidUri(format!("{uri}: {e}")))?;
        Ok(Self { url })
    }

    /// Hypervisor driver (`qemu`, `test`, ...)
    pub fn driver(&self) -> &str {
        self.url.scheme().split('+').next().unwrap_or_default()
    }

    /// Transport, defaulting to TLS for remote and unix for local URIs
    pub fn transport(&self) -> Transport {
        match self.url.scheme().split_once('+') {
            Some((_, "unix")) => Transport::Unix,
            Some((_, "tls")) => Transport::Tls,
            Some((_, "tcp")) => Transport::Tcp,
            Some((_, "ssh")) => Transport::Ssh,
            Some((_, other)) => Transport::Other(other.to_string()),
            None if self.host().is_some() => Transport::Tls,
            None => Transport::Unix,
        }
    }

    /// Remote host, if any
    pub fn host(&self) -> Option<&str> {
        self.url.host_str().filter(|h| !h.is_empty())
    }

    /// User name embedded in the URI, if any
    pub fn username(&self) -> Option<&str> {
        Some(self.url.username()).filter(|u| !u.is_empty())
    }

    /// Port embedded in the URI, if any
    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// Name handed to the remote daemon: transport, host and parameters
    /// stripped unless an explicit `name` parameter is given.
    pub fn remote_name(&self) -> String {
        if let Some((_, name)) = self.url.query_pairs().find(|(k, _)| k == "name")
            && !name.is_empty()
        {
            return name.into_owned();
        }
        format!("{}://{}", self.driver(), self.url.path())
    }
}

impl FromStr for ConnectionUri {
    type Err = LibvirtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
