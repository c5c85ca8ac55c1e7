//! CIDR arithmetic for static DHCP reservations

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::ProvisionError;

/// An IP network: base address and prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

fn address_bits(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn host_mask(host_bits: u8) -> u128 {
    if host_bits >= 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    }
}

impl Cidr {
    /// Network address with host bits cleared
    pub fn network(&self) -> IpAddr {
        self.network
    }

    /// Prefix length
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Address of host number `num` in this network.
    ///
    /// Negative numbers count back from the broadcast address, so `-1` is the
    /// last address of the range.
    pub fn host_address(&self, num: i64) -> Result<IpAddr, ProvisionError> {
        let host_bits = address_bits(self.network) - self.prefix;
        let max_host = host_mask(host_bits);

        let overflow = || {
            ProvisionError::config(format!(
                "prefix of {} does not accommodate a host numbered {num}",
                self.prefix
            ))
        };

        let host = if num < 0 {
            let back = u128::from(num.unsigned_abs()) - 1;
            max_host.checked_sub(back).ok_or_else(overflow)?
        } else {
            u128::from(num.unsigned_abs())
        };
        if host > max_host {
            return Err(overflow());
        }

        let value = to_u128(self.network) | host;
        Ok(match self.network {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::from(u32::try_from(value).map_err(|_| overflow())?)),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::from(value)),
        })
    }
}

impl FromStr for Cidr {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ProvisionError::config(format!(
                "failed to parse libvirt network ipRange: invalid CIDR address: {s}"
            ))
        };

        let (addr, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let bits = address_bits(addr);
        if prefix > bits {
            return Err(invalid());
        }

        let mask = !host_mask(bits - prefix);
        let masked = to_u128(addr) & mask;
        let network = match addr {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::from(u32::try_from(masked).map_err(|_| invalid())?)),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::from(masked)),
        };
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
