//! Parsers for `virsh` output
//!
//! virsh prints tables and key/value blocks meant for humans. The parsers
//! here are whitespace-column based and skip the header and separator rows.

use crate::error::LibvirtError;
use crate::types::{DhcpLease, DomainInterface, InterfaceAddress};

/// Rows of a virsh table, without the header and the dashed separator
fn table_rows(output: &str) -> impl Iterator<Item = Vec<&str>> {
    output
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("---"))
        .skip(1)
        .map(|l| l.split_whitespace().collect::<Vec<_>>())
        .filter(|cols| !cols.is_empty())
}

fn split_cidr(value: &str) -> Result<(String, u8), LibvirtError> {
    match value.split_once('/') {
        Some((addr, prefix)) => {
            let prefix = prefix
                .parse()
                .map_err(|_| LibvirtError::Parse(format!("invalid prefix in {value:?}")))?;
            Ok((addr.to_string(), prefix))
        }
        None => Ok((value.to_string(), 0)),
    }
}

/// Parse `virsh domifaddr`
///
/// Extra addresses of one interface are printed on continuation rows whose
/// name and MAC columns are `-`.
pub fn parse_domifaddr(output: &str) -> Result<Vec<DomainInterface>, LibvirtError> {
    let mut interfaces: Vec<DomainInterface> = Vec::new();

    for cols in table_rows(output) {
        let &[name, hwaddr, _protocol, address] = cols.as_slice() else {
            return Err(LibvirtError::Parse(format!("unexpected domifaddr row {cols:?}")));
        };
        let (addr, prefix) = split_cidr(address)?;
        let entry = InterfaceAddress { addr, prefix };

        match interfaces.last_mut() {
            Some(last) if name == "-" => last.addrs.push(entry),
            _ => interfaces.push(DomainInterface {
                name: name.to_string(),
                hwaddr: hwaddr.to_string(),
                addrs: vec![entry],
            }),
        }
    }

    Ok(interfaces)
}

/// Parse `virsh net-dhcp-leases`
///
/// The expiry column holds a date and a time separated by a space.
pub fn parse_dhcp_leases(output: &str) -> Result<Vec<DhcpLease>, LibvirtError> {
    table_rows(output)
        .map(|cols| {
            if cols.len() < 6 {
                return Err(LibvirtError::Parse(format!("unexpected net-dhcp-leases row {cols:?}")));
            }
            let (ipaddr, _) = split_cidr(cols[4])?;
            let hostname = Some(cols[5]).filter(|h| *h != "-").map(str::to_string);
            Ok(DhcpLease {
                ipaddr,
                mac: cols[2].to_ascii_lowercase(),
                hostname,
            })
        })
        .collect()
}

/// Parse capacity and allocation from `virsh vol-info --bytes`
pub fn parse_vol_info(output: &str) -> Result<(u64, u64), LibvirtError> {
    let field = |key: &str| -> Result<u64, LibvirtError> {
        output
            .lines()
            .find_map(|l| l.strip_prefix(key))
            .and_then(|rest| rest.trim().trim_end_matches("bytes").trim().parse().ok())
            .ok_or_else(|| LibvirtError::Parse(format!("no {key} in vol-info output")))
    };
    Ok((field("Capacity:")?, field("Allocation:")?))
}

/// Name from `Domain 'x' defined from ...` (older virsh omits the quotes)
pub fn parse_defined_domain(output: &str) -> Result<String, LibvirtError> {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Domain "))
        .and_then(|rest| rest.split(" defined").next())
        .map(|name| name.trim_matches('\'').to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| LibvirtError::Parse(format!("unexpected define output {output:?}")))
}

/// Name from `Vol x created from ...`
pub fn parse_created_volume(output: &str) -> Result<String, LibvirtError> {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Vol "))
        .and_then(|rest| rest.split(" created").next())
        .map(str::to_string)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| LibvirtError::Parse(format!("unexpected vol-create output {output:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_domifaddr_with_continuation_rows() {
        let output = "\
 Name       MAC address          Protocol     Address
-------------------------------------------------------------------------------
 vnet0      52:54:00:6e:2a:01    ipv4         192.168.124.51/24
 -          -                    ipv6         fd00::51/64
 vnet1      52:54:00:6e:2a:02    ipv4         10.0.0.7/8

";
        let interfaces = parse_domifaddr(output).unwrap();
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].name, "vnet0");
        assert_eq!(interfaces[0].hwaddr, "52:54:00:6e:2a:01");
        assert_eq!(interfaces[0].addrs.len(), 2);
        assert_eq!(interfaces[0].addrs[1].addr, "fd00::51");
        assert_eq!(interfaces[0].addrs[1].prefix, 64);
        assert_eq!(interfaces[1].addrs[0].addr, "10.0.0.7");
    }

    #[test]
    fn test_parse_domifaddr_empty_table() {
        let output = " Name       MAC address          Protocol     Address\n-----------------------------------\n\n";
        assert!(parse_domifaddr(output).unwrap().is_empty());
    }

    #[test]
    fn test_parse_dhcp_leases() {
        let output = "\
 Expiry Time           MAC address         Protocol   IP address           Hostname   Client ID or DUID
------------------------------------------------------------------------------------------------------------
 2026-10-19 12:00:00   52:54:00:6E:2A:01   ipv4       192.168.124.51/24    worker-0   01:52:54:00:6e:2a:01
 2026-10-19 12:05:00   52:54:00:6e:2a:02   ipv4       192.168.124.52/24    -          -
";
        let leases = parse_dhcp_leases(output).unwrap();
        assert_eq!(leases.len(), 2);
        assert_eq!(leases[0].ipaddr, "192.168.124.51");
        assert_eq!(leases[0].mac, "52:54:00:6e:2a:01");
        assert_eq!(leases[0].hostname.as_deref(), Some("worker-0"));
        assert_eq!(leases[1].hostname, None);
    }

    #[test]
    fn test_parse_vol_info() {
        let output = "\
Name:           worker-0
Type:           file
Capacity:       17706254336 bytes
Allocation:     196608 bytes
";
        assert_eq!(parse_vol_info(output).unwrap(), (17_706_254_336, 196_608));
        assert!(parse_vol_info("Name: x\n").is_err());
    }

    #[test]
    fn test_parse_define_and_create_output() {
        assert_eq!(
            parse_defined_domain("Domain 'worker-0' defined from /tmp/.tmpX\n\n").unwrap(),
            "worker-0"
        );
        assert_eq!(parse_defined_domain("Domain worker-1 defined from /tmp/x").unwrap(), "worker-1");
        assert_eq!(
            parse_created_volume("Vol worker-0_cloud-init created from /tmp/.tmpY\n").unwrap(),
            "worker-0_cloud-init"
        );
        assert!(parse_created_volume("").is_err());
    }
}
