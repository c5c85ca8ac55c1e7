//! Behaviour of the in-memory hypervisor through the public client interface

use std::sync::Arc;

use libvirt_client::{
    AddressSource, ClientBuilder, ConnectionUri, DhcpLease, DomainInterface, DomainState, InterfaceAddress,
    LibvirtClientTrait, LibvirtError, MockClientBuilder, MockLibvirtClient, NetworkSection, NetworkUpdateCommand,
    Transport, UndefineFlags,
};

const DOMAIN_XML: &str = "<domain type=\"kvm\"><name>worker-0</name><memory unit=\"MiB\">2048</memory></domain>";

async fn client(mock: &MockLibvirtClient) -> Arc<dyn LibvirtClientTrait> {
    MockClientBuilder::new(mock.clone())
        .build("qemu:///system", "default")
        .await
        .unwrap()
}

fn pooled() -> MockLibvirtClient {
    let mock = MockLibvirtClient::new("qemu:///system");
    mock.add_pool("default");
    mock
}

#[tokio::test]
async fn test_builder_requires_pool() {
    let mock = MockLibvirtClient::new("qemu:///system");
    let builder = MockClientBuilder::new(mock.clone());

    let err = builder.build("qemu:///system", "default").await.err().expect("expected build to fail");
    assert!(err.is_not_found());

    mock.add_pool("default");
    builder.build("qemu:///system", "default").await.unwrap();
    builder.build("qemu:///system", "").await.unwrap();
    assert_eq!(builder.builds().len(), 3);
}

#[tokio::test]
async fn test_domain_lifecycle() {
    let mock = pooled();
    let client = client(&mock).await;

    let domain = client.define_domain(DOMAIN_XML).await.unwrap();
    assert_eq!(domain.name, "worker-0");
    assert_eq!(client.domain_state("worker-0").await.unwrap(), DomainState::Shutoff);
    assert!(matches!(
        client.domain_interface_addresses("worker-0", AddressSource::Lease).await,
        Err(LibvirtError::OperationInvalid(_))
    ));

    client.set_autostart("worker-0", true).await.unwrap();
    client.start_domain("worker-0").await.unwrap();
    assert_eq!(client.domain_state("worker-0").await.unwrap(), DomainState::Running);
    assert_eq!(mock.domain_autostart("worker-0"), Some(true));

    mock.set_domain_interfaces(
        "worker-0",
        vec![DomainInterface {
            name: "vnet0".to_string(),
            hwaddr: "52:54:00:00:00:01".to_string(),
            addrs: vec![InterfaceAddress {
                addr: "192.168.124.51".to_string(),
                prefix: 24,
            }],
        }],
    );
    let interfaces = client
        .domain_interface_addresses("worker-0", AddressSource::Lease)
        .await
        .unwrap();
    assert_eq!(interfaces[0].addrs[0].addr, "192.168.124.51");

    // Redefining keeps the UUID
    let redefined = client.define_domain(DOMAIN_XML).await.unwrap();
    assert_eq!(redefined.uuid, domain.uuid);

    client.destroy_domain("worker-0").await.unwrap();
    client.undefine_domain("worker-0", UndefineFlags { nvram: true }).await.unwrap();
    assert!(client.lookup_domain("worker-0").await.unwrap_err().is_not_found());
    assert!(mock.domain_names().is_empty());
}

#[tokio::test]
async fn test_undefine_without_nvram_support() {
    let mock = pooled();
    let client = client(&mock).await;
    client.define_domain(DOMAIN_XML).await.unwrap();
    mock.set_nvram_unsupported(true);

    assert!(matches!(
        client.undefine_domain("worker-0", UndefineFlags { nvram: true }).await,
        Err(LibvirtError::NoSupport(_))
    ));
    client.undefine_domain("worker-0", UndefineFlags::default()).await.unwrap();
    assert!(!mock.has_domain("worker-0"));
}

#[tokio::test]
async fn test_volume_create_lookup_delete() {
    let mock = pooled();
    let client = client(&mock).await;
    let xml = "<volume type=\"file\"><name>worker-0</name><capacity unit=\"bytes\">1073741824</capacity></volume>";

    let volume = client.create_volume("default", xml).await.unwrap();
    assert_eq!(volume.capacity, 1 << 30);
    assert_eq!(client.volume_xml(&volume).await.unwrap(), xml);

    let err = client.create_volume("default", xml).await.unwrap_err();
    assert!(err.to_string().contains("already in use"));

    let by_key = client.lookup_volume_by_key(&volume.key).await.unwrap();
    assert_eq!(by_key.name, "worker-0");

    client.delete_volume(&volume).await.unwrap();
    assert!(client.lookup_volume("default", "worker-0").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_upload_truncates_to_length() {
    let mock = pooled();
    let client = client(&mock).await;
    let volume = mock.add_volume("default", "worker-0.ignition", 5, 0, "raw");

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config.ign");
    std::fs::write(&file, b"{}\n\n").unwrap();

    client.upload_volume(&volume, &file, 2).await.unwrap();
    assert_eq!(mock.uploaded("default", "worker-0.ignition").unwrap(), b"{}");

    let err = client.upload_volume(&volume, &file, 64).await.unwrap_err();
    assert!(err.to_string().contains("short read"));
}

#[tokio::test]
async fn test_network_hosts_and_leases() {
    let mock = pooled();
    mock.add_network("default", "<network><name>default</name></network>");
    mock.add_lease(
        "default",
        DhcpLease {
            ipaddr: "192.168.124.51".to_string(),
            mac: "52:54:00:00:00:01".to_string(),
            hostname: Some("worker-0".to_string()),
        },
    );
    let client = client(&mock).await;
    let host = "<host mac='52:54:00:00:00:02' name='worker-1' ip='192.168.124.52'/>";

    let err = client
        .update_network("default", NetworkUpdateCommand::Modify, NetworkSection::IpDhcpHost, host)
        .await
        .unwrap_err();
    assert!(matches!(err, LibvirtError::OperationInvalid(_)));

    client
        .update_network("default", NetworkUpdateCommand::AddLast, NetworkSection::IpDhcpHost, host)
        .await
        .unwrap();
    let hosts = mock.network_hosts("default");
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].ip, "192.168.124.52");

    let leases = client.network_dhcp_leases("default").await.unwrap();
    assert_eq!(leases[0].hostname.as_deref(), Some("worker-0"));
}

#[tokio::test]
async fn test_injected_failures_and_call_log() {
    let mock = pooled();
    let client = client(&mock).await;
    mock.fail_on("capabilities", || LibvirtError::Command {
        command: "capabilities".to_string(),
        status: "exit status: 1".to_string(),
        stderr: "failed to connect to the hypervisor".to_string(),
    });

    let err = client.capabilities().await.unwrap_err();
    assert!(err.to_string().contains("failed to connect to the hypervisor"));

    mock.clear_failure("capabilities");
    assert!(client.capabilities().await.unwrap().contains("<capabilities>"));

    client.close().await.unwrap();
    assert_eq!(mock.close_count(), 1);
    assert!(mock.calls().iter().any(|c| c.starts_with("lookup_pool")));
}

#[test]
fn test_remote_uri_through_public_api() {
    let uri = ConnectionUri::parse("qemu+ssh://root@kvm01/system").unwrap();
    assert_eq!(uri.transport(), Transport::Ssh);
    assert_eq!(uri.host(), Some("kvm01"));
    assert_eq!(uri.username(), Some("root"));
    assert_eq!(uri.remote_name(), "qemu:///system");
}
