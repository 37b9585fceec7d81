use vortex_core::*;

#[test]
fn test_container_id_validation() {
    // Valid IDs
    assert!(ContainerId::new("test").is_ok());
    assert!(ContainerId::new("test-123").is_ok());
    assert!(ContainerId::new("test_456").is_ok());
    assert!(ContainerId::new("web.1").is_ok());
    assert!(ContainerId::new("a".repeat(64)).is_ok());

    // Invalid IDs
    assert!(ContainerId::new("").is_err());
    assert!(ContainerId::new("a".repeat(65)).is_err());
    assert!(ContainerId::new("test@123").is_err());
    assert!(ContainerId::new("test space").is_err());
    assert!(ContainerId::new("test/path").is_err());
    assert!(ContainerId::new("../escape").is_err());
}

#[test]
fn test_container_id_display() {
    let id = ContainerId::new("my-container").unwrap();
    assert_eq!(format!("{id}"), "my-container");
    assert_eq!(id.as_str(), "my-container");
}

#[test]
fn test_port_mapping_roundtrip_preserves_empty_host_ip() {
    let json = r#"{"hostPort":8080,"containerPort":80,"protocol":"udp"}"#;
    let mapping: PortMapping = serde_json::from_str(json).unwrap();

    assert_eq!(mapping.protocol, Protocol::Udp);
    assert!(mapping.host_ip.is_empty());
    assert_eq!(mapping.host_addr_or_any(), "0.0.0.0");
}

#[test]
fn test_port_mapping_protocol_defaults_to_tcp() {
    let json = r#"{"hostPort":443,"containerPort":8443}"#;
    let mapping: PortMapping = serde_json::from_str(json).unwrap();
    assert_eq!(mapping.protocol, Protocol::Tcp);
}

#[test]
fn test_mac_address_serde() {
    let mac = MacAddress::new([0x0a, 0x58, 0x0a, 0x58, 0x00, 0x01]);
    let json = serde_json::to_string(&mac).unwrap();
    assert_eq!(json, "\"0a:58:0a:58:00:01\"");

    let back: MacAddress = serde_json::from_str(&json).unwrap();
    assert_eq!(back, mac);
    assert!(serde_json::from_str::<MacAddress>("\"not-a-mac\"").is_err());
}

#[test]
fn test_error_display() {
    let err = Error::Unsupported {
        feature: "cidr".to_string(),
    };
    assert_eq!(err.to_string(), "cidr not supported");

    let err = Error::Handshake {
        program: "slirp4netns".to_string(),
        detail: "\"cannot open tap\"".to_string(),
    };
    assert!(err.to_string().starts_with("slirp4netns failed"));

    let err = Error::Timeout {
        what: "rootlessport".to_string(),
    };
    assert_eq!(err.to_string(), "timed out waiting for rootlessport");
}

#[test]
fn test_error_from_io() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let err: Error = io_err.into();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_error_from_json_and_nix() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: Error = json_err.into();
    assert!(matches!(err, Error::Json(_)));

    let err: Error = nix::errno::Errno::EPERM.into();
    assert!(matches!(err, Error::System(_)));
}

#[test]
fn test_error_root_cause() {
    let err = Error::protocol("bad json")
        .context("add_hostfwd")
        .context("port forwarding");
    assert!(matches!(err.root_cause(), Error::Protocol { .. }));
}
