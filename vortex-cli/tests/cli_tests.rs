use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use vortex_core::{ContainerId, PortMapping};
use vortex_network::{ContainerNetwork, NetworkConfig, NetworkIntent};

/// Check if running as root
fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

fn vortex() -> Command {
    Command::new(env!("CARGO_BIN_EXE_vortex"))
}

#[test]
fn test_help_command() {
    vortex()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Vortex container networking"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("probe"))
        .stdout(predicate::str::contains("netns"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn test_version_command() {
    vortex()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vortex"));
}

#[test]
fn test_invalid_command() {
    vortex()
        .arg("invalid")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_probe_fake_emulator() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("slirp4netns");
    fs::write(
        &script,
        "#!/bin/sh\necho 'Usage: slirp4netns --mtu=MTU --enable-sandbox --enable-ipv6'\n",
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let output = vortex()
        .arg("probe")
        .arg("--path")
        .arg(&script)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["features"]["mtu"], true);
    assert_eq!(report["features"]["enable_sandbox"], true);
    assert_eq!(report["features"]["ipv6"], true);
    assert_eq!(report["features"]["cidr"], false);
}

#[test]
fn test_probe_missing_binary() {
    vortex()
        .arg("probe")
        .arg("--path")
        .arg("/nonexistent/slirp4netns")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to probe slirp4netns"));
}

#[test]
fn test_inspect_plugin_result() {
    let dir = tempfile::tempdir().unwrap();
    let result = dir.path().join("result.json");
    fs::write(
        &result,
        r#"{
            "cniVersion": "0.4.0",
            "interfaces": [
                {"name": "cni-podman0", "mac": "aa:bb:cc:00:00:01"},
                {"name": "eth0", "mac": "aa:bb:cc:00:00:02", "sandbox": "/run/netns/x"}
            ],
            "ips": [
                {"version": "4", "address": "10.88.0.5/16", "gateway": "10.88.0.1", "interface": 1},
                {"version": "6", "address": "fd00::5/64", "interface": 1}
            ]
        }"#,
    )
    .unwrap();

    let output = vortex()
        .arg("inspect")
        .arg(&result)
        .arg("-p")
        .arg("8080:80")
        .output()
        .unwrap();
    assert!(output.status.success());

    let settings: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(settings["IPAddress"], "10.88.0.5");
    assert_eq!(settings["IPPrefixLen"], 16);
    assert_eq!(settings["Gateway"], "10.88.0.1");
    assert_eq!(settings["GlobalIPv6Address"], "fd00::5");
    assert_eq!(settings["MacAddress"], "aa:bb:cc:00:00:02");
    assert_eq!(settings["Ports"]["80/tcp"][0]["HostPort"], "8080");
}

#[test]
fn test_inspect_rejects_bad_publish() {
    let dir = tempfile::tempdir().unwrap();
    let result = dir.path().join("result.json");
    fs::write(&result, r#"{"cniVersion": "0.4.0"}"#).unwrap();

    vortex()
        .arg("inspect")
        .arg(&result)
        .arg("--publish")
        .arg("8080")
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected HOST:CONTAINER"));
}

#[test]
fn test_netns_create_requires_root() {
    if is_root() {
        return;
    }

    vortex()
        .arg("netns")
        .arg("create")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Must run as root"));
}

#[test]
#[ignore] // Requires root
fn test_netns_create_and_remove() {
    if !is_root() {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let output = vortex()
        .arg("netns")
        .arg("create")
        .arg("--runtime-dir")
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let path = String::from_utf8(output.stdout).unwrap();
    let path = Path::new(path.trim());
    assert!(path.starts_with(dir.path()));

    vortex()
        .arg("netns")
        .arg("remove")
        .arg(path)
        .arg("--runtime-dir")
        .arg(dir.path())
        .assert()
        .success();
    assert!(!path.exists());
}

#[test]
fn test_helper_rejects_bad_config_on_stdout() {
    let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_vortex"));
    std::os::unix::process::CommandExt::arg0(&mut cmd, "rootlessport");

    Command::from_std(cmd)
        .write_stdin(
            r#"{"Mappings":[{"hostPort":53,"containerPort":53,"protocol":"udp"}],
                "NetNSPath":"/proc/self/ns/net","ExitFD":3,"ReadyFD":4,"TmpDir":"/tmp"}"#,
        )
        .assert()
        .failure()
        .stdout(predicate::str::contains("udp port forwarding not supported"));
}

#[tokio::test]
async fn test_helper_forwards_connections() {
    // Echo server standing in for the container's service
    let service = TcpListener::bind("127.0.0.1:0").unwrap();
    let service_port = service.local_addr().unwrap().port();
    std::thread::spawn(move || {
        let (mut conn, _) = service.accept().unwrap();
        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).unwrap();
        conn.write_all(&buf).unwrap();
    });

    let host_port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let dir = tempfile::tempdir().unwrap();
    let config = NetworkConfig::new()
        .with_tmp_dir(dir.path())
        .with_helper_binary(env!("CARGO_BIN_EXE_vortex"));
    let mut ctr = ContainerNetwork::new(
        ContainerId::new("fwd1").unwrap(),
        "fwd1",
        NetworkIntent::new()
            .with_port(PortMapping::tcp(host_port, service_port).with_host_ip("127.0.0.1")),
    );

    // The helper resolves this path inside its own process
    vortex_network::portforward::launch(&config, &mut ctr, Path::new("/proc/self/ns/net"))
        .await
        .unwrap();
    assert!(ctr.state.port_exit_pipe.is_some());

    let reply = tokio::task::spawn_blocking(move || {
        let mut conn = TcpStream::connect(("127.0.0.1", host_port)).unwrap();
        conn.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).unwrap();
        buf
    })
    .await
    .unwrap();
    assert_eq!(&reply, b"hello");

    // Closing the exit pipe stops the helper
    ctr.state.port_exit_pipe = None;
}
