//! Port forwarding through the emulator API socket
//!
//! Each request travels on its own connection: one JSON line, a write
//! shutdown, then a JSON reply. A reply carrying an `error` key is a
//! failure.

use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tracing::debug;
use vortex_core::{Error, PortMapping, ProcessId, Result, ResultExt};

use crate::sync::{ChildStatus, child_status};

/// Replies larger than this are cut off
const MAX_REPLY: u64 = 64 * 1024;

#[derive(Debug, Serialize)]
struct HostFwdArgs<'a> {
    proto: &'a str,
    host_addr: &'a str,
    host_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    guest_addr: Option<&'a str>,
    guest_port: u16,
}

#[derive(Debug, Serialize)]
struct ApiCommand<'a> {
    execute: &'static str,
    arguments: HostFwdArgs<'a>,
}

fn add_hostfwd_request(mapping: &PortMapping) -> Result<Vec<u8>> {
    let command = ApiCommand {
        execute: "add_hostfwd",
        arguments: HostFwdArgs {
            proto: mapping.protocol.as_str(),
            host_addr: mapping.host_addr_or_any(),
            host_port: mapping.host_port,
            guest_addr: None,
            guest_port: mapping.container_port,
        },
    };
    let mut data = serde_json::to_vec(&command)
        .map_err(|e| Error::from(e).context("cannot marshal JSON for slirp4netns"))?;
    data.push(b'\n');
    Ok(data)
}

/// Ask the emulator to forward one host port
///
/// # Errors
/// Returns error if the exchange fails or the reply carries an `error` key
pub async fn add_hostfwd(socket: &Path, mapping: &PortMapping) -> Result<()> {
    let request = add_hostfwd_request(mapping)?;
    let shown = socket.display();

    let mut conn = UnixStream::connect(socket)
        .await
        .with_context(|| format!("cannot open connection to {shown}"))?;
    conn.write_all(&request)
        .await
        .with_context(|| format!("cannot write to control socket {shown}"))?;
    conn.shutdown()
        .await
        .with_context(|| format!("cannot shutdown the socket {shown}"))?;

    let mut reply = Vec::new();
    (&mut conn)
        .take(MAX_REPLY)
        .read_to_end(&mut reply)
        .await
        .with_context(|| format!("cannot read from control socket {shown}"))?;

    let reply: serde_json::Value = serde_json::from_slice(&reply)
        .map_err(|e| Error::from(e).context("cannot unmarshal JSON from slirp4netns"))?;

    if let Some(error) = reply.get("error") {
        let detail = error
            .as_str()
            .map_or_else(|| error.to_string(), ToString::to_string);
        return Err(Error::protocol(format!(
            "error from slirp4netns while setting up port redirection: {detail}"
        )));
    }

    debug!(
        host_port = mapping.host_port,
        container_port = mapping.container_port,
        "Port forwarded by slirp4netns"
    );
    Ok(())
}

/// Forward every mapping, stopping at the first failure
///
/// # Errors
/// Returns the first failing exchange
pub async fn forward_ports(socket: &Path, mappings: &[PortMapping]) -> Result<()> {
    for mapping in mappings {
        add_hostfwd(socket, mapping).await?;
    }
    Ok(())
}

/// Wait for the emulator to create its API socket
///
/// A watcher task polls the emulator's status alongside, so an emulator
/// that dies early fails the wait instead of running into the timeout.
/// The watcher is stopped on every outcome.
///
/// # Errors
/// Returns error if the emulator exits or the socket does not appear in time
pub async fn wait_for_api_socket(
    socket: &Path,
    pid: ProcessId,
    timeout: Duration,
    poll: Duration,
) -> Result<()> {
    let (tx, mut exited) = oneshot::channel::<Error>();

    let watcher = tokio::spawn(async move {
        loop {
            tokio::time::sleep(poll).await;
            let status = match child_status(pid) {
                Ok(ChildStatus::Running) => continue,
                Ok(status) => status,
                // Not our child any more; the socket wait decides.
                Err(_) => return,
            };
            let code = match status {
                ChildStatus::Exited(code) => code,
                _ => -1,
            };
            let _ = tx.send(Error::Handshake {
                program: "slirp4netns".to_string(),
                detail: format!("exited with status {code}"),
            });
            return;
        }
    });

    let wait = async {
        let mut watching = true;
        loop {
            if socket.exists() {
                return Ok(());
            }
            tokio::select! {
                result = &mut exited, if watching => match result {
                    Ok(err) => return Err(err),
                    Err(_) => watching = false,
                },
                () = tokio::time::sleep(poll) => {}
            }
        }
    };

    let result = match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            what: format!("{}", socket.display()),
        }),
    };
    watcher.abort();

    result.with_context(|| {
        format!(
            "waiting for slirp4netns to create the api socket file {}",
            socket.display()
        )
    })
}
