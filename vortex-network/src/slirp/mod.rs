//! Userspace network emulator (slirp4netns) supervision

mod args;
mod features;
mod options;

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, error};
use vortex_core::{Error, ProcessId, Result, ResultExt};

pub use args::{NetnsTarget, SlirpInvocation, TAP_DEVICE};
pub use features::SlirpFeatures;
pub use options::{PortHandler, SlirpOptions};

use crate::config::NetworkConfig;
use crate::container::ContainerNetwork;
use crate::control;
use crate::portforward;
use crate::sync::{Handshake, LogSink, SyncPipe, inherit_sync_fds};

/// Binary name searched on `PATH`
pub const SLIRP_BINARY: &str = "slirp4netns";

/// Path of the emulator API socket for a container
#[must_use]
pub fn api_socket_path(config: &NetworkConfig, ctr: &ContainerNetwork) -> PathBuf {
    config.tmp_dir.join(format!("{}.net", ctr.id()))
}

fn resolve_binary(config: &NetworkConfig) -> Option<PathBuf> {
    config
        .network_cmd_path
        .clone()
        .or_else(|| which::which(SLIRP_BINARY).ok())
}

/// Start the emulator for a container and wait until it serves
///
/// Before the container starts, the emulator attaches to the bind-mounted
/// namespace; with post-start configuration it attaches to the namespace
/// of the container process. Host ports are then forwarded through the
/// emulator's API socket or the forwarding helper, per `port_handler`.
///
/// A missing emulator binary is logged and leaves the namespace
/// unconfigured.
///
/// # Errors
/// Returns error on invalid options, unsupported flags, or a failed start
pub async fn setup(config: &NetworkConfig, ctr: &mut ContainerNetwork) -> Result<()> {
    let Some(binary) = resolve_binary(config) else {
        error!("could not find slirp4netns, the network namespace won't be configured");
        return Ok(());
    };

    let options = SlirpOptions::parse(ctr.intent().slirp_options())?;
    let features = SlirpFeatures::probe(&binary).await?;

    let has_ports = !ctr.intent().port_mappings.is_empty();
    let api_socket = (has_ports && options.port_handler == PortHandler::Emulator)
        .then(|| api_socket_path(config, ctr));

    let netns_path = ctr.target_netns_path()?;
    let target = if ctr.intent().post_configure_netns {
        ctr.state
            .pid
            .map(NetnsTarget::Pid)
            .ok_or_else(|| Error::internal("post-start configuration without a pid"))?
    } else {
        NetnsTarget::Path(&netns_path)
    };

    let args = SlirpInvocation {
        options: &options,
        features: &features,
        mtu: config.slirp_mtu,
        api_socket: api_socket.as_deref(),
        target,
    }
    .args()?;

    let exit = SyncPipe::new().with_context(|| "failed to create rootless network sync pipe")?;
    let ready = SyncPipe::new().with_context(|| "failed to open pipe")?;
    let log = LogSink::create(&config.tmp_dir, &format!("slirp4netns-{}.log", ctr.id()))
        .with_context(|| "failed to open slirp4netns log file")?;

    let mut cmd = Command::new(&binary);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(log.stdio()?)
        .stderr(log.stdio()?)
        .process_group(0);
    inherit_sync_fds(&mut cmd, Some(&exit.reader), &ready.writer, features.enable_sandbox);

    debug!(command = %format!("{} {}", binary.display(), args.join(" ")), "slirp4netns command");

    let child = cmd
        .spawn()
        .with_context(|| "failed to start slirp4netns process")?;
    let pid = i32::try_from(child.id())
        .map(ProcessId::from_raw)
        .map_err(|_| Error::internal("slirp4netns pid out of range"))?;

    let SyncPipe {
        reader: ready_reader,
        writer: ready_writer,
    } = ready;
    drop(ready_writer);
    let SyncPipe {
        reader: exit_reader,
        writer: exit_writer,
    } = exit;
    drop(exit_reader);
    ctr.state.slirp_exit_pipe = Some(exit_writer);

    Handshake {
        program: SLIRP_BINARY,
        pid,
        timeouts: config.slirp_sync,
    }
    .wait(ready_reader, &log)
    .await?;

    if !has_ports {
        return Ok(());
    }

    match api_socket {
        Some(socket) => {
            control::wait_for_api_socket(
                &socket,
                pid,
                config.api_socket_timeout,
                config.api_socket_poll,
            )
            .await?;
            control::forward_ports(&socket, &ctr.intent().port_mappings).await
        }
        None => portforward::launch(config, ctr, &netns_path).await,
    }
}

/// Probe an emulator binary, or the one found on `PATH`
///
/// # Errors
/// Returns error if no binary is found or it cannot be probed
pub async fn probe(path: Option<&Path>) -> Result<(PathBuf, SlirpFeatures)> {
    let binary = match path {
        Some(p) => p.to_path_buf(),
        None => which::which(SLIRP_BINARY).map_err(|_| Error::Unsupported {
            feature: SLIRP_BINARY.to_string(),
        })?,
    };
    let features = SlirpFeatures::probe(&binary).await?;
    Ok((binary, features))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_binary_prefers_configured_path() {
        let config = NetworkConfig::new().with_network_cmd_path("/opt/slirp/bin/slirp4netns");
        assert_eq!(
            resolve_binary(&config),
            Some(PathBuf::from("/opt/slirp/bin/slirp4netns"))
        );
    }

    #[test]
    fn test_resolve_binary_searches_path() {
        assert_eq!(
            resolve_binary(&NetworkConfig::new()),
            which::which(SLIRP_BINARY).ok()
        );
    }
}
