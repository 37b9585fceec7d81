//! Starting the forwarding helper from the engine

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;
use vortex_core::{Error, ProcessId, Result, ResultExt};

use super::{PortForwardConfig, REEXEC_KEY};
use crate::config::NetworkConfig;
use crate::container::ContainerNetwork;
use crate::sync::{EXIT_FD, Handshake, LogSink, READY_FD, SyncPipe, inherit_sync_fds};

/// How long a failed helper gets to flush its stdout
const STDOUT_GRACE: Duration = Duration::from_millis(200);

fn capture_stdout(mut stdout: impl Read + Send + 'static) -> (Arc<Mutex<Vec<u8>>>, JoinHandle<()>) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let handle = std::thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match stdout.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]),
            }
        }
    });
    (buffer, handle)
}

fn tee_stderr(stderr: impl Read + Send + 'static, mut log: impl Write + Send + 'static) {
    std::thread::spawn(move || {
        for line in BufReader::new(stderr).lines() {
            let Ok(line) = line else { break };
            let _ = writeln!(log, "{line}");
            debug!("rootlessport: {line}");
        }
    });
}

/// Start the forwarding helper for a container and wait until it serves
///
/// The helper's stdout carries a human-readable error; when the handshake
/// fails and stdout is non-empty, that text is returned instead of the
/// verbose log. On success the exit pipe's write end is stored in the
/// container state; dropping it stops the helper.
///
/// # Errors
/// Returns error if the helper cannot start or does not become ready
pub async fn launch(
    config: &NetworkConfig,
    ctr: &mut ContainerNetwork,
    netns_path: &Path,
) -> Result<()> {
    let ready = SyncPipe::new().with_context(|| "failed to open pipe")?;
    let exit = SyncPipe::new().with_context(|| "failed to create rootless port sync pipe")?;
    let log = LogSink::create(&config.tmp_dir, &format!("rootlessport-{}.log", ctr.id()))?;

    let payload = serde_json::to_vec(&PortForwardConfig {
        mappings: ctr.intent().port_mappings.clone(),
        netns_path: netns_path.to_path_buf(),
        exit_fd: EXIT_FD,
        ready_fd: READY_FD,
        tmp_dir: config.tmp_dir.clone(),
    })?;

    let mut cmd = Command::new(config.helper_path());
    cmd.arg0(REEXEC_KEY)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    inherit_sync_fds(&mut cmd, Some(&exit.reader), &ready.writer, false);

    let mut child = cmd
        .spawn()
        .with_context(|| "failed to start rootlessport process")?;

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

    if let Some(mut stdin) = child.stdin.take() {
        std::thread::spawn(move || {
            let _ = stdin.write_all(&payload);
        });
    }
    let stdout = child.stdout.take().map(capture_stdout);
    if let Some(stderr) = child.stderr.take() {
        tee_stderr(stderr, log.writer()?);
    }

    let pid = i32::try_from(child.id())
        .map(ProcessId::from_raw)
        .map_err(|_| Error::internal("helper pid out of range"))?;
    debug!(pid = %pid, netns = %netns_path.display(), "Started rootlessport");

    let handshake = Handshake {
        program: REEXEC_KEY,
        pid,
        timeouts: config.helper_sync,
    };

    if let Err(err) = handshake.wait(ready_reader, &log).await {
        let Some((buffer, reader)) = stdout else {
            return Err(err);
        };

        let started = tokio::time::Instant::now();
        while !reader.is_finished() && started.elapsed() < STDOUT_GRACE {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let text = String::from_utf8_lossy(
            &buffer.lock().unwrap_or_else(PoisonError::into_inner),
        )
        .trim_end_matches('\n')
        .to_string();
        if text.is_empty() {
            return Err(err);
        }
        debug!(error = %err, "rootlessport handshake failed");
        return Err(Error::Handshake {
            program: REEXEC_KEY.to_string(),
            detail: text,
        });
    }

    debug!("rootlessport is ready");
    ctr.state.port_exit_pipe = Some(exit_writer);
    Ok(())
}
