//! Readiness handshakes with supervised helper processes
//!
//! Helpers inherit two pipe ends: an exit pipe on fd 3 (the helper exits
//! when it reads EOF) and a ready pipe on fd 4 (the helper writes one byte
//! once it is serving).

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, pipe2};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::time::Instant;
use tracing::debug;
use vortex_core::{Error, ProcessId, Result, ResultExt};

use crate::config::SyncTimeouts;

/// Descriptor number of the exit pipe inside a helper
pub const EXIT_FD: RawFd = 3;

/// Descriptor number of the ready pipe inside a helper
pub const READY_FD: RawFd = 4;

/// How long to wait before re-checking a helper that closed its ready pipe
const EOF_RECHECK: Duration = Duration::from_millis(20);

/// A close-on-exec pipe
#[derive(Debug)]
pub struct SyncPipe {
    /// Read end
    pub reader: OwnedFd,
    /// Write end
    pub writer: OwnedFd,
}

impl SyncPipe {
    /// Create a pipe whose ends are not inherited unless mapped explicitly
    ///
    /// # Errors
    /// Returns error if pipe(2) fails
    pub fn new() -> Result<Self> {
        let (reader, writer) = pipe2(OFlag::O_CLOEXEC)?;
        Ok(Self { reader, writer })
    }
}

/// Scratch log file whose directory entry is removed right after creation
///
/// The helper writes through an inherited descriptor and we read the
/// contents back for error reports. Nothing is left on disk.
#[derive(Debug)]
pub struct LogSink {
    file: File,
}

impl LogSink {
    /// Create `dir/name`, then unlink it
    ///
    /// # Errors
    /// Returns error if the file cannot be created or removed
    pub fn create(dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(name);
        let _ = fs::remove_file(&path);

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        fs::remove_file(&path)
            .with_context(|| format!("delete file {}", path.display()))?;

        Ok(Self { file })
    }

    /// Another handle to the log, for a child's stdout or stderr
    ///
    /// # Errors
    /// Returns error if the descriptor cannot be duplicated
    pub fn stdio(&self) -> Result<Stdio> {
        Ok(Stdio::from(self.file.try_clone()?))
    }

    /// Another handle to the log for writing from this process
    ///
    /// # Errors
    /// Returns error if the descriptor cannot be duplicated
    pub fn writer(&self) -> Result<File> {
        Ok(self.file.try_clone()?)
    }

    /// Everything written so far
    ///
    /// # Errors
    /// Returns error if the log cannot be read
    pub fn contents(&self) -> Result<String> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Current state of a child process, as seen without blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// Still running (or stopped)
    Running,
    /// Exited with a status code
    Exited(i32),
    /// Killed by a signal
    Signaled(Signal),
}

/// Poll the status of a child without blocking
///
/// Reaps the child if it has terminated.
///
/// # Errors
/// Returns error if `pid` is not a child of this process
pub fn child_status(pid: ProcessId) -> Result<ChildStatus> {
    match waitpid(Pid::from(pid), Some(WaitPidFlag::WNOHANG))? {
        WaitStatus::Exited(_, code) => Ok(ChildStatus::Exited(code)),
        WaitStatus::Signaled(_, signal, _) => Ok(ChildStatus::Signaled(signal)),
        _ => Ok(ChildStatus::Running),
    }
}

/// Map pipe ends onto [`EXIT_FD`] and [`READY_FD`] in the child
///
/// Without an exit pipe, fd 3 is closed in the child. When
/// `new_mount_ns` is set the child also gets a private mount namespace,
/// which sandboxing helpers need to pivot their root.
pub fn inherit_sync_fds(
    cmd: &mut Command,
    exit: Option<&OwnedFd>,
    ready: &OwnedFd,
    new_mount_ns: bool,
) {
    let sources = [exit.map_or(-1, AsRawFd::as_raw_fd), ready.as_raw_fd()];

    // SAFETY: the closure only calls async-signal-safe functions
    // (fcntl, dup2, close, unshare) between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            // Move sources clear of the targets first so that mapping one
            // cannot clobber the other.
            let mut moved = [-1; 2];
            for (slot, src) in moved.iter_mut().zip(sources) {
                if src < 0 {
                    continue;
                }
                let fd = libc::fcntl(src, libc::F_DUPFD_CLOEXEC, 10);
                if fd < 0 {
                    return Err(io::Error::last_os_error());
                }
                *slot = fd;
            }

            for (target, fd) in [EXIT_FD, READY_FD].into_iter().zip(moved) {
                if fd < 0 {
                    libc::close(target);
                    continue;
                }
                if libc::dup2(fd, target) < 0 {
                    return Err(io::Error::last_os_error());
                }
            }

            if new_mount_ns && libc::unshare(libc::CLONE_NEWNS) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

fn set_nonblocking(fd: &impl AsFd) -> Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

async fn read_some(fd: &AsyncFd<File>) -> io::Result<usize> {
    let mut buf = [0u8; 16];
    loop {
        let mut guard = fd.readable().await?;
        match guard.try_io(|inner| {
            let mut file: &File = inner.get_ref();
            file.read(&mut buf)
        }) {
            Ok(result) => return result,
            Err(_would_block) => {}
        }
    }
}

/// Wait until every write end of a pipe is closed
///
/// # Errors
/// Returns error if the descriptor cannot be polled or read
pub async fn wait_for_eof(fd: OwnedFd) -> Result<()> {
    let file = File::from(fd);
    set_nonblocking(&file)?;
    let fd = AsyncFd::with_interest(file, Interest::READABLE)?;
    while read_some(&fd).await? > 0 {}
    Ok(())
}

/// A supervised child taking part in a readiness handshake
#[derive(Debug, Clone, Copy)]
pub struct Handshake<'a> {
    /// Program name used in errors and logs
    pub program: &'a str,
    /// Child process
    pub pid: ProcessId,
    /// Timings
    pub timeouts: SyncTimeouts,
}

impl Handshake<'_> {
    /// Wait for the child to write to its ready pipe
    ///
    /// Each read attempt is bounded by the per-attempt timeout; between
    /// attempts the child's status is checked. An exited child fails the
    /// handshake with the captured log, a signalled child with
    /// `killed by signal`.
    ///
    /// # Errors
    /// Returns [`Error::Handshake`] if the child dies, [`Error::Timeout`]
    /// once the total deadline passes
    pub async fn wait(&self, ready: OwnedFd, log: &LogSink) -> Result<()> {
        let file = File::from(ready);
        set_nonblocking(&file)?;
        let ready = AsyncFd::with_interest(file, Interest::READABLE)?;
        let deadline = Instant::now() + self.timeouts.total;

        loop {
            match tokio::time::timeout(self.timeouts.attempt, read_some(&ready)).await {
                Ok(Ok(n)) if n > 0 => {
                    debug!(program = self.program, pid = %self.pid, "Helper is ready");
                    return Ok(());
                }
                // Every write end is gone: the child closed it or died.
                Ok(Ok(_)) => tokio::time::sleep(EOF_RECHECK).await,
                Ok(Err(e)) => {
                    return Err(Error::from(e)
                        .context(format!("failed to read from {} sync pipe", self.program)));
                }
                Err(_elapsed) => {}
            }

            match child_status(self.pid).with_context(|| {
                format!("failed to read {} process status", self.program)
            })? {
                ChildStatus::Running => {}
                ChildStatus::Exited(_) => {
                    return Err(Error::Handshake {
                        program: self.program.to_string(),
                        detail: format!("{:?}", log.contents()?),
                    });
                }
                ChildStatus::Signaled(_) => {
                    return Err(Error::Handshake {
                        program: self.program.to_string(),
                        detail: "killed by signal".to_string(),
                    });
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    what: format!("{} to become ready", self.program),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spawn_sh(script: &str, pipe: &SyncPipe, log: &LogSink) -> std::process::Child {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(log.stdio().unwrap())
            .stderr(log.stdio().unwrap());
        inherit_sync_fds(&mut cmd, None, &pipe.writer, false);
        cmd.spawn().unwrap()
    }

    fn fast() -> SyncTimeouts {
        SyncTimeouts::new(Duration::from_millis(50), Duration::from_secs(5))
    }

    #[test]
    fn test_log_sink_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogSink::create(dir.path(), "helper.log").unwrap();
        assert!(!dir.path().join("helper.log").exists());

        log.writer().unwrap().write_all(b"hello").unwrap();
        log.writer().unwrap().write_all(b" world").unwrap();
        assert_eq!(log.contents().unwrap(), "hello world");
    }

    #[test]
    fn test_set_nonblocking() {
        let pipe = SyncPipe::new().unwrap();
        set_nonblocking(&pipe.reader).unwrap();

        let flags = OFlag::from_bits_truncate(fcntl(&pipe.reader, FcntlArg::F_GETFL).unwrap());
        assert!(flags.contains(OFlag::O_NONBLOCK));
        let flags = OFlag::from_bits_truncate(fcntl(&pipe.writer, FcntlArg::F_GETFL).unwrap());
        assert!(!flags.contains(OFlag::O_NONBLOCK));
    }

    #[tokio::test]
    async fn test_handshake_succeeds_on_ready_byte() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogSink::create(dir.path(), "ok.log").unwrap();
        let pipe = SyncPipe::new().unwrap();
        let child = spawn_sh("printf 1 >&4; sleep 1", &pipe, &log);
        let SyncPipe { reader, writer } = pipe;
        drop(writer);

        let handshake = Handshake {
            program: "fake",
            pid: ProcessId::from_raw(i32::try_from(child.id()).unwrap()),
            timeouts: fast(),
        };
        handshake.wait(reader, &log).await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_reports_log_on_exit() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogSink::create(dir.path(), "fail.log").unwrap();
        let pipe = SyncPipe::new().unwrap();
        let child = spawn_sh("echo 'cannot open tap0'; exit 1", &pipe, &log);
        let SyncPipe { reader, writer } = pipe;
        drop(writer);

        let handshake = Handshake {
            program: "fake",
            pid: ProcessId::from_raw(i32::try_from(child.id()).unwrap()),
            timeouts: fast(),
        };
        let err = handshake.wait(reader, &log).await.unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("fake failed:"), "{text}");
        assert!(text.contains("cannot open tap0"), "{text}");
    }

    #[tokio::test]
    async fn test_handshake_reports_signal() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogSink::create(dir.path(), "sig.log").unwrap();
        let pipe = SyncPipe::new().unwrap();
        let child = spawn_sh("kill -9 $$", &pipe, &log);
        let SyncPipe { reader, writer } = pipe;
        drop(writer);

        let handshake = Handshake {
            program: "fake",
            pid: ProcessId::from_raw(i32::try_from(child.id()).unwrap()),
            timeouts: fast(),
        };
        let err = handshake.wait(reader, &log).await.unwrap_err();
        assert_eq!(err.to_string(), "fake failed: killed by signal");
    }

    #[tokio::test]
    async fn test_handshake_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogSink::create(dir.path(), "slow.log").unwrap();
        let pipe = SyncPipe::new().unwrap();
        let mut child = spawn_sh("sleep 5", &pipe, &log);
        let SyncPipe { reader, writer } = pipe;
        drop(writer);

        let handshake = Handshake {
            program: "fake",
            pid: ProcessId::from_raw(i32::try_from(child.id()).unwrap()),
            timeouts: SyncTimeouts::new(Duration::from_millis(20), Duration::from_millis(200)),
        };
        let err = handshake.wait(reader, &log).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        let _ = child.kill();
        let _ = child.wait();
    }
}
