//! Helper side: bind host ports and relay into the container namespace

use nix::fcntl::{FcntlArg, fcntl};
use nix::sched::{CloneFlags, setns};
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use vortex_core::{Error, Protocol, Result, ResultExt};

use super::PortForwardConfig;
use crate::sync::wait_for_eof;

type DialReply = oneshot::Sender<io::Result<std::net::TcpStream>>;

struct DialRequest {
    port: u16,
    reply: DialReply,
}

/// Opens connections from inside the container namespace
///
/// A dedicated thread joins the namespace and spawns one short-lived
/// thread per connection; threads inherit the namespace of their creator.
#[derive(Clone)]
struct NamespaceDialer {
    requests: mpsc::Sender<DialRequest>,
}

fn same_namespace(path: &Path) -> bool {
    match (std::fs::metadata(path), std::fs::metadata("/proc/thread-self/ns/net")) {
        (Ok(target), Ok(current)) => target.dev() == current.dev() && target.ino() == current.ino(),
        _ => false,
    }
}

impl NamespaceDialer {
    fn spawn(netns: &Path) -> Result<Self> {
        let file = File::open(netns).with_context(|| {
            format!("error retrieving network namespace at {}", netns.display())
        })?;
        let join = !same_namespace(netns);

        let (requests, incoming) = mpsc::channel::<DialRequest>();
        let (joined_tx, joined_rx) = mpsc::sync_channel::<Result<()>>(1);

        std::thread::Builder::new()
            .name("netns-dialer".to_string())
            .spawn(move || {
                if join && let Err(e) = setns(&file, CloneFlags::CLONE_NEWNET) {
                    let _ = joined_tx.send(Err(Error::namespace(format!(
                        "cannot join network namespace: {e}"
                    ))));
                    return;
                }
                drop(file);
                let _ = joined_tx.send(Ok(()));

                while let Ok(request) = incoming.recv() {
                    std::thread::spawn(move || {
                        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, request.port));
                        let _ = request.reply.send(std::net::TcpStream::connect(addr));
                    });
                }
            })?;

        joined_rx
            .recv()
            .map_err(|_| Error::internal("namespace dialer exited before joining"))??;

        Ok(Self { requests })
    }

    async fn connect(&self, port: u16) -> io::Result<TcpStream> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(DialRequest { port, reply })
            .map_err(|_| io::Error::other("namespace dialer stopped"))?;
        let stream = response
            .await
            .map_err(|_| io::Error::other("namespace dialer dropped the request"))??;
        stream.set_nonblocking(true)?;
        TcpStream::from_std(stream)
    }
}

async fn serve(listener: TcpListener, container_port: u16, dialer: NamespaceDialer) {
    loop {
        let (mut inbound, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };

        let dialer = dialer.clone();
        tokio::spawn(async move {
            match dialer.connect(container_port).await {
                Ok(mut outbound) => {
                    if let Err(e) = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await
                    {
                        debug!(peer = %peer, error = %e, "Connection closed with error");
                    }
                }
                Err(e) => {
                    warn!(peer = %peer, port = container_port, error = %e, "Cannot reach container port");
                }
            }
        });
    }
}

fn take_fd(fd: RawFd) -> Result<OwnedFd> {
    // SAFETY: the borrow ends before this function returns; F_GETFD only
    // inspects the descriptor table
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    if fcntl(borrowed, FcntlArg::F_GETFD).is_err() {
        return Err(Error::invalid_config(format!("descriptor {fd} is not open")));
    }
    // SAFETY: the launcher mapped this descriptor for us and nothing else in
    // this process refers to it
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Run the forwarding helper until its exit descriptor reaches EOF
///
/// Errors are meant for the user; the caller prints them on stdout.
///
/// # Errors
/// Returns error if the configuration is invalid, a port cannot be bound,
/// or the namespace cannot be joined
pub async fn run_helper<R: Read>(input: R) -> Result<()> {
    let config: PortForwardConfig = serde_json::from_reader(input)
        .map_err(|e| Error::from(e).context("cannot parse port forwarding configuration"))?;

    if let Some(mapping) = config
        .mappings
        .iter()
        .find(|m| m.protocol != Protocol::Tcp)
    {
        return Err(Error::Unsupported {
            feature: format!("{} port forwarding", mapping.protocol),
        });
    }
    if config.exit_fd == config.ready_fd {
        return Err(Error::invalid_config("exit and ready descriptors must differ"));
    }

    let exit = take_fd(config.exit_fd)?;
    let ready = take_fd(config.ready_fd)?;
    let dialer = NamespaceDialer::spawn(&config.netns_path)?;

    let mut listeners = Vec::with_capacity(config.mappings.len());
    for mapping in &config.mappings {
        let ip = mapping
            .host_ip_addr()?
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let addr = SocketAddr::new(ip, mapping.host_port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("cannot listen on {addr}"))?;
        listeners.push((listener, mapping.container_port));
    }

    File::from(ready)
        .write_all(b"1")
        .with_context(|| "cannot signal readiness")?;
    info!(ports = listeners.len(), netns = %config.netns_path.display(), "Port forwarding ready");

    for (listener, container_port) in listeners {
        tokio::spawn(serve(listener, container_port, dialer.clone()));
    }

    wait_for_eof(exit).await?;
    info!("Exit descriptor closed, stopping");
    Ok(())
}
