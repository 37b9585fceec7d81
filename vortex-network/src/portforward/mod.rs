//! Host port forwarding helper
//!
//! The engine re-executes itself with `argv[0]` set to [`REEXEC_KEY`]. The
//! helper reads a [`PortForwardConfig`] from stdin, binds the host ports,
//! signals readiness on its ready descriptor, and relays connections into
//! the container namespace until its exit descriptor reaches EOF.

mod helper;
mod launch;

use serde::{Deserialize, Serialize};
use std::os::fd::RawFd;
use std::path::PathBuf;
use vortex_core::PortMapping;

pub use helper::run_helper;
pub use launch::launch;

/// `argv[0]` that selects helper mode
pub const REEXEC_KEY: &str = "rootlessport";

/// Helper configuration, passed as JSON on stdin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwardConfig {
    /// Ports to forward
    #[serde(rename = "Mappings")]
    pub mappings: Vec<PortMapping>,
    /// Namespace to forward into
    #[serde(rename = "NetNSPath")]
    pub netns_path: PathBuf,
    /// Descriptor whose EOF stops the helper
    #[serde(rename = "ExitFD")]
    pub exit_fd: RawFd,
    /// Descriptor to write one byte to when ready
    #[serde(rename = "ReadyFD")]
    pub ready_fd: RawFd,
    /// Scratch directory
    #[serde(rename = "TmpDir")]
    pub tmp_dir: PathBuf,
}
