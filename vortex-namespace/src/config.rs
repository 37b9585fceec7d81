//! Network namespace configuration

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Default directory holding namespace bind mounts
pub const DEFAULT_RUNTIME_DIR: &str = "/run/netns";

/// Default prefix of bind-mount file names
pub const DEFAULT_PREFIX: &str = "cni-";

/// Where and how network namespaces are bind-mounted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetNsConfig {
    /// Directory holding namespace bind mounts
    pub runtime_dir: PathBuf,

    /// Prefix of generated bind-mount names
    pub prefix: String,

    /// Permission bits for the runtime directory
    pub dir_mode: u32,
}

impl Default for NetNsConfig {
    fn default() -> Self {
        Self {
            runtime_dir: PathBuf::from(DEFAULT_RUNTIME_DIR),
            prefix: DEFAULT_PREFIX.to_string(),
            dir_mode: 0o711,
        }
    }
}

impl NetNsConfig {
    /// Create a new namespace configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the runtime directory
    #[must_use]
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = dir.into();
        self
    }

    /// Set the bind-mount name prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the runtime directory permissions
    #[must_use]
    pub const fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    /// Generate a fresh bind-mount path under the runtime directory
    ///
    /// The name carries 128 random bits formatted as five hyphenated hex
    /// groups, e.g. `/run/netns/cni-1f0e9a2b-77c4-0d3e-5a61-c0ffee123456`.
    #[must_use]
    pub fn generate_path(&self) -> PathBuf {
        self.runtime_dir
            .join(format!("{}{}", self.prefix, random_suffix()))
    }

    /// Whether `path` is one of our bind mounts (and not e.g. a procfs link)
    #[must_use]
    pub fn owns(&self, path: &Path) -> bool {
        path.starts_with(&self.runtime_dir)
    }
}

fn random_suffix() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);

    let mut out = String::with_capacity(36);
    for (i, byte) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}
