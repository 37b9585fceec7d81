//! Engine-level network configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default MTU passed to the userspace emulator
pub const DEFAULT_SLIRP_MTU: u32 = 65520;

/// Per-attempt and total deadlines of a readiness handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTimeouts {
    /// How long a single read of the sync pipe may block
    #[serde(with = "humantime_serde")]
    pub attempt: Duration,
    /// Upper bound for the whole handshake
    #[serde(with = "humantime_serde")]
    pub total: Duration,
}

impl SyncTimeouts {
    /// Create handshake timings
    #[must_use]
    pub const fn new(attempt: Duration, total: Duration) -> Self {
        Self { attempt, total }
    }
}

/// Network settings supplied by the surrounding engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Emulator binary; `None` searches `PATH` for `slirp4netns`
    pub network_cmd_path: Option<PathBuf>,

    /// Scratch directory for logs and API sockets
    pub tmp_dir: PathBuf,

    /// Binary re-executed as the port forwarding helper;
    /// `None` uses the running executable
    pub helper_binary: Option<PathBuf>,

    /// MTU handed to the emulator when it supports `--mtu`
    pub slirp_mtu: u32,

    /// Readiness handshake timings for the emulator
    pub slirp_sync: SyncTimeouts,

    /// Readiness handshake timings for the forwarding helper
    pub helper_sync: SyncTimeouts,

    /// How long to wait for the emulator API socket to appear
    #[serde(with = "humantime_serde")]
    pub api_socket_timeout: Duration,

    /// Poll interval while waiting for the API socket
    #[serde(with = "humantime_serde")]
    pub api_socket_poll: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network_cmd_path: None,
            tmp_dir: std::env::temp_dir().join("vortex"),
            helper_binary: None,
            slirp_mtu: DEFAULT_SLIRP_MTU,
            slirp_sync: SyncTimeouts::new(Duration::from_secs(1), Duration::from_secs(10)),
            helper_sync: SyncTimeouts::new(Duration::from_secs(3), Duration::from_secs(30)),
            api_socket_timeout: Duration::from_secs(60),
            api_socket_poll: Duration::from_millis(25),
        }
    }
}

impl NetworkConfig {
    /// Create a configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific emulator binary
    #[must_use]
    pub fn with_network_cmd_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.network_cmd_path = Some(path.into());
        self
    }

    /// Set the scratch directory
    #[must_use]
    pub fn with_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = dir.into();
        self
    }

    /// Use a specific helper binary instead of re-executing ourselves
    #[must_use]
    pub fn with_helper_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.helper_binary = Some(path.into());
        self
    }

    /// Set emulator handshake timings
    #[must_use]
    pub const fn with_slirp_sync(mut self, timeouts: SyncTimeouts) -> Self {
        self.slirp_sync = timeouts;
        self
    }

    /// Set helper handshake timings
    #[must_use]
    pub const fn with_helper_sync(mut self, timeouts: SyncTimeouts) -> Self {
        self.helper_sync = timeouts;
        self
    }

    /// Set the API socket wait bound
    #[must_use]
    pub const fn with_api_socket_timeout(mut self, timeout: Duration) -> Self {
        self.api_socket_timeout = timeout;
        self
    }

    /// Binary to re-execute as the forwarding helper
    #[must_use]
    pub fn helper_path(&self) -> PathBuf {
        self.helper_binary
            .clone()
            .unwrap_or_else(|| PathBuf::from("/proc/self/exe"))
    }
}

/// Directory where the network plugin keeps its IPAM state
///
/// Only read by cleanup logic; the plugin owns its contents.
#[must_use]
pub fn cni_networks_dir() -> PathBuf {
    PathBuf::from("/var/lib/cni/networks")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.slirp_mtu, 65520);
        assert!(config.helper_sync.attempt > config.slirp_sync.attempt);
        assert!(config.helper_sync.total > config.slirp_sync.total);
        assert_eq!(config.helper_path(), PathBuf::from("/proc/self/exe"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: NetworkConfig = serde_json::from_str(
            r#"{"tmp_dir":"/run/user/1000/vortex","api_socket_timeout":"500ms"}"#,
        )
        .unwrap();

        assert_eq!(config.tmp_dir, PathBuf::from("/run/user/1000/vortex"));
        assert_eq!(config.api_socket_timeout, Duration::from_millis(500));
        assert_eq!(config.api_socket_poll, Duration::from_millis(25));
        assert!(config.network_cmd_path.is_none());
    }

    #[test]
    fn test_human_readable_durations() {
        let config: NetworkConfig = serde_json::from_str(
            r#"{"slirp_sync":{"attempt":"250ms","total":"1m 30s"},"api_socket_poll":"2s"}"#,
        )
        .unwrap();

        assert_eq!(config.slirp_sync.attempt, Duration::from_millis(250));
        assert_eq!(config.slirp_sync.total, Duration::from_secs(90));
        assert_eq!(config.api_socket_poll, Duration::from_secs(2));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["api_socket_poll"], "2s");
        assert_eq!(json["api_socket_timeout"], "1m");

        assert!(serde_json::from_str::<NetworkConfig>(r#"{"api_socket_poll":25}"#).is_err());
    }

    #[test]
    fn test_builder() {
        let config = NetworkConfig::new()
            .with_network_cmd_path("/usr/local/bin/slirp4netns")
            .with_helper_binary("/usr/bin/vortex")
            .with_slirp_sync(SyncTimeouts::new(
                Duration::from_millis(10),
                Duration::from_millis(100),
            ));

        assert_eq!(config.helper_path(), PathBuf::from("/usr/bin/vortex"));
        assert_eq!(config.slirp_sync.total, Duration::from_millis(100));
    }

    #[test]
    fn test_cni_networks_dir() {
        assert_eq!(cni_networks_dir(), PathBuf::from("/var/lib/cni/networks"));
    }
}
