//! Capability probe of the emulator binary

use serde::Serialize;
use std::path::Path;
use tokio::process::Command;
use vortex_core::{Error, Result, ResultExt};

/// Flags the installed emulator understands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct SlirpFeatures {
    /// `--disable-host-loopback`
    pub disable_host_loopback: bool,
    /// `--mtu`
    pub mtu: bool,
    /// `--enable-sandbox`
    pub enable_sandbox: bool,
    /// `--enable-seccomp`
    pub enable_seccomp: bool,
    /// `--cidr`
    pub cidr: bool,
    /// `--outbound-addr`
    pub outbound_addr: bool,
    /// `--enable-ipv6`
    pub ipv6: bool,
}

impl SlirpFeatures {
    /// Detect features from `--help` output
    #[must_use]
    pub fn from_help(help: &str) -> Self {
        Self {
            disable_host_loopback: help.contains("--disable-host-loopback"),
            mtu: help.contains("--mtu"),
            enable_sandbox: help.contains("--enable-sandbox"),
            enable_seccomp: help.contains("--enable-seccomp"),
            cidr: help.contains("--cidr"),
            outbound_addr: help.contains("--outbound-addr"),
            ipv6: help.contains("--enable-ipv6"),
        }
    }

    /// Run `<path> --help` and detect features from its combined output
    ///
    /// # Errors
    /// Returns error if the binary cannot run or exits unsuccessfully
    pub async fn probe(path: &Path) -> Result<Self> {
        let context = || format!("error checking slirp4netns binary {}", path.display());

        let output = Command::new(path)
            .arg("--help")
            .output()
            .await
            .with_context(context)?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        let text = String::from_utf8_lossy(&combined);

        if !output.status.success() {
            return Err(Error::Handshake {
                program: "slirp4netns".to_string(),
                detail: format!("{text:?}: {}", output.status),
            }
            .context(context()));
        }

        Ok(Self::from_help(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_help() {
        let help = "Usage: slirp4netns [OPTION]... PID|PATH TAPNAME\n\
                    -c, --configure\n\
                    -e, --exit-fd=FD\n\
                    -r, --ready-fd=FD\n\
                    -m, --mtu=MTU\n\
                    --cidr=CIDR\n\
                    --disable-host-loopback\n";
        let features = SlirpFeatures::from_help(help);

        assert!(features.mtu);
        assert!(features.cidr);
        assert!(features.disable_host_loopback);
        assert!(!features.enable_sandbox);
        assert!(!features.ipv6);
        assert!(!features.outbound_addr);
    }

    #[tokio::test]
    async fn test_probe_failure() {
        let err = SlirpFeatures::probe(Path::new("/nonexistent/slirp4netns"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("error checking slirp4netns binary"));
    }
}
