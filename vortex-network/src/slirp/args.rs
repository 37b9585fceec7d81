//! Emulator command line

use std::path::Path;
use vortex_core::{Error, ProcessId, Result};

use super::features::SlirpFeatures;
use super::options::SlirpOptions;
use crate::sync::{EXIT_FD, READY_FD};

/// Name of the tap device created inside the namespace
pub const TAP_DEVICE: &str = "tap0";

/// How the emulator finds the namespace to serve
#[derive(Debug, Clone, Copy)]
pub enum NetnsTarget<'a> {
    /// A bind-mounted namespace, before the container starts
    Path(&'a Path),
    /// The namespace of a running process
    Pid(ProcessId),
}

/// Everything that shapes the emulator invocation
#[derive(Debug, Clone, Copy)]
pub struct SlirpInvocation<'a> {
    /// Parsed user options
    pub options: &'a SlirpOptions,
    /// Capabilities of the binary
    pub features: &'a SlirpFeatures,
    /// MTU to request when supported
    pub mtu: u32,
    /// API socket path, when ports are forwarded by the emulator
    pub api_socket: Option<&'a Path>,
    /// Namespace to serve
    pub target: NetnsTarget<'a>,
}

fn unsupported(feature: &str) -> Error {
    Error::Unsupported {
        feature: feature.to_string(),
    }
}

impl SlirpInvocation<'_> {
    /// Build the argument list
    ///
    /// # Errors
    /// Returns [`Error::Unsupported`] when an option needs a flag the binary
    /// lacks, or an error when `outbound_addr6` is set without IPv6
    pub fn args(&self) -> Result<Vec<String>> {
        let options = self.options;
        let features = self.features;
        let mut args = Vec::new();

        if !options.allow_host_loopback && features.disable_host_loopback {
            args.push("--disable-host-loopback".to_string());
        }
        if features.mtu {
            args.push("--mtu".to_string());
            args.push(self.mtu.to_string());
        }
        if features.enable_sandbox {
            args.push("--enable-sandbox".to_string());
        }
        if features.enable_seccomp {
            args.push("--enable-seccomp".to_string());
        }

        if let Some(cidr) = &options.cidr {
            if !features.cidr {
                return Err(unsupported("cidr"));
            }
            args.push(format!("--cidr={cidr}"));
        }

        if options.enable_ipv6 {
            if !features.ipv6 {
                return Err(unsupported("enable_ipv6"));
            }
            args.push("--enable-ipv6".to_string());
        }

        if let Some(addr) = &options.outbound_addr {
            if !features.outbound_addr {
                return Err(unsupported("outbound_addr"));
            }
            args.push(format!("--outbound-addr={addr}"));
        }

        if let Some(addr) = &options.outbound_addr6 {
            if !features.outbound_addr || !features.ipv6 {
                return Err(unsupported("outbound_addr6"));
            }
            if !options.enable_ipv6 {
                return Err(Error::invalid_config(
                    "enable_ipv6=true is required for outbound_addr6",
                ));
            }
            args.push(format!("--outbound-addr6={addr}"));
        }

        if let Some(socket) = self.api_socket {
            args.push("--api-socket".to_string());
            args.push(socket.display().to_string());
        }

        args.extend([
            "-c".to_string(),
            "-e".to_string(),
            EXIT_FD.to_string(),
            "-r".to_string(),
            READY_FD.to_string(),
        ]);

        match self.target {
            NetnsTarget::Path(path) => {
                args.push("--netns-type=path".to_string());
                args.push(path.display().to_string());
            }
            NetnsTarget::Pid(pid) => args.push(pid.to_string()),
        }
        args.push(TAP_DEVICE.to_string());

        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slirp::options::PortHandler;

    fn all_features() -> SlirpFeatures {
        SlirpFeatures {
            disable_host_loopback: true,
            mtu: true,
            enable_sandbox: true,
            enable_seccomp: true,
            cidr: true,
            outbound_addr: true,
            ipv6: true,
        }
    }

    #[test]
    fn test_pre_start_args() {
        let options = SlirpOptions::default();
        let features = all_features();
        let args = SlirpInvocation {
            options: &options,
            features: &features,
            mtu: 65520,
            api_socket: None,
            target: NetnsTarget::Path(Path::new("/run/netns/cni-x")),
        }
        .args()
        .unwrap();

        assert_eq!(
            args,
            [
                "--disable-host-loopback",
                "--mtu",
                "65520",
                "--enable-sandbox",
                "--enable-seccomp",
                "-c",
                "-e",
                "3",
                "-r",
                "4",
                "--netns-type=path",
                "/run/netns/cni-x",
                "tap0",
            ]
        );
    }

    #[test]
    fn test_post_start_args_with_api_socket() {
        let options = SlirpOptions {
            port_handler: PortHandler::Emulator,
            allow_host_loopback: true,
            ..SlirpOptions::default()
        };
        let features = SlirpFeatures::default();
        let args = SlirpInvocation {
            options: &options,
            features: &features,
            mtu: 65520,
            api_socket: Some(Path::new("/tmp/abc.net")),
            target: NetnsTarget::Pid(ProcessId::from_raw(4321)),
        }
        .args()
        .unwrap();

        assert_eq!(
            args,
            ["--api-socket", "/tmp/abc.net", "-c", "-e", "3", "-r", "4", "4321", "tap0"]
        );
    }

    #[test]
    fn test_unsupported_flags() {
        let features = SlirpFeatures::default();
        let cases = [
            (SlirpOptions { enable_ipv6: true, ..SlirpOptions::default() }, "enable_ipv6 not supported"),
            (SlirpOptions { cidr: Some("10.0.2.0/24".into()), ..SlirpOptions::default() }, "cidr not supported"),
            (SlirpOptions { outbound_addr: Some("lo".into()), ..SlirpOptions::default() }, "outbound_addr not supported"),
            (SlirpOptions { outbound_addr6: Some("lo".into()), ..SlirpOptions::default() }, "outbound_addr6 not supported"),
        ];

        for (options, expected) in cases {
            let err = SlirpInvocation {
                options: &options,
                features: &features,
                mtu: 65520,
                api_socket: None,
                target: NetnsTarget::Pid(ProcessId::from_raw(1)),
            }
            .args()
            .unwrap_err();
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn test_outbound_addr6_requires_ipv6_enabled() {
        let options = SlirpOptions {
            outbound_addr6: Some("2001:db8::1".into()),
            ..SlirpOptions::default()
        };
        let features = all_features();
        let err = SlirpInvocation {
            options: &options,
            features: &features,
            mtu: 65520,
            api_socket: None,
            target: NetnsTarget::Pid(ProcessId::from_raw(1)),
        }
        .args()
        .unwrap_err();
        assert!(err.to_string().contains("enable_ipv6=true is required for outbound_addr6"));
    }
}
