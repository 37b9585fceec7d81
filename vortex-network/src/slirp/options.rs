//! User-supplied emulator options

use nix::net::if_::if_nametoindex;
use std::net::IpAddr;
use vortex_core::{Error, Result};

use crate::result::IpPrefix;

/// Who forwards host ports into the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortHandler {
    /// The forwarding helper (`port_handler=rootlesskit`)
    #[default]
    Helper,
    /// The emulator's own API socket (`port_handler=slirp4netns`)
    Emulator,
}

/// Parsed `key=value` emulator options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlirpOptions {
    /// Guest IPv4 network
    pub cidr: Option<String>,
    /// Port forwarding mechanism
    pub port_handler: PortHandler,
    /// Let the container reach the host loopback
    pub allow_host_loopback: bool,
    /// Enable IPv6 inside the container
    pub enable_ipv6: bool,
    /// Outbound IPv4 address or interface
    pub outbound_addr: Option<String>,
    /// Outbound IPv6 address or interface
    pub outbound_addr6: Option<String>,
}

fn parse_bool(option: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::invalid_config(format!(
            "invalid value of {option} for slirp4netns: {value:?}"
        ))),
    }
}

fn interface_exists(name: &str) -> bool {
    if_nametoindex(name).is_ok()
}

impl SlirpOptions {
    /// Parse a list of `key=value` options
    ///
    /// Outbound addresses may name an interface instead of an address.
    ///
    /// # Errors
    /// Returns error on unknown keys, missing `=`, or invalid values
    pub fn parse(options: &[String]) -> Result<Self> {
        let mut parsed = Self::default();

        for option in options {
            let (key, value) = option.split_once('=').ok_or_else(|| {
                Error::invalid_config(format!("unknown option for slirp4netns: {option:?}"))
            })?;

            match key {
                "cidr" => {
                    let is_v4 = value
                        .parse::<IpPrefix>()
                        .is_ok_and(|p| p.addr().is_ipv4());
                    if !is_v4 {
                        return Err(Error::invalid_config(format!("invalid cidr {value:?}")));
                    }
                    parsed.cidr = Some(value.to_string());
                }
                "port_handler" => {
                    parsed.port_handler = match value {
                        "slirp4netns" => PortHandler::Emulator,
                        "rootlesskit" => PortHandler::Helper,
                        _ => {
                            return Err(Error::invalid_config(format!(
                                "unknown port_handler for slirp4netns: {value:?}"
                            )));
                        }
                    };
                }
                "allow_host_loopback" => parsed.allow_host_loopback = parse_bool(key, value)?,
                "enable_ipv6" => parsed.enable_ipv6 = parse_bool(key, value)?,
                "outbound_addr" => {
                    let ok = matches!(value.parse::<IpAddr>(), Ok(IpAddr::V4(_)))
                        || interface_exists(value);
                    if !ok {
                        return Err(Error::invalid_config(format!(
                            "invalid outbound_addr {value:?}"
                        )));
                    }
                    parsed.outbound_addr = Some(value.to_string());
                }
                "outbound_addr6" => {
                    let ok = matches!(value.parse::<IpAddr>(), Ok(IpAddr::V6(_)))
                        || interface_exists(value);
                    if !ok {
                        return Err(Error::invalid_config(format!(
                            "invalid outbound_addr6: {value:?}"
                        )));
                    }
                    parsed.outbound_addr6 = Some(value.to_string());
                }
                _ => {
                    return Err(Error::invalid_config(format!(
                        "unknown option for slirp4netns: {option:?}"
                    )));
                }
            }
        }

        Ok(parsed)
    }
}
