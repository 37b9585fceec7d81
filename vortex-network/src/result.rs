//! Structured results returned by the network plugin

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use vortex_core::{Error, Result};

/// An address together with its prefix length, e.g. `10.88.0.5/16`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpPrefix {
    /// Create a prefix, validating the length against the address family
    ///
    /// # Errors
    /// Returns error if `prefix_len` exceeds 32 (IPv4) or 128 (IPv6)
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix_len > max {
            return Err(Error::protocol(format!(
                "prefix length {prefix_len} out of range for {addr}"
            )));
        }
        Ok(Self { addr, prefix_len })
    }

    /// Host address
    #[must_use]
    pub const fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Number of leading network bits
    #[must_use]
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| Error::protocol(format!("address {s:?} has no prefix length")))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| Error::protocol(format!("invalid address {addr:?}")))?;
        let len: u8 = len
            .parse()
            .map_err(|_| Error::protocol(format!("invalid prefix length {len:?}")))?;
        Self::new(addr, len)
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> Self {
        prefix.to_string()
    }
}

/// Interface created by the plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Interface name
    pub name: String,
    /// Hardware address, may be empty
    #[serde(default)]
    pub mac: String,
    /// Namespace path the interface lives in; empty for host-side interfaces
    #[serde(default)]
    pub sandbox: String,
}

/// Address assigned by the plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfig {
    /// Address family tag, `"4"` or `"6"`
    pub version: String,
    /// Address with prefix length
    pub address: IpPrefix,
    /// Gateway, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    /// Index into the result's interface list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
}

/// Address family of an [`IpConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl IpConfig {
    /// Family named by the version tag
    ///
    /// # Errors
    /// Returns an internal error for any tag other than `"4"` or `"6"`
    pub fn family(&self) -> Result<IpFamily> {
        match self.version.as_str() {
            "4" => Ok(IpFamily::V4),
            "6" => Ok(IpFamily::V6),
            other => Err(Error::internal(format!(
                "unrecognized IP version {other:?}"
            ))),
        }
    }

    /// MAC of the interface this address is bound to
    ///
    /// Index 0 is the host-side interface, so only indices
    /// `1..interfaces.len()` resolve.
    #[must_use]
    pub fn interface_mac<'a>(&self, interfaces: &'a [Interface]) -> Option<&'a str> {
        match self.interface {
            Some(idx) if idx > 0 && idx < interfaces.len() => Some(interfaces[idx].mac.as_str()),
            _ => None,
        }
    }
}

/// Route installed by the plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination network
    pub dst: IpPrefix,
    /// Next hop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

/// Outcome of attaching one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetResult {
    /// Result format version reported by the plugin
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    /// Interfaces created
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    /// Addresses assigned
    #[serde(default)]
    pub ips: Vec<IpConfig>,
    /// Routes installed
    #[serde(default)]
    pub routes: Vec<Route>,
    /// Resolver configuration, passed through untouched
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub dns: serde_json::Value,
}

impl NetResult {
    /// Convert a raw plugin result into the current structured form
    ///
    /// Entries without a version tag get one from their address family.
    ///
    /// # Errors
    /// Returns error if the value does not describe a plugin result
    pub fn parse(raw: &serde_json::Value) -> Result<Self> {
        let mut raw = raw.clone();
        if let Some(ips) = raw.get_mut("ips").and_then(serde_json::Value::as_array_mut) {
            for ip in ips {
                let Some(entry) = ip.as_object_mut() else {
                    continue;
                };
                if entry.contains_key("version") {
                    continue;
                }
                let family = entry
                    .get("address")
                    .and_then(serde_json::Value::as_str)
                    .and_then(|a| a.parse::<IpPrefix>().ok())
                    .map(|p| if p.addr().is_ipv4() { "4" } else { "6" });
                if let Some(family) = family {
                    entry.insert("version".into(), family.into());
                }
            }
        }

        serde_json::from_value(raw)
            .map_err(|e| Error::protocol(format!("error parsing network plugin result: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_bridge_result() {
        let raw = json!({
            "cniVersion": "0.4.0",
            "interfaces": [
                {"name": "cni-podman0", "mac": "aa:bb:cc:dd:ee:01"},
                {"name": "eth0", "mac": "aa:bb:cc:dd:ee:02", "sandbox": "/run/netns/cni-x"}
            ],
            "ips": [
                {"version": "4", "address": "10.88.0.5/16", "gateway": "10.88.0.1", "interface": 1}
            ],
            "routes": [{"dst": "0.0.0.0/0"}],
            "dns": {}
        });

        let result = NetResult::parse(&raw).unwrap();
        assert_eq!(result.ips.len(), 1);
        let ip = &result.ips[0];
        assert_eq!(ip.family().unwrap(), IpFamily::V4);
        assert_eq!(ip.address.to_string(), "10.88.0.5/16");
        assert_eq!(ip.interface_mac(&result.interfaces), Some("aa:bb:cc:dd:ee:02"));
    }

    #[test]
    fn test_parse_infers_missing_version() {
        let raw = json!({
            "cniVersion": "1.0.0",
            "ips": [{"address": "fd00::5/64"}, {"address": "10.0.0.2/24"}]
        });

        let result = NetResult::parse(&raw).unwrap();
        assert_eq!(result.ips[0].version, "6");
        assert_eq!(result.ips[1].version, "4");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(NetResult::parse(&json!({"ips": [{"address": "nope"}]})).is_err());
        assert!(NetResult::parse(&json!("just a string")).is_err());
    }

    #[test]
    fn test_unknown_version_is_internal() {
        let ip = IpConfig {
            version: "5".into(),
            address: "10.0.0.2/24".parse().unwrap(),
            gateway: None,
            interface: None,
        };
        assert!(ip.family().unwrap_err().is_internal());
    }

    #[test]
    fn test_interface_index_bounds() {
        let interfaces = vec![
            Interface { name: "br0".into(), mac: "00:00:00:00:00:01".into(), sandbox: String::new() },
            Interface { name: "eth0".into(), mac: "00:00:00:00:00:02".into(), sandbox: "x".into() },
        ];
        let mut ip = IpConfig {
            version: "4".into(),
            address: "10.0.0.2/24".parse().unwrap(),
            gateway: None,
            interface: Some(0),
        };
        assert_eq!(ip.interface_mac(&interfaces), None);
        ip.interface = Some(2);
        assert_eq!(ip.interface_mac(&interfaces), None);
        ip.interface = Some(1);
        assert_eq!(ip.interface_mac(&interfaces), Some("00:00:00:00:00:02"));
    }

    #[test]
    fn test_prefix_bounds() {
        assert!("10.0.0.1/33".parse::<IpPrefix>().is_err());
        assert!("fd00::1/128".parse::<IpPrefix>().is_ok());
        assert!("10.0.0.1".parse::<IpPrefix>().is_err());
    }
}
