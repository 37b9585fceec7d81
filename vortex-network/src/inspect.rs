//! Engine-facing view of a container's network state

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use vortex_core::{ContainerId, Error, PortMapping, Result};

use crate::container::{ContainerNetwork, ContainerStore};
use crate::result::{IpFamily, NetResult};

/// Addressing of one network attachment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectBasicNetworkConfig {
    /// IPv4 gateway
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub gateway: String,
    /// Primary IPv4 address
    #[serde(rename = "IPAddress", skip_serializing_if = "String::is_empty", default)]
    pub ip_address: String,
    /// Prefix length of the primary IPv4 address
    #[serde(rename = "IPPrefixLen", default)]
    pub ip_prefix_len: u8,
    /// Further IPv4 addresses, with prefix
    #[serde(rename = "SecondaryIPAddresses", skip_serializing_if = "Vec::is_empty", default)]
    pub secondary_ip_addresses: Vec<String>,
    /// IPv6 gateway
    #[serde(rename = "IPv6Gateway", skip_serializing_if = "String::is_empty", default)]
    pub ipv6_gateway: String,
    /// Primary IPv6 address
    #[serde(rename = "GlobalIPv6Address", skip_serializing_if = "String::is_empty", default)]
    pub global_ipv6_address: String,
    /// Prefix length of the primary IPv6 address
    #[serde(rename = "GlobalIPv6PrefixLen", default)]
    pub global_ipv6_prefix_len: u8,
    /// Further IPv6 addresses, with prefix
    #[serde(rename = "SecondaryIPv6Addresses", skip_serializing_if = "Vec::is_empty", default)]
    pub secondary_ipv6_addresses: Vec<String>,
    /// MAC of the primary IPv4 interface
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub mac_address: String,
    /// MACs of interfaces carrying secondary IPv4 addresses
    #[serde(rename = "AdditionalMACAddresses", skip_serializing_if = "Vec::is_empty", default)]
    pub additional_mac_addresses: Vec<String>,
}

/// A named network the container joined
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectAdditionalNetwork {
    /// Network name
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Aliases on this network
    #[serde(rename = "Aliases", skip_serializing_if = "Vec::is_empty", default)]
    pub aliases: Vec<String>,
    /// Addressing, empty while the network is down
    #[serde(flatten)]
    pub basic: InspectBasicNetworkConfig,
}

/// Host side of a published port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectHostPort {
    /// Host address, empty for all
    #[serde(rename = "HostIp")]
    pub host_ip: String,
    /// Host port
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

/// Network section of a container inspection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectNetworkSettings {
    /// Addressing of the implicit network
    #[serde(flatten)]
    pub basic: InspectBasicNetworkConfig,
    /// Namespace path
    #[serde(rename = "SandboxKey", default)]
    pub sandbox_key: String,
    /// Published ports keyed by `<containerPort>/<protocol>`
    #[serde(rename = "Ports", default)]
    pub ports: BTreeMap<String, Vec<InspectHostPort>>,
    /// Named networks
    #[serde(rename = "Networks", skip_serializing_if = "Option::is_none", default)]
    pub networks: Option<BTreeMap<String, InspectAdditionalNetwork>>,
}

/// Group port mappings by container port and protocol
#[must_use]
pub fn port_bindings(mappings: &[PortMapping]) -> BTreeMap<String, Vec<InspectHostPort>> {
    let mut ports: BTreeMap<String, Vec<InspectHostPort>> = BTreeMap::new();
    for mapping in mappings {
        ports
            .entry(format!("{}/{}", mapping.container_port, mapping.protocol))
            .or_default()
            .push(InspectHostPort {
                host_ip: mapping.host_ip.clone(),
                host_port: mapping.host_port.to_string(),
            });
    }
    ports
}

/// Translate one plugin result into inspection addressing
///
/// The first address of each family is primary, later ones are secondary.
/// Only IPv4 addresses report interface MACs.
///
/// # Errors
/// Returns an internal error for an unrecognized IP version tag
pub fn result_to_basic_network_config(result: &NetResult) -> Result<InspectBasicNetworkConfig> {
    let mut config = InspectBasicNetworkConfig::default();
    let gateway = |gw: Option<std::net::IpAddr>| gw.map(|g| g.to_string()).unwrap_or_default();

    for ip in &result.ips {
        let mac = ip.interface_mac(&result.interfaces).map(ToString::to_string);
        match ip.family()? {
            IpFamily::V4 if config.ip_address.is_empty() => {
                config.ip_address = ip.address.addr().to_string();
                config.ip_prefix_len = ip.address.prefix_len();
                config.gateway = gateway(ip.gateway);
                if let Some(mac) = mac {
                    config.mac_address = mac;
                }
            }
            IpFamily::V4 => {
                config.secondary_ip_addresses.push(ip.address.to_string());
                if let Some(mac) = mac {
                    config.additional_mac_addresses.push(mac);
                }
            }
            IpFamily::V6 if config.global_ipv6_address.is_empty() => {
                config.global_ipv6_address = ip.address.addr().to_string();
                config.global_ipv6_prefix_len = ip.address.prefix_len();
                config.ipv6_gateway = gateway(ip.gateway);
            }
            IpFamily::V6 => {
                config.secondary_ipv6_addresses.push(ip.address.to_string());
            }
        }
    }

    Ok(config)
}

fn follow_shared(
    ctr: &ContainerNetwork,
    store: &dyn ContainerStore,
    seen: &mut HashSet<ContainerId>,
) -> Result<Option<Arc<ContainerNetwork>>> {
    let Some(shared) = &ctr.intent().netns_container else {
        return Ok(None);
    };
    if !seen.insert(ctr.id().clone()) {
        return Err(Error::internal(format!(
            "network namespace sharing loop through container {}",
            ctr.id()
        )));
    }
    // Sync so the view reflects the owner's current state.
    let owner = store.sync_container(shared)?;
    debug!(
        id = %ctr.id(),
        owner = %shared,
        "Container shares network namespace, retrieving network info of owner"
    );
    Ok(Some(owner))
}

/// Namespace path of a container, following shared namespaces
///
/// # Errors
/// Returns error if an owning container cannot be synced
pub fn resolve_netns_path(
    ctr: &ContainerNetwork,
    store: &dyn ContainerStore,
) -> Result<Option<PathBuf>> {
    let mut seen = HashSet::new();
    let Some(mut owner) = follow_shared(ctr, store, &mut seen)? else {
        return Ok(ctr.netns_path());
    };
    while let Some(next) = follow_shared(&owner, store, &mut seen)? {
        owner = next;
    }
    Ok(owner.netns_path())
}

/// Describe a container's network state
///
/// # Errors
/// Returns an internal error when the stored results do not match the
/// requested networks, or a sync error for shared namespaces
pub fn describe(ctr: &ContainerNetwork, store: &dyn ContainerStore) -> Result<InspectNetworkSettings> {
    let mut seen = HashSet::new();
    describe_inner(ctr, store, &mut seen)
}

fn describe_inner(
    ctr: &ContainerNetwork,
    store: &dyn ContainerStore,
    seen: &mut HashSet<ContainerId>,
) -> Result<InspectNetworkSettings> {
    if let Some(owner) = follow_shared(ctr, store, seen)? {
        return describe_inner(&owner, store, seen);
    }

    let intent = ctr.intent();
    let mut settings = InspectNetworkSettings {
        ports: port_bindings(&intent.port_mappings),
        ..InspectNetworkSettings::default()
    };

    let aliases = |name: &str| intent.aliases.get(name).cloned().unwrap_or_default();

    let Some(path) = ctr.netns_path() else {
        if !intent.networks.is_empty() {
            settings.networks = Some(
                intent
                    .networks
                    .iter()
                    .map(|name| {
                        let placeholder = InspectAdditionalNetwork {
                            network_id: name.clone(),
                            aliases: aliases(name),
                            basic: InspectBasicNetworkConfig::default(),
                        };
                        (name.clone(), placeholder)
                    })
                    .collect(),
            );
        }
        return Ok(settings);
    };

    settings.sandbox_key = path.display().to_string();

    let status = &ctr.state.status;
    if status.is_empty() {
        return Ok(settings);
    }

    if !intent.networks.is_empty() {
        if intent.networks.len() != status.len() {
            return Err(Error::internal(format!(
                "network inspection mismatch: asked to join {} networks but have information on {} networks",
                intent.networks.len(),
                status.len()
            )));
        }

        let mut networks = BTreeMap::new();
        for (name, result) in intent.networks.iter().zip(status) {
            networks.insert(
                name.clone(),
                InspectAdditionalNetwork {
                    network_id: name.clone(),
                    aliases: aliases(name),
                    basic: result_to_basic_network_config(result)?,
                },
            );
        }
        settings.networks = Some(networks);
        return Ok(settings);
    }

    if status.len() > 1 {
        return Err(Error::internal(format!(
            "should have at most 1 network result if not joining networks, instead got {}",
            status.len()
        )));
    }

    settings.basic = result_to_basic_network_config(&status[0])?;
    Ok(settings)
}
