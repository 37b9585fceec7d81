//! Translating container intent into plugin requests

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error};
use vortex_core::{ContainerId, Result};

use crate::container::{AddressRequest, NetworkIntent};
use crate::plugin::{NetAttachment, NetworkPlugin, PodNetwork, RuntimeConfig};
use crate::result::NetResult;

/// Build the attachment request for a container
///
/// Port mappings and any static address go to the first requested network,
/// or to `default_network` when none is named. With a static address and no
/// networks, the default network is listed explicitly so the plugin sees
/// where the address applies.
#[must_use]
pub fn build_request(
    id: &ContainerId,
    name: &str,
    netns: &Path,
    intent: &NetworkIntent,
    address: AddressRequest,
    default_network: &str,
) -> PodNetwork {
    let key = intent
        .networks
        .first()
        .map_or_else(|| default_network.to_string(), Clone::clone);

    let mut networks: Vec<NetAttachment> = intent
        .networks
        .iter()
        .map(|name| NetAttachment {
            name: name.clone(),
            interface: String::new(),
        })
        .collect();

    if !address.is_empty() && networks.is_empty() {
        networks.push(NetAttachment {
            name: key.clone(),
            interface: String::new(),
        });
    }

    let runtime = RuntimeConfig {
        ip: address.ip,
        mac: address.mac,
        port_mappings: intent.port_mappings.clone(),
    };

    PodNetwork {
        name: name.to_string(),
        namespace: name.to_string(),
        id: id.to_string(),
        netns: netns.to_path_buf(),
        networks,
        runtime_config: BTreeMap::from([(key, runtime)]),
        aliases: intent.aliases.clone(),
    }
}

/// Attach a namespace and parse the results
///
/// On any failure the attachment is rolled back with a tear-down call.
/// A rollback failure is logged and the original error returned.
///
/// # Errors
/// Returns the plugin error, or a parse error for a malformed result
pub async fn set_up(plugin: &dyn NetworkPlugin, pod: &PodNetwork) -> Result<Vec<NetResult>> {
    debug!(id = %pod.id, netns = %pod.netns.display(), "Attaching network namespace");

    let parsed = match plugin.set_up_pod(pod).await {
        Ok(results) => results
            .iter()
            .map(|r| {
                debug!(network = %r.network, interface = %r.interface, "Network attached");
                NetResult::parse(&r.result)
            })
            .collect::<Result<Vec<_>>>(),
        Err(e) => Err(e),
    };

    if parsed.is_err()
        && let Err(rollback) = plugin.tear_down_pod(pod).await
    {
        error!(
            id = %pod.id,
            error = %rollback,
            "Error tearing down partially created network namespace"
        );
    }

    parsed
}

/// Detach a namespace
///
/// # Errors
/// Returns the plugin error
pub async fn tear_down(plugin: &dyn NetworkPlugin, pod: &PodNetwork) -> Result<()> {
    debug!(id = %pod.id, netns = %pod.netns.display(), "Detaching network namespace");
    plugin.tear_down_pod(pod).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::MockPlugin;
    use serde_json::json;
    use std::net::IpAddr;
    use vortex_core::{MacAddress, PortMapping};

    fn id() -> ContainerId {
        ContainerId::new("abc123").unwrap()
    }

    #[test]
    fn test_request_without_networks_uses_default_key() {
        let intent = NetworkIntent::new().with_port(PortMapping::tcp(8080, 80));
        let pod = build_request(
            &id(),
            "web",
            Path::new("/run/netns/cni-x"),
            &intent,
            AddressRequest::default(),
            "podman",
        );

        assert!(pod.networks.is_empty());
        assert_eq!(pod.runtime_config.len(), 1);
        assert_eq!(pod.runtime_config["podman"].port_mappings.len(), 1);
        assert_eq!(pod.namespace, "web");
    }

    #[test]
    fn test_static_ip_lists_default_network() {
        let ip: IpAddr = "10.88.0.7".parse().unwrap();
        let mac: MacAddress = "02:00:00:00:00:07".parse().unwrap();
        let pod = build_request(
            &id(),
            "web",
            Path::new("/run/netns/cni-x"),
            &NetworkIntent::new(),
            AddressRequest {
                ip: Some(ip),
                mac: Some(mac),
            },
            "podman",
        );

        assert_eq!(pod.networks.len(), 1);
        assert_eq!(pod.networks[0].name, "podman");
        assert_eq!(pod.runtime_config["podman"].ip, Some(ip));
        assert_eq!(pod.runtime_config["podman"].mac, Some(mac));
    }

    #[test]
    fn test_first_network_is_key() {
        let intent = NetworkIntent::new()
            .with_network("frontend")
            .with_network("backend")
            .with_alias("frontend", "web-alias");
        let pod = build_request(
            &id(),
            "web",
            Path::new("/run/netns/cni-x"),
            &intent,
            AddressRequest::default(),
            "podman",
        );

        let names: Vec<&str> = pod.networks.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["frontend", "backend"]);
        assert!(pod.runtime_config.contains_key("frontend"));
        assert_eq!(pod.aliases["frontend"], ["web-alias".to_string()]);
    }

    #[tokio::test]
    async fn test_set_up_failure_rolls_back() {
        let plugin = MockPlugin::new("podman");
        plugin.fail_set_up("bridge missing").await;
        let pod = build_request(
            &id(),
            "web",
            Path::new("/run/netns/cni-x"),
            &NetworkIntent::new(),
            AddressRequest::default(),
            "podman",
        );

        let err = set_up(&plugin, &pod).await.unwrap_err();
        assert!(err.to_string().contains("bridge missing"));
        assert_eq!(plugin.tear_down_requests().await, vec![pod]);
    }

    #[tokio::test]
    async fn test_malformed_result_rolls_back() {
        let plugin = MockPlugin::new("podman");
        plugin.set_results(vec![json!({"ips": "not a list"})]).await;
        let pod = build_request(
            &id(),
            "web",
            Path::new("/run/netns/cni-x"),
            &NetworkIntent::new(),
            AddressRequest::default(),
            "podman",
        );

        assert!(set_up(&plugin, &pod).await.is_err());
        assert_eq!(plugin.tear_down_requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_set_up_parses_in_order() {
        let plugin = MockPlugin::new("podman");
        plugin
            .set_results(vec![
                json!({"cniVersion": "0.4.0", "ips": [{"version": "4", "address": "10.1.0.2/24"}]}),
                json!({"cniVersion": "0.4.0", "ips": [{"version": "4", "address": "10.2.0.2/24"}]}),
            ])
            .await;
        let intent = NetworkIntent::new().with_network("a").with_network("b");
        let pod = build_request(
            &id(),
            "web",
            Path::new("/run/netns/cni-x"),
            &intent,
            AddressRequest::default(),
            "podman",
        );

        let results = set_up(&plugin, &pod).await.unwrap();
        assert_eq!(results[0].ips[0].address.to_string(), "10.1.0.2/24");
        assert_eq!(results[1].ips[0].address.to_string(), "10.2.0.2/24");
        assert!(plugin.tear_down_requests().await.is_empty());
    }
}
