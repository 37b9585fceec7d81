//! Network plugin seam and attachment requests

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use vortex_core::{Error, MacAddress, PortMapping, Result};

/// One network to attach and the interface to create for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetAttachment {
    /// Network name
    pub name: String,
    /// Interface name inside the namespace; empty lets the plugin choose
    #[serde(rename = "ifname", skip_serializing_if = "String::is_empty")]
    pub interface: String,
}

/// Per-network runtime parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeConfig {
    /// Static address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    /// Static MAC
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<MacAddress>,
    /// Host ports forwarded to this network's address
    #[serde(rename = "portMappings", skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,
}

/// Attachment request handed to the plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodNetwork {
    /// Container name
    pub name: String,
    /// Namespace label, same as the container name
    pub namespace: String,
    /// Container ID
    pub id: String,
    /// Namespace path
    pub netns: PathBuf,
    /// Networks to attach; empty means the plugin default
    pub networks: Vec<NetAttachment>,
    /// Runtime parameters keyed by network name
    #[serde(rename = "runtimeConfig")]
    pub runtime_config: BTreeMap<String, RuntimeConfig>,
    /// Name aliases keyed by network name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, Vec<String>>,
}

/// Raw result of attaching one network
#[derive(Debug, Clone, PartialEq)]
pub struct PluginResult {
    /// Network the result belongs to
    pub network: String,
    /// Interface created for it
    pub interface: String,
    /// Result document as returned by the plugin
    pub result: serde_json::Value,
}

/// Attaches and detaches namespaces to networks
///
/// The plugin owns address management. This crate only builds requests
/// and interprets results.
#[async_trait]
pub trait NetworkPlugin: Send + Sync {
    /// Network joined when a request names none
    fn default_network_name(&self) -> String;

    /// Attach the namespace to every requested network
    ///
    /// # Errors
    /// Returns error if any attachment fails
    async fn set_up_pod(&self, pod: &PodNetwork) -> Result<Vec<PluginResult>>;

    /// Detach the namespace from every requested network
    ///
    /// # Errors
    /// Returns error if detaching fails
    async fn tear_down_pod(&self, pod: &PodNetwork) -> Result<()>;

    /// Release state kept for rootless containers attached to named networks
    ///
    /// # Errors
    /// Returns error if deallocation fails
    async fn dealloc_rootless(&self, _pod: &PodNetwork) -> Result<()> {
        Ok(())
    }
}

/// Mock plugin for testing
///
/// Records every request and answers set-up with canned results.
#[derive(Clone)]
pub struct MockPlugin {
    default_network: String,
    state: Arc<Mutex<MockPluginState>>,
}

#[derive(Default)]
struct MockPluginState {
    results: Vec<serde_json::Value>,
    set_up: Vec<PodNetwork>,
    torn_down: Vec<PodNetwork>,
    deallocated: Vec<PodNetwork>,
    fail_set_up: Option<String>,
    fail_tear_down: Option<String>,
}

impl MockPlugin {
    /// Create a mock whose default network is `default_network`
    #[must_use]
    pub fn new(default_network: impl Into<String>) -> Self {
        Self {
            default_network: default_network.into(),
            state: Arc::new(Mutex::new(MockPluginState::default())),
        }
    }

    /// Results returned by set-up, one per attachment in order
    pub async fn set_results(&self, results: Vec<serde_json::Value>) {
        self.state.lock().await.results = results;
    }

    /// Make set-up fail with `message`
    pub async fn fail_set_up(&self, message: impl Into<String>) {
        self.state.lock().await.fail_set_up = Some(message.into());
    }

    /// Make tear-down fail with `message`
    pub async fn fail_tear_down(&self, message: impl Into<String>) {
        self.state.lock().await.fail_tear_down = Some(message.into());
    }

    /// Requests passed to set-up
    pub async fn set_up_requests(&self) -> Vec<PodNetwork> {
        self.state.lock().await.set_up.clone()
    }

    /// Requests passed to tear-down
    pub async fn tear_down_requests(&self) -> Vec<PodNetwork> {
        self.state.lock().await.torn_down.clone()
    }

    /// Requests passed to rootless deallocation
    pub async fn dealloc_requests(&self) -> Vec<PodNetwork> {
        self.state.lock().await.deallocated.clone()
    }
}

impl std::fmt::Debug for MockPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPlugin")
            .field("default_network", &self.default_network)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl NetworkPlugin for MockPlugin {
    fn default_network_name(&self) -> String {
        self.default_network.clone()
    }

    async fn set_up_pod(&self, pod: &PodNetwork) -> Result<Vec<PluginResult>> {
        let mut state = self.state.lock().await;
        state.set_up.push(pod.clone());

        if let Some(message) = &state.fail_set_up {
            return Err(Error::Plugin {
                message: message.clone(),
            });
        }

        debug!(id = %pod.id, networks = pod.networks.len(), "Mock: Set up pod network");

        let default = [NetAttachment {
            name: self.default_network.clone(),
            interface: String::new(),
        }];
        let attachments = if pod.networks.is_empty() {
            &default[..]
        } else {
            &pod.networks[..]
        };

        let results = attachments
            .iter()
            .zip(state.results.iter())
            .map(|(attachment, raw)| PluginResult {
                network: attachment.name.clone(),
                interface: attachment.interface.clone(),
                result: raw.clone(),
            })
            .collect();
        Ok(results)
    }

    async fn tear_down_pod(&self, pod: &PodNetwork) -> Result<()> {
        let mut state = self.state.lock().await;
        state.torn_down.push(pod.clone());

        if let Some(message) = &state.fail_tear_down {
            return Err(Error::Plugin {
                message: message.clone(),
            });
        }

        debug!(id = %pod.id, "Mock: Tore down pod network");
        Ok(())
    }

    async fn dealloc_rootless(&self, pod: &PodNetwork) -> Result<()> {
        self.state.lock().await.deallocated.push(pod.clone());
        Ok(())
    }
}
