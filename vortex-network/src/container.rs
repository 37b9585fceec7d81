//! Per-container network intent and runtime state

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use vortex_core::{ContainerId, Error, MacAddress, PortMapping, ProcessId, Result};
use vortex_namespace::NetNsHandle;

use crate::result::NetResult;

/// Option key under which emulator settings are stored
pub const SLIRP_OPTIONS_KEY: &str = "slirp4netns";

/// What the user asked for when creating the container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkIntent {
    /// Named networks to join, first one is primary
    pub networks: Vec<String>,
    /// Host ports to forward into the container
    pub port_mappings: Vec<PortMapping>,
    /// Static address for the primary network
    pub static_ip: Option<IpAddr>,
    /// Static MAC for the primary network
    pub static_mac: Option<MacAddress>,
    /// Name aliases keyed by network
    pub aliases: BTreeMap<String, Vec<String>>,
    /// Free-form `key=value` options keyed by network mode
    pub network_options: BTreeMap<String, Vec<String>>,
    /// Use the userspace network emulator instead of the plugin
    pub userspace_emulation: bool,
    /// Configure networking after the container process started
    pub post_configure_netns: bool,
    /// Share the namespace of another container
    pub netns_container: Option<ContainerId>,
}

impl NetworkIntent {
    /// Create an empty intent
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a named network
    #[must_use]
    pub fn with_network(mut self, name: impl Into<String>) -> Self {
        self.networks.push(name.into());
        self
    }

    /// Add a port mapping
    #[must_use]
    pub fn with_port(mut self, mapping: PortMapping) -> Self {
        self.port_mappings.push(mapping);
        self
    }

    /// Request a static address
    #[must_use]
    pub const fn with_static_ip(mut self, ip: IpAddr) -> Self {
        self.static_ip = Some(ip);
        self
    }

    /// Request a static MAC
    #[must_use]
    pub const fn with_static_mac(mut self, mac: MacAddress) -> Self {
        self.static_mac = Some(mac);
        self
    }

    /// Add an alias on a network
    #[must_use]
    pub fn with_alias(mut self, network: impl Into<String>, alias: impl Into<String>) -> Self {
        self.aliases
            .entry(network.into())
            .or_default()
            .push(alias.into());
        self
    }

    /// Use the userspace emulator with the given `key=value` options
    #[must_use]
    pub fn with_userspace_emulation<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.userspace_emulation = true;
        self.network_options.insert(
            SLIRP_OPTIONS_KEY.to_string(),
            options.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Configure networking after the process started
    #[must_use]
    pub const fn with_post_configure(mut self, post: bool) -> Self {
        self.post_configure_netns = post;
        self
    }

    /// Share another container's namespace
    #[must_use]
    pub fn with_netns_container(mut self, id: ContainerId) -> Self {
        self.netns_container = Some(id);
        self
    }

    /// Options given for the userspace emulator
    #[must_use]
    pub fn slirp_options(&self) -> &[String] {
        self.network_options
            .get(SLIRP_OPTIONS_KEY)
            .map_or(&[], Vec::as_slice)
    }
}

/// Static address override for the next setup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressRequest {
    /// Requested address
    pub ip: Option<IpAddr>,
    /// Requested MAC
    pub mac: Option<MacAddress>,
}

impl AddressRequest {
    /// Whether anything was requested
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ip.is_none() && self.mac.is_none()
    }
}

/// Mutable network state of a container
#[derive(Debug, Default)]
pub struct NetworkState {
    /// Namespace handle while networking is set up
    pub netns: Option<NetNsHandle>,
    /// Per-network plugin results, in network order
    pub status: Vec<NetResult>,
    /// Container init process, once started
    pub pid: Option<ProcessId>,
    /// Write end of the emulator exit pipe
    ///
    /// Closing it tells the emulator to exit. The container monitor
    /// receives it so the emulator dies with the container.
    pub slirp_exit_pipe: Option<OwnedFd>,
    /// Write end of the forwarding helper exit pipe
    pub port_exit_pipe: Option<OwnedFd>,
}

/// A container as seen by the network layer
#[derive(Debug)]
pub struct ContainerNetwork {
    id: ContainerId,
    name: String,
    intent: NetworkIntent,
    pending_address: Option<AddressRequest>,
    /// Runtime state
    pub state: NetworkState,
}

impl ContainerNetwork {
    /// Create a container with no network state yet
    #[must_use]
    pub fn new(id: ContainerId, name: impl Into<String>, intent: NetworkIntent) -> Self {
        Self {
            id,
            name: name.into(),
            intent,
            pending_address: None,
            state: NetworkState::default(),
        }
    }

    /// Container ID
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Container name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requested configuration
    #[must_use]
    pub const fn intent(&self) -> &NetworkIntent {
        &self.intent
    }

    /// Record the process whose namespace networking should use
    #[must_use]
    pub fn with_pid(mut self, pid: ProcessId) -> Self {
        self.state.pid = Some(pid);
        self
    }

    /// Override the static address for the next setup only
    ///
    /// Used when restoring a checkpoint so the container keeps its address.
    pub fn request_address(&mut self, request: AddressRequest) {
        self.pending_address = Some(request);
    }

    /// Consume the address override, falling back to the static configuration
    ///
    /// A pending override is used at most once.
    pub fn take_address_request(&mut self) -> AddressRequest {
        self.pending_address.take().unwrap_or(AddressRequest {
            ip: self.intent.static_ip,
            mac: self.intent.static_mac,
        })
    }

    /// Path of the namespace this container owns, if set up
    #[must_use]
    pub fn netns_path(&self) -> Option<PathBuf> {
        self.state.netns.as_ref().map(|h| h.path().to_path_buf())
    }

    /// Namespace path the emulator or helper should operate on
    ///
    /// # Errors
    /// Returns error if the required namespace or process is not available
    pub fn target_netns_path(&self) -> Result<PathBuf> {
        if self.intent.post_configure_netns {
            self.state.pid.map(ProcessId::netns_path).ok_or_else(|| {
                Error::namespace(format!("container {} has no running process", self.id))
            })
        } else {
            self.netns_path().ok_or_else(|| {
                Error::namespace(format!(
                    "container {} has no network namespace",
                    self.id
                ))
            })
        }
    }
}

/// Persistent container storage
///
/// Inspection syncs a container before reading its state, which also
/// resolves shared namespaces.
pub trait ContainerStore: Send + Sync {
    /// Refresh and return a container
    ///
    /// # Errors
    /// Returns error if the container does not exist or cannot be synced
    fn sync_container(&self, id: &ContainerId) -> Result<Arc<ContainerNetwork>>;
}

/// In-memory [`ContainerStore`] for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    containers: Arc<Mutex<HashMap<ContainerId, Arc<ContainerNetwork>>>>,
    syncs: Arc<Mutex<usize>>,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a container
    pub fn insert(&self, container: ContainerNetwork) {
        self.containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(container.id().clone(), Arc::new(container));
    }

    /// Number of sync calls served
    #[must_use]
    pub fn sync_count(&self) -> usize {
        *self.syncs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContainerStore for InMemoryStore {
    fn sync_container(&self, id: &ContainerId) -> Result<Arc<ContainerNetwork>> {
        *self.syncs.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.containers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::invalid_config(format!("no such container {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctr(intent: NetworkIntent) -> ContainerNetwork {
        ContainerNetwork::new(ContainerId::new("abc123").unwrap(), "web", intent)
    }

    #[test]
    fn test_address_request_is_one_shot() {
        let static_ip: IpAddr = "10.88.0.10".parse().unwrap();
        let mut c = ctr(NetworkIntent::new().with_static_ip(static_ip));

        let restored = AddressRequest {
            ip: Some("10.88.0.42".parse().unwrap()),
            mac: None,
        };
        c.request_address(restored);

        assert_eq!(c.take_address_request(), restored);
        assert_eq!(c.take_address_request().ip, Some(static_ip));
    }

    #[test]
    fn test_target_path_depends_on_timing() {
        let mut c = ctr(NetworkIntent::new().with_post_configure(true));
        assert!(c.target_netns_path().is_err());

        c.state.pid = Some(ProcessId::from_raw(4242));
        assert_eq!(
            c.target_netns_path().unwrap(),
            PathBuf::from("/proc/4242/ns/net")
        );

        let pre = ctr(NetworkIntent::new());
        assert!(pre.target_netns_path().is_err());
    }

    #[test]
    fn test_slirp_options() {
        let intent = NetworkIntent::new().with_userspace_emulation(["mtu=1500"]);
        assert!(intent.userspace_emulation);
        assert_eq!(intent.slirp_options(), ["mtu=1500".to_string()]);
        assert!(NetworkIntent::new().slirp_options().is_empty());
    }

    #[test]
    fn test_store_counts_syncs() {
        let store = InMemoryStore::new();
        store.insert(ctr(NetworkIntent::new()));

        let id = ContainerId::new("abc123").unwrap();
        assert_eq!(store.sync_container(&id).unwrap().name(), "web");
        assert!(store.sync_container(&ContainerId::new("zzz").unwrap()).is_err());
        assert_eq!(store.sync_count(), 2);
    }
}
