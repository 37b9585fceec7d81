//! Vortex Network - container network namespace setup
//!
//! Creates and tears down per-container network namespaces, attaches them
//! to networks through a [`NetworkPlugin`] on the privileged path, and
//! supervises the userspace emulator and port forwarding helper for
//! rootless containers.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod config;
pub mod container;
pub mod control;
pub mod inspect;
pub mod lifecycle;
pub mod plugin;
pub mod portforward;
pub mod result;
pub mod slirp;
pub mod sync;

pub use config::{NetworkConfig, SyncTimeouts, cni_networks_dir};
pub use container::{
    AddressRequest, ContainerNetwork, ContainerStore, InMemoryStore, NetworkIntent, NetworkState,
};
pub use inspect::{
    InspectAdditionalNetwork, InspectBasicNetworkConfig, InspectHostPort, InspectNetworkSettings,
    describe, resolve_netns_path,
};
pub use lifecycle::{NetworkManager, RootlessSetup, TeardownReport};
pub use plugin::{MockPlugin, NetAttachment, NetworkPlugin, PluginResult, PodNetwork, RuntimeConfig};
pub use result::NetResult;
