//! Network namespace lifecycle for containers

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vortex_core::{Error, PrivilegeMode, ProcessId, Result, ResultExt};
use vortex_namespace::{NetNsBackend, NetNsHandle};

use crate::bridge;
use crate::config::NetworkConfig;
use crate::container::{AddressRequest, ContainerNetwork};
use crate::plugin::{NetworkPlugin, PodNetwork};
use crate::result::NetResult;

/// Errors collected while tearing down, in the order they occurred
#[derive(Debug, Default)]
pub struct TeardownReport {
    errors: Vec<Error>,
}

impl TeardownReport {
    fn record(&mut self, err: Error) {
        error!(error = %err, "Teardown step failed");
        self.errors.push(err);
    }

    /// All failures
    #[must_use]
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Whether every step succeeded
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// The last failure, if any
    ///
    /// # Errors
    /// Returns the most recent error recorded
    pub fn into_result(self) -> Result<()> {
        self.errors.into_iter().last().map_or(Ok(()), Err)
    }
}

/// What the rootless dispatcher will do for a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootlessSetup {
    /// Run the userspace emulator
    Emulator,
    /// Only forward ports into a namespace configured elsewhere
    PortForwarder,
    /// Nothing to do
    Nothing,
}

impl RootlessSetup {
    /// Choose the strategy for a container
    #[must_use]
    pub fn for_container(ctr: &ContainerNetwork) -> Self {
        let intent = ctr.intent();
        if intent.userspace_emulation {
            Self::Emulator
        } else if !intent.networks.is_empty() {
            Self::PortForwarder
        } else {
            Self::Nothing
        }
    }
}

/// Creates, configures and destroys container network namespaces
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use vortex_core::{ContainerId, PrivilegeMode};
/// use vortex_namespace::KernelBackend;
/// use vortex_network::{ContainerNetwork, MockPlugin, NetworkConfig, NetworkIntent, NetworkManager};
///
/// # async fn example() -> vortex_core::Result<()> {
/// let manager = NetworkManager::new(
///     Arc::new(KernelBackend::default()),
///     Arc::new(MockPlugin::new("podman")),
///     NetworkConfig::default(),
///     PrivilegeMode::detect(),
/// );
///
/// let mut ctr = ContainerNetwork::new(ContainerId::new("web1")?, "web", NetworkIntent::new());
/// manager.create(&mut ctr).await?;
/// manager.teardown(&mut ctr).await?;
/// # Ok(())
/// # }
/// ```
pub struct NetworkManager {
    backend: Arc<dyn NetNsBackend>,
    plugin: Arc<dyn NetworkPlugin>,
    config: NetworkConfig,
    privilege: PrivilegeMode,
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("backend", &self.backend)
            .field("privilege", &self.privilege)
            .finish_non_exhaustive()
    }
}

impl NetworkManager {
    /// Create a manager
    #[must_use]
    pub fn new(
        backend: Arc<dyn NetNsBackend>,
        plugin: Arc<dyn NetworkPlugin>,
        config: NetworkConfig,
        privilege: PrivilegeMode,
    ) -> Self {
        Self {
            backend,
            plugin,
            config,
            privilege,
        }
    }

    /// Engine network configuration
    #[must_use]
    pub const fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Privilege mode the manager runs in
    #[must_use]
    pub const fn privilege(&self) -> PrivilegeMode {
        self.privilege
    }

    fn uses_plugin(&self, ctr: &ContainerNetwork) -> bool {
        !self.privilege.is_rootless() && !ctr.intent().userspace_emulation
    }

    /// Whether the rootless dispatcher must run after the namespace exists
    #[must_use]
    pub fn needs_rootless_setup(&self, ctr: &ContainerNetwork) -> bool {
        self.privilege.is_rootless() || ctr.intent().userspace_emulation
    }

    fn pod_network(&self, ctr: &ContainerNetwork, netns: &Path, address: AddressRequest) -> PodNetwork {
        bridge::build_request(
            ctr.id(),
            ctr.name(),
            netns,
            ctr.intent(),
            address,
            &self.plugin.default_network_name(),
        )
    }

    async fn configure(&self, ctr: &mut ContainerNetwork, netns: &Path) -> Result<Vec<NetResult>> {
        let address = ctr.take_address_request();
        let pod = self.pod_network(ctr, netns, address);
        let results = bridge::set_up(self.plugin.as_ref(), &pod)
            .await
            .with_context(|| {
                format!(
                    "error configuring network namespace for container {}",
                    ctr.id()
                )
            })?;
        info!(id = %ctr.id(), networks = results.len(), "Network namespace configured");
        Ok(results)
    }

    /// Allocate and configure a fresh namespace for a container
    ///
    /// Privileged containers without emulation are attached through the
    /// plugin; otherwise the namespace is left for the rootless dispatcher.
    /// On a configuration failure the namespace is unmounted and closed
    /// again and the container state stays empty.
    ///
    /// # Errors
    /// Returns error if the container already has a namespace, allocation
    /// fails, or the plugin fails
    pub async fn create(&self, ctr: &mut ContainerNetwork) -> Result<()> {
        if ctr.state.netns.is_some() {
            return Err(Error::namespace(format!(
                "container {} already has a network namespace",
                ctr.id()
            )));
        }

        let mut handle = self.backend.create().with_context(|| {
            format!("error creating network namespace for container {}", ctr.id())
        })?;
        debug!(id = %ctr.id(), netns = %handle.path().display(), "Made network namespace");

        let status = if self.uses_plugin(ctr) {
            match self.configure(ctr, handle.path()).await {
                Ok(status) => status,
                Err(e) => {
                    if let Err(unmount) = self.backend.unmount(&handle) {
                        error!(error = %unmount, "Error unmounting network namespace after failed setup");
                    }
                    handle.close();
                    return Err(e);
                }
            }
        } else {
            Vec::new()
        };

        ctr.state.netns = Some(handle);
        ctr.state.status = status;
        Ok(())
    }

    /// Bind the namespace of a running container process and configure it
    ///
    /// Used when networking is configured after the container started. The
    /// handle is stored even when the plugin fails, so teardown can still
    /// release it.
    ///
    /// # Errors
    /// Returns error if the container already has a namespace, binding
    /// fails, or configuration fails
    pub async fn bind_process(&self, ctr: &mut ContainerNetwork, pid: ProcessId) -> Result<()> {
        if ctr.state.netns.is_some() {
            return Err(Error::namespace(format!(
                "container {} already has a network namespace",
                ctr.id()
            )));
        }

        let handle = self.backend.bind_process(pid).with_context(|| {
            format!("error binding network namespace of process {pid}")
        })?;
        ctr.state.pid = Some(pid);

        let result = if self.uses_plugin(ctr) {
            let path = handle.path().to_path_buf();
            self.configure(ctr, &path).await
        } else {
            Ok(Vec::new())
        };

        ctr.state.netns = Some(handle);
        match result {
            Ok(status) => {
                ctr.state.status = status;
                Ok(())
            }
            Err(e) => {
                ctr.state.status.clear();
                Err(e)
            }
        }
    }

    /// Open an existing namespace without modifying it
    ///
    /// # Errors
    /// Returns error if the path is not a network namespace
    pub fn join(&self, path: &Path) -> Result<NetNsHandle> {
        self.backend.open(path)
    }

    /// Release the container's namespace descriptor without unmounting
    ///
    /// Does nothing when there is no namespace.
    pub fn close(&self, ctr: &mut ContainerNetwork) {
        if let Some(mut handle) = ctr.state.netns.take() {
            handle.close();
        }
    }

    /// Tear down networking and report every failure
    ///
    /// Steps run in order and each runs even if an earlier one failed:
    /// plugin detach (privileged path), rootless deallocation (rootless
    /// containers on named networks), helper shutdown, unmount, close.
    /// The container ends up without a namespace in every case.
    pub async fn teardown_report(&self, ctr: &mut ContainerNetwork) -> TeardownReport {
        let mut report = TeardownReport::default();

        let Some(path) = ctr.netns_path() else {
            debug!(id = %ctr.id(), "No network namespace to tear down");
            return report;
        };

        // Teardown leaves any pending address override for the next setup.
        let address = AddressRequest {
            ip: ctr.intent().static_ip,
            mac: ctr.intent().static_mac,
        };

        if self.uses_plugin(ctr) {
            let pod = self.pod_network(ctr, &path, address);
            if let Err(e) = bridge::tear_down(self.plugin.as_ref(), &pod).await {
                report.record(e.context(format!(
                    "error tearing down network namespace configuration for container {}",
                    ctr.id()
                )));
            }
        }

        if self.privilege.is_rootless() && !ctr.intent().networks.is_empty() {
            let pod = self.pod_network(ctr, &path, address);
            if let Err(e) = self.plugin.dealloc_rootless(&pod).await {
                report.record(e.context(format!(
                    "error tearing down rootless network for container {}",
                    ctr.id()
                )));
            }
        }

        if ctr.state.slirp_exit_pipe.take().is_some() {
            debug!(id = %ctr.id(), "Stopped slirp4netns");
        }
        if ctr.state.port_exit_pipe.take().is_some() {
            debug!(id = %ctr.id(), "Stopped rootlessport");
        }

        if let Some(mut handle) = ctr.state.netns.take() {
            if let Err(e) = self.backend.unmount(&handle) {
                report.record(e.context(format!(
                    "error unmounting network namespace for container {}",
                    ctr.id()
                )));
            }
            handle.close();
        }
        ctr.state.status.clear();

        if report.is_clean() {
            info!(id = %ctr.id(), "Network namespace torn down");
        } else {
            warn!(id = %ctr.id(), failures = report.errors().len(), "Network teardown incomplete");
        }
        report
    }

    /// Tear down networking
    ///
    /// Idempotent: without a namespace this is a no-op.
    ///
    /// # Errors
    /// Returns the last failure when any step failed
    pub async fn teardown(&self, ctr: &mut ContainerNetwork) -> Result<()> {
        self.teardown_report(ctr).await.into_result()
    }

    /// Finish networking for a rootless or emulated container
    ///
    /// Runs the userspace emulator, or only the port forwarder when the
    /// container joined named networks that were configured elsewhere.
    ///
    /// # Errors
    /// Returns error if the chosen helper fails
    pub async fn setup_rootless(&self, ctr: &mut ContainerNetwork) -> Result<()> {
        match RootlessSetup::for_container(ctr) {
            RootlessSetup::Emulator => crate::slirp::setup(&self.config, ctr).await,
            RootlessSetup::PortForwarder => {
                let path = ctr.netns_path().ok_or_else(|| {
                    Error::namespace(format!(
                        "container {} has no network namespace",
                        ctr.id()
                    ))
                })?;
                crate::portforward::launch(&self.config, ctr, &path).await
            }
            RootlessSetup::Nothing => Ok(()),
        }
    }
}
