//! Namespace backend trait for pluggable implementations

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::sched::{CloneFlags, unshare};
use nix::errno::Errno;
use nix::sys::statfs::fstatfs;
use std::fs::{self, DirBuilder, File};
use std::os::fd::AsRawFd;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use vortex_core::{Error, ProcessId, Result};

use crate::config::NetNsConfig;
use crate::handle::NetNsHandle;

/// `f_type` reported by statfs(2) for nsfs files
const NSFS_MAGIC: i64 = 0x6e73_6673;

// NS_GET_NSTYPE from linux/nsfs.h
nix::ioctl_none!(ns_get_nstype, 0xb7, 0x3);

/// Whether `file` refers to a network namespace
fn is_network_namespace(file: &File) -> Result<bool> {
    #[allow(clippy::cast_lossless, clippy::unnecessary_cast)]
    let fs_type = fstatfs(file)?.filesystem_type().0 as i64;
    if fs_type != NSFS_MAGIC {
        return Ok(false);
    }

    // SAFETY: NS_GET_NSTYPE takes no argument and only inspects the descriptor
    match unsafe { ns_get_nstype(file.as_raw_fd()) } {
        Ok(kind) => Ok(kind == CloneFlags::CLONE_NEWNET.bits()),
        // Kernels before 4.11 lack the ioctl
        Err(Errno::ENOTTY) => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// Trait for network namespace backends
///
/// This allows for different implementations:
/// - [`KernelBackend`] - Production: unshare(2) plus bind mounts
/// - [`MockBackend`] - Testing with plain files, no privileges needed
pub trait NetNsBackend: Send + Sync + std::fmt::Debug {
    /// Allocate a new network namespace and bind it at a random path
    ///
    /// # Errors
    /// Returns error if the namespace cannot be created or mounted
    fn create(&self) -> Result<NetNsHandle>;

    /// Bind the namespace of a running process at a random path
    ///
    /// # Errors
    /// Returns error if the bind mount fails
    fn bind_process(&self, pid: ProcessId) -> Result<NetNsHandle>;

    /// Open an existing namespace by path without modifying it
    ///
    /// # Errors
    /// Returns error if the path is not a network namespace
    fn open(&self, path: &Path) -> Result<NetNsHandle>;

    /// Remove the bind mount backing `handle`
    ///
    /// Paths outside the runtime directory are left untouched.
    ///
    /// # Errors
    /// Returns error if unmounting fails
    fn unmount(&self, handle: &NetNsHandle) -> Result<()>;
}

/// Production backend creating real kernel namespaces
#[derive(Debug, Clone, Default)]
pub struct KernelBackend {
    config: NetNsConfig,
}

impl KernelBackend {
    /// Create a backend for the given configuration
    #[must_use]
    pub const fn new(config: NetNsConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    #[must_use]
    pub const fn config(&self) -> &NetNsConfig {
        &self.config
    }

    /// Create the runtime directory and an empty mount point file
    fn prepare_mount_point(&self) -> Result<PathBuf> {
        DirBuilder::new()
            .recursive(true)
            .mode(self.config.dir_mode)
            .create(&self.config.runtime_dir)
            .map_err(|e| {
                Error::namespace(format!(
                    "failed to create {}: {e}",
                    self.config.runtime_dir.display()
                ))
            })?;

        let path = self.config.generate_path();
        File::create(&path).map_err(|e| {
            Error::namespace(format!(
                "failed to create mount point {}: {e}",
                path.display()
            ))
        })?;

        Ok(path)
    }

    fn bind(source: &Path, target: &Path) -> Result<()> {
        mount(
            Some(source),
            target,
            Some("none"),
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| Error::namespace(format!("cannot mount {}: {e}", target.display())))
    }

    fn discard_mount_point(path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove mount point");
        }
    }

    /// Open a freshly bound mount point, undoing the mount if that fails
    fn open_mounted(&self, path: &Path) -> Result<NetNsHandle> {
        self.open(path).inspect_err(|_| {
            if let Err(e) = umount2(path, MntFlags::MNT_DETACH) {
                warn!(path = %path.display(), error = %e, "Failed to unmount namespace");
            }
            Self::discard_mount_point(path);
        })
    }
}

impl NetNsBackend for KernelBackend {
    fn create(&self) -> Result<NetNsHandle> {
        let path = self.prepare_mount_point()?;

        // unshare(2) only moves the calling thread, so do it on a throwaway
        // thread and keep the namespace alive through the bind mount.
        let target = path.clone();
        let result = std::thread::spawn(move || -> Result<()> {
            unshare(CloneFlags::CLONE_NEWNET).map_err(|e| {
                Error::namespace(format!("failed to unshare network namespace: {e}"))
            })?;
            Self::bind(Path::new("/proc/thread-self/ns/net"), &target)
        })
        .join()
        .map_err(|_| Error::namespace("namespace creation thread panicked"))
        .and_then(|r| r);

        if let Err(e) = result {
            Self::discard_mount_point(&path);
            return Err(e);
        }

        debug!(netns = %path.display(), "Created network namespace");

        self.open_mounted(&path)
    }

    fn bind_process(&self, pid: ProcessId) -> Result<NetNsHandle> {
        let path = self.prepare_mount_point()?;

        if let Err(e) = Self::bind(&pid.netns_path(), &path) {
            Self::discard_mount_point(&path);
            return Err(e);
        }

        debug!(netns = %path.display(), pid = %pid, "Bound process network namespace");

        self.open_mounted(&path)
    }

    fn open(&self, path: &Path) -> Result<NetNsHandle> {
        let file = File::open(path).map_err(|e| {
            Error::namespace(format!(
                "error retrieving network namespace at {}: {e}",
                path.display()
            ))
        })?;

        if !is_network_namespace(&file)? {
            return Err(Error::namespace(format!(
                "{} is not a network namespace",
                path.display()
            )));
        }

        Ok(NetNsHandle::new(path, file))
    }

    fn unmount(&self, handle: &NetNsHandle) -> Result<()> {
        let path = handle.path();
        if !self.config.owns(path) {
            debug!(netns = %path.display(), "Not a bind mount we own, skipping unmount");
            return Ok(());
        }

        umount2(path, MntFlags::MNT_DETACH).map_err(|e| {
            Error::namespace(format!("failed to unmount NS at {}: {e}", path.display()))
        })?;

        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::namespace(format!(
                "failed to remove ns path {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Mock backend for testing (plain files stand in for namespaces)
///
/// # Example
/// ```
/// use vortex_namespace::{MockBackend, NetNsBackend, NetNsConfig};
///
/// let dir = tempfile::tempdir().unwrap();
/// let backend = MockBackend::new(NetNsConfig::new().with_runtime_dir(dir.path()));
///
/// let handle = backend.create().unwrap();
/// assert!(handle.path().exists());
///
/// backend.unmount(&handle).unwrap();
/// assert!(!handle.path().exists());
/// assert_eq!(backend.unmounted().len(), 1);
/// ```
#[derive(Clone)]
pub struct MockBackend {
    config: NetNsConfig,
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    created: Vec<PathBuf>,
    unmounted: Vec<PathBuf>,
    fail_create: bool,
    fail_unmount: bool,
    call_count: usize,
}

impl MockBackend {
    /// Create a new mock backend rooted at the configured runtime directory
    #[must_use]
    pub fn new(config: NetNsConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent `create`/`bind_process` calls fail
    pub fn fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    /// Make subsequent `unmount` calls fail
    pub fn fail_unmount(&self, fail: bool) {
        self.state().fail_unmount = fail;
    }

    /// Paths handed out by `create`/`bind_process`
    #[must_use]
    pub fn created(&self) -> Vec<PathBuf> {
        self.state().created.clone()
    }

    /// Paths passed to `unmount`
    #[must_use]
    pub fn unmounted(&self) -> Vec<PathBuf> {
        self.state().unmounted.clone()
    }

    /// Get the number of backend calls made (for testing)
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state().call_count
    }

    fn allocate(&self) -> Result<NetNsHandle> {
        let mut state = self.state();
        state.call_count += 1;
        if state.fail_create {
            return Err(Error::namespace("mock: namespace creation failed"));
        }

        fs::create_dir_all(&self.config.runtime_dir)?;
        let path = self.config.generate_path();
        let file = File::create(&path)?;
        state.created.push(path.clone());

        debug!(netns = %path.display(), "Mock: Created namespace");

        Ok(NetNsHandle::new(path, file))
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend").finish_non_exhaustive()
    }
}

impl NetNsBackend for MockBackend {
    fn create(&self) -> Result<NetNsHandle> {
        self.allocate()
    }

    fn bind_process(&self, _pid: ProcessId) -> Result<NetNsHandle> {
        self.allocate()
    }

    fn open(&self, path: &Path) -> Result<NetNsHandle> {
        self.state().call_count += 1;
        let file = File::open(path).map_err(|e| {
            Error::namespace(format!(
                "error retrieving network namespace at {}: {e}",
                path.display()
            ))
        })?;
        Ok(NetNsHandle::new(path, file))
    }

    fn unmount(&self, handle: &NetNsHandle) -> Result<()> {
        let mut state = self.state();
        state.call_count += 1;
        if state.fail_unmount {
            return Err(Error::namespace(format!(
                "mock: failed to unmount NS at {}",
                handle.path().display()
            )));
        }

        state.unmounted.push(handle.path().to_path_buf());
        if self.config.owns(handle.path()) {
            let _ = fs::remove_file(handle.path());
        }

        debug!(netns = %handle.path().display(), "Mock: Unmounted namespace");

        Ok(())
    }
}
