//! Netns command implementation

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use vortex_namespace::{KernelBackend, NetNsBackend, NetNsConfig};

fn backend(runtime_dir: Option<PathBuf>) -> KernelBackend {
    let config = runtime_dir.map_or_else(NetNsConfig::new, |dir| {
        NetNsConfig::new().with_runtime_dir(dir)
    });
    KernelBackend::new(config)
}

fn require_root() -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        anyhow::bail!("Must run as root. Try: sudo vortex netns ...");
    }
    Ok(())
}

pub fn create(runtime_dir: Option<PathBuf>) -> Result<()> {
    require_root()?;

    let mut handle = backend(runtime_dir)
        .create()
        .context("Failed to create network namespace")?;
    println!("{}", handle.path().display());
    handle.close();
    Ok(())
}

pub fn remove(path: &Path, runtime_dir: Option<PathBuf>) -> Result<()> {
    require_root()?;

    let backend = backend(runtime_dir);
    let mut handle = backend
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let result = backend.unmount(&handle);
    handle.close();
    result.context("Failed to remove network namespace")?;

    tracing::info!(netns = %path.display(), "Removed network namespace");
    Ok(())
}
