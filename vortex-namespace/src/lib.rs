//! Network namespace resources for containers
//!
//! This crate owns the kernel side of container networking:
//! - Allocating network namespaces and bind-mounting them at random paths
//! - Binding the namespace of an already running process
//! - Joining existing namespaces by path
//! - Unmounting and releasing namespace handles

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod backend;
pub mod config;
pub mod handle;

pub use backend::{KernelBackend, MockBackend, NetNsBackend};
pub use config::NetNsConfig;
pub use handle::NetNsHandle;
