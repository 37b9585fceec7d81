//! Vortex Core - Foundation types and errors
//!
//! This crate provides the identifiers, network value objects and error
//! taxonomy shared by the namespace and network crates.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod net;
pub mod types;

pub use error::{Error, Result, ResultExt};
pub use net::{MacAddress, PortMapping, Protocol};
pub use types::{ContainerId, PrivilegeMode, ProcessId};
