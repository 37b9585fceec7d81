//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Container identifier with validation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    /// Maximum length for container IDs
    pub const MAX_LENGTH: usize = 64;

    /// Create a new `ContainerId` with validation
    ///
    /// # Errors
    /// Returns error if ID is empty, too long, starts with a separator or
    /// contains characters other than alphanumerics, `-`, `_` and `.`
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    fn validate(id: &str) -> Result<()> {
        let Some(first) = id.chars().next() else {
            return Err(Error::invalid_config("Container ID cannot be empty"));
        };

        if id.len() > Self::MAX_LENGTH {
            return Err(Error::invalid_config(format!(
                "Container ID too long (max {} chars)",
                Self::MAX_LENGTH
            )));
        }

        // IDs end up in file names under the scratch directory.
        if !first.is_ascii_alphanumeric() {
            return Err(Error::invalid_config(
                "Container ID must start with an alphanumeric character",
            ));
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(Error::invalid_config(
                "Container ID can only contain alphanumeric, dash, underscore and dot",
            ));
        }

        Ok(())
    }

    /// Get the container ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContainerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContainerId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<ContainerId> for String {
    fn from(id: ContainerId) -> Self {
        id.0
    }
}

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        #[allow(clippy::cast_possible_wrap)]
        Self(std::process::id() as i32)
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Path of this process' network namespace in procfs
    #[must_use]
    pub fn netns_path(self) -> std::path::PathBuf {
        std::path::PathBuf::from(format!("/proc/{}/ns/net", self.0))
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for nix::unistd::Pid {
    fn from(pid: ProcessId) -> Self {
        Self::from_raw(pid.0)
    }
}

/// Privilege level the engine runs with
///
/// Computed once by the caller and passed in; nothing in Vortex queries the
/// effective UID on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeMode {
    /// Running as root: namespaces are configured by the network plugin
    Privileged,
    /// Running inside a user namespace without real root
    Rootless,
}

impl PrivilegeMode {
    /// Detect the mode from the effective UID of the current process
    #[must_use]
    pub fn detect() -> Self {
        if nix::unistd::geteuid().is_root() {
            Self::Privileged
        } else {
            Self::Rootless
        }
    }

    /// Check whether this is the rootless mode
    #[must_use]
    pub const fn is_rootless(self) -> bool {
        matches!(self, Self::Rootless)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_validation() {
        assert!(ContainerId::new("valid-id_1.2").is_ok());
        assert!(ContainerId::new("").is_err());
        assert!(ContainerId::new("a".repeat(65)).is_err());
        assert!(ContainerId::new("invalid id").is_err());
        assert!(ContainerId::new("invalid/id").is_err());
        assert!(ContainerId::new("-leading").is_err());
        assert!(ContainerId::new(".hidden").is_err());
    }

    #[test]
    fn test_container_id_serde() {
        let id = ContainerId::new("3f2a9c").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"3f2a9c\"");
        let deserialized: ContainerId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
        assert!(serde_json::from_str::<ContainerId>("\"a/b\"").is_err());
    }

    #[test]
    fn test_process_netns_path() {
        let pid = ProcessId::from_raw(4242);
        assert_eq!(pid.netns_path().to_str(), Some("/proc/4242/ns/net"));
        assert_eq!(nix::unistd::Pid::from(pid).as_raw(), 4242);
    }

    #[test]
    fn test_privilege_mode() {
        assert!(PrivilegeMode::Rootless.is_rootless());
        assert!(!PrivilegeMode::Privileged.is_rootless());
        let json = serde_json::to_string(&PrivilegeMode::Rootless).unwrap();
        assert_eq!(json, "\"rootless\"");
    }
}
