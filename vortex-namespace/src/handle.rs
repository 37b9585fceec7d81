//! Open reference to a network namespace

use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

/// Handle to a kernel network namespace
///
/// Holds the namespace path (a bind mount under the runtime directory or a
/// `/proc/<pid>/ns/net` link) and an open descriptor keeping the namespace
/// alive. The descriptor is released exactly once, by [`close`](Self::close)
/// or on drop.
#[derive(Debug)]
pub struct NetNsHandle {
    path: PathBuf,
    file: Option<File>,
}

impl NetNsHandle {
    /// Wrap an already opened namespace file
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, file: File) -> Self {
        Self {
            path: path.into(),
            file: Some(file),
        }
    }

    /// Filesystem path of the namespace
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the descriptor has been released
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Borrow the namespace descriptor, if still open
    #[must_use]
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.file.as_ref().map(AsFd::as_fd)
    }

    /// Release the descriptor
    ///
    /// Returns `false` when it was already released.
    pub fn close(&mut self) -> bool {
        let was_open = self.file.take().is_some();
        if was_open {
            tracing::debug!(netns = %self.path.display(), "Closed network namespace");
        }
        was_open
    }
}
