//! Error types for Vortex

use thiserror::Error;

/// Vortex error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Namespace operation failed
    #[error("Namespace error: {message}")]
    Namespace {
        /// Error message
        message: String,
    },

    /// Invalid or malformed configuration value
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// A requested option is not supported by the detected binary
    #[error("{feature} not supported")]
    Unsupported {
        /// Option or flag that is missing
        feature: String,
    },

    /// The network plugin reported a failure
    #[error("network plugin: {message}")]
    Plugin {
        /// Message returned by the plugin
        message: String,
    },

    /// A supervised subprocess failed before signalling readiness
    #[error("{program} failed: {detail}")]
    Handshake {
        /// Program name
        program: String,
        /// Captured log or status detail
        detail: String,
    },

    /// An operation exceeded its deadline
    #[error("timed out waiting for {what}")]
    Timeout {
        /// What was being waited for
        what: String,
    },

    /// Malformed or error-flagged response from a collaborator
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message
        message: String,
    },

    /// A collaborator violated its contract
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },

    /// Operation failed with added context
    #[error("{context}: {source}")]
    Context {
        /// What the engine was doing
        context: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build an [`Error::InvalidConfig`]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Build an [`Error::Namespace`]
    pub fn namespace(message: impl Into<String>) -> Self {
        Self::Namespace {
            message: message.into(),
        }
    }

    /// Build an [`Error::Internal`]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Build an [`Error::Protocol`]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Wrap this error with a description of the failed operation
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping any context layers
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this error signals a collaborator contract violation
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self.root_cause(), Self::Internal { .. })
    }
}

/// Attach context to the error side of a [`Result`]
pub trait ResultExt<T> {
    /// Wrap the error with a lazily built context message
    ///
    /// # Errors
    /// Returns the original error wrapped in [`Error::Context`]
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

/// Result type alias for Vortex operations
pub type Result<T> = std::result::Result<T, Error>;
