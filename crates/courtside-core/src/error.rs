//! Error types for Courtside Core

use crate::types::AdapterState;
use thiserror::Error;

/// Result type alias for playback operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a `load()` can fail. All of them are fatal to the adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("Failed to fetch manifest: {0}")]
    ManifestFetch(String),

    #[error("Engine setup failed: {0}")]
    Engine(String),

    #[error("DRM configuration rejected: {0}")]
    DrmRejected(String),

    #[error("Invalid media source: {0}")]
    InvalidSource(String),

    #[error("Load interrupted by unload")]
    Interrupted,
}

/// Playback error types
#[derive(Error, Debug)]
pub enum Error {
    // Load errors
    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    // Recovered locally
    #[error("Track selection failed: {0}")]
    Selection(String),

    #[error("Failed to fetch audio capabilities for device {device}: {reason}")]
    CapabilityFetch { device: String, reason: String },

    #[error("Progress persistence failed: {0}")]
    Persistence(String),

    // Lifecycle errors
    #[error("Adapter is not ready (state: {state})")]
    NotReady { state: AdapterState },

    #[error("Adapter has been destroyed")]
    Destroyed,

    #[error("Invalid adapter state transition: {from} -> {to}")]
    InvalidStateTransition { from: AdapterState, to: AdapterState },

    #[error("Unknown variant token: {0}")]
    UnknownVariant(u64),

    // Engine errors
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an engine error
    pub fn engine(msg: impl Into<String>) -> Self {
        Error::Engine(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Error::Persistence(msg.into())
    }

    /// Returns true if this error is handled where it occurs and never
    /// surfaces to the application
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Selection(_) | Error::CapabilityFetch { .. } | Error::Persistence(_)
        )
    }

    /// Returns the error code for logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Load(LoadError::ManifestFetch(_)) => "MANIFEST_FETCH",
            Error::Load(LoadError::Engine(_)) => "ENGINE_SETUP",
            Error::Load(LoadError::DrmRejected(_)) => "DRM_REJECTED",
            Error::Load(LoadError::InvalidSource(_)) => "INVALID_SOURCE",
            Error::Load(LoadError::Interrupted) => "LOAD_INTERRUPTED",
            Error::Selection(_) => "SELECTION",
            Error::CapabilityFetch { .. } => "CAPABILITY_FETCH",
            Error::Persistence(_) => "PERSISTENCE",
            Error::NotReady { .. } => "NOT_READY",
            Error::Destroyed => "DESTROYED",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::UnknownVariant(_) => "UNKNOWN_VARIANT",
            Error::Engine(_) => "ENGINE",
            Error::Serialization(_) => "SERIALIZATION",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::Selection("boom".into()).is_recoverable());
        assert!(Error::persistence("disk full").is_recoverable());
        assert!(Error::CapabilityFetch {
            device: "hdmi".into(),
            reason: "timeout".into()
        }
        .is_recoverable());

        assert!(!Error::Load(LoadError::ManifestFetch("404".into())).is_recoverable());
        assert!(!Error::Destroyed.is_recoverable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::from(LoadError::Interrupted).error_code(), "LOAD_INTERRUPTED");
        assert_eq!(
            Error::NotReady { state: AdapterState::Loading }.error_code(),
            "NOT_READY"
        );
        assert_eq!(
            Error::NotReady { state: AdapterState::Idle }.to_string(),
            "Adapter is not ready (state: idle)"
        );
    }
}
