//! Error kinds and non-fatal diagnostics.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::semver::SemverError;

/// Coarse classification used to decide how a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigConflict,
    ModuleNotFound,
    VersionRangeParse,
    VersionMismatch,
}

#[derive(Debug, Error)]
pub enum FederationError {
    #[error(
        "Container initialization failed as it has already been initialized with a different share scope"
    )]
    ConfigConflict { scope: String },

    #[error("Module \"{name}\" does not exist in container.")]
    MissingExpose { name: String },

    #[error("Cannot find module '{request}'")]
    ModuleNotFound { request: String },

    #[error(
        "Unable to load remote module \"{request}\" from any of [{}]: {}",
        .targets.join(", "),
        .causes.join("; ")
    )]
    RemoteUnavailable {
        request: String,
        targets: Vec<String>,
        causes: Vec<String>,
    },

    #[error("Shared module {share_key} doesn't exist in shared scope {scope} and no fallback is available")]
    SharedNotFound { share_key: String, scope: String },

    #[error("Invalid version range \"{range}\" for shared module {share_key}: {source}")]
    VersionRangeParse {
        share_key: String,
        range: String,
        #[source]
        source: SemverError,
    },

    #[error(
        "Unsatisfied version {required} of shared module {share_key} in scope {scope} (available: {})",
        .offered.join(", ")
    )]
    VersionMismatch {
        share_key: String,
        scope: String,
        required: String,
        offered: Vec<String>,
    },

    #[error("Failed to load '{request}': {message}")]
    ModuleLoad { request: String, message: String },
}

impl FederationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FederationError::ConfigConflict { .. } => ErrorKind::ConfigConflict,
            FederationError::MissingExpose { .. }
            | FederationError::ModuleNotFound { .. }
            | FederationError::RemoteUnavailable { .. }
            | FederationError::SharedNotFound { .. }
            | FederationError::ModuleLoad { .. } => ErrorKind::ModuleNotFound,
            FederationError::VersionRangeParse { .. } => ErrorKind::VersionRangeParse,
            FederationError::VersionMismatch { .. } => ErrorKind::VersionMismatch,
        }
    }

    /// Whether the failure indicates a misconfiguration rather than a
    /// condition the caller can recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConfigConflict | ErrorKind::VersionRangeParse | ErrorKind::VersionMismatch
        )
    }

    pub fn load(request: impl Into<String>, err: impl fmt::Display) -> Self {
        FederationError::ModuleLoad {
            request: request.into(),
            message: err.to_string(),
        }
    }
}

/// Conditions that are reported but never abort resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FederationWarning {
    SingletonConflict {
        share_key: String,
        scope: String,
        active: String,
        required: String,
    },
    VersionMismatch {
        share_key: String,
        scope: String,
        required: String,
        selected: String,
    },
    DescriptorLookup {
        share_key: String,
        message: String,
    },
    RemoteInitialization {
        target: String,
        message: String,
    },
    UnresolvedFallback {
        share_key: String,
        request: String,
        message: String,
    },
}

impl fmt::Display for FederationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FederationWarning::SingletonConflict {
                share_key,
                scope,
                active,
                required,
            } => write!(
                f,
                "Unsatisfied version {active} from shared singleton module {share_key} in scope {scope} (required {required})"
            ),
            FederationWarning::VersionMismatch {
                share_key,
                scope,
                required,
                selected,
            } => write!(
                f,
                "No version of shared module {share_key} in scope {scope} satisfies {required}, using {selected}"
            ),
            FederationWarning::DescriptorLookup { share_key, message } => {
                write!(f, "Unable to determine version for shared module {share_key}: {message}")
            }
            FederationWarning::RemoteInitialization { target, message } => {
                write!(f, "Initialization of sharing external '{target}' failed: {message}")
            }
            FederationWarning::UnresolvedFallback {
                share_key,
                request,
                message,
            } => write!(
                f,
                "Unable to resolve fallback '{request}' for shared module {share_key}: {message}"
            ),
        }
    }
}

/// Collects warnings emitted by a build or a runtime.
///
/// Every warning is also logged through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    warnings: Arc<Mutex<Vec<FederationWarning>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&self, warning: FederationWarning) {
        tracing::warn!("{warning}");
        self.warnings.lock().push(warning);
    }

    pub fn warnings(&self) -> Vec<FederationWarning> {
        self.warnings.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.warnings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.lock().is_empty()
    }
}
