//! Core type definitions shared across the crate.
//!
//! These are the normalized forms of the federation configuration. All
//! shorthand handling happens in the loader; the rest of the crate only
//! sees these tagged types.

use serde::{Deserialize, Serialize};

pub const DEFAULT_SHARE_SCOPE: &str = "default";

/// Marker that turns a remote target into an in-graph fallback.
pub const INTERNAL_TARGET_PREFIX: &str = "internal ";

/// One module a container exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposeEntry {
    pub name: String,
    /// Modules loaded for this expose, in order. The last one is the
    /// module whose exports the consumer sees.
    pub import_targets: Vec<String>,
    pub chunk_name: Option<String>,
}

/// The federation entry point of a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEntry {
    pub container_name: String,
    pub exposes: Vec<ExposeEntry>,
    pub share_scope: String,
}

/// A reference to another bundle's container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub key: String,
    /// Primary target followed by fallbacks, attempted in order.
    pub external_targets: Vec<String>,
    pub share_scope: String,
}

impl RemoteEntry {
    /// Match an import request against this remote's key.
    ///
    /// Returns the exposed module name (`./rest`) the request refers to.
    /// `app1-extra/x` does not belong to remote `app1`.
    pub fn match_request(&self, request: &str) -> Option<String> {
        let rest = request.strip_prefix(self.key.as_str())?;
        if rest.is_empty() {
            return Some(".".to_string());
        }
        rest.strip_prefix('/').map(|name| format!("./{name}"))
    }

    pub fn targets(&self) -> Vec<RemoteTarget> {
        self.external_targets
            .iter()
            .map(|target| RemoteTarget::parse(target))
            .collect()
    }
}

/// A remote target after interpreting the `internal ` marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "request", rename_all = "kebab-case")]
pub enum RemoteTarget {
    /// Resolved outside the graph by the resource loader.
    External(String),
    /// A module of the consuming bundle itself, used without any load.
    Internal(String),
}

impl RemoteTarget {
    pub fn parse(target: &str) -> Self {
        match target.strip_prefix(INTERNAL_TARGET_PREFIX) {
            Some(request) => RemoteTarget::Internal(request.trim().to_string()),
            None => RemoteTarget::External(target.to_string()),
        }
    }

    pub fn request(&self) -> &str {
        match self {
            RemoteTarget::External(request) | RemoteTarget::Internal(request) => request,
        }
    }
}

/// How a version attribute of a shared entry was configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum VersionSpec {
    /// Not configured, determined from package descriptors.
    #[default]
    Infer,
    /// Explicitly turned off with `false`.
    Disabled,
    Explicit(String),
}

/// How a shared entry matches incoming import requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShareMatch {
    /// The request equals the configured key.
    Exact,
    /// The request starts with the configured key (which ends with `/`).
    Prefix,
    /// The request resolves to the same file as the configured path.
    ResolvedPath,
}

/// A dependency offered to or consumed from a share scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedEntry {
    /// The configured key, which is also the matched request.
    pub request: String,
    pub share_key: String,
    pub share_scope: String,
    /// Local fallback module. `None` when importing is disabled.
    pub import_target: Option<String>,
    pub required_version: VersionSpec,
    pub strict_version: bool,
    pub singleton: bool,
    pub eager: bool,
    pub package_name: Option<String>,
    /// Version offered when the fallback is provided to the scope.
    pub version: VersionSpec,
}

impl SharedEntry {
    /// Build an entry with the defaults applied for `request`.
    pub fn new(request: impl Into<String>, share_scope: impl Into<String>) -> Self {
        let request = request.into();
        Self {
            share_key: request.clone(),
            import_target: Some(request.clone()),
            request,
            share_scope: share_scope.into(),
            required_version: VersionSpec::Infer,
            strict_version: true,
            singleton: false,
            eager: false,
            package_name: None,
            version: VersionSpec::Infer,
        }
    }

    pub fn match_kind(&self) -> ShareMatch {
        if self.request.ends_with('/') {
            ShareMatch::Prefix
        } else if is_path_request(&self.request) {
            ShareMatch::ResolvedPath
        } else {
            ShareMatch::Exact
        }
    }

    /// Default for `strictVersion` when not configured.
    pub fn default_strict_version(singleton: bool, import_enabled: bool) -> bool {
        import_enabled && !singleton
    }

    /// Whether a version mismatch fails at runtime. Eager and
    /// import-disabled entries always warn and substitute instead.
    pub fn enforces_strict_version(&self) -> bool {
        self.strict_version && !self.eager && self.import_target.is_some()
    }
}

/// All federation declarations of one bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Unique name of the bundle, used to order competing registrations.
    pub name: String,
    pub share_scope: String,
    pub container: Option<ContainerEntry>,
    pub remotes: Vec<RemoteEntry>,
    pub shared: Vec<SharedEntry>,
}

/// Relative (`./`, `../`, `.`, `..`) or absolute requests.
pub fn is_path_request(request: &str) -> bool {
    request == "."
        || request == ".."
        || request.starts_with("./")
        || request.starts_with("../")
        || request.starts_with('/')
        || std::path::Path::new(request).is_absolute()
}
