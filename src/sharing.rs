//! Shared-module resolution.
//!
//! Matches import requests against the configured shared entries and
//! determines, per entry, the local fallback module, the required version
//! range and the version offered when the fallback is provided.

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::error::{Diagnostics, FederationError, FederationWarning};
use crate::host::{DESCRIPTOR_FILE, DescriptorFile, ModuleResolver, ResolveError};
use crate::semver::{Range, Version};
use crate::types::{ShareMatch, SharedEntry, VersionSpec, is_path_request};

/// Dependency lists consulted for the required version, in order.
const DEPENDENCY_FIELDS: &[&str] = &["dependencies", "devDependencies", "peerDependencies"];

/// A shared entry with everything determined that the graph builders and
/// the emitter need.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedShared {
    /// Effective entry. For prefix matches the matched remainder has been
    /// appended to the share key and import target.
    pub entry: SharedEntry,
    pub fallback: Option<PathBuf>,
    pub required_version: Option<Range>,
    /// Version under which the fallback is provided to the share scope.
    pub provided_version: Option<Version>,
}

/// Lookup tables for the three matching tiers.
#[derive(Debug, Default)]
struct SharedMatcher {
    exact: HashMap<String, SharedEntry>,
    prefixes: Vec<SharedEntry>,
    resolved: HashMap<PathBuf, SharedEntry>,
}

impl SharedMatcher {
    fn match_request(&self, request: &str) -> Option<SharedEntry> {
        if let Some(entry) = self.exact.get(request) {
            return Some(entry.clone());
        }
        // Longest configured prefix wins.
        self.prefixes
            .iter()
            .filter(|entry| request.starts_with(entry.request.as_str()))
            .max_by_key(|entry| entry.request.len())
            .map(|entry| expand_prefix(entry, &request[entry.request.len()..]))
    }
}

/// Apply a prefix match: the remainder extends both the share key and the
/// fallback import target.
pub fn expand_prefix(entry: &SharedEntry, remainder: &str) -> SharedEntry {
    SharedEntry {
        request: format!("{}{remainder}", entry.request),
        share_key: format!("{}{remainder}", entry.share_key),
        import_target: entry
            .import_target
            .as_ref()
            .map(|import| format!("{import}{remainder}")),
        ..entry.clone()
    }
}

/// Infer the package name of a bare request: an optional `@scope/`
/// segment followed by one path segment.
pub fn infer_package_name(request: &str) -> Option<&str> {
    if is_path_request(request) || request.is_empty() {
        return None;
    }
    let mut end = 0;
    let mut segments = request.split('/');
    if request.starts_with('@') {
        end += segments.next()?.len() + 1;
    }
    let name = segments.next().filter(|s| !s.is_empty())?;
    end += name.len();
    Some(&request[..end])
}

pub struct SharedResolver {
    resolver: Arc<dyn ModuleResolver>,
    context: PathBuf,
    matcher: SharedMatcher,
    descriptors: DashMap<PathBuf, Result<DescriptorFile, ResolveError>>,
    diagnostics: Diagnostics,
}

impl SharedResolver {
    /// Build the matching tables for `entries`. Resolved-path entries are
    /// resolved against `context` here.
    pub async fn new(
        entries: &[SharedEntry],
        resolver: Arc<dyn ModuleResolver>,
        context: impl Into<PathBuf>,
        diagnostics: Diagnostics,
    ) -> Self {
        let context = context.into();
        let mut matcher = SharedMatcher::default();
        for entry in entries {
            match entry.match_kind() {
                ShareMatch::Exact => {
                    matcher
                        .exact
                        .entry(entry.request.clone())
                        .or_insert_with(|| entry.clone());
                }
                ShareMatch::Prefix => matcher.prefixes.push(entry.clone()),
                ShareMatch::ResolvedPath => {
                    match resolver.resolve(&context, &entry.request).await {
                        Ok(path) => {
                            matcher.resolved.entry(path).or_insert_with(|| entry.clone());
                        }
                        Err(e) => diagnostics.warn(FederationWarning::UnresolvedFallback {
                            share_key: entry.share_key.clone(),
                            request: entry.request.clone(),
                            message: e.to_string(),
                        }),
                    }
                }
            }
        }
        Self {
            resolver,
            context,
            matcher,
            descriptors: DashMap::new(),
            diagnostics,
        }
    }

    pub fn context(&self) -> &Path {
        &self.context
    }

    /// Tiers one and two: exact and prefix matches on the request string.
    pub fn match_request(&self, request: &str) -> Option<SharedEntry> {
        self.matcher.match_request(request)
    }

    /// Tier three: the request resolved to a path configured as shared.
    pub fn match_resolved(&self, path: &Path) -> Option<SharedEntry> {
        self.matcher.resolved.get(path).cloned()
    }

    /// Match a request issued from `issuer` and resolve the matched entry.
    ///
    /// `resolved_path` is the host's resolution of the request, if known.
    pub async fn resolve_request(
        &self,
        request: &str,
        issuer: &Path,
        resolved_path: Option<&Path>,
    ) -> Option<Result<ResolvedShared, FederationError>> {
        let entry = self
            .match_request(request)
            .or_else(|| resolved_path.and_then(|path| self.match_resolved(path)))?;
        Some(self.resolve_entry(entry, issuer).await)
    }

    /// Determine fallback and versions of one entry. The fallback lookup
    /// and the required version inference run concurrently.
    pub async fn resolve_entry(
        &self,
        entry: SharedEntry,
        issuer: &Path,
    ) -> Result<ResolvedShared, FederationError> {
        let (fallback, required_version) = tokio::join!(
            self.resolve_fallback(&entry, issuer),
            self.required_version(&entry, issuer)
        );
        let (fallback, provided_version) = fallback?;
        tracing::debug!(
            share_key = %entry.share_key,
            fallback = ?fallback,
            "Resolved shared module"
        );
        Ok(ResolvedShared {
            entry,
            fallback,
            required_version: required_version?,
            provided_version,
        })
    }

    /// Resolve every entry against the build context. Failures are
    /// isolated per entry; results keep the order of `entries`.
    pub async fn resolve_all(
        self: &Arc<Self>,
        entries: Vec<SharedEntry>,
    ) -> Vec<Result<ResolvedShared, FederationError>> {
        let mut tasks = JoinSet::new();
        for (index, entry) in entries.into_iter().enumerate() {
            let this = Arc::clone(self);
            tasks.spawn(async move {
                let context = this.context.clone();
                (index, this.resolve_entry(entry, &context).await)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!("Shared module resolution task failed: {e}"),
            }
        }
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    async fn resolve_fallback(
        &self,
        entry: &SharedEntry,
        issuer: &Path,
    ) -> Result<(Option<PathBuf>, Option<Version>), FederationError> {
        let Some(import) = &entry.import_target else {
            return Ok((None, None));
        };
        let path = match self.resolver.resolve(issuer, import).await {
            Ok(path) => path,
            Err(e) => {
                self.diagnostics.warn(FederationWarning::UnresolvedFallback {
                    share_key: entry.share_key.clone(),
                    request: import.clone(),
                    message: e.to_string(),
                });
                return Ok((None, None));
            }
        };
        let provided = self.provided_version(entry, &path).await?;
        Ok((Some(path), provided))
    }

    async fn provided_version(
        &self,
        entry: &SharedEntry,
        fallback: &Path,
    ) -> Result<Option<Version>, FederationError> {
        match &entry.version {
            VersionSpec::Disabled => Ok(None),
            VersionSpec::Explicit(text) => Version::parse(text).map(Some).map_err(|source| {
                FederationError::VersionRangeParse {
                    share_key: entry.share_key.clone(),
                    range: text.clone(),
                    source,
                }
            }),
            VersionSpec::Infer => {
                let directory = fallback.parent().unwrap_or(fallback);
                let version = match self.descriptor(directory).await {
                    Ok(descriptor) => match descriptor.version() {
                        Some(text) => Version::parse(text).map_err(|e| e.to_string()),
                        None => Err(format!(
                            "No version in description file ({})",
                            descriptor.path.display()
                        )),
                    },
                    Err(e) => Err(e.to_string()),
                };
                Ok(Some(version.unwrap_or_else(|message| {
                    self.diagnostics.warn(FederationWarning::DescriptorLookup {
                        share_key: entry.share_key.clone(),
                        message,
                    });
                    Version::new(0, 0, 0)
                })))
            }
        }
    }

    async fn required_version(
        &self,
        entry: &SharedEntry,
        issuer: &Path,
    ) -> Result<Option<Range>, FederationError> {
        match &entry.required_version {
            VersionSpec::Disabled => Ok(None),
            VersionSpec::Explicit(text) => Range::parse(text).map(Some).map_err(|source| {
                FederationError::VersionRangeParse {
                    share_key: entry.share_key.clone(),
                    range: text.clone(),
                    source,
                }
            }),
            VersionSpec::Infer => match self.infer_required_version(entry, issuer).await {
                Ok(range) => Ok(range),
                Err(message) => {
                    self.diagnostics.warn(FederationWarning::DescriptorLookup {
                        share_key: entry.share_key.clone(),
                        message,
                    });
                    Ok(None)
                }
            },
        }
    }

    async fn infer_required_version(
        &self,
        entry: &SharedEntry,
        issuer: &Path,
    ) -> Result<Option<Range>, String> {
        let package_name = match &entry.package_name {
            Some(name) => name.as_str(),
            None if is_path_request(&entry.request) => return Ok(None),
            None => infer_package_name(&entry.request)
                .ok_or_else(|| "Unable to extract the package name from request".to_string())?,
        };

        let descriptor = self.descriptor(issuer).await.map_err(|e| e.to_string())?;
        let declared = DEPENDENCY_FIELDS
            .iter()
            .find_map(|field| {
                descriptor
                    .data
                    .get(field)
                    .and_then(|deps| deps.get(package_name))
                    .and_then(|v| v.as_str())
            })
            .ok_or_else(|| {
                format!(
                    "Unable to find required version for \"{package_name}\" in description file ({}). It need to be in dependencies, devDependencies or peerDependencies.",
                    descriptor.path.display()
                )
            })?;

        Range::parse(declared).map(Some).map_err(|e| {
            format!("Unable to parse required version \"{declared}\" for \"{package_name}\": {e}")
        })
    }

    /// Nearest descriptor for `directory`, cached per directory.
    async fn descriptor(&self, directory: &Path) -> Result<DescriptorFile, ResolveError> {
        if let Some(cached) = self.descriptors.get(directory) {
            return cached.clone();
        }
        let found = self
            .resolver
            .find_nearest_descriptor(directory, &[DESCRIPTOR_FILE])
            .await;
        self.descriptors
            .entry(directory.to_path_buf())
            .or_insert(found)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_package_name() {
        assert_eq!(infer_package_name("react"), Some("react"));
        assert_eq!(infer_package_name("lodash/fp"), Some("lodash"));
        assert_eq!(infer_package_name("@scope/pkg/sub/path"), Some("@scope/pkg"));
        assert_eq!(infer_package_name("./local"), None);
        assert_eq!(infer_package_name("/abs/path"), None);
        assert_eq!(infer_package_name("@scope"), None);
    }

    #[test]
    fn test_expand_prefix() {
        let entry = SharedEntry::new("shared/", "default");
        let expanded = expand_prefix(&entry, "utils/format");
        assert_eq!(expanded.share_key, "shared/utils/format");
        assert_eq!(expanded.import_target.as_deref(), Some("shared/utils/format"));
    }
}
