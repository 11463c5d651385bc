//! Share scope registry: the runtime table through which independently
//! built bundles offer and pick shared modules.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::{Diagnostics, FederationError, FederationWarning};
use crate::host::BoxFuture;
use crate::semver::{Range, Version};

/// Exports object of a loaded module.
pub type Exports = serde_json::Value;

/// Produces a module's exports.
pub type Loader = Arc<dyn Fn() -> BoxFuture<'static, Result<Exports, FederationError>> + Send + Sync>;

/// One concrete offering of a shared key.
#[derive(Clone)]
pub struct VersionRecord {
    pub version: Version,
    /// Name of the bundle that registered this record.
    pub from: String,
    pub eager: bool,
    loader: Loader,
    /// Shared by every clone, so the module is evaluated once per record.
    exports: Arc<OnceCell<Exports>>,
}

impl VersionRecord {
    pub fn new(version: Version, from: impl Into<String>, eager: bool, loader: Loader) -> Self {
        Self {
            version,
            from: from.into(),
            eager,
            loader,
            exports: Arc::new(OnceCell::new()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.exports.initialized()
    }

    /// Run the loader on first use. Concurrent callers wait for the same
    /// load; a failed load is retried by the next caller.
    pub async fn load(&self) -> Result<Exports, FederationError> {
        self.exports
            .get_or_try_init(|| (self.loader)())
            .await
            .cloned()
    }
}

impl fmt::Debug for VersionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionRecord")
            .field("version", &self.version.to_string())
            .field("from", &self.from)
            .field("eager", &self.eager)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[derive(Debug, Default)]
struct SharedSlot {
    versions: BTreeMap<Version, VersionRecord>,
    /// Version picked by a singleton consumer.
    active: Option<Version>,
}

/// What a consumer asks of a share scope.
#[derive(Debug, Clone)]
pub struct ShareRequest<'a> {
    pub scope: &'a str,
    pub share_key: &'a str,
    pub required_version: Option<&'a Range>,
    pub singleton: bool,
    pub strict_version: bool,
}

/// Handle to one share scope. Clones refer to the same scope; identity
/// is what container initialization compares.
#[derive(Clone, Default)]
pub struct ShareScope {
    modules: Arc<Mutex<HashMap<String, SharedSlot>>>,
}

impl ShareScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn same(&self, other: &ShareScope) -> bool {
        Arc::ptr_eq(&self.modules, &other.modules)
    }

    /// Offer a version of `share_key`.
    ///
    /// An existing record for the same version is only replaced while it
    /// has not been loaded: an eager record beats a lazy one, otherwise the
    /// record from the bundle whose name sorts last wins.
    pub fn register(&self, share_key: &str, record: VersionRecord) -> bool {
        let mut modules = self.modules.lock();
        let slot = modules.entry(share_key.to_string()).or_default();
        let replace = match slot.versions.get(&record.version) {
            None => true,
            Some(existing) if existing.is_loaded() => false,
            Some(existing) if existing.eager != record.eager => record.eager,
            Some(existing) => record.from > existing.from,
        };
        if replace {
            tracing::debug!(
                share_key,
                version = %record.version,
                from = %record.from,
                "Registered shared module"
            );
            slot.versions.insert(record.version.clone(), record);
        }
        replace
    }

    /// Offered versions of `share_key`, ascending.
    pub fn versions(&self, share_key: &str) -> Vec<Version> {
        self.modules
            .lock()
            .get(share_key)
            .map(|slot| slot.versions.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn record(&self, share_key: &str, version: &Version) -> Option<VersionRecord> {
        self.modules
            .lock()
            .get(share_key)
            .and_then(|slot| slot.versions.get(version).cloned())
    }

    pub fn active_version(&self, share_key: &str) -> Option<Version> {
        self.modules
            .lock()
            .get(share_key)
            .and_then(|slot| slot.active.clone())
    }

    /// Pick the record satisfying `request`.
    ///
    /// `Ok(None)` means nothing is offered and the caller should use its
    /// local fallback. Singleton mismatches only warn; other mismatches
    /// fail when the request is strict and otherwise warn and use the
    /// highest offered version.
    pub fn select(
        &self,
        request: &ShareRequest<'_>,
        diagnostics: &Diagnostics,
    ) -> Result<Option<VersionRecord>, FederationError> {
        let mut modules = self.modules.lock();
        let Some(slot) = modules.get_mut(request.share_key) else {
            return Ok(None);
        };
        if slot.versions.is_empty() {
            return Ok(None);
        }
        let accepts = |version: &Version| request.required_version.is_none_or(|r| r.satisfies(version));
        let required = || {
            request
                .required_version
                .map_or_else(|| "*".to_string(), |r| r.to_string())
        };

        if request.singleton
            && let Some(active) = slot.active.clone()
            && let Some(record) = slot.versions.get(&active)
        {
            if !accepts(&active) {
                diagnostics.warn(FederationWarning::SingletonConflict {
                    share_key: request.share_key.to_string(),
                    scope: request.scope.to_string(),
                    active: active.to_string(),
                    required: required(),
                });
            }
            return Ok(Some(record.clone()));
        }

        let selected = match slot.versions.iter().rev().find(|(version, _)| accepts(version)) {
            Some((_, record)) => record.clone(),
            None => {
                if request.strict_version {
                    return Err(FederationError::VersionMismatch {
                        share_key: request.share_key.to_string(),
                        scope: request.scope.to_string(),
                        required: required(),
                        offered: slot.versions.keys().map(|v| v.to_string()).collect(),
                    });
                }
                let Some((_, highest)) = slot.versions.iter().next_back() else {
                    return Ok(None);
                };
                let warning = if request.singleton {
                    FederationWarning::SingletonConflict {
                        share_key: request.share_key.to_string(),
                        scope: request.scope.to_string(),
                        active: highest.version.to_string(),
                        required: required(),
                    }
                } else {
                    FederationWarning::VersionMismatch {
                        share_key: request.share_key.to_string(),
                        scope: request.scope.to_string(),
                        required: required(),
                        selected: highest.version.to_string(),
                    }
                };
                diagnostics.warn(warning);
                highest.clone()
            }
        };
        if request.singleton {
            slot.active = Some(selected.version.clone());
        }
        Ok(Some(selected))
    }
}

impl fmt::Debug for ShareScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modules = self.modules.lock();
        let mut map = f.debug_map();
        for (key, slot) in modules.iter() {
            let versions: Vec<String> = slot.versions.keys().map(|v| v.to_string()).collect();
            map.entry(key, &versions);
        }
        map.finish()
    }
}

/// Scope name → share scope, for one bundle runtime.
#[derive(Debug, Default)]
pub struct ShareScopeRegistry {
    scopes: Mutex<HashMap<String, ShareScope>>,
}

impl ShareScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ShareScope> {
        self.scopes.lock().get(name).cloned()
    }

    pub fn get_or_create(&self, name: &str) -> ShareScope {
        self.scopes.lock().entry(name.to_string()).or_default().clone()
    }

    /// Bind `name` to `scope`. Binding an already bound name to a
    /// different scope is a configuration conflict.
    pub fn bind(&self, name: &str, scope: &ShareScope) -> Result<(), FederationError> {
        let mut scopes = self.scopes.lock();
        match scopes.get(name) {
            Some(existing) if !existing.same(scope) => Err(FederationError::ConfigConflict {
                scope: name.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                scopes.insert(name.to_string(), scope.clone());
                Ok(())
            }
        }
    }
}

/// Ledger of scopes whose initialization has begun in the current call
/// chain. Tokens are qualified by the bundle runtime that owns them.
///
/// The outermost `init` creates the ledger; it is gone once that call
/// returns.
#[derive(Debug, Clone, Default)]
pub struct InitScope {
    tokens: Arc<Mutex<HashSet<(String, String)>>>,
}

impl InitScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the token, returning `false` if it was already present.
    pub fn enter(&self, runtime: &str, scope: &str) -> bool {
        self.tokens
            .lock()
            .insert((runtime.to_string(), scope.to_string()))
    }

    pub fn contains(&self, runtime: &str, scope: &str) -> bool {
        self.tokens
            .lock()
            .contains(&(runtime.to_string(), scope.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}
