use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::codegen::{ConsumeGlue, ContainerGlue, ExposeGlue, FederationManifest, ProvideGlue, RemoteGlue};
use crate::error::{Diagnostics, FederationError, FederationWarning};
use crate::host::BoxFuture;
use crate::registry::{
    Exports, InitScope, Loader, ShareRequest, ShareScope, ShareScopeRegistry, VersionRecord,
};
use crate::semver::{Range, Version};
use crate::types::RemoteTarget;

/// Loads in-graph modules of one bundle by request.
pub trait ModuleSource: Send + Sync {
    fn load<'a>(&'a self, request: &'a str) -> BoxFuture<'a, Result<Exports, FederationError>>;
}

/// Loads an external resource and hands back the container it defines.
pub trait ResourceLoader: Send + Sync {
    fn load_container<'a>(
        &'a self,
        target: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn ContainerHandle>, FederationError>>;
}

/// The `get`/`init` contract every container offers.
pub trait ContainerHandle: Send + Sync {
    fn get(
        &self,
        name: &str,
        get_scope: Option<String>,
    ) -> BoxFuture<'static, Result<ExportsAccessor, FederationError>>;

    fn init<'a>(
        &'a self,
        share_scope: &'a ShareScope,
        init_scope: Option<&'a InitScope>,
    ) -> BoxFuture<'a, Result<(), FederationError>>;
}

/// In-memory module source.
#[derive(Debug, Default)]
pub struct ModuleTable {
    modules: DashMap<String, Exports>,
    loads: DashMap<String, usize>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request: impl Into<String>, exports: Exports) {
        self.modules.insert(request.into(), exports);
    }

    pub fn with_module(self, request: impl Into<String>, exports: Exports) -> Self {
        self.insert(request, exports);
        self
    }

    /// How many times `request` has been loaded.
    pub fn load_count(&self, request: &str) -> usize {
        self.loads.get(request).map(|count| *count).unwrap_or(0)
    }
}

impl ModuleSource for ModuleTable {
    fn load<'a>(&'a self, request: &'a str) -> BoxFuture<'a, Result<Exports, FederationError>> {
        Box::pin(async move {
            *self.loads.entry(request.to_string()).or_insert(0) += 1;
            self.modules
                .get(request)
                .map(|exports| exports.value().clone())
                .ok_or_else(|| FederationError::ModuleNotFound {
                    request: request.to_string(),
                })
        })
    }
}

/// Resource loader over a fixed set of containers. Unknown targets fail
/// as unreachable.
#[derive(Default)]
pub struct StaticResourceLoader {
    containers: DashMap<String, Arc<dyn ContainerHandle>>,
    attempts: Mutex<Vec<String>>,
}

impl StaticResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, target: impl Into<String>, container: Arc<dyn ContainerHandle>) {
        self.containers.insert(target.into(), container);
    }

    /// Every target requested so far, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }
}

impl ResourceLoader for StaticResourceLoader {
    fn load_container<'a>(
        &'a self,
        target: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn ContainerHandle>, FederationError>> {
        Box::pin(async move {
            self.attempts.lock().push(target.to_string());
            self.containers
                .get(target)
                .map(|container| Arc::clone(container.value()))
                .ok_or_else(|| FederationError::load(target, "resource unavailable"))
        })
    }
}

/// Result of a container `get`: the loaded exports of an exposed module's
/// import targets, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportsAccessor {
    expose: String,
    modules: Vec<Exports>,
    /// First import target that failed to resolve at build time.
    missing: Option<String>,
}

impl ExportsAccessor {
    pub fn name(&self) -> &str {
        &self.expose
    }

    pub fn call(&self) -> Result<Vec<Exports>, FederationError> {
        match &self.missing {
            Some(request) => Err(FederationError::ModuleNotFound {
                request: request.clone(),
            }),
            None => Ok(self.modules.clone()),
        }
    }

    /// Exports of the last import target.
    pub fn exports(&self) -> Result<Exports, FederationError> {
        self.call()?
            .pop()
            .ok_or_else(|| FederationError::ModuleNotFound {
                request: self.expose.clone(),
            })
    }
}

/// One memoized value per key. Concurrent callers for the same key share
/// a single computation.
struct MemoMap<T> {
    cells: DashMap<String, Arc<OnceCell<T>>>,
}

impl<T> MemoMap<T> {
    fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    fn cell(&self, key: &str) -> Arc<OnceCell<T>> {
        self.cells
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

struct ConsumeSpec {
    glue: ConsumeGlue,
    required_version: Option<Range>,
}

struct ProvideSpec {
    glue: ProvideGlue,
    version: Version,
}

struct RuntimeInner {
    manifest: FederationManifest,
    consumes: Vec<ConsumeSpec>,
    provides: Vec<ProvideSpec>,
    modules: Arc<dyn ModuleSource>,
    resources: Arc<dyn ResourceLoader>,
    registry: Arc<ShareScopeRegistry>,
    diagnostics: Diagnostics,
    initialized: MemoMap<()>,
    // Failures are kept too, so every target is fetched at most once.
    containers: MemoMap<Result<Arc<dyn ContainerHandle>, String>>,
    exposes: MemoMap<ExportsAccessor>,
    remotes: MemoMap<Exports>,
    consumed: MemoMap<Exports>,
    get_scope: Mutex<Option<String>>,
}

/// Federation runtime of one bundle.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a RuntimeBuilder from an emitted manifest
    pub fn builder(manifest: FederationManifest) -> RuntimeBuilder {
        RuntimeBuilder::new(manifest)
    }

    pub fn name(&self) -> &str {
        &self.inner.manifest.name
    }

    pub fn manifest(&self) -> &FederationManifest {
        &self.inner.manifest
    }

    pub fn registry(&self) -> &Arc<ShareScopeRegistry> {
        &self.inner.registry
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.inner.diagnostics
    }

    /// The bundle's container, if it exposes modules.
    pub fn container(&self) -> Option<Container> {
        self.inner.manifest.container.clone().map(|glue| Container {
            runtime: self.clone(),
            glue: Arc::new(glue),
        })
    }

    /// The `getScope` of the container `get` currently in progress.
    pub fn current_remote_get_scope(&self) -> Option<String> {
        self.inner.get_scope.lock().clone()
    }

    pub async fn load_module(&self, request: &str) -> Result<Exports, FederationError> {
        self.inner.modules.load(request).await
    }

    /// Initialize sharing for scope `name`: register the bundle's provided
    /// modules and initialize the remote containers bound to the scope.
    ///
    /// Runs once per scope. Re-entering a scope already present in
    /// `init_scope` returns immediately.
    pub async fn init_sharing(
        &self,
        name: &str,
        init_scope: Option<&InitScope>,
    ) -> Result<(), FederationError> {
        let ledger = init_scope.cloned().unwrap_or_default();
        if !ledger.enter(self.name(), name) {
            tracing::debug!(runtime = %self.name(), scope = name, "Share scope already initializing");
            return Ok(());
        }
        self.inner
            .initialized
            .cell(name)
            .get_or_try_init(|| self.run_initializers(name, &ledger))
            .await?;
        Ok(())
    }

    async fn run_initializers(&self, name: &str, ledger: &InitScope) -> Result<(), FederationError> {
        let scope = self.inner.registry.get_or_create(name);
        for provide in self.inner.provides.iter().filter(|p| p.glue.share_scope == name) {
            let modules = Arc::clone(&self.inner.modules);
            let request = provide.glue.request.clone();
            let loader: Loader = Arc::new(move || -> BoxFuture<'static, Result<Exports, FederationError>> {
                let modules = Arc::clone(&modules);
                let request = request.clone();
                Box::pin(async move { modules.load(&request).await })
            });
            scope.register(
                &provide.glue.share_key,
                VersionRecord::new(provide.version.clone(), self.name(), provide.glue.eager, loader),
            );
        }

        let mut initialized = HashSet::new();
        for remote in self.inner.manifest.remotes.iter().filter(|r| r.share_scope == name) {
            for target in &remote.targets {
                let RemoteTarget::External(target) = target else {
                    break;
                };
                let container = match self.container_handle(target).await {
                    Ok(container) => container,
                    Err(message) => {
                        self.warn_remote(target, message);
                        continue;
                    }
                };
                if initialized.insert(target.clone()) {
                    match container.init(&scope, Some(ledger)).await {
                        Ok(()) => {}
                        Err(e @ FederationError::ConfigConflict { .. }) => return Err(e),
                        Err(e) => self.warn_remote(target, e.to_string()),
                    }
                }
                break;
            }
        }
        tracing::info!(runtime = %self.name(), scope = name, "Initialized share scope");
        Ok(())
    }

    fn warn_remote(&self, target: &str, message: String) {
        self.inner
            .diagnostics
            .warn(FederationWarning::RemoteInitialization {
                target: target.to_string(),
                message,
            });
    }

    async fn container_handle(&self, target: &str) -> Result<Arc<dyn ContainerHandle>, String> {
        self.inner
            .containers
            .cell(target)
            .get_or_init(|| async {
                tracing::debug!(target, "Loading remote container");
                self.inner
                    .resources
                    .load_container(target)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await
            .clone()
    }

    /// Load a remote module, attempting its targets strictly in order.
    pub async fn load_remote(&self, request: &str) -> Result<Exports, FederationError> {
        let remote = self
            .inner
            .manifest
            .remotes
            .iter()
            .find(|remote| remote.request == request)
            .ok_or_else(|| FederationError::ModuleNotFound {
                request: request.to_string(),
            })?;
        self.inner
            .remotes
            .cell(request)
            .get_or_try_init(|| self.walk_targets(remote))
            .await
            .cloned()
    }

    async fn walk_targets(&self, remote: &RemoteGlue) -> Result<Exports, FederationError> {
        self.init_sharing(&remote.share_scope, None).await?;

        let mut attempted = Vec::new();
        let mut causes = Vec::new();
        for target in &remote.targets {
            attempted.push(target.request().to_string());
            let result = match target {
                RemoteTarget::Internal(request) => {
                    self.inner.modules.load(request).await.map_err(|e| e.to_string())
                }
                RemoteTarget::External(target) => {
                    self.load_from_container(target, &remote.internal_request).await
                }
            };
            match result {
                Ok(exports) => {
                    tracing::debug!(request = %remote.request, target = target.request(), "Loaded remote module");
                    return Ok(exports);
                }
                Err(cause) => {
                    tracing::debug!(request = %remote.request, target = target.request(), "Remote target failed: {cause}");
                    causes.push(cause);
                }
            }
        }
        Err(FederationError::RemoteUnavailable {
            request: remote.request.clone(),
            targets: attempted,
            causes,
        })
    }

    async fn load_from_container(&self, target: &str, name: &str) -> Result<Exports, String> {
        let container = self.container_handle(target).await?;
        let accessor = container
            .get(name, Some(self.name().to_string()))
            .await
            .map_err(|e| e.to_string())?;
        accessor.exports().map_err(|e| e.to_string())
    }

    /// Resolve a shared module through its share scope, falling back to
    /// the locally bundled copy.
    pub async fn consume(&self, share_key: &str) -> Result<Exports, FederationError> {
        let spec = self
            .inner
            .consumes
            .iter()
            .find(|spec| spec.glue.share_key == share_key)
            .ok_or_else(|| FederationError::SharedNotFound {
                share_key: share_key.to_string(),
                scope: self.inner.manifest.share_scope.clone(),
            })?;
        self.inner
            .consumed
            .cell(share_key)
            .get_or_try_init(|| self.resolve_shared(spec))
            .await
            .cloned()
    }

    async fn resolve_shared(&self, spec: &ConsumeSpec) -> Result<Exports, FederationError> {
        let glue = &spec.glue;
        self.init_sharing(&glue.share_scope, None).await?;
        let scope = self.inner.registry.get_or_create(&glue.share_scope);
        let request = ShareRequest {
            scope: &glue.share_scope,
            share_key: &glue.share_key,
            required_version: spec.required_version.as_ref(),
            singleton: glue.singleton,
            strict_version: glue.strict_version,
        };
        match scope.select(&request, &self.inner.diagnostics)? {
            Some(record) => {
                tracing::debug!(
                    share_key = %glue.share_key,
                    version = %record.version,
                    from = %record.from,
                    "Using shared module"
                );
                record.load().await
            }
            None => match &glue.fallback {
                Some(fallback) => self.inner.modules.load(fallback).await,
                None => Err(FederationError::SharedNotFound {
                    share_key: glue.share_key.clone(),
                    scope: glue.share_scope.clone(),
                }),
            },
        }
    }

    async fn load_expose(
        &self,
        expose: &ExposeGlue,
        get_scope: Option<String>,
    ) -> Result<ExportsAccessor, FederationError> {
        self.inner
            .exposes
            .cell(&expose.name)
            .get_or_try_init(|| async move {
                let missing = expose
                    .targets
                    .iter()
                    .find(|target| target.missing)
                    .map(|target| target.request.clone());
                let mut modules = Vec::new();
                if missing.is_none() {
                    // Visible to containers re-entered while the targets load.
                    let _get_scope = GetScopeGuard::enter(&self.inner.get_scope, get_scope);
                    for target in &expose.targets {
                        modules.push(self.inner.modules.load(&target.request).await?);
                    }
                }
                Ok(ExportsAccessor {
                    expose: expose.name.clone(),
                    modules,
                    missing,
                })
            })
            .await
            .cloned()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.inner.manifest.name)
            .field("registry", &self.inner.registry)
            .field("warnings", &self.inner.diagnostics.len())
            .finish()
    }
}

/// Builder for configuring and creating a Runtime
pub struct RuntimeBuilder {
    manifest: FederationManifest,
    modules: Option<Arc<dyn ModuleSource>>,
    resources: Option<Arc<dyn ResourceLoader>>,
    registry: Option<Arc<ShareScopeRegistry>>,
    diagnostics: Diagnostics,
}

impl RuntimeBuilder {
    fn new(manifest: FederationManifest) -> Self {
        Self {
            manifest,
            modules: None,
            resources: None,
            registry: None,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn with_modules(mut self, modules: Arc<dyn ModuleSource>) -> Self {
        self.modules = Some(modules);
        self
    }

    pub fn with_resource_loader(mut self, resources: Arc<dyn ResourceLoader>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Use `registry` instead of a fresh one.
    pub fn with_registry(mut self, registry: Arc<ShareScopeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Build the Runtime. Version ranges and provided versions of the
    /// manifest are parsed here.
    pub fn build(self) -> Result<Runtime, FederationError> {
        let consumes = self
            .manifest
            .consumes
            .iter()
            .map(|glue| {
                let required_version = glue
                    .required_version
                    .as_deref()
                    .map(|text| {
                        Range::parse(text).map_err(|source| FederationError::VersionRangeParse {
                            share_key: glue.share_key.clone(),
                            range: text.to_string(),
                            source,
                        })
                    })
                    .transpose()?;
                Ok(ConsumeSpec {
                    glue: glue.clone(),
                    required_version,
                })
            })
            .collect::<Result<Vec<_>, FederationError>>()?;

        let provides = self
            .manifest
            .provides
            .iter()
            .map(|glue| {
                let version = Version::parse(&glue.version).map_err(|source| {
                    FederationError::VersionRangeParse {
                        share_key: glue.share_key.clone(),
                        range: glue.version.clone(),
                        source,
                    }
                })?;
                Ok(ProvideSpec {
                    glue: glue.clone(),
                    version,
                })
            })
            .collect::<Result<Vec<_>, FederationError>>()?;

        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                consumes,
                provides,
                modules: self.modules.unwrap_or_else(|| Arc::new(ModuleTable::new())),
                resources: self
                    .resources
                    .unwrap_or_else(|| Arc::new(StaticResourceLoader::new())),
                registry: self.registry.unwrap_or_default(),
                diagnostics: self.diagnostics,
                initialized: MemoMap::new(),
                containers: MemoMap::new(),
                exposes: MemoMap::new(),
                remotes: MemoMap::new(),
                consumed: MemoMap::new(),
                get_scope: Mutex::new(None),
                manifest: self.manifest,
            }),
        })
    }
}

/// Restores the previous get scope when dropped.
struct GetScopeGuard<'a> {
    slot: &'a Mutex<Option<String>>,
    previous: Option<String>,
}

impl<'a> GetScopeGuard<'a> {
    fn enter(slot: &'a Mutex<Option<String>>, get_scope: Option<String>) -> Self {
        let previous = std::mem::replace(&mut *slot.lock(), get_scope);
        Self { slot, previous }
    }
}

impl Drop for GetScopeGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = self.previous.take();
    }
}

/// A bundle's container entry.
#[derive(Clone)]
pub struct Container {
    runtime: Runtime,
    glue: Arc<ContainerGlue>,
}

impl Container {
    pub fn name(&self) -> &str {
        &self.glue.name
    }

    pub fn module_map(&self) -> &ContainerGlue {
        &self.glue
    }

    /// Look up an exposed module. The lookup happens immediately; loading
    /// its import targets happens when the returned future is polled and
    /// is shared by every caller asking for the same name. `get_scope` is
    /// the current remote get scope during both.
    pub fn get(
        &self,
        name: &str,
        get_scope: Option<String>,
    ) -> BoxFuture<'static, Result<ExportsAccessor, FederationError>> {
        let _get_scope = GetScopeGuard::enter(&self.runtime.inner.get_scope, get_scope.clone());
        let Some(expose) = self.glue.expose(name).cloned() else {
            let name = name.to_string();
            return Box::pin(async move { Err(FederationError::MissingExpose { name }) });
        };
        let runtime = self.runtime.clone();
        Box::pin(async move { runtime.load_expose(&expose, get_scope).await })
    }

    /// Bind the container's share scope to `share_scope`, then initialize
    /// sharing for it.
    pub async fn init(
        &self,
        share_scope: &ShareScope,
        init_scope: Option<&InitScope>,
    ) -> Result<(), FederationError> {
        let name = &self.glue.share_scope;
        self.runtime.inner.registry.bind(name, share_scope)?;
        self.runtime.init_sharing(name, init_scope).await
    }
}

impl ContainerHandle for Container {
    fn get(
        &self,
        name: &str,
        get_scope: Option<String>,
    ) -> BoxFuture<'static, Result<ExportsAccessor, FederationError>> {
        Container::get(self, name, get_scope)
    }

    fn init<'a>(
        &'a self,
        share_scope: &'a ShareScope,
        init_scope: Option<&'a InitScope>,
    ) -> BoxFuture<'a, Result<(), FederationError>> {
        Box::pin(Container::init(self, share_scope, init_scope))
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.glue.name)
            .field("share_scope", &self.glue.share_scope)
            .field(
                "module_map",
                &self.glue.module_map.iter().map(|e| &e.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}
