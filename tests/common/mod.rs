#![allow(dead_code)]

use composable_federation::codegen::{
    ConsumeGlue, ContainerGlue, ExposeGlue, ExposeTarget, FederationManifest, ProvideGlue,
    RemoteGlue,
};
use composable_federation::host::BoxFuture;
use composable_federation::runtime::{ExportsAccessor, ModuleTable, StaticResourceLoader};
use composable_federation::types::RemoteTarget;
use composable_federation::{
    BuildOutput, ContainerHandle, FederationBuild, FederationError, InitScope, Runtime,
    ShareScope, ShareScopeRegistry, load_config,
};
use serde_json::json;
use std::fs;
use std::io::Write;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::{Builder, NamedTempFile, TempDir};

pub struct TestFile(NamedTempFile);

impl Deref for TestFile {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.0.path()
    }
}

pub fn create_toml_test_file(content: &str) -> TestFile {
    let mut temp_file = Builder::new().suffix(".toml").tempfile().unwrap();
    write!(temp_file, "{}", content).unwrap();
    TestFile(temp_file)
}

/// A project directory on disk with package descriptors and modules.
pub struct TestProject(TempDir);

impl Deref for TestProject {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.0.path()
    }
}

impl TestProject {
    pub fn new() -> Self {
        TestProject(Builder::new().prefix("federation").tempdir().unwrap())
    }

    pub fn file(self, relative: &str, content: &str) -> Self {
        let path = self.0.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
        self
    }

    /// Root descriptor declaring `dependencies`.
    pub fn manifest(self, dependencies: serde_json::Value) -> Self {
        let descriptor = json!({
            "name": "app",
            "version": "1.0.0",
            "dependencies": dependencies,
        });
        self.file("package.json", &descriptor.to_string())
    }

    /// Installed package under `node_modules`.
    pub fn package(self, name: &str, version: &str) -> Self {
        let descriptor = json!({ "name": name, "version": version, "main": "index.js" });
        self.file(
            &format!("node_modules/{name}/package.json"),
            &descriptor.to_string(),
        )
        .file(&format!("node_modules/{name}/index.js"), "module.exports = {};")
    }
}

pub async fn build_project(project: &Path, toml: &str, requests: &[&str]) -> BuildOutput {
    let toml_file = create_toml_test_file(toml);
    let config = load_config(&[toml_file.to_path_buf()]).unwrap();
    FederationBuild::new(config, project)
        .with_requests(requests.iter().copied())
        .run()
        .await
        .unwrap()
}

pub fn exports(name: &str) -> serde_json::Value {
    json!({ "module": name })
}

pub fn manifest(name: &str) -> FederationManifest {
    FederationManifest {
        name: name.to_string(),
        share_scope: "default".to_string(),
        ..Default::default()
    }
}

pub fn expose(name: &str, targets: &[&str]) -> ExposeGlue {
    ExposeGlue {
        name: name.to_string(),
        chunk_name: None,
        targets: targets
            .iter()
            .map(|request| ExposeTarget {
                request: request.to_string(),
                missing: false,
            })
            .collect(),
    }
}

pub fn container(name: &str, module_map: Vec<ExposeGlue>) -> ContainerGlue {
    ContainerGlue {
        name: name.to_string(),
        share_scope: "default".to_string(),
        module_map,
    }
}

pub fn remote(request: &str, key: &str, targets: &[&str]) -> RemoteGlue {
    let internal_request = request
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix('/'))
        .map_or_else(|| ".".to_string(), |rest| format!("./{rest}"));
    RemoteGlue {
        request: request.to_string(),
        key: key.to_string(),
        share_scope: "default".to_string(),
        internal_request,
        targets: targets.iter().map(|target| RemoteTarget::parse(target)).collect(),
    }
}

pub fn consume(share_key: &str, required_version: Option<&str>) -> ConsumeGlue {
    ConsumeGlue {
        share_key: share_key.to_string(),
        share_scope: "default".to_string(),
        required_version: required_version.map(str::to_string),
        strict_version: false,
        singleton: false,
        eager: false,
        fallback: None,
    }
}

pub fn provide(share_key: &str, version: &str, request: &str) -> ProvideGlue {
    ProvideGlue {
        share_key: share_key.to_string(),
        share_scope: "default".to_string(),
        version: version.to_string(),
        request: request.to_string(),
        eager: false,
    }
}

/// A bundle runtime together with its module table and resource loader.
pub struct Bundle {
    pub runtime: Runtime,
    pub modules: Arc<ModuleTable>,
    pub loader: Arc<StaticResourceLoader>,
}

pub fn bundle(manifest: FederationManifest, modules: ModuleTable) -> Bundle {
    bundle_with_loader(manifest, modules, Arc::new(StaticResourceLoader::new()))
}

pub fn bundle_with_loader(
    manifest: FederationManifest,
    modules: ModuleTable,
    loader: Arc<StaticResourceLoader>,
) -> Bundle {
    let modules = Arc::new(modules);
    let runtime = Runtime::builder(manifest)
        .with_modules(modules.clone())
        .with_resource_loader(loader.clone())
        .with_registry(Arc::new(ShareScopeRegistry::new()))
        .build()
        .unwrap();
    Bundle {
        runtime,
        modules,
        loader,
    }
}

pub fn paths(files: &[&TestFile]) -> Vec<PathBuf> {
    files.iter().map(|file| file.to_path_buf()).collect()
}

/// Container that only counts how often it is initialized.
#[derive(Default)]
pub struct CountingContainer {
    inits: AtomicUsize,
}

impl CountingContainer {
    pub fn count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }
}

impl ContainerHandle for CountingContainer {
    fn get(
        &self,
        name: &str,
        _get_scope: Option<String>,
    ) -> BoxFuture<'static, Result<ExportsAccessor, FederationError>> {
        let name = name.to_string();
        Box::pin(async move { Err(FederationError::MissingExpose { name }) })
    }

    fn init<'a>(
        &'a self,
        _share_scope: &'a ShareScope,
        _init_scope: Option<&'a InitScope>,
    ) -> BoxFuture<'a, Result<(), FederationError>> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}
