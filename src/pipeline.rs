//! The federation build: match, resolve, graph and emit stages run in
//! that order over one configuration.

use anyhow::Result;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::builders::{ExposeGraphBuilder, RemoteGraphBuilder, Resolutions, SharedGraphBuilder};
use crate::codegen::{CodegenEmitter, FederationManifest, render_container_entry};
use crate::error::{Diagnostics, FederationError, FederationWarning};
use crate::graph::{HostGraph, ModuleGraph};
use crate::host::{FsModuleResolver, ModuleResolver};
use crate::sharing::{ResolvedShared, SharedResolver};
use crate::types::{FederationConfig, RemoteTarget, ShareMatch, SharedEntry};

/// Everything one build produced. Failures of individual entries are
/// collected in `errors` instead of aborting the build.
#[derive(Debug)]
pub struct BuildOutput {
    pub graph: ModuleGraph,
    pub manifest: FederationManifest,
    /// Source of the container entry module, if the bundle exposes any.
    pub container_source: Option<String>,
    pub errors: Vec<FederationError>,
    pub warnings: Vec<FederationWarning>,
}

impl BuildOutput {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Requests sorted by the module kind that satisfies them.
#[derive(Debug, Default)]
struct MatchedRequests {
    remote: Vec<String>,
    shared: Vec<SharedEntry>,
    plain: Vec<String>,
}

pub struct FederationBuild {
    config: FederationConfig,
    context: PathBuf,
    resolver: Arc<dyn ModuleResolver>,
    requests: Vec<String>,
}

impl FederationBuild {
    pub fn new(config: FederationConfig, context: impl Into<PathBuf>) -> Self {
        Self {
            config,
            context: context.into(),
            resolver: Arc::new(FsModuleResolver::new()),
            requests: Vec::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Add an import request issued by the bundle's own modules.
    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.requests.push(request.into());
        self
    }

    pub fn with_requests<I, S>(mut self, requests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requests.extend(requests.into_iter().map(Into::into));
        self
    }

    pub async fn run(self) -> Result<BuildOutput> {
        let diagnostics = Diagnostics::new();
        let mut errors = Vec::new();
        let shared_resolver = Arc::new(
            SharedResolver::new(
                &self.config.shared,
                Arc::clone(&self.resolver),
                &self.context,
                diagnostics.clone(),
            )
            .await,
        );

        let matched = self.match_requests(&shared_resolver);
        tracing::debug!(
            remote = matched.remote.len(),
            shared = matched.shared.len(),
            plain = matched.plain.len(),
            "Matched import requests"
        );

        let (resolutions, shared) = tokio::join!(
            resolve_requests(&self.resolver, &self.context, self.module_requests(&matched)),
            shared_resolver.resolve_all(matched.shared)
        );
        let resolutions = resolutions?;

        let mut unresolved: Vec<&String> = resolutions
            .iter()
            .filter(|(_, path)| path.is_none())
            .map(|(request, _)| request)
            .collect();
        unresolved.sort();
        errors.extend(unresolved.into_iter().map(|request| FederationError::ModuleNotFound {
            request: request.clone(),
        }));

        let mut resolved_shared = Vec::new();
        for result in shared {
            match result {
                Ok(resolved) => resolved_shared.push(resolved),
                Err(e) => {
                    tracing::error!("{e}");
                    errors.push(e);
                }
            }
        }

        let mut graph = ModuleGraph::new();
        self.build_graph(
            &mut graph,
            &matched.remote,
            &matched.plain,
            &resolved_shared,
            &resolutions,
            &shared_resolver,
        );

        let emitted = CodegenEmitter::new(&self.config.name, &self.config.share_scope).emit(&graph);
        for (index, glue) in emitted.glue {
            graph.attach_glue(index, glue);
        }
        let container_source = emitted
            .manifest
            .container
            .as_ref()
            .map(render_container_entry);

        tracing::info!(
            name = %self.config.name,
            nodes = graph.node_count(),
            errors = errors.len(),
            warnings = diagnostics.len(),
            "Federation build complete"
        );
        Ok(BuildOutput {
            graph,
            manifest: emitted.manifest,
            container_source,
            errors,
            warnings: diagnostics.warnings(),
        })
    }

    fn match_requests(&self, shared: &SharedResolver) -> MatchedRequests {
        let mut matched = MatchedRequests::default();
        let mut seen = HashSet::new();
        // Exact and resolved-path entries are always consumable and provided.
        for entry in &self.config.shared {
            if entry.match_kind() != ShareMatch::Prefix
                && seen.insert((entry.share_scope.clone(), entry.share_key.clone()))
            {
                matched.shared.push(entry.clone());
            }
        }

        for request in &self.requests {
            if self
                .config
                .remotes
                .iter()
                .any(|remote| remote.match_request(request).is_some())
            {
                if !matched.remote.contains(request) {
                    matched.remote.push(request.clone());
                }
            } else if let Some(entry) = shared.match_request(request) {
                if seen.insert((entry.share_scope.clone(), entry.share_key.clone())) {
                    matched.shared.push(entry);
                }
            } else if !matched.plain.contains(request) {
                matched.plain.push(request.clone());
            }
        }
        matched
    }

    /// Requests the host resolves directly: expose targets, internal
    /// remote targets and unmatched requests.
    fn module_requests(&self, matched: &MatchedRequests) -> Vec<String> {
        let mut requests = BTreeSet::new();
        if let Some(container) = &self.config.container {
            for expose in &container.exposes {
                requests.extend(expose.import_targets.iter().cloned());
            }
        }
        for remote in &self.config.remotes {
            for target in remote.targets() {
                if let RemoteTarget::Internal(request) = target {
                    requests.insert(request);
                }
            }
        }
        requests.extend(matched.plain.iter().cloned());
        requests.into_iter().collect()
    }

    fn build_graph(
        &self,
        graph: &mut ModuleGraph,
        remote_requests: &[String],
        plain_requests: &[String],
        shared: &[ResolvedShared],
        resolutions: &Resolutions,
        shared_resolver: &SharedResolver,
    ) {
        if let Some(container) = &self.config.container {
            ExposeGraphBuilder::new(container, resolutions).build(graph);
        }

        let remotes = RemoteGraphBuilder::new(&self.config.remotes, resolutions);
        for request in remote_requests {
            remotes.build(graph, request);
        }

        for resolved in shared {
            SharedGraphBuilder::build_consume(graph, resolved);
            SharedGraphBuilder::build_provide(graph, resolved);
        }

        for request in plain_requests {
            let path = resolutions.get(request).cloned().flatten();
            // A request resolving to a shared path is served by its consume node.
            if path
                .as_deref()
                .and_then(|path| shared_resolver.match_resolved(path))
                .is_some()
            {
                continue;
            }
            graph.module(request, path);
        }
    }
}

async fn resolve_requests(
    resolver: &Arc<dyn ModuleResolver>,
    context: &Path,
    requests: Vec<String>,
) -> Result<Resolutions> {
    let mut tasks = JoinSet::new();
    for request in requests {
        let resolver = Arc::clone(resolver);
        let context = context.to_path_buf();
        tasks.spawn(async move {
            let result = resolver.resolve(&context, &request).await;
            (request, result)
        });
    }

    let mut resolutions = Resolutions::new();
    while let Some(joined) = tasks.join_next().await {
        let (request, result) = joined?;
        match result {
            Ok(path) => {
                resolutions.insert(request, Some(path));
            }
            Err(e) => {
                tracing::debug!("{e}");
                resolutions.insert(request, None);
            }
        }
    }
    Ok(resolutions)
}
