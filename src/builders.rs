//! Graph node builders for exposes, remotes and shared modules.
//!
//! Builders only register nodes and edges. They never resolve anything
//! themselves; resolution results are handed in by the pipeline.

use petgraph::graph::NodeIndex;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::graph::{
    ConsumeNode, ContainerNode, Edge, ExposeBlock, HostGraph, Node, ProvideNode, RemoteNode,
};
use crate::sharing::ResolvedShared;
use crate::types::{ContainerEntry, RemoteEntry, RemoteTarget};

/// Request → resolved path, `None` for requests that failed to resolve.
pub type Resolutions = HashMap<String, Option<PathBuf>>;

pub struct ExposeGraphBuilder<'a> {
    container: &'a ContainerEntry,
    resolutions: &'a Resolutions,
}

impl<'a> ExposeGraphBuilder<'a> {
    pub fn new(container: &'a ContainerEntry, resolutions: &'a Resolutions) -> Self {
        Self {
            container,
            resolutions,
        }
    }

    /// Register the container entry node. Building again replaces all
    /// edges from the previous build.
    pub fn build<G: HostGraph>(&self, graph: &mut G) -> NodeIndex {
        let container = graph.add_node(Node::Container(ContainerNode {
            name: self.container.container_name.clone(),
            share_scope: self.container.share_scope.clone(),
            exposes: self
                .container
                .exposes
                .iter()
                .map(|expose| ExposeBlock {
                    name: expose.name.clone(),
                    chunk_name: expose.chunk_name.clone(),
                })
                .collect(),
        }));
        graph.clear_dependencies(container);

        for expose in &self.container.exposes {
            for (position, target) in expose.import_targets.iter().enumerate() {
                let path = self.resolutions.get(target).cloned().flatten();
                let module = graph.module(target, path);
                graph.add_dependency(
                    container,
                    module,
                    Edge::Expose {
                        name: expose.name.clone(),
                        position,
                    },
                );
            }
        }
        container
    }
}

pub struct RemoteGraphBuilder<'a> {
    remotes: &'a [RemoteEntry],
    resolutions: &'a Resolutions,
}

impl<'a> RemoteGraphBuilder<'a> {
    pub fn new(remotes: &'a [RemoteEntry], resolutions: &'a Resolutions) -> Self {
        Self {
            remotes,
            resolutions,
        }
    }

    /// The remote a request belongs to, with the exposed name it asks for.
    pub fn route(&self, request: &str) -> Option<(&'a RemoteEntry, String)> {
        self.remotes.iter().find_map(|remote| {
            remote
                .match_request(request)
                .map(|internal_request| (remote, internal_request))
        })
    }

    /// Register a remote node for `request`, if it belongs to a remote.
    pub fn build<G: HostGraph>(&self, graph: &mut G, request: &str) -> Option<NodeIndex> {
        let (remote, internal_request) = self.route(request)?;
        let targets = remote.targets();
        let node = graph.add_node(Node::Remote(RemoteNode {
            request: request.to_string(),
            key: remote.key.clone(),
            internal_request,
            share_scope: remote.share_scope.clone(),
            targets: targets.clone(),
        }));
        graph.clear_dependencies(node);

        for (position, target) in targets.iter().enumerate() {
            let dependency = match target {
                RemoteTarget::External(external) => graph.declare_external(external),
                RemoteTarget::Internal(internal) => {
                    let path = self.resolutions.get(internal).cloned().flatten();
                    graph.module(internal, path)
                }
            };
            graph.add_dependency(node, dependency, Edge::RemoteTarget { position });
        }
        Some(node)
    }
}

pub struct SharedGraphBuilder;

impl SharedGraphBuilder {
    /// Register the consuming side of a shared module. Its only possible
    /// edge is the local fallback.
    pub fn build_consume<G: HostGraph>(graph: &mut G, resolved: &ResolvedShared) -> NodeIndex {
        let entry = &resolved.entry;
        let node = graph.add_node(Node::ConsumeShared(ConsumeNode {
            share_key: entry.share_key.clone(),
            share_scope: entry.share_scope.clone(),
            required_version: resolved.required_version.clone(),
            strict_version: entry.enforces_strict_version(),
            singleton: entry.singleton,
            eager: entry.eager,
        }));
        graph.clear_dependencies(node);

        if let (Some(import), Some(path)) = (&entry.import_target, &resolved.fallback) {
            let fallback = graph.module(import, Some(path.clone()));
            graph.add_dependency(node, fallback, Edge::Fallback);
        }
        node
    }

    /// Register the providing side of a shared module, when the entry has
    /// a resolved local copy and an offered version.
    pub fn build_provide<G: HostGraph>(
        graph: &mut G,
        resolved: &ResolvedShared,
    ) -> Option<NodeIndex> {
        let entry = &resolved.entry;
        let import = entry.import_target.as_ref()?;
        let path = resolved.fallback.clone()?;
        let version = resolved.provided_version.clone()?;

        let node = graph.add_node(Node::ProvideShared(ProvideNode {
            share_key: entry.share_key.clone(),
            share_scope: entry.share_scope.clone(),
            version,
            request: import.clone(),
            eager: entry.eager,
        }));
        graph.clear_dependencies(node);
        let module = graph.module(import, Some(path));
        graph.add_dependency(node, module, Edge::Provide);
        Some(node)
    }
}
