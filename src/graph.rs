use anyhow::Result;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use std::ops::{Index, IndexMut};
use std::path::PathBuf;

use crate::semver::{Range, Version};
use crate::types::RemoteTarget;

/// Exports of a container entry module. Fixed so the host can treat the
/// container as fully analyzed.
pub const CONTAINER_EXPORTS: &[&str] = &["get", "init"];

/// Operations the federation builders need from the host module graph.
pub trait HostGraph {
    /// Insert `node`, or replace the weight of the node with the same
    /// identifier, returning its index.
    fn add_node(&mut self, node: Node) -> NodeIndex;

    /// Ordinary module for `request`, created on first use.
    fn module(&mut self, request: &str, path: Option<PathBuf>) -> NodeIndex;

    /// Declare `request` as resolved outside the graph.
    fn declare_external(&mut self, request: &str) -> NodeIndex;

    fn add_dependency(&mut self, from: NodeIndex, to: NodeIndex, edge: Edge) -> EdgeIndex;

    /// Remove every outgoing dependency edge of `node`.
    fn clear_dependencies(&mut self, node: NodeIndex);

    /// Attach generated code as the executable content of `node`.
    fn attach_glue(&mut self, node: NodeIndex, glue: String);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Module(ModuleNode),
    Container(ContainerNode),
    Remote(RemoteNode),
    External(String),
    ConsumeShared(ConsumeNode),
    ProvideShared(ProvideNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleNode {
    pub request: String,
    /// `None` when the request failed to resolve.
    pub path: Option<PathBuf>,
}

/// One exposed module: a lazily loaded block of the container.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposeBlock {
    pub name: String,
    pub chunk_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerNode {
    pub name: String,
    pub share_scope: String,
    pub exposes: Vec<ExposeBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteNode {
    pub request: String,
    pub key: String,
    pub internal_request: String,
    pub share_scope: String,
    pub targets: Vec<RemoteTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeNode {
    pub share_key: String,
    pub share_scope: String,
    pub required_version: Option<Range>,
    pub strict_version: bool,
    pub singleton: bool,
    pub eager: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvideNode {
    pub share_key: String,
    pub share_scope: String,
    pub version: Version,
    pub request: String,
    pub eager: bool,
}

impl Node {
    /// Stable identifier, unique per graph.
    pub fn identifier(&self) -> String {
        match self {
            Node::Module(m) => format!("module {}", m.request),
            Node::Container(c) => format!("container entry ({}) {}", c.share_scope, c.name),
            Node::Remote(r) => format!("remote ({}) {}", r.share_scope, r.request),
            Node::External(request) => format!("external {request}"),
            Node::ConsumeShared(c) => format!(
                "consume shared module ({}) {}@{}{}{}{}",
                c.share_scope,
                c.share_key,
                c.required_version
                    .as_ref()
                    .map_or_else(|| "*".to_string(), |r| r.to_string()),
                if c.strict_version { " (strict)" } else { "" },
                if c.singleton { " (singleton)" } else { "" },
                if c.eager { " (eager)" } else { "" },
            ),
            Node::ProvideShared(p) => format!(
                "provide shared module ({}) {}@{} = {}",
                p.share_scope, p.share_key, p.version, p.request
            ),
        }
    }

    /// Declared exports, when the node's exports are statically known.
    pub fn exports(&self) -> Option<&'static [&'static str]> {
        match self {
            Node::Container(_) => Some(CONTAINER_EXPORTS),
            _ => None,
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Node::Container(_) | Node::Remote(_) | Node::ConsumeShared(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Edge {
    /// Lazily loaded import of an exposed module, ordered by `position`.
    Expose { name: String, position: usize },
    /// Attempt `position` of a remote's fallback chain.
    RemoteTarget { position: usize },
    /// Locally bundled copy used when shared resolution yields nothing.
    Fallback,
    /// Module offered to a share scope.
    Provide,
}

pub struct ModuleGraph {
    graph: DiGraph<Node, Edge>,
    node_map: HashMap<String, NodeIndex>,
    glue: HashMap<NodeIndex, String>,
}

impl Default for ModuleGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
            glue: HashMap::new(),
        }
    }

    /// Write the graph to a DOT file
    pub fn write_dot_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let dot_content = self.dot();
        std::fs::write(path, dot_content)
            .map_err(|e| anyhow::anyhow!("Failed to write DOT file: {e}"))?;
        Ok(())
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.graph
            .node_indices()
            .map(move |index| (index, &self.graph[index]))
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn get_node_index(&self, identifier: &str) -> Option<NodeIndex> {
        self.node_map.get(identifier).copied()
    }

    /// Outgoing dependencies of `index` with their edge data.
    pub fn get_dependencies(&self, index: NodeIndex) -> Vec<(NodeIndex, &Edge)> {
        let mut dependencies: Vec<_> = self
            .graph
            .edges_directed(index, petgraph::Direction::Outgoing)
            .map(|edge| (edge.id(), edge.target(), edge.weight()))
            .collect();
        dependencies.sort_by_key(|(id, _, _)| *id);
        dependencies
            .into_iter()
            .map(|(_, target, weight)| (target, weight))
            .collect()
    }

    pub fn glue(&self, index: NodeIndex) -> Option<&str> {
        self.glue.get(&index).map(String::as_str)
    }

    fn dot(&self) -> String {
        let mut output = String::from("digraph ModuleGraph {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [fontname=\"Arial\", fontsize=10];\n");
        output.push_str("  edge [fontname=\"Arial\", fontsize=9];\n");

        for node_index in self.graph.node_indices() {
            let node = &self.graph[node_index];
            let (shape, color) = match node {
                Node::Module(m) if m.path.is_none() => ("box", "tomato"),
                Node::Module(_) => ("box", "lightblue"),
                Node::Container(_) => ("doubleoctagon", "lightgreen"),
                Node::Remote(_) => ("box3d", "yellow"),
                Node::External(_) => ("ellipse", "orange"),
                Node::ConsumeShared(_) => ("hexagon", "plum"),
                Node::ProvideShared(_) => ("house", "lightgrey"),
            };
            let label = node.identifier().replace('"', "\\\"");
            output.push_str(&format!(
                "  {} [label=\"{label}\", shape={shape}, fillcolor={color}, style=\"rounded,filled\"];\n",
                node_index.index()
            ));
        }

        for edge_ref in self.graph.edge_references() {
            let edge_attrs = match edge_ref.weight() {
                Edge::Expose { name, position } => {
                    format!("[color=blue, style=dashed, label=\"{name} #{position}\"]")
                }
                Edge::RemoteTarget { position } => {
                    format!("[color=red, style=dashed, label=\"attempt {position}\"]")
                }
                Edge::Fallback => "[color=purple, style=dotted, label=\"fallback\"]".to_string(),
                Edge::Provide => "[color=black, style=solid, label=\"provide\"]".to_string(),
            };
            output.push_str(&format!(
                "  {} -> {} {};\n",
                edge_ref.source().index(),
                edge_ref.target().index(),
                edge_attrs
            ));
        }

        output.push_str("}\n");
        output
    }
}

impl HostGraph for ModuleGraph {
    fn add_node(&mut self, node: Node) -> NodeIndex {
        let identifier = node.identifier();
        match self.node_map.get(&identifier) {
            Some(&index) => {
                self.graph[index] = node;
                index
            }
            None => {
                let index = self.graph.add_node(node);
                self.node_map.insert(identifier, index);
                index
            }
        }
    }

    fn module(&mut self, request: &str, path: Option<PathBuf>) -> NodeIndex {
        let identifier = format!("module {request}");
        if let Some(&index) = self.node_map.get(&identifier) {
            if let Node::Module(existing) = &mut self.graph[index]
                && existing.path.is_none()
            {
                existing.path = path;
            }
            return index;
        }
        self.add_node(Node::Module(ModuleNode {
            request: request.to_string(),
            path,
        }))
    }

    fn declare_external(&mut self, request: &str) -> NodeIndex {
        self.add_node(Node::External(request.to_string()))
    }

    fn add_dependency(&mut self, from: NodeIndex, to: NodeIndex, edge: Edge) -> EdgeIndex {
        self.graph.add_edge(from, to, edge)
    }

    fn clear_dependencies(&mut self, node: NodeIndex) {
        self.graph.retain_edges(|graph, edge| {
            graph
                .edge_endpoints(edge)
                .is_none_or(|(source, _)| source != node)
        });
    }

    fn attach_glue(&mut self, node: NodeIndex, glue: String) {
        self.glue.insert(node, glue);
    }
}

impl std::fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug_struct = f.debug_struct("ModuleGraph");

        let nodes: Vec<String> = self
            .graph
            .node_weights()
            .map(|node| node.identifier())
            .collect();
        debug_struct.field("nodes", &nodes);

        let edges: Vec<String> = self
            .graph
            .edge_references()
            .map(|edge| {
                format!(
                    "{} -> {} ({:?})",
                    self.graph[edge.source()].identifier(),
                    self.graph[edge.target()].identifier(),
                    edge.weight()
                )
            })
            .collect();
        debug_struct.field("edges", &edges);
        debug_struct.finish()
    }
}

impl Index<NodeIndex> for ModuleGraph {
    type Output = Node;

    fn index(&self, index: NodeIndex) -> &Self::Output {
        &self.graph[index]
    }
}

impl IndexMut<NodeIndex> for ModuleGraph {
    fn index_mut(&mut self, index: NodeIndex) -> &mut Self::Output {
        &mut self.graph[index]
    }
}
