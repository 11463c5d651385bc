//! Runtime glue emitted for federation nodes.
//!
//! The emitter reads the federation nodes of a [`ModuleGraph`] and produces
//! a [`FederationManifest`], the data the runtime executes against, along
//! with the JavaScript source attached to container, remote and consume
//! nodes.

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::graph::{ContainerNode, Edge, ModuleGraph, Node};
use crate::types::RemoteTarget;

/// Name of the runtime require function referenced by emitted glue.
const REQUIRE: &str = "__federation_require__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationManifest {
    pub name: String,
    pub share_scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerGlue>,
    #[serde(default)]
    pub remotes: Vec<RemoteGlue>,
    #[serde(default)]
    pub consumes: Vec<ConsumeGlue>,
    #[serde(default)]
    pub provides: Vec<ProvideGlue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerGlue {
    pub name: String,
    pub share_scope: String,
    pub module_map: Vec<ExposeGlue>,
}

impl ContainerGlue {
    pub fn expose(&self, name: &str) -> Option<&ExposeGlue> {
        self.module_map.iter().find(|expose| expose.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposeGlue {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_name: Option<String>,
    /// Import targets in declaration order.
    pub targets: Vec<ExposeTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposeTarget {
    pub request: String,
    /// The target failed to resolve at build time.
    #[serde(default)]
    pub missing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteGlue {
    pub request: String,
    pub key: String,
    pub share_scope: String,
    /// Exposed module name asked of the remote container.
    pub internal_request: String,
    pub targets: Vec<RemoteTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeGlue {
    pub share_key: String,
    pub share_scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_version: Option<String>,
    pub strict_version: bool,
    pub singleton: bool,
    pub eager: bool,
    /// Request of the locally bundled fallback module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvideGlue {
    pub share_key: String,
    pub share_scope: String,
    pub version: String,
    pub request: String,
    pub eager: bool,
}

/// Output of one emit pass.
#[derive(Debug, Clone, Default)]
pub struct Emitted {
    pub manifest: FederationManifest,
    /// Executable content per federation node.
    pub glue: Vec<(NodeIndex, String)>,
}

pub struct CodegenEmitter<'a> {
    name: &'a str,
    share_scope: &'a str,
}

impl<'a> CodegenEmitter<'a> {
    pub fn new(name: &'a str, share_scope: &'a str) -> Self {
        Self { name, share_scope }
    }

    pub fn emit(&self, graph: &ModuleGraph) -> Emitted {
        let mut emitted = Emitted {
            manifest: FederationManifest {
                name: self.name.to_string(),
                share_scope: self.share_scope.to_string(),
                ..Default::default()
            },
            glue: Vec::new(),
        };

        for (index, node) in graph.nodes() {
            match node {
                Node::Container(container) => {
                    let glue = container_glue(graph, index, container);
                    emitted
                        .glue
                        .push((index, render_container_entry(&glue)));
                    emitted.manifest.container = Some(glue);
                }
                Node::Remote(remote) => {
                    let glue = RemoteGlue {
                        request: remote.request.clone(),
                        key: remote.key.clone(),
                        share_scope: remote.share_scope.clone(),
                        internal_request: remote.internal_request.clone(),
                        targets: remote.targets.clone(),
                    };
                    emitted.glue.push((index, render_remote_module(&glue)));
                    emitted.manifest.remotes.push(glue);
                }
                Node::ConsumeShared(consume) => {
                    let fallback = graph
                        .get_dependencies(index)
                        .into_iter()
                        .find(|(_, edge)| matches!(edge, Edge::Fallback))
                        .and_then(|(target, _)| match &graph[target] {
                            Node::Module(module) if module.path.is_some() => {
                                Some(module.request.clone())
                            }
                            _ => None,
                        });
                    let glue = ConsumeGlue {
                        share_key: consume.share_key.clone(),
                        share_scope: consume.share_scope.clone(),
                        required_version: consume.required_version.as_ref().map(|r| r.to_string()),
                        strict_version: consume.strict_version,
                        singleton: consume.singleton,
                        eager: consume.eager,
                        fallback,
                    };
                    emitted.glue.push((index, render_consume_module(&glue)));
                    emitted.manifest.consumes.push(glue);
                }
                Node::ProvideShared(provide) => {
                    emitted.manifest.provides.push(ProvideGlue {
                        share_key: provide.share_key.clone(),
                        share_scope: provide.share_scope.clone(),
                        version: provide.version.to_string(),
                        request: provide.request.clone(),
                        eager: provide.eager,
                    });
                }
                Node::Module(_) | Node::External(_) => {}
            }
        }
        tracing::debug!(
            remotes = emitted.manifest.remotes.len(),
            consumes = emitted.manifest.consumes.len(),
            provides = emitted.manifest.provides.len(),
            "Emitted federation manifest"
        );
        emitted
    }
}

fn container_glue(graph: &ModuleGraph, index: NodeIndex, container: &ContainerNode) -> ContainerGlue {
    let mut targets: Vec<(&str, usize, ExposeTarget)> = graph
        .get_dependencies(index)
        .into_iter()
        .filter_map(|(target, edge)| match (edge, &graph[target]) {
            (Edge::Expose { name, position }, Node::Module(module)) => Some((
                name.as_str(),
                *position,
                ExposeTarget {
                    request: module.request.clone(),
                    missing: module.path.is_none(),
                },
            )),
            _ => None,
        })
        .collect();
    targets.sort_by_key(|(_, position, _)| *position);

    let module_map = container
        .exposes
        .iter()
        .map(|block| ExposeGlue {
            name: block.name.clone(),
            chunk_name: block.chunk_name.clone(),
            targets: targets
                .iter()
                .filter(|(name, _, _)| *name == block.name)
                .map(|(_, _, target)| target.clone())
                .collect(),
        })
        .collect();

    ContainerGlue {
        name: container.name.clone(),
        share_scope: container.share_scope.clone(),
        module_map,
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn js_value<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Render the container entry module: `moduleMap`, `get` and `init`.
pub fn render_container_entry(glue: &ContainerGlue) -> String {
    let mut source = String::from("var moduleMap = {\n");
    for expose in &glue.module_map {
        source.push_str(&format!("\t{}: () => {{\n", js_string(&expose.name)));
        if let Some(missing) = expose.targets.iter().find(|target| target.missing) {
            let message = format!("Cannot find module '{}'", missing.request);
            source.push_str(&format!(
                "\t\treturn Promise.resolve().then(() => () => {{ var e = new Error({}); e.code = 'MODULE_NOT_FOUND'; throw e; }});\n",
                js_string(&message)
            ));
        } else {
            let chunk = match &expose.chunk_name {
                Some(chunk) => format!("{REQUIRE}.e({})", js_string(chunk)),
                None => "Promise.resolve()".to_string(),
            };
            let requires: Vec<String> = expose
                .targets
                .iter()
                .map(|target| format!("{REQUIRE}({})", js_string(&target.request)))
                .collect();
            source.push_str(&format!(
                "\t\treturn {chunk}.then(() => () => [{}]);\n",
                requires.join(", ")
            ));
        }
        source.push_str("\t},\n");
    }
    source.push_str("};\n");

    source.push_str(&format!(
        r#"var get = (module, getScope) => {{
	{REQUIRE}.R = getScope;
	getScope = (
		{REQUIRE}.o(moduleMap, module)
			? moduleMap[module]()
			: Promise.resolve().then(() => {{
				throw new Error('Module "' + module + '" does not exist in container.');
			}})
	);
	{REQUIRE}.R = undefined;
	return getScope;
}};
var init = (shareScope, initScope) => {{
	if (!{REQUIRE}.S) return;
	var name = {scope};
	var oldScope = {REQUIRE}.S[name];
	if (oldScope && oldScope !== shareScope) throw new Error("Container initialization failed as it has already been initialized with a different share scope");
	{REQUIRE}.S[name] = shareScope;
	return {REQUIRE}.I(name, initScope);
}};
export {{ get, init }};
"#,
        scope = js_string(&glue.share_scope)
    ));
    source
}

/// Render a remote module: the runtime walks the target chain.
pub fn render_remote_module(glue: &RemoteGlue) -> String {
    let external: Vec<&str> = glue
        .targets
        .iter()
        .filter_map(|target| match target {
            RemoteTarget::External(request) => Some(request.as_str()),
            RemoteTarget::Internal(_) => None,
        })
        .collect();
    format!(
        "module.exports = {REQUIRE}.remote({}, {}, {}, {});\n",
        js_string(&glue.share_scope),
        js_string(&glue.internal_request),
        js_value(&external),
        js_value(&glue.targets)
    )
}

/// Render a consume-shared module.
pub fn render_consume_module(glue: &ConsumeGlue) -> String {
    let fallback = match &glue.fallback {
        Some(request) => format!("() => {REQUIRE}({})", js_string(request)),
        None => "undefined".to_string(),
    };
    format!(
        "module.exports = {REQUIRE}.consume({}, {}, {}, {}, {}, {}, {fallback});\n",
        js_string(&glue.share_scope),
        js_string(&glue.share_key),
        js_value(&glue.required_version),
        glue.strict_version,
        glue.singleton,
        glue.eager
    )
}
