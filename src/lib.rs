//! Composable Federation
//!
//! Build-time resolution and runtime protocol for sharing modules
//! between independently built bundles.

pub use codegen::{CodegenEmitter, FederationManifest};
pub use error::{Diagnostics, ErrorKind, FederationError, FederationWarning};
pub use graph::{HostGraph, ModuleGraph};
pub use loader::load_config;
pub use pipeline::{BuildOutput, FederationBuild};
pub use registry::{InitScope, ShareScope, ShareScopeRegistry, VersionRecord};
pub use runtime::{Container, ContainerHandle, Runtime};
pub use types::FederationConfig;

pub mod builders;
pub mod codegen;
pub mod error;
pub mod graph;
pub mod host;
pub mod loader;
pub mod pipeline;
pub mod registry;
pub mod runtime;
pub mod semver;
pub mod sharing;
pub mod types;
