//! Collaborators the federation core consumes from its host: module
//! resolution and package descriptor lookup.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;

use crate::types::is_path_request;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Name of the package descriptor file searched by version inference.
pub const DESCRIPTOR_FILE: &str = "package.json";

const EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "json", "ts", "tsx", "jsx"];

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("Can't resolve '{request}' in '{}'", .context.display())]
    NotFound { request: String, context: PathBuf },

    #[error("No description file found in '{}' or above", .directory.display())]
    DescriptorNotFound { directory: PathBuf },

    #[error("Invalid description file '{}': {message}", .path.display())]
    InvalidDescriptor { path: PathBuf, message: String },
}

/// A parsed package descriptor and the file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorFile {
    pub data: serde_json::Value,
    pub path: PathBuf,
}

impl DescriptorFile {
    /// Directory containing the descriptor.
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    pub fn version(&self) -> Option<&str> {
        self.data.get("version").and_then(|v| v.as_str())
    }
}

pub trait ModuleResolver: Send + Sync {
    /// Resolve `request` issued from `context` to a file path.
    fn resolve<'a>(
        &'a self,
        context: &'a Path,
        request: &'a str,
    ) -> BoxFuture<'a, Result<PathBuf, ResolveError>>;

    /// Find the nearest descriptor named one of `filenames` in `directory`
    /// or any of its ancestors.
    fn find_nearest_descriptor<'a>(
        &'a self,
        directory: &'a Path,
        filenames: &'a [&'a str],
    ) -> BoxFuture<'a, Result<DescriptorFile, ResolveError>>;
}

/// Node-style resolution against the local file system.
#[derive(Debug, Clone, Default)]
pub struct FsModuleResolver;

impl FsModuleResolver {
    pub fn new() -> Self {
        Self
    }

    async fn probe(&self, candidate: &Path) -> Option<PathBuf> {
        if is_file(candidate).await {
            return Some(candidate.to_path_buf());
        }
        for ext in EXTENSIONS {
            let mut with_ext = candidate.as_os_str().to_owned();
            with_ext.push(".");
            with_ext.push(ext);
            let with_ext = PathBuf::from(with_ext);
            if is_file(&with_ext).await {
                return Some(with_ext);
            }
        }
        if !is_dir(candidate).await {
            return None;
        }
        if let Ok(content) = tokio::fs::read_to_string(candidate.join(DESCRIPTOR_FILE)).await
            && let Ok(data) = serde_json::from_str::<serde_json::Value>(&content)
            && let Some(main) = data.get("main").and_then(|m| m.as_str())
        {
            let main = candidate.join(main);
            if is_file(&main).await {
                return Some(main);
            }
        }
        for ext in EXTENSIONS {
            let index = candidate.join(format!("index.{ext}"));
            if is_file(&index).await {
                return Some(index);
            }
        }
        None
    }
}

impl ModuleResolver for FsModuleResolver {
    fn resolve<'a>(
        &'a self,
        context: &'a Path,
        request: &'a str,
    ) -> BoxFuture<'a, Result<PathBuf, ResolveError>> {
        Box::pin(async move {
            let not_found = || ResolveError::NotFound {
                request: request.to_string(),
                context: context.to_path_buf(),
            };
            if is_path_request(request) {
                let candidate: PathBuf = context.join(request).components().collect();
                return self.probe(&candidate).await.ok_or_else(not_found);
            }
            for directory in context.ancestors() {
                let candidate = directory.join("node_modules").join(request);
                if let Some(found) = self.probe(&candidate).await {
                    return Ok(found);
                }
            }
            Err(not_found())
        })
    }

    fn find_nearest_descriptor<'a>(
        &'a self,
        directory: &'a Path,
        filenames: &'a [&'a str],
    ) -> BoxFuture<'a, Result<DescriptorFile, ResolveError>> {
        Box::pin(async move {
            for dir in directory.ancestors() {
                for filename in filenames {
                    let path = dir.join(filename);
                    if !is_file(&path).await {
                        continue;
                    }
                    let invalid = |message: String| ResolveError::InvalidDescriptor {
                        path: path.clone(),
                        message,
                    };
                    let content = tokio::fs::read_to_string(&path)
                        .await
                        .map_err(|e| invalid(e.to_string()))?;
                    let data = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
                    return Ok(DescriptorFile { data, path });
                }
            }
            Err(ResolveError::DescriptorNotFound {
                directory: directory.to_path_buf(),
            })
        })
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
