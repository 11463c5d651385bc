use anyhow::Result;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{
    ContainerEntry, DEFAULT_SHARE_SCOPE, ExposeEntry, FederationConfig, RemoteEntry, SharedEntry,
    VersionSpec,
};

/// Load federation declarations from TOML files and merge them
/// into a single normalized configuration.
pub fn load_config(config_files: &[PathBuf]) -> Result<FederationConfig> {
    let mut configs = Vec::new();
    for path in config_files {
        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => configs.push(parse_toml_file(path)?),
            Some(_) => return Err(anyhow::anyhow!("Unsupported file type: {}", path.display())),
            None => {
                return Err(anyhow::anyhow!(
                    "File without extension: {}",
                    path.display()
                ));
            }
        }
    }
    merge_configs(configs)
}

fn parse_toml_file(path: &Path) -> Result<FederationConfig> {
    let content = fs::read_to_string(path)?;
    parse_config(&content).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}

/// Parse and normalize a single TOML document.
pub fn parse_config(content: &str) -> Result<FederationConfig> {
    let toml_doc: toml::Value = toml::from_str(content)?;
    let toml::Value::Table(mut table) = toml_doc else {
        return Err(anyhow::anyhow!(
            "TOML file must contain a table at root level"
        ));
    };

    let mut container_name = None;
    let mut share_scope = DEFAULT_SHARE_SCOPE.to_string();
    if let Some(value) = table.remove("container") {
        let toml::Value::Table(container) = value else {
            return Err(anyhow::anyhow!("'container' must be a table"));
        };
        for (key, value) in container {
            match key.as_str() {
                "name" => container_name = Some(expect_string(&value, "container.name")?),
                "share-scope" => share_scope = expect_string(&value, "container.share-scope")?,
                other => return Err(anyhow::anyhow!("Unknown container field '{other}'")),
            }
        }
    }

    let exposes = match table.remove("exposes") {
        Some(toml::Value::Table(exposes)) => exposes
            .into_iter()
            .map(|(name, value)| parse_expose(name, value))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(anyhow::anyhow!("'exposes' must be a table")),
        None => Vec::new(),
    };

    let remotes = match table.remove("remotes") {
        Some(toml::Value::Table(remotes)) => remotes
            .into_iter()
            .map(|(key, value)| parse_remote(key, value, &share_scope))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(anyhow::anyhow!("'remotes' must be a table")),
        None => Vec::new(),
    };

    let shared = match table.remove("shared") {
        Some(toml::Value::Table(shared)) => shared
            .into_iter()
            .map(|(key, value)| parse_shared(key, value, &share_scope))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(anyhow::anyhow!("'shared' must be a table")),
        None => Vec::new(),
    };

    if let Some(unknown) = table.keys().next() {
        return Err(anyhow::anyhow!("Unknown top-level table '{unknown}'"));
    }

    let container = if exposes.is_empty() {
        None
    } else {
        let container_name = container_name.clone().ok_or_else(|| {
            anyhow::anyhow!("Definition with exposes is missing required 'container.name' field")
        })?;
        Some(ContainerEntry {
            container_name,
            exposes,
            share_scope: share_scope.clone(),
        })
    };

    Ok(FederationConfig {
        name: container_name.unwrap_or_default(),
        share_scope,
        container,
        remotes,
        shared,
    })
}

fn merge_configs(configs: Vec<FederationConfig>) -> Result<FederationConfig> {
    let mut merged = FederationConfig {
        share_scope: DEFAULT_SHARE_SCOPE.to_string(),
        ..Default::default()
    };
    let mut expose_names = HashSet::new();
    let mut remote_keys = HashSet::new();
    let mut shared_keys = HashSet::new();

    for config in configs {
        if merged.name.is_empty() {
            merged.name = config.name.clone();
            merged.share_scope = config.share_scope.clone();
        }
        if let Some(container) = config.container {
            for expose in &container.exposes {
                if !expose_names.insert(expose.name.clone()) {
                    return Err(anyhow::anyhow!("Duplicate expose name: '{}'", expose.name));
                }
            }
            match &mut merged.container {
                Some(existing) if existing.container_name != container.container_name => {
                    return Err(anyhow::anyhow!(
                        "Conflicting container names: '{}' and '{}'",
                        existing.container_name,
                        container.container_name
                    ));
                }
                Some(existing) => existing.exposes.extend(container.exposes),
                None => merged.container = Some(container),
            }
        }
        for remote in config.remotes {
            if !remote_keys.insert(remote.key.clone()) {
                return Err(anyhow::anyhow!("Duplicate remote key: '{}'", remote.key));
            }
            merged.remotes.push(remote);
        }
        for shared in config.shared {
            if !shared_keys.insert((shared.share_scope.clone(), shared.request.clone())) {
                return Err(anyhow::anyhow!(
                    "Duplicate shared entry: '{}' in scope '{}'",
                    shared.request,
                    shared.share_scope
                ));
            }
            merged.shared.push(shared);
        }
    }
    if merged.name.is_empty() {
        merged.name = "host".to_string();
    }
    Ok(merged)
}

fn parse_expose(name: String, value: toml::Value) -> Result<ExposeEntry> {
    let (import_targets, chunk_name) = match value {
        toml::Value::Table(mut item) => {
            let import = item
                .remove("import")
                .ok_or_else(|| anyhow::anyhow!("Expose '{name}' missing required 'import' field"))?;
            let chunk_name = item
                .remove("name")
                .map(|v| expect_string(&v, "name"))
                .transpose()?;
            if let Some(unknown) = item.keys().next() {
                return Err(anyhow::anyhow!("Unknown field '{unknown}' in expose '{name}'"));
            }
            (string_list(import, &name)?, chunk_name)
        }
        other => (string_list(other, &name)?, None),
    };
    if import_targets.is_empty() {
        return Err(anyhow::anyhow!("Expose '{name}' has no import targets"));
    }
    Ok(ExposeEntry {
        name,
        import_targets,
        chunk_name,
    })
}

fn parse_remote(key: String, value: toml::Value, share_scope: &str) -> Result<RemoteEntry> {
    if key.is_empty() {
        return Err(anyhow::anyhow!("Remote key must not be empty"));
    }
    let (external_targets, share_scope) = match value {
        toml::Value::Table(mut item) => {
            let external = item.remove("external").ok_or_else(|| {
                anyhow::anyhow!("Remote '{key}' missing required 'external' field")
            })?;
            let scope = item
                .remove("share-scope")
                .map(|v| expect_string(&v, "share-scope"))
                .transpose()?
                .unwrap_or_else(|| share_scope.to_string());
            if let Some(unknown) = item.keys().next() {
                return Err(anyhow::anyhow!("Unknown field '{unknown}' in remote '{key}'"));
            }
            (string_list(external, &key)?, scope)
        }
        other => (string_list(other, &key)?, share_scope.to_string()),
    };
    if external_targets.is_empty() {
        return Err(anyhow::anyhow!("Remote '{key}' has no external targets"));
    }
    Ok(RemoteEntry {
        key,
        external_targets,
        share_scope,
    })
}

fn parse_shared(key: String, value: toml::Value, share_scope: &str) -> Result<SharedEntry> {
    let mut entry = SharedEntry::new(key.clone(), share_scope);
    let mut strict_version = None;

    match value {
        toml::Value::String(s) => {
            if looks_like_version(&s) {
                entry.required_version = VersionSpec::Explicit(s);
            } else {
                entry.import_target = Some(s);
            }
        }
        toml::Value::Table(item) => {
            for (field, value) in item {
                match field.as_str() {
                    "import" => {
                        entry.import_target = match value {
                            toml::Value::Boolean(false) => None,
                            other => Some(expect_string(&other, "import")?),
                        }
                    }
                    "share-key" => entry.share_key = expect_string(&value, "share-key")?,
                    "share-scope" => entry.share_scope = expect_string(&value, "share-scope")?,
                    "required-version" => entry.required_version = version_spec(value, &key)?,
                    "version" => entry.version = version_spec(value, &key)?,
                    "strict-version" => strict_version = Some(expect_bool(&value, &field)?),
                    "singleton" => entry.singleton = expect_bool(&value, &field)?,
                    "eager" => entry.eager = expect_bool(&value, &field)?,
                    "package-name" => {
                        entry.package_name = Some(expect_string(&value, "package-name")?)
                    }
                    other => {
                        return Err(anyhow::anyhow!(
                            "Unknown field '{other}' in shared entry '{key}'"
                        ));
                    }
                }
            }
        }
        _ => {
            return Err(anyhow::anyhow!(
                "Shared entry '{key}' must be a string or a table"
            ));
        }
    }

    entry.strict_version = strict_version.unwrap_or_else(|| {
        SharedEntry::default_strict_version(entry.singleton, entry.import_target.is_some())
    });
    Ok(entry)
}

/// A shorthand string is a required version when it starts like one.
fn looks_like_version(s: &str) -> bool {
    matches!(s, "*" | "x" | "X")
        || s.starts_with(|c: char| c.is_ascii_digit() || "^=v<>~".contains(c))
}

fn version_spec(value: toml::Value, key: &str) -> Result<VersionSpec> {
    match value {
        toml::Value::Boolean(false) => Ok(VersionSpec::Disabled),
        toml::Value::String(s) => Ok(VersionSpec::Explicit(s)),
        _ => Err(anyhow::anyhow!(
            "Version of shared entry '{key}' must be a string or false"
        )),
    }
}

fn string_list(value: toml::Value, owner: &str) -> Result<Vec<String>> {
    match value {
        toml::Value::String(s) => Ok(vec![s]),
        toml::Value::Array(items) => items
            .iter()
            .map(|item| expect_string(item, owner))
            .collect(),
        _ => Err(anyhow::anyhow!(
            "'{owner}' must be a string or an array of strings"
        )),
    }
}

fn expect_string(value: &toml::Value, field: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("'{field}' must be a string"))
}

fn expect_bool(value: &toml::Value, field: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| anyhow::anyhow!("'{field}' must be a boolean"))
}
