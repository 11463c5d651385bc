mod common;
use composable_federation::load_config;
use composable_federation::loader::parse_config;
use composable_federation::types::{RemoteTarget, ShareMatch, VersionSpec};

#[test]
fn test_full_definition() {
    let config = parse_config(
        r#"
        [container]
        name = "app1"
        share-scope = "ui"

        [exposes]
        "./Button" = "./src/Button"
        "./Form" = ["./src/form.css", "./src/Form"]
        "./Chart" = { import = "./src/Chart", name = "charts" }

        [remotes]
        app2 = "app2@http://localhost:3002/remoteEntry.js"
        app3 = { external = ["app3@primary", "internal ./src/app3-fallback"], share-scope = "legacy" }

        [shared]
        react = { singleton = true, required-version = "^18.0.0" }
        lodash = "^4.17.0"
        "shared/" = { share-key = "shared/" }
        "./src/store" = { version = "1.2.0" }
        "#,
    )
    .unwrap();

    assert_eq!(config.name, "app1");
    assert_eq!(config.share_scope, "ui");

    let container = config.container.as_ref().unwrap();
    assert_eq!(container.container_name, "app1");
    assert_eq!(container.share_scope, "ui");
    let names: Vec<&str> = container.exposes.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["./Button", "./Form", "./Chart"]);
    assert_eq!(
        container.exposes[1].import_targets,
        vec!["./src/form.css", "./src/Form"]
    );
    assert_eq!(container.exposes[2].chunk_name.as_deref(), Some("charts"));

    assert_eq!(config.remotes[0].share_scope, "ui");
    assert_eq!(config.remotes[1].share_scope, "legacy");
    assert_eq!(
        config.remotes[1].targets(),
        vec![
            RemoteTarget::External("app3@primary".to_string()),
            RemoteTarget::Internal("./src/app3-fallback".to_string()),
        ]
    );

    let react = &config.shared[0];
    assert!(react.singleton);
    assert!(!react.strict_version);
    assert_eq!(react.share_scope, "ui");
    assert_eq!(
        react.required_version,
        VersionSpec::Explicit("^18.0.0".to_string())
    );

    let lodash = &config.shared[1];
    assert_eq!(lodash.import_target.as_deref(), Some("lodash"));
    assert!(lodash.strict_version);
    assert_eq!(
        lodash.required_version,
        VersionSpec::Explicit("^4.17.0".to_string())
    );

    assert_eq!(config.shared[2].match_kind(), ShareMatch::Prefix);
    assert_eq!(config.shared[3].match_kind(), ShareMatch::ResolvedPath);
    assert_eq!(config.shared[3].version, VersionSpec::Explicit("1.2.0".to_string()));
}

#[test]
fn test_shared_shorthand_import_target() {
    let config = parse_config(
        r#"
        [shared]
        "my-react" = "react"
        "#,
    )
    .unwrap();
    let entry = &config.shared[0];
    assert_eq!(entry.share_key, "my-react");
    assert_eq!(entry.import_target.as_deref(), Some("react"));
    assert_eq!(entry.required_version, VersionSpec::Infer);
}

#[test]
fn test_import_disabled_is_not_strict() {
    let config = parse_config(
        r#"
        [shared]
        react = { import = false, required-version = false, version = false }
        "#,
    )
    .unwrap();
    let entry = &config.shared[0];
    assert_eq!(entry.import_target, None);
    assert!(!entry.strict_version);
    assert_eq!(entry.required_version, VersionSpec::Disabled);
    assert_eq!(entry.version, VersionSpec::Disabled);
}

#[test]
fn test_explicit_strict_version_wins() {
    let config = parse_config(
        r#"
        [shared]
        react = { singleton = true, strict-version = true }
        "#,
    )
    .unwrap();
    assert!(config.shared[0].strict_version);
}

#[test]
fn test_exposes_require_container_name() {
    let err = parse_config(
        r#"
        [exposes]
        "./Button" = "./src/Button"
        "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("container.name"));
}

#[test]
fn test_unknown_fields_are_rejected() {
    let err = parse_config(
        r#"
        [shared]
        react = { singelton = true }
        "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("Unknown field 'singelton'"));

    let err = parse_config("[plugins]\nfoo = 1\n").unwrap_err();
    assert!(err.to_string().contains("Unknown top-level table 'plugins'"));
}

#[test]
fn test_remote_requires_targets() {
    let err = parse_config(
        r#"
        [remotes]
        app2 = []
        "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("no external targets"));
}

#[test]
fn test_merge_multiple_files() {
    let host = common::create_toml_test_file(
        r#"
        [container]
        name = "app1"

        [exposes]
        "./Button" = "./src/Button"

        [remotes]
        app2 = "app2@primary"
        "#,
    );
    let shared = common::create_toml_test_file(
        r#"
        [shared]
        react = "^18.0.0"
        "#,
    );

    let config = load_config(&common::paths(&[&host, &shared])).unwrap();
    assert_eq!(config.name, "app1");
    assert_eq!(config.container.unwrap().exposes.len(), 1);
    assert_eq!(config.remotes.len(), 1);
    assert_eq!(config.shared.len(), 1);
}

#[test]
fn test_merge_rejects_duplicates() {
    let first = common::create_toml_test_file(
        r#"
        [remotes]
        app2 = "app2@primary"
        "#,
    );
    let second = common::create_toml_test_file(
        r#"
        [remotes]
        app2 = "app2@other"
        "#,
    );
    let err = load_config(&common::paths(&[&first, &second])).unwrap_err();
    assert!(err.to_string().contains("Duplicate remote key: 'app2'"));
}

#[test]
fn test_default_name_without_container() {
    let file = common::create_toml_test_file(
        r#"
        [shared]
        react = "^18.0.0"
        "#,
    );
    let config = load_config(&[file.to_path_buf()]).unwrap();
    assert_eq!(config.name, "host");
    assert_eq!(config.share_scope, "default");
    assert!(config.container.is_none());
}

#[test]
fn test_unsupported_file_type() {
    let err = load_config(&["federation.json".into()]).unwrap_err();
    assert!(err.to_string().contains("Unsupported file type"));
}
