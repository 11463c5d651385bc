mod common;
use common::{bundle, consume, exports, manifest, provide};
use composable_federation::host::BoxFuture;
use composable_federation::registry::{Exports, ShareRequest, VersionRecord};
use composable_federation::runtime::ModuleTable;
use composable_federation::semver::{Range, Version};
use composable_federation::{Diagnostics, ErrorKind, FederationError, FederationWarning, ShareScope};
use std::sync::Arc;

fn offer(scope: &ShareScope, key: &str, version: &str) {
    let label = format!("{key}@{version}");
    let value = exports(&label);
    scope.register(
        key,
        VersionRecord::new(
            Version::parse(version).unwrap(),
            "provider",
            false,
            Arc::new(move || -> BoxFuture<'static, Result<Exports, FederationError>> {
                let value = value.clone();
                Box::pin(async move { Ok(value) })
            }),
        ),
    );
}

fn request<'a>(key: &'a str, range: Option<&'a Range>, singleton: bool, strict: bool) -> ShareRequest<'a> {
    ShareRequest {
        scope: "default",
        share_key: key,
        required_version: range,
        singleton,
        strict_version: strict,
    }
}

#[test]
fn test_selects_highest_satisfying_version() {
    let scope = ShareScope::new();
    for version in ["1.2.0", "1.5.0", "2.0.0"] {
        offer(&scope, "lib", version);
    }
    let diagnostics = Diagnostics::new();
    let range = Range::parse("^1.0.0").unwrap();

    let selected = scope
        .select(&request("lib", Some(&range), false, true), &diagnostics)
        .unwrap()
        .unwrap();
    assert_eq!(selected.version, Version::new(1, 5, 0));

    let any = scope
        .select(&request("lib", None, false, true), &diagnostics)
        .unwrap()
        .unwrap();
    assert_eq!(any.version, Version::new(2, 0, 0));
    assert!(diagnostics.is_empty());
    assert_eq!(scope.active_version("lib"), None);
}

#[test]
fn test_prerelease_offers_need_explicit_request() {
    let scope = ShareScope::new();
    offer(&scope, "lib", "1.0.0");
    offer(&scope, "lib", "1.1.0-beta.1");
    let diagnostics = Diagnostics::new();

    let range = Range::parse("^1.0.0").unwrap();
    let selected = scope
        .select(&request("lib", Some(&range), false, true), &diagnostics)
        .unwrap()
        .unwrap();
    assert_eq!(selected.version, Version::new(1, 0, 0));

    let range = Range::parse(">=1.1.0-beta.0").unwrap();
    let selected = scope
        .select(&request("lib", Some(&range), false, true), &diagnostics)
        .unwrap()
        .unwrap();
    assert_eq!(selected.version.to_string(), "1.1.0-beta.1");
}

#[test]
fn test_singleton_reuses_active_version() {
    let scope = ShareScope::new();
    offer(&scope, "react", "18.2.0");
    let diagnostics = Diagnostics::new();

    let react18 = Range::parse("^18.0.0").unwrap();
    let first = scope
        .select(&request("react", Some(&react18), true, false), &diagnostics)
        .unwrap()
        .unwrap();
    assert_eq!(first.version, Version::new(18, 2, 0));
    assert_eq!(scope.active_version("react"), Some(Version::new(18, 2, 0)));

    // A newer offer does not displace the active singleton.
    offer(&scope, "react", "18.3.0");
    let react17 = Range::parse("^17.0.0").unwrap();
    let second = scope
        .select(&request("react", Some(&react17), true, true), &diagnostics)
        .unwrap()
        .unwrap();
    assert_eq!(second.version, Version::new(18, 2, 0));

    let warnings = diagnostics.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0],
        FederationWarning::SingletonConflict {
            share_key: "react".to_string(),
            scope: "default".to_string(),
            active: "18.2.0".to_string(),
            required: "^17.0.0".to_string(),
        }
    );
}

#[test]
fn test_strict_mismatch_fails() {
    let scope = ShareScope::new();
    offer(&scope, "lib", "2.0.0");
    offer(&scope, "lib", "3.1.0");
    let range = Range::parse("^1.0.0").unwrap();

    let err = scope
        .select(&request("lib", Some(&range), false, true), &Diagnostics::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionMismatch);
    match err {
        FederationError::VersionMismatch {
            required, offered, ..
        } => {
            assert_eq!(required, "^1.0.0");
            assert_eq!(offered, vec!["2.0.0", "3.1.0"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_non_strict_mismatch_uses_highest_with_warning() {
    let scope = ShareScope::new();
    offer(&scope, "lib", "2.0.0");
    offer(&scope, "lib", "3.1.0");
    let diagnostics = Diagnostics::new();
    let range = Range::parse("^1.0.0").unwrap();

    let selected = scope
        .select(&request("lib", Some(&range), false, false), &diagnostics)
        .unwrap()
        .unwrap();
    assert_eq!(selected.version, Version::new(3, 1, 0));
    assert!(matches!(
        &diagnostics.warnings()[..],
        [FederationWarning::VersionMismatch { selected, .. }] if selected == "3.1.0"
    ));
}

#[test]
fn test_nothing_offered() {
    let scope = ShareScope::new();
    let selected = scope
        .select(&request("lib", None, true, true), &Diagnostics::new())
        .unwrap();
    assert!(selected.is_none());
}

#[tokio::test]
async fn test_singleton_conflict_across_bundles() {
    let scope = ShareScope::new();

    let mut app1 = manifest("app1");
    app1.provides = vec![provide("react", "18.2.0", "react")];
    let mut react = consume("react", Some("^18.0.0"));
    react.singleton = true;
    app1.consumes = vec![react];
    let app1 = bundle(app1, ModuleTable::new().with_module("react", exports("react@18")));
    app1.runtime.registry().bind("default", &scope).unwrap();

    let mut app2 = manifest("app2");
    let mut react = consume("react", Some("^17.0.0"));
    react.singleton = true;
    react.strict_version = true;
    react.fallback = Some("react".to_string());
    app2.consumes = vec![react];
    let app2 = bundle(app2, ModuleTable::new().with_module("react", exports("react@17")));
    app2.runtime.registry().bind("default", &scope).unwrap();

    assert_eq!(app1.runtime.consume("react").await.unwrap(), exports("react@18"));
    assert_eq!(app2.runtime.consume("react").await.unwrap(), exports("react@18"));
    // Consuming again is memoized and does not warn twice.
    app2.runtime.consume("react").await.unwrap();

    assert!(app1.runtime.diagnostics().is_empty());
    let warnings = app2.runtime.diagnostics().warnings();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(warnings[0], FederationWarning::SingletonConflict { .. }));
    assert_eq!(app2.modules.load_count("react"), 0);
    assert_eq!(app1.modules.load_count("react"), 1);
}

#[tokio::test]
async fn test_consume_falls_back_to_local_copy() {
    let mut host = manifest("host");
    let mut lib = consume("lib", Some("^1.0.0"));
    lib.fallback = Some("lib".to_string());
    host.consumes = vec![lib, consume("missing", None)];
    let host = bundle(host, ModuleTable::new().with_module("lib", exports("local lib")));

    assert_eq!(host.runtime.consume("lib").await.unwrap(), exports("local lib"));
    let err = host.runtime.consume("missing").await.unwrap_err();
    assert!(matches!(err, FederationError::SharedNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::ModuleNotFound);
}

#[tokio::test]
async fn test_invalid_manifest_range_fails_build() {
    let mut host = manifest("host");
    host.consumes = vec![consume("lib", Some(">>1"))];
    let err = composable_federation::Runtime::builder(host).build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionRangeParse);
}
