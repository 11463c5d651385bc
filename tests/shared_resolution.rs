mod common;
use common::TestProject;
use composable_federation::error::{ErrorKind, FederationWarning};
use composable_federation::host::FsModuleResolver;
use composable_federation::semver::Version;
use composable_federation::sharing::SharedResolver;
use composable_federation::types::{SharedEntry, VersionSpec};
use composable_federation::Diagnostics;
use serde_json::json;
use std::sync::Arc;

async fn resolver(project: &TestProject, entries: &[SharedEntry]) -> (Arc<SharedResolver>, Diagnostics) {
    let diagnostics = Diagnostics::new();
    let resolver = SharedResolver::new(
        entries,
        Arc::new(FsModuleResolver::new()),
        project.to_path_buf(),
        diagnostics.clone(),
    )
    .await;
    (Arc::new(resolver), diagnostics)
}

#[tokio::test]
async fn test_infers_versions_from_descriptors() {
    let project = TestProject::new()
        .manifest(json!({ "react": "^18.0.0" }))
        .package("react", "18.2.0");
    let entry = SharedEntry::new("react", "default");
    let (shared, diagnostics) = resolver(&project, &[entry]).await;

    let resolved = shared
        .resolve_request("react", &project, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        resolved.fallback,
        Some(project.join("node_modules/react/index.js"))
    );
    assert_eq!(resolved.required_version.unwrap().to_string(), "^18.0.0");
    assert_eq!(resolved.provided_version, Some(Version::new(18, 2, 0)));
    assert!(diagnostics.is_empty());
}

#[tokio::test]
async fn test_dependency_lists_in_preference_order() {
    let project = TestProject::new()
        .file(
            "package.json",
            &json!({
                "name": "app",
                "peerDependencies": { "react": ">=16" },
                "devDependencies": { "react": "^17.0.0" },
            })
            .to_string(),
        )
        .package("react", "17.0.2");
    let (shared, _) = resolver(&project, &[SharedEntry::new("react", "default")]).await;
    let resolved = shared
        .resolve_request("react", &project, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.required_version.unwrap().to_string(), "^17.0.0");
}

#[tokio::test]
async fn test_scoped_package_name_inference() {
    let project = TestProject::new()
        .manifest(json!({ "@mui/material": "^5.0.0" }))
        .package("@mui/material", "5.14.0")
        .file("node_modules/@mui/material/Button.js", "module.exports = {};");
    let mut entry = SharedEntry::new("@mui/material/Button", "default");
    entry.version = VersionSpec::Disabled;
    let (shared, diagnostics) = resolver(&project, &[entry]).await;

    let resolved = shared
        .resolve_request("@mui/material/Button", &project, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.required_version.unwrap().to_string(), "^5.0.0");
    assert_eq!(resolved.provided_version, None);
    assert!(diagnostics.is_empty());
}

#[tokio::test]
async fn test_missing_dependency_is_a_warning() {
    let project = TestProject::new()
        .manifest(json!({}))
        .package("lodash", "4.17.21");
    let (shared, diagnostics) = resolver(&project, &[SharedEntry::new("lodash", "default")]).await;

    let resolved = shared
        .resolve_request("lodash", &project, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.required_version, None);
    assert!(resolved.fallback.is_some());

    let warnings = diagnostics.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(
        &warnings[0],
        FederationWarning::DescriptorLookup { share_key, message }
            if share_key == "lodash" && message.contains("Unable to find required version for \"lodash\"")
    ));
}

#[tokio::test]
async fn test_unparseable_inferred_range_is_a_warning() {
    let project = TestProject::new()
        .manifest(json!({ "lodash": "github:lodash/lodash" }))
        .package("lodash", "4.17.21");
    let (shared, diagnostics) = resolver(&project, &[SharedEntry::new("lodash", "default")]).await;

    let resolved = shared
        .resolve_request("lodash", &project, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.required_version, None);
    assert_eq!(diagnostics.len(), 1);
}

#[tokio::test]
async fn test_explicit_invalid_range_is_an_error() {
    let project = TestProject::new().package("lodash", "4.17.21");
    let mut entry = SharedEntry::new("lodash", "default");
    entry.required_version = VersionSpec::Explicit("^^4".to_string());
    let (shared, _) = resolver(&project, &[entry]).await;

    let err = shared
        .resolve_request("lodash", &project, None)
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionRangeParse);
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_prefix_match_extends_share_key() {
    let project = TestProject::new()
        .file("node_modules/shared/package.json", r#"{"name":"shared","version":"2.1.0"}"#)
        .file("node_modules/shared/utils/format.js", "module.exports = {};");
    let mut entry = SharedEntry::new("shared/", "default");
    entry.required_version = VersionSpec::Disabled;
    let (shared, _) = resolver(&project, &[entry]).await;

    let resolved = shared
        .resolve_request("shared/utils/format", &project, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.entry.share_key, "shared/utils/format");
    assert_eq!(
        resolved.entry.import_target.as_deref(),
        Some("shared/utils/format")
    );
    assert_eq!(
        resolved.fallback,
        Some(project.join("node_modules/shared/utils/format.js"))
    );
    assert_eq!(resolved.provided_version, Some(Version::new(2, 1, 0)));
}

#[tokio::test]
async fn test_exact_match_takes_precedence_over_prefix() {
    let project = TestProject::new();
    let exact = SharedEntry::new("shared/core", "default");
    let mut prefix = SharedEntry::new("shared/", "default");
    prefix.share_key = "lib/".to_string();
    let (shared, _) = resolver(&project, &[prefix, exact]).await;

    assert_eq!(shared.match_request("shared/core").unwrap().share_key, "shared/core");
    assert_eq!(shared.match_request("shared/other").unwrap().share_key, "lib/other");
    assert!(shared.match_request("sharedx").is_none());
}

#[tokio::test]
async fn test_resolved_path_match() {
    let project = TestProject::new().file("src/store.js", "module.exports = {};");
    let mut entry = SharedEntry::new("./src/store", "default");
    entry.version = VersionSpec::Explicit("1.0.0".to_string());
    let (shared, _) = resolver(&project, &[entry]).await;

    // A different request string reaching the same file matches.
    let path = project.join("src/store.js");
    let resolved = shared
        .resolve_request("../app/src/store", &project, Some(&path))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.entry.share_key, "./src/store");
    assert_eq!(resolved.required_version, None);
    assert_eq!(resolved.provided_version, Some(Version::new(1, 0, 0)));
    assert!(shared.resolve_request("./src/other", &project, None).await.is_none());
}

#[tokio::test]
async fn test_unresolved_fallback_is_a_warning() {
    let project = TestProject::new().manifest(json!({ "missing": "^1.0.0" }));
    let (shared, diagnostics) = resolver(&project, &[SharedEntry::new("missing", "default")]).await;

    let resolved = shared
        .resolve_request("missing", &project, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.fallback, None);
    assert_eq!(resolved.provided_version, None);
    assert_eq!(resolved.required_version.unwrap().to_string(), "^1.0.0");
    assert!(matches!(
        &diagnostics.warnings()[..],
        [FederationWarning::UnresolvedFallback { request, .. }] if request == "missing"
    ));
}

#[tokio::test]
async fn test_failures_are_isolated_per_entry() {
    let project = TestProject::new()
        .manifest(json!({ "react": "^18.0.0" }))
        .package("react", "18.2.0");
    let mut broken = SharedEntry::new("vue", "default");
    broken.required_version = VersionSpec::Explicit("not a range".to_string());
    let react = SharedEntry::new("react", "default");
    let (shared, _) = resolver(&project, &[]).await;

    let results = shared.resolve_all(vec![broken, react]).await;
    assert_eq!(results.len(), 2);
    assert!(results[0].is_err());
    assert_eq!(results[1].as_ref().unwrap().entry.share_key, "react");
}
