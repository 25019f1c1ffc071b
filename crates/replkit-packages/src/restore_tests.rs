use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{DirectoryRestorer, PackageRestoreContext, PackageRestorer};
use crate::error::PackageError;
use crate::reference::{PackageReference, ResolvedPackageReference};

/// Restorer resolving every request at a fixed version, counting calls.
pub(crate) struct FakeRestorer {
    pub calls: AtomicUsize,
    pub fail_with: Option<Vec<String>>,
}

impl FakeRestorer {
    pub(crate) fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    pub(crate) fn failing(errors: Vec<String>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: Some(errors),
        }
    }
}

#[async_trait]
impl PackageRestorer for FakeRestorer {
    async fn restore(
        &self,
        requests: &[PackageReference],
    ) -> Result<Vec<ResolvedPackageReference>, Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(errors) = &self.fail_with {
            return Err(errors.clone());
        }
        Ok(requests
            .iter()
            .map(|request| ResolvedPackageReference {
                name: request.name.clone(),
                version: request.version.clone().unwrap_or_else(|| "2.0.0".to_string()),
                assembly_paths: vec![PathBuf::from(format!("/pkg/{}/lib.dll", request.name))],
                package_root: PathBuf::from(format!("/pkg/{}", request.name)),
            })
            .collect())
    }
}

#[tokio::test]
async fn test_pinned_version_conflict_is_rejected_not_thrown() {
    let context = PackageRestoreContext::new(Arc::new(FakeRestorer::new()));
    assert!(context.add_package_reference("Foo", Some("1.0.0")));
    assert!(!context.add_package_reference("Foo", Some("1.0.1")));
    // The original pin is untouched.
    assert_eq!(
        context.requested_version("Foo"),
        Some(Some("1.0.0".to_string()))
    );
}

#[tokio::test]
async fn test_unpinned_request_can_be_filled_in() {
    let context = PackageRestoreContext::new(Arc::new(FakeRestorer::new()));
    assert!(context.add_package_reference("Foo", None));
    assert!(context.add_package_reference("Foo", Some("1.0.0")));
    assert_eq!(
        context.requested_version("Foo"),
        Some(Some("1.0.0".to_string()))
    );
}

#[tokio::test]
async fn test_verbatim_readd_and_unpinned_after_pin_are_accepted() {
    let context = PackageRestoreContext::new(Arc::new(FakeRestorer::new()));
    assert!(context.add_package_reference("Foo", Some("1.0.0")));
    assert!(context.add_package_reference("Foo", Some("1.0.0")));
    assert!(context.add_package_reference("Foo", None));
}

#[tokio::test]
async fn test_package_names_are_case_insensitive() {
    let context = PackageRestoreContext::new(Arc::new(FakeRestorer::new()));
    assert!(context.add_package_reference("Foo", Some("1.0.0")));
    assert!(!context.add_package_reference("foo", Some("2.0.0")));
}

#[tokio::test]
async fn test_restore_reports_full_graph_not_delta() {
    let restorer = Arc::new(FakeRestorer::new());
    let context = PackageRestoreContext::new(restorer.clone());
    context.add_package_reference("A", Some("1.0.0"));
    let first = context.restore().await;
    assert!(first.succeeded);
    assert_eq!(first.resolved_references.len(), 1);

    context.add_package_reference("B", None);
    let second = context.restore().await;
    assert!(second.succeeded);
    let names: Vec<_> = second
        .resolved_references
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(names, vec!["A", "B"]);
    assert_eq!(restorer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_resolved_reference_query_fails_before_restore() {
    let context = PackageRestoreContext::new(Arc::new(FakeRestorer::new()));
    context.add_package_reference("Foo", Some("1.0.0"));
    let err = context.resolved_package_reference("Foo").unwrap_err();
    assert!(matches!(err, PackageError::NotRestored(_)));

    context.restore().await;
    let resolved = context.resolved_package_reference("foo").unwrap();
    assert_eq!(resolved.version, "1.0.0");
}

#[tokio::test]
async fn test_restore_failure_accumulates_diagnostic_lines() {
    let context = PackageRestoreContext::new(Arc::new(FakeRestorer::failing(vec![
        "source unreachable".to_string(),
        "package Foo not found".to_string(),
    ])));
    context.add_package_reference("Foo", None);
    let result = context.restore().await;
    assert!(!result.succeeded);
    assert_eq!(result.errors.len(), 2);
    assert!(result.resolved_references.is_empty());
}

#[tokio::test]
async fn test_directory_restorer_resolves_pinned_and_latest() {
    let root = tempfile::tempdir().unwrap();
    for version in ["1.0.0", "1.2.0", "1.10.0"] {
        let dir = root.path().join("Foo").join(version);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("foo.dll"), b"").unwrap();
    }

    let context = PackageRestoreContext::new(Arc::new(DirectoryRestorer::new(root.path())));
    context.add_package_reference("Bar", None);
    let missing = context.restore().await;
    assert!(!missing.succeeded);
    assert!(missing.errors[0].contains("Bar"));

    let context = PackageRestoreContext::new(Arc::new(DirectoryRestorer::new(root.path())));
    context.add_package_reference("foo", None);
    let result = context.restore().await;
    assert!(result.succeeded);
    // Numeric ordering: 1.10.0 is newer than 1.2.0.
    assert_eq!(result.resolved_references[0].version, "1.10.0");
    assert_eq!(result.resolved_references[0].assembly_paths.len(), 1);

    let pinned = PackageRestoreContext::new(Arc::new(DirectoryRestorer::new(root.path())));
    pinned.add_package_reference("foo", Some("1.2.0"));
    let result = pinned.restore().await;
    assert!(result.succeeded);
    assert_eq!(result.resolved_references[0].version, "1.2.0");
}
