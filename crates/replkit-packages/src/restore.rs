//! Package restore context.
//!
//! Tracks requested references and drives a [`PackageRestorer`] to resolve
//! them. Safe to call repeatedly as references accumulate: each restore
//! supersedes the previous one and reports the full currently-requested
//! graph, not a delta.
//!
//! Concurrency contract: `add_package_reference` and `restore` are meant to
//! be invoked by one writer at a time; two `restore` calls racing each other
//! are not internally serialized.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::PackageError;
use crate::reference::{PackageReference, ResolvedPackageReference};

/// Outcome of one restore pass.
#[derive(Debug, Clone)]
pub struct RestoreResult {
    pub succeeded: bool,
    /// Diagnostic lines from the restore subsystem on failure.
    pub errors: Vec<String>,
    /// The full resolved set for the currently-requested graph.
    pub resolved_references: Vec<ResolvedPackageReference>,
}

impl RestoreResult {
    pub fn success(resolved_references: Vec<ResolvedPackageReference>) -> Self {
        Self {
            succeeded: true,
            errors: Vec::new(),
            resolved_references,
        }
    }

    pub fn failure(errors: Vec<String>) -> Self {
        Self {
            succeeded: false,
            errors,
            resolved_references: Vec::new(),
        }
    }
}

/// External dependency-resolution boundary.
///
/// Given the accumulated request set, returns either the resolved tuples or
/// the restore tool's diagnostic lines.
#[async_trait]
pub trait PackageRestorer: Send + Sync + 'static {
    async fn restore(
        &self,
        requests: &[PackageReference],
    ) -> Result<Vec<ResolvedPackageReference>, Vec<String>>;
}

/// Requested and resolved package state for one evolving environment.
pub struct PackageRestoreContext {
    restorer: Arc<dyn PackageRestorer>,
    requested: Mutex<Vec<PackageReference>>,
    resolved: Mutex<HashMap<String, ResolvedPackageReference>>,
}

impl PackageRestoreContext {
    pub fn new(restorer: Arc<dyn PackageRestorer>) -> Self {
        Self {
            restorer,
            requested: Mutex::new(Vec::new()),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Record a desire to add a package.
    ///
    /// Returns `true` for a new addition, a verbatim re-add, or an unpinned
    /// request against any existing one. A request that pins a version for a
    /// previously unpinned package fills the pin in and returns `true`. A
    /// request pinning a *different* version than an existing pin returns
    /// `false`: an existing pin never silently changes.
    pub fn add_package_reference(&self, name: &str, version: Option<&str>) -> bool {
        let request = PackageReference::new(name, version);
        let mut requested = self.requested.lock();
        let Some(existing) = requested.iter_mut().find(|r| r.key() == request.key()) else {
            debug!(package = name, version = ?version, "package reference added");
            requested.push(request);
            return true;
        };
        match (&existing.version, &request.version) {
            (_, None) => true,
            (None, Some(pin)) => {
                debug!(package = name, version = %pin, "pinned previously unpinned package");
                existing.version = Some(pin.clone());
                true
            }
            (Some(current), Some(pin)) if current == pin => true,
            (Some(current), Some(pin)) => {
                warn!(
                    package = name,
                    existing = %current,
                    requested = %pin,
                    "conflicting package version request rejected"
                );
                false
            }
        }
    }

    /// The version a package was requested at: `None` if never requested,
    /// `Some(None)` if requested unpinned.
    pub fn requested_version(&self, name: &str) -> Option<Option<String>> {
        let key = name.to_lowercase();
        self.requested
            .lock()
            .iter()
            .find(|r| r.key() == key)
            .map(|r| r.version.clone())
    }

    /// Snapshot of the currently-requested references.
    pub fn requested_packages(&self) -> Vec<PackageReference> {
        self.requested.lock().clone()
    }

    /// Resolve the full currently-requested graph.
    pub async fn restore(&self) -> RestoreResult {
        let requests = self.requested.lock().clone();
        info!(count = requests.len(), "restoring package references");
        match self.restorer.restore(&requests).await {
            Ok(resolved_references) => {
                let mut resolved = self.resolved.lock();
                for reference in &resolved_references {
                    resolved.insert(reference.name.to_lowercase(), reference.clone());
                }
                RestoreResult::success(resolved_references)
            }
            Err(errors) => {
                warn!(count = errors.len(), "package restore failed");
                RestoreResult::failure(errors)
            }
        }
    }

    /// The resolved reference for a package; fails until a restore has
    /// succeeded for it.
    pub fn resolved_package_reference(
        &self,
        name: &str,
    ) -> Result<ResolvedPackageReference, PackageError> {
        self.resolved
            .lock()
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| PackageError::NotRestored(name.to_string()))
    }
}

/// Restorer resolving packages against a local directory layout
/// `<root>/<name>/<version>/`, newest version winning for unpinned requests.
pub struct DirectoryRestorer {
    root: std::path::PathBuf,
}

impl DirectoryRestorer {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve_one(
        &self,
        request: &PackageReference,
    ) -> Result<ResolvedPackageReference, String> {
        let package_dir = find_entry(&self.root, &request.name)
            .ok_or_else(|| format!("package '{}' not found under {}", request.name, self.root.display()))?;
        let version = match &request.version {
            Some(pin) => {
                if !package_dir.join(pin).is_dir() {
                    return Err(format!(
                        "package '{}' has no version {} installed",
                        request.name, pin
                    ));
                }
                pin.clone()
            }
            None => latest_version(&package_dir).ok_or_else(|| {
                format!("package '{}' has no installed versions", request.name)
            })?,
        };
        let package_root = package_dir.join(&version);
        let mut assembly_paths: Vec<_> = std::fs::read_dir(&package_root)
            .map_err(|e| format!("reading {}: {e}", package_root.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        assembly_paths.sort();
        Ok(ResolvedPackageReference {
            name: request.name.clone(),
            version,
            assembly_paths,
            package_root,
        })
    }
}

#[async_trait]
impl PackageRestorer for DirectoryRestorer {
    async fn restore(
        &self,
        requests: &[PackageReference],
    ) -> Result<Vec<ResolvedPackageReference>, Vec<String>> {
        let mut resolved = Vec::new();
        let mut errors = Vec::new();
        for request in requests {
            match self.resolve_one(request) {
                Ok(reference) => resolved.push(reference),
                Err(error) => errors.push(error),
            }
        }
        if errors.is_empty() {
            Ok(resolved)
        } else {
            Err(errors)
        }
    }
}

fn find_entry(root: &Path, name: &str) -> Option<std::path::PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().eq_ignore_ascii_case(name) && entry.path().is_dir()
        {
            return Some(entry.path());
        }
    }
    None
}

fn latest_version(package_dir: &Path) -> Option<String> {
    let mut versions: Vec<String> = std::fs::read_dir(package_dir)
        .ok()?
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    versions.sort_by_key(|v| version_sort_key(v));
    versions.pop()
}

fn version_sort_key(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect()
}

#[cfg(test)]
#[path = "restore_tests.rs"]
pub(crate) mod tests;
