//! Package reference value types.

use std::path::PathBuf;

/// A requested package, optionally pinned to a version.
///
/// An unpinned reference resolves to the latest compatible version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReference {
    pub name: String,
    pub version: Option<String>,
}

impl PackageReference {
    pub fn new(name: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            name: name.into(),
            version: version.map(str::to_string),
        }
    }

    /// Package names compare case-insensitively.
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }
}

/// A package after a successful restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackageReference {
    pub name: String,
    /// The concrete version the restore chose.
    pub version: String,
    /// Loadable assembly paths contributed by the package.
    pub assembly_paths: Vec<PathBuf>,
    /// Root directory of the installed package.
    pub package_root: PathBuf,
}
