//! Kernel extension loading.
//!
//! Extensions are units of code loaded against a running kernel. How a
//! loadable unit is discovered under a directory is host-specific (shared
//! objects, a build-time plugin registry, ...), so discovery is a pluggable
//! [`ExtensionDiscovery`] collaborator. Loading is isolated per extension:
//! one bad extension is reported as an `ExtensionLoadFailed` event and never
//! aborts its siblings or the host.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::kernel::KernelScope;

/// Initialization entry point of a loadable extension.
///
/// `on_load` receives the live kernel and may register directives, defer
/// commands, or submit commands whose events nest under the triggering
/// `LoadExtensionsInDirectory` command.
#[async_trait]
pub trait KernelExtension: Send + Sync + 'static {
    async fn on_load(&self, kernel: &mut KernelScope<'_>) -> anyhow::Result<()>;
}

/// One extension found under a load directory.
pub struct DiscoveredExtension {
    /// Filesystem location the extension was loaded from.
    pub path: PathBuf,
    pub extension: Box<dyn KernelExtension>,
}

/// Finds loadable extensions under a directory.
#[async_trait]
pub trait ExtensionDiscovery: Send + Sync + 'static {
    async fn discover(&self, directory: &Path) -> anyhow::Result<Vec<DiscoveredExtension>>;
}

type ExtensionFactory = Arc<dyn Fn() -> Box<dyn KernelExtension> + Send + Sync>;

/// Build-time plugin registry: extensions are registered under the path they
/// notionally live at, and discovery filters by directory prefix.
#[derive(Default)]
pub struct StaticDiscovery {
    factories: Vec<(PathBuf, ExtensionFactory)>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension factory under `path`.
    pub fn register<F>(&mut self, path: impl Into<PathBuf>, factory: F)
    where
        F: Fn() -> Box<dyn KernelExtension> + Send + Sync + 'static,
    {
        self.factories.push((path.into(), Arc::new(factory)));
    }
}

#[async_trait]
impl ExtensionDiscovery for StaticDiscovery {
    async fn discover(&self, directory: &Path) -> anyhow::Result<Vec<DiscoveredExtension>> {
        Ok(self
            .factories
            .iter()
            .filter(|(path, _)| path.starts_with(directory))
            .map(|(path, factory)| DiscoveredExtension {
                path: path.clone(),
                extension: factory(),
            })
            .collect())
    }
}
