//! Replkit - interactive code-execution kernel server.
//!
//! Serves a composite kernel over stdio using the line-delimited JSON
//! protocol: commands in on stdin, events out on stdout, logs on stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use replkit_client::serve;
use replkit_core::{
    BudgetMiddleware, CalcEngine, CompositeKernel, DirectiveHandler, DirectiveInvocation, Kernel,
    KernelError, KernelExtension, KernelScope, StaticDiscovery,
};
use replkit_packages::{DirectoryRestorer, PackageRestoreContext};
use replkit_protocols::EventKind;

/// Replkit CLI.
#[derive(Parser)]
#[command(name = "replkit")]
#[command(about = "Interactive code-execution kernel server")]
#[command(version)]
struct Cli {
    /// Name of the root composite kernel
    #[arg(long, default_value = "root")]
    name: String,

    /// Local package directory for AddPackage commands
    /// (layout: <dir>/<name>/<version>/)
    #[arg(long)]
    packages_dir: Option<PathBuf>,

    /// Directory the built-in extensions are registered under, enabling
    /// LoadExtensionsInDirectory commands
    #[arg(long)]
    extensions_dir: Option<PathBuf>,

    /// Per-command budget in milliseconds
    #[arg(long)]
    budget_ms: Option<u64>,
}

/// Initialize tracing on stderr; stdout carries the event stream.
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Directive greeting whoever the argument names.
struct HelloDirective;

#[async_trait]
impl DirectiveHandler for HelloDirective {
    async fn handle(
        &self,
        invocation: DirectiveInvocation,
        scope: &mut KernelScope<'_>,
    ) -> Result<(), KernelError> {
        let who = if invocation.arguments.is_empty() {
            "world".to_string()
        } else {
            invocation.arguments
        };
        scope.publish(
            EventKind::StandardOutputValueProduced {
                value: format!("hello, {who}"),
            },
            &invocation.command,
        );
        Ok(())
    }
}

/// Built-in extension contributing the `#hello` directive.
struct HelloExtension;

#[async_trait]
impl KernelExtension for HelloExtension {
    async fn on_load(&self, kernel: &mut KernelScope<'_>) -> anyhow::Result<()> {
        kernel
            .kernel()
            .register_directive("#hello", Arc::new(HelloDirective))?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    info!("Starting replkit v{}", env!("CARGO_PKG_VERSION"));

    let composite = CompositeKernel::new(cli.name.clone());
    composite.add(Kernel::new("calc", CalcEngine::new()))?;

    if let Some(ms) = cli.budget_ms {
        composite.add_middleware(Arc::new(BudgetMiddleware::new(Duration::from_millis(ms))));
        info!(budget_ms = ms, "per-command budget enabled");
    }

    if let Some(dir) = &cli.packages_dir {
        let packages = Arc::new(PackageRestoreContext::new(Arc::new(DirectoryRestorer::new(
            dir,
        ))));
        // Every subkernel shares one requested-package graph.
        composite.visit_subkernels(
            &mut |kernel| kernel.use_package_restore(packages.clone()),
            true,
        );
        info!(dir = %dir.display(), "package restore enabled");
    }

    if let Some(dir) = &cli.extensions_dir {
        let mut discovery = StaticDiscovery::new();
        discovery.register(dir.join("hello"), || Box::new(HelloExtension));
        let discovery: Arc<StaticDiscovery> = Arc::new(discovery);
        composite.visit_subkernels(
            &mut |kernel| kernel.use_extension_discovery(discovery.clone()),
            true,
        );
        info!(dir = %dir.display(), "extension discovery enabled");
    }

    info!(kernel = %cli.name, "serving on stdio");
    let stdin = BufReader::new(tokio::io::stdin());
    serve(composite.kernel().clone(), stdin, tokio::io::stdout()).await?;
    info!("server loop ended");
    Ok(())
}
