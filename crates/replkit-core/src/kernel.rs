//! Kernel base.
//!
//! A [`Kernel`] is a named execution unit: it owns a FIFO command queue
//! processed by a single worker task (handling never overlaps itself on one
//! instance), a middleware pipeline, deferred initialization commands, a
//! directive registry, and an event sink. A kernel with child kernels routes
//! commands instead of executing them locally; see [`crate::composite`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use replkit_packages::PackageRestoreContext;
use replkit_protocols::{Command, CommandKind, Event, EventKind};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::budget::{self, Budget};
use crate::context::{EventSink, InvocationContext};
use crate::directive::{
    DirectiveHandler, DirectiveInvocation, DirectiveRegistry, split_leading_directives,
};
use crate::engine::{ExecutionOutput, LanguageEngine};
use crate::error::{KernelError, KernelResult};
use crate::extensions::ExtensionDiscovery;
use crate::middleware::{KernelMiddleware, Next};

/// Directive routing submissions to a named child kernel.
pub const KERNEL_DIRECTIVE: &str = "#kernel";

const BROADCAST_CAPACITY: usize = 256;

struct QueuedCommand {
    command: Command,
    sink: mpsc::UnboundedSender<Event>,
    link: ContextLink,
}

/// Pieces of a parent invocation context carried into the fresh context a
/// child kernel establishes for a routed command: the child must observe the
/// parent's cancellation and count against the parent's budget.
#[derive(Default)]
pub(crate) struct ContextLink {
    cancellation: Option<CancellationToken>,
    budget: Option<Arc<Budget>>,
}

impl ContextLink {
    fn from_parent(ctx: &InvocationContext) -> Self {
        Self {
            cancellation: Some(ctx.cancellation_token().child_token()),
            budget: ctx.budget(),
        }
    }
}

pub(crate) struct KernelInner {
    name: String,
    command_tx: mpsc::UnboundedSender<QueuedCommand>,
    middleware: RwLock<Vec<Arc<dyn KernelMiddleware>>>,
    directives: RwLock<DirectiveRegistry>,
    deferred: Mutex<VecDeque<Command>>,
    children: RwLock<Vec<(String, Kernel)>>,
    default_child: RwLock<Option<String>>,
    in_flight: Mutex<Option<CancellationToken>>,
    events_tx: broadcast::Sender<Event>,
    packages: RwLock<Option<Arc<PackageRestoreContext>>>,
    extension_discovery: RwLock<Option<Arc<dyn ExtensionDiscovery>>>,
}

/// Ordered stream of the events one `send` call produces. The stream ends
/// after the kernel goes idle for that command.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Receive the next event, or `None` once the command is fully handled.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl futures::Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

/// Handle to a kernel. Cheap to clone; all clones address the same worker.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    /// Create a kernel executing code with `engine`.
    ///
    /// Spawns the kernel's worker task, so a Tokio runtime must be current.
    pub fn new(name: impl Into<String>, engine: impl LanguageEngine) -> Self {
        Self::build(name.into(), Some(Box::new(engine)))
    }

    pub(crate) fn build(name: String, engine: Option<Box<dyn LanguageEngine>>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let inner = Arc::new(KernelInner {
            name,
            command_tx,
            middleware: RwLock::new(Vec::new()),
            directives: RwLock::new(DirectiveRegistry::new()),
            deferred: Mutex::new(VecDeque::new()),
            children: RwLock::new(Vec::new()),
            default_child: RwLock::new(None),
            in_flight: Mutex::new(None),
            events_tx,
            packages: RwLock::new(None),
            extension_discovery: RwLock::new(None),
        });
        let worker = KernelWorker {
            inner: inner.clone(),
            engine,
        };
        tokio::spawn(worker.run(command_rx));
        info!(kernel = %inner.name, "kernel started");
        Kernel { inner }
    }

    pub(crate) fn from_inner(inner: Arc<KernelInner>) -> Self {
        Kernel { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueue a command and return the stream of events it causes.
    ///
    /// `CancelCurrentCommand` is handled out of band: queueing it behind the
    /// command it is meant to cancel would make it useless.
    pub fn send(&self, command: Command) -> KernelResult<EventStream> {
        self.send_linked(command, ContextLink::default())
    }

    pub(crate) fn send_linked(
        &self,
        command: Command,
        link: ContextLink,
    ) -> KernelResult<EventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        if matches!(command.kind, CommandKind::CancelCurrentCommand) {
            if let Some(token) = self.inner.in_flight.lock().clone() {
                debug!(kernel = %self.inner.name, "cancelling in-flight command");
                token.cancel();
            }
            let handled = Event::new(EventKind::CommandHandled, command);
            let _ = self.inner.events_tx.send(handled.clone());
            let _ = tx.send(handled);
            return Ok(EventStream { rx });
        }
        self.inner
            .command_tx
            .send(QueuedCommand {
                command,
                sink: tx,
                link,
            })
            .map_err(|_| KernelError::KernelShutDown(self.inner.name.clone()))?;
        Ok(EventStream { rx })
    }

    /// Send a command and collect every event it causes.
    pub async fn send_and_collect(&self, command: Command) -> KernelResult<Vec<Event>> {
        Ok(self.send(command)?.collect().await)
    }

    /// Subscribe to every event this kernel publishes, across commands.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events_tx.subscribe()
    }

    /// Append middleware to the pipeline.
    pub fn add_middleware(&self, middleware: Arc<dyn KernelMiddleware>) {
        self.inner.middleware.write().push(middleware);
    }

    /// Register a directive handler. The name must start with `#` or `%`.
    pub fn register_directive(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn DirectiveHandler>,
    ) -> KernelResult<()> {
        self.inner.directives.write().register(name, handler)
    }

    /// Registered directive names.
    pub fn directive_names(&self) -> Vec<String> {
        self.inner.directives.read().names()
    }

    /// Queue a command to run once, before the next externally-submitted
    /// command, without a terminal event of its own.
    pub fn defer_command(&self, command: Command) {
        self.inner.deferred.lock().push_back(command);
    }

    /// Add a child kernel; the first child becomes the default route.
    pub fn add_child(&self, child: Kernel) -> KernelResult<()> {
        let name = child.name().to_string();
        let mut children = self.inner.children.write();
        if children.iter().any(|(existing, _)| *existing == name) {
            return Err(KernelError::DuplicateChildKernel(name));
        }
        children.push((name.clone(), child));
        drop(children);
        let mut default = self.inner.default_child.write();
        if default.is_none() {
            *default = Some(name.clone());
        }
        info!(kernel = %self.inner.name, child = %name, "child kernel added");
        Ok(())
    }

    /// Set the default child route by name.
    pub fn set_default_child(&self, name: impl Into<String>) -> KernelResult<()> {
        let name = name.into();
        if self.child(&name).is_none() {
            return Err(KernelError::UnknownChildKernel(name));
        }
        *self.inner.default_child.write() = Some(name);
        Ok(())
    }

    pub fn default_child(&self) -> Option<String> {
        self.inner.default_child.read().clone()
    }

    /// Direct children, in insertion order.
    pub fn children(&self) -> Vec<Kernel> {
        self.inner
            .children
            .read()
            .iter()
            .map(|(_, child)| child.clone())
            .collect()
    }

    pub fn child(&self, name: &str) -> Option<Kernel> {
        self.inner
            .children
            .read()
            .iter()
            .find(|(child_name, _)| child_name == name)
            .map(|(_, child)| child.clone())
    }

    pub fn is_composite(&self) -> bool {
        !self.inner.children.read().is_empty()
    }

    /// Apply `visitor` to each direct child; with `recursive`, descend
    /// depth-first into composite children, visiting a child before its
    /// grandchildren.
    pub fn visit_subkernels(&self, visitor: &mut dyn FnMut(&Kernel), recursive: bool) {
        let children = self.children();
        for child in &children {
            visitor(child);
            if recursive {
                child.visit_subkernels(visitor, true);
            }
        }
    }

    /// Attach a package restore context for `AddPackage` commands.
    pub fn use_package_restore(&self, packages: Arc<PackageRestoreContext>) {
        *self.inner.packages.write() = Some(packages);
    }

    pub fn package_restore(&self) -> Option<Arc<PackageRestoreContext>> {
        self.inner.packages.read().clone()
    }

    /// Attach an extension discovery for `LoadExtensionsInDirectory` commands.
    pub fn use_extension_discovery(&self, discovery: Arc<dyn ExtensionDiscovery>) {
        *self.inner.extension_discovery.write() = Some(discovery);
    }
}

/// Worker-side view of a kernel, handed to directive handlers and extensions
/// so nested commands run inline within the current invocation context
/// instead of deadlocking behind the command being handled.
pub struct KernelScope<'a> {
    worker: &'a mut KernelWorker,
    ctx: Arc<InvocationContext>,
}

impl<'a> KernelScope<'a> {
    pub fn kernel_name(&self) -> &str {
        &self.worker.inner.name
    }

    /// The invocation context of the command being handled.
    pub fn context(&self) -> &Arc<InvocationContext> {
        &self.ctx
    }

    /// A cloneable handle to the owning kernel, for registrations.
    pub fn kernel(&self) -> Kernel {
        Kernel::from_inner(self.worker.inner.clone())
    }

    /// Publish an event caused by `command` into the current context.
    pub fn publish(&self, kind: EventKind, command: &Command) {
        self.ctx.publish(kind, command);
    }

    /// Handle a nested command inline, through the full pipeline, within the
    /// current context. Its events interleave with the parent's and complete
    /// before the parent's terminal event.
    pub async fn submit(&mut self, command: Command) -> Result<(), KernelError> {
        self.worker
            .handle_via_pipeline(command, self.ctx.clone())
            .await
    }
}

pub struct KernelWorker {
    inner: Arc<KernelInner>,
    engine: Option<Box<dyn LanguageEngine>>,
}

impl KernelWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<QueuedCommand>) {
        while let Some(queued) = rx.recv().await {
            self.process(queued).await;
        }
        debug!(kernel = %self.inner.name, "kernel worker stopped");
    }

    async fn process(&mut self, queued: QueuedCommand) {
        let QueuedCommand {
            command,
            sink,
            link,
        } = queued;
        debug!(kernel = %self.inner.name, command = command.kind.name(), "processing command");

        let busy = Event::unscoped(EventKind::KernelBusy);
        let _ = sink.send(busy.clone());
        let _ = self.inner.events_tx.send(busy);

        let sinks = vec![
            EventSink::Channel(sink.clone()),
            EventSink::Broadcast(self.inner.events_tx.clone()),
        ];
        let cancellation = link.cancellation.unwrap_or_default();
        let budget = link.budget;
        let root = command.clone();
        let worker = &mut *self;
        InvocationContext::run_linked(command.clone(), sinks, cancellation, budget, |ctx| {
            async move {
                *worker.inner.in_flight.lock() = Some(ctx.cancellation_token());
                worker.drain_deferred(&root, ctx.clone()).await;
                if !ctx.is_failed() {
                    if let Err(error) = worker.handle_via_pipeline(root, ctx.clone()).await {
                        ctx.fail(error.to_string());
                    }
                }
                *worker.inner.in_flight.lock() = None;
            }
        })
        .await;

        let idle = Event::unscoped(EventKind::KernelIdle);
        let _ = sink.send(idle.clone());
        let _ = self.inner.events_tx.send(idle);
    }

    /// Run pending deferred commands, in registration order, as pre-amble
    /// nested under the triggering command's context.
    async fn drain_deferred(&mut self, trigger: &Command, ctx: Arc<InvocationContext>) {
        loop {
            let deferred = self.inner.deferred.lock().pop_front();
            let Some(deferred) = deferred else { break };
            let nested = Command {
                parent_id: Some(trigger.id),
                ..deferred
            };
            debug!(kernel = %self.inner.name, "running deferred command");
            if let Err(error) = self.handle_via_pipeline(nested, ctx.clone()).await {
                ctx.fail(error.to_string());
                break;
            }
        }
    }

    pub(crate) async fn handle_via_pipeline(
        &mut self,
        command: Command,
        ctx: Arc<InvocationContext>,
    ) -> Result<(), KernelError> {
        let chain: Arc<[Arc<dyn KernelMiddleware>]> =
            self.inner.middleware.read().clone().into();
        Next::start(self, chain).run(command, ctx).await
    }

    /// Terminal handling at the end of the middleware pipeline.
    pub(crate) fn handle_command<'a>(
        &'a mut self,
        command: Command,
        ctx: Arc<InvocationContext>,
    ) -> BoxFuture<'a, Result<(), KernelError>> {
        Box::pin(async move {
            if let Some((child, routed)) = self.resolve_route(&command, &ctx)? {
                return self.forward_to_child(child, routed, ctx).await;
            }
            match command.kind.clone() {
                CommandKind::SubmitCode { code } => {
                    self.handle_submit_code(command, code, ctx).await
                }
                CommandKind::RequestCompletion {
                    code,
                    cursor_position,
                } => {
                    let engine = self.local_engine()?;
                    let completions = engine.completions(&code, cursor_position).await;
                    ctx.publish(EventKind::CompletionProduced { completions }, &command);
                    Ok(())
                }
                CommandKind::RequestSignatureHelp {
                    code,
                    cursor_position,
                } => {
                    let engine = self.local_engine()?;
                    let signatures = engine.signature_help(&code, cursor_position).await;
                    ctx.publish(EventKind::SignatureHelpProduced { signatures }, &command);
                    Ok(())
                }
                // Intercepted in `Kernel::send`; reaching here means there
                // was nothing in flight to cancel.
                CommandKind::CancelCurrentCommand => Ok(()),
                CommandKind::LoadExtensionsInDirectory { directory } => {
                    self.handle_load_extensions(command, directory, ctx).await
                }
                CommandKind::AddPackage { name, version } => {
                    self.handle_add_package(command, name, version, ctx).await
                }
                CommandKind::Quit => Ok(()),
            }
        })
    }

    fn local_engine(&mut self) -> Result<&mut Box<dyn LanguageEngine>, KernelError> {
        let name = self.inner.name.clone();
        self.engine
            .as_mut()
            .ok_or(KernelError::NoHandlingKernel(name))
    }

    /// Resolve the handling kernel for a command, in priority order: explicit
    /// target name, `#kernel <name>` first-line directive, handling kernel
    /// set by middleware, configured default child.
    fn resolve_route(
        &self,
        command: &Command,
        ctx: &Arc<InvocationContext>,
    ) -> Result<Option<(Kernel, Command)>, KernelError> {
        let kernel = Kernel::from_inner(self.inner.clone());
        if !kernel.is_composite() {
            return Ok(None);
        }

        if let Some(target) = &command.target_kernel {
            if *target != self.inner.name {
                let child = kernel
                    .child(target)
                    .ok_or_else(|| KernelError::UnknownChildKernel(target.clone()))?;
                let mut routed = command.clone();
                routed.target_kernel = None;
                return Ok(Some((child, routed)));
            }
        }

        if let CommandKind::SubmitCode { code } = &command.kind {
            if let Some((name, remainder)) = parse_kernel_directive(code) {
                let child = kernel
                    .child(&name)
                    .ok_or(KernelError::UnknownChildKernel(name))?;
                let routed = command.derive(CommandKind::SubmitCode { code: remainder });
                return Ok(Some((child, routed)));
            }
        }

        if let Some(name) = ctx.handling_kernel() {
            if name != self.inner.name {
                let child = kernel
                    .child(&name)
                    .ok_or(KernelError::UnknownChildKernel(name))?;
                return Ok(Some((child, command.clone())));
            }
        }

        if let Some(name) = kernel.default_child() {
            let child = kernel
                .child(&name)
                .ok_or(KernelError::UnknownChildKernel(name))?;
            return Ok(Some((child, command.clone())));
        }

        if self.engine.is_some() {
            Ok(None)
        } else {
            Err(KernelError::NoHandlingKernel(self.inner.name.clone()))
        }
    }

    /// Forward a routed command to a child and re-publish its events upward.
    ///
    /// The child's terminal event for the routed command is folded into this
    /// kernel's own outcome (exactly one terminal per root command); the
    /// child's busy/idle status is likewise subsumed by this kernel's own.
    async fn forward_to_child(
        &mut self,
        child: Kernel,
        routed: Command,
        ctx: Arc<InvocationContext>,
    ) -> Result<(), KernelError> {
        debug!(kernel = %self.inner.name, child = child.name(), "routing command to child");
        let root_id = routed.id;
        let mut stream = child.send_linked(routed, ContextLink::from_parent(&ctx))?;
        let mut failure: Option<String> = None;
        while let Some(event) = stream.recv().await {
            match &event.kind {
                EventKind::KernelBusy | EventKind::KernelIdle => {}
                EventKind::CommandHandled if event.command_id() == Some(root_id) => {}
                EventKind::CommandFailed { message } if event.command_id() == Some(root_id) => {
                    failure = Some(message.clone());
                }
                _ => ctx.publish_event(event),
            }
        }
        match failure {
            Some(message) => Err(KernelError::ChildFailed {
                kernel: child.name().to_string(),
                message,
            }),
            None => Ok(()),
        }
    }

    async fn handle_submit_code(
        &mut self,
        command: Command,
        code: String,
        ctx: Arc<InvocationContext>,
    ) -> Result<(), KernelError> {
        ctx.publish(
            EventKind::CodeSubmissionReceived { code: code.clone() },
            &command,
        );

        let (directives, remainder) = {
            let registry = self.inner.directives.read();
            split_leading_directives(&code, |token| registry.contains(token))
        };

        for line in directives {
            let handler = self.inner.directives.read().get(&line.name);
            let Some(handler) = handler else { continue };
            let nested = Command::nested(
                CommandKind::SubmitCode {
                    code: format!("{} {}", line.name, line.arguments).trim().to_string(),
                },
                &command,
            );
            let invocation = DirectiveInvocation {
                name: line.name,
                arguments: line.arguments,
                command: nested,
            };
            let mut scope = KernelScope {
                worker: self,
                ctx: ctx.clone(),
            };
            handler.handle(invocation, &mut scope).await?;
        }

        if remainder.trim().is_empty() {
            return Ok(());
        }

        let engine = self.local_engine()?;
        if !engine.is_complete(&remainder) {
            ctx.publish(
                EventKind::IncompleteCodeSubmissionReceived { code: remainder },
                &command,
            );
            return Ok(());
        }
        ctx.publish(
            EventKind::CompleteCodeSubmissionReceived {
                code: remainder.clone(),
            },
            &command,
        );

        if let Some(active) = ctx.budget() {
            active.record(budget::EXECUTION_STARTED);
        }

        let output = ExecutionOutput::new(ctx.clone(), command.clone());
        match engine.execute(&remainder, &output).await {
            Ok(Some(value)) => {
                ctx.publish(EventKind::ReturnValueProduced { value }, &command);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(_) if ctx.cancellation_token().is_cancelled() => Err(KernelError::Cancelled),
            Err(error) => Err(KernelError::Execution(error)),
        }
    }

    async fn handle_load_extensions(
        &mut self,
        command: Command,
        directory: PathBuf,
        ctx: Arc<InvocationContext>,
    ) -> Result<(), KernelError> {
        let discovery = self
            .inner
            .extension_discovery
            .read()
            .clone()
            .ok_or_else(|| KernelError::NoExtensionDiscovery(self.inner.name.clone()))?;
        let discovered = discovery
            .discover(&directory)
            .await
            .map_err(|e| KernelError::ExtensionDiscoveryFailed(format!("{e:#}")))?;
        info!(kernel = %self.inner.name, directory = %directory.display(), count = discovered.len(), "loading extensions");

        for found in discovered {
            let mut scope = KernelScope {
                worker: self,
                ctx: ctx.clone(),
            };
            match found.extension.on_load(&mut scope).await {
                Ok(()) => {
                    ctx.publish(EventKind::ExtensionLoaded { path: found.path }, &command);
                }
                Err(error) => {
                    warn!(path = %found.path.display(), "extension failed to load: {error:#}");
                    ctx.publish(
                        EventKind::ExtensionLoadFailed {
                            path: found.path,
                            message: format!("{error:#}"),
                        },
                        &command,
                    );
                }
            }
        }
        Ok(())
    }

    async fn handle_add_package(
        &mut self,
        command: Command,
        name: String,
        version: Option<String>,
        ctx: Arc<InvocationContext>,
    ) -> Result<(), KernelError> {
        let packages = self
            .inner
            .packages
            .read()
            .clone()
            .ok_or_else(|| KernelError::NoPackageRestore(self.inner.name.clone()))?;

        if !packages.add_package_reference(&name, version.as_deref()) {
            let existing = packages
                .requested_version(&name)
                .flatten()
                .unwrap_or_else(|| "latest".to_string());
            return Err(KernelError::PackageVersionConflict {
                name,
                existing,
                requested: version.unwrap_or_else(|| "latest".to_string()),
            });
        }

        let result = packages.restore().await;
        if !result.succeeded {
            return Err(KernelError::RestoreFailed(result.errors.join("; ")));
        }
        let resolved = packages
            .resolved_package_reference(&name)
            .map_err(|e| KernelError::RestoreFailed(e.to_string()))?;
        ctx.publish(
            EventKind::PackageAdded {
                name: resolved.name,
                version: resolved.version,
            },
            &command,
        );
        Ok(())
    }
}

/// Parse a leading `#kernel <name>` routing directive, returning the child
/// name and the remainder of the submission.
fn parse_kernel_directive(code: &str) -> Option<(String, String)> {
    let mut lines = code.lines();
    let first = lines.find(|line| !line.trim().is_empty())?;
    let mut tokens = first.trim().split_whitespace();
    if tokens.next()? != KERNEL_DIRECTIVE {
        return None;
    }
    let name = tokens.next()?.to_string();
    let start = code.find(first.trim())? + first.trim().len();
    let remainder = code[start..].trim_start_matches(['\r', '\n']).to_string();
    Some((name, remainder))
}

#[cfg(test)]
#[path = "kernel_tests.rs"]
mod tests;
