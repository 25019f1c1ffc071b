//! Invocation context.
//!
//! An [`InvocationContext`] correlates one root command with every event it
//! (and any nested command) produces. It is propagated per logical async flow
//! through a task-local slot: re-establishing on the same flow returns the
//! existing context instead of forking identity, and only the outermost
//! establishment publishes the terminal `CommandHandled`/`CommandFailed`
//! event and resolves the completion signal.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use replkit_protocols::{Command, Event, EventKind};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::budget::Budget;

tokio::task_local! {
    static CURRENT_CONTEXT: Arc<InvocationContext>;
}

/// Where published events are delivered.
#[derive(Clone)]
pub enum EventSink {
    /// Per-command subscriber channel.
    Channel(mpsc::UnboundedSender<Event>),
    /// Kernel-wide broadcast stream.
    Broadcast(broadcast::Sender<Event>),
}

impl EventSink {
    pub(crate) fn deliver(&self, event: &Event) {
        match self {
            // Send failures mean the receiver went away; events are not load-bearing
            // for a departed subscriber.
            EventSink::Channel(tx) => {
                let _ = tx.send(event.clone());
            }
            EventSink::Broadcast(tx) => {
                let _ = tx.send(event.clone());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Pending,
    Failed(String),
}

struct ContextState {
    events: Vec<Event>,
    sinks: Vec<EventSink>,
    handling_kernel: Option<String>,
    outcome: Outcome,
    budget: Option<Arc<Budget>>,
    completed: bool,
}

/// Ambient per-flow state correlating a root command to its events.
pub struct InvocationContext {
    command: Command,
    state: Mutex<ContextState>,
    cancellation: CancellationToken,
    completion: watch::Sender<bool>,
}

impl InvocationContext {
    fn new(
        command: Command,
        cancellation: CancellationToken,
        budget: Option<Arc<Budget>>,
    ) -> Self {
        let (completion, _) = watch::channel(false);
        Self {
            command,
            state: Mutex::new(ContextState {
                events: Vec::new(),
                sinks: Vec::new(),
                handling_kernel: None,
                outcome: Outcome::Pending,
                budget,
                completed: false,
            }),
            cancellation,
            completion,
        }
    }

    /// The context current on this logical async flow, if any.
    pub fn current() -> Option<Arc<InvocationContext>> {
        CURRENT_CONTEXT.try_with(|ctx| ctx.clone()).ok()
    }

    /// Run `scope` with a context established for `command`.
    ///
    /// If a context is already current on this flow it is reused and left
    /// open; otherwise a fresh context becomes current for the duration of
    /// `scope` and is completed (terminal event published, completion signal
    /// resolved) when `scope` returns.
    pub async fn run_scoped<F, Fut, T>(
        command: Command,
        sinks: Vec<EventSink>,
        scope: F,
    ) -> (Arc<InvocationContext>, T)
    where
        F: FnOnce(Arc<InvocationContext>) -> Fut,
        Fut: Future<Output = T>,
    {
        Self::run_linked(command, sinks, CancellationToken::new(), None, scope).await
    }

    /// Like [`run_scoped`](Self::run_scoped), but the fresh context observes
    /// `cancellation` and counts against `budget`. Used when a composite
    /// routes a command to a child kernel, whose worker establishes a new
    /// context on its own task: cancelling or exhausting the parent must
    /// carry through to the child's handling.
    pub async fn run_linked<F, Fut, T>(
        command: Command,
        sinks: Vec<EventSink>,
        cancellation: CancellationToken,
        budget: Option<Arc<Budget>>,
        scope: F,
    ) -> (Arc<InvocationContext>, T)
    where
        F: FnOnce(Arc<InvocationContext>) -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(existing) = Self::current() {
            let out = scope(existing.clone()).await;
            return (existing, out);
        }
        let ctx = Arc::new(Self::new(command, cancellation, budget));
        for sink in sinks {
            ctx.add_sink(sink);
        }
        let out = CURRENT_CONTEXT.scope(ctx.clone(), scope(ctx.clone())).await;
        ctx.complete();
        (ctx, out)
    }

    /// The root command this context was established for.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Publish an event caused by `causing`.
    pub fn publish(&self, kind: EventKind, causing: &Command) {
        self.publish_event(Event::new(kind, causing.clone()));
    }

    /// Publish an already-built event (used when re-publishing child kernel
    /// events upward, preserving their original command attribution).
    pub fn publish_event(&self, event: Event) {
        let mut state = self.state.lock();
        if state.completed {
            debug!(event = event.kind.name(), "event dropped after context completion");
            return;
        }
        for sink in &state.sinks {
            sink.deliver(&event);
        }
        state.events.push(event);
    }

    /// Attach a sink; the ordered event sequence so far is replayed into it.
    pub fn add_sink(&self, sink: EventSink) {
        let mut state = self.state.lock();
        for event in &state.events {
            sink.deliver(event);
        }
        state.sinks.push(sink);
    }

    /// Snapshot of the ordered event sequence published so far.
    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    /// The kernel name middleware selected to handle the command, if any.
    pub fn handling_kernel(&self) -> Option<String> {
        self.state.lock().handling_kernel.clone()
    }

    /// Redirect routing to the named kernel.
    pub fn set_handling_kernel(&self, name: impl Into<String>) {
        self.state.lock().handling_kernel = Some(name.into());
    }

    /// Token cancelled when the in-flight command is cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Signal cancellation of this context's command.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Mark the root command as failed. The first failure wins; handling
    /// continues so recovery (or cleanup) can still publish events.
    pub fn fail(&self, message: impl Into<String>) {
        let mut state = self.state.lock();
        if state.outcome == Outcome::Pending {
            state.outcome = Outcome::Failed(message.into());
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state.lock().outcome, Outcome::Failed(_))
    }

    /// Attach a budget. The first budget wins so nested establishment shares
    /// the root allowance.
    pub fn set_budget(&self, budget: Arc<Budget>) {
        let mut state = self.state.lock();
        if state.budget.is_none() {
            state.budget = Some(budget);
        }
    }

    pub fn budget(&self) -> Option<Arc<Budget>> {
        self.state.lock().budget.clone()
    }

    /// Wait until the outermost establishment has completed.
    pub async fn completion(&self) {
        let mut rx = self.completion.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().completed
    }

    /// Publish the terminal event for the root command and resolve the
    /// completion signal. Idempotent; called by the outermost establishment.
    fn complete(&self) {
        let mut state = self.state.lock();
        if state.completed {
            return;
        }
        let terminal = match &state.outcome {
            Outcome::Pending => EventKind::CommandHandled,
            Outcome::Failed(message) => EventKind::CommandFailed {
                message: message.clone(),
            },
        };
        let event = Event::new(terminal, self.command.clone());
        for sink in &state.sinks {
            sink.deliver(&event);
        }
        state.events.push(event);
        state.completed = true;
        // Per-command subscriber channels close once the kernel worker drops
        // its own sender; keeping them here would hold streams open forever.
        state.sinks.clear();
        drop(state);
        // `send` drops the value when nobody subscribed yet; `send_replace`
        // stores it so after-the-fact waiters still resolve.
        self.completion.send_replace(true);
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
