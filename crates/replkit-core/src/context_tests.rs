use std::sync::Arc;
use std::time::Duration;

use replkit_protocols::{Command, Event, EventKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{EventSink, InvocationContext};
use crate::budget::Budget;

fn collect(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_outermost_establishment_publishes_exactly_one_terminal() {
    let command = Command::submit_code("123");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (ctx, ()) = InvocationContext::run_scoped(
        command.clone(),
        vec![EventSink::Channel(tx)],
        |ctx| async move {
            ctx.publish(
                EventKind::CodeSubmissionReceived {
                    code: "123".to_string(),
                },
                ctx.command(),
            );
        },
    )
    .await;

    assert!(ctx.is_complete());
    let events = collect(&mut rx);
    let terminals: Vec<_> = events.iter().filter(|e| e.kind.is_terminal()).collect();
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].kind, EventKind::CommandHandled);
    assert!(events.last().unwrap().kind.is_terminal());
    assert_eq!(events.last().unwrap().command_id(), Some(command.id));
}

#[tokio::test]
async fn test_nested_establishment_reuses_context_and_defers_terminal() {
    let root = Command::submit_code("outer");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (ctx, ()) =
        InvocationContext::run_scoped(root.clone(), vec![EventSink::Channel(tx)], |outer| {
            let nested_cmd = Command::submit_code("inner");
            async move {
                let (inner, ()) =
                    InvocationContext::run_scoped(nested_cmd, Vec::new(), |inner| async move {
                        assert!(!inner.is_complete());
                    })
                    .await;
                // Re-establishing on the same flow must not fork identity.
                assert!(Arc::ptr_eq(&outer, &inner));
                assert!(!inner.is_complete());
            }
        })
        .await;

    assert_eq!(ctx.command().id, root.id);
    let events = collect(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::CommandHandled);
}

#[tokio::test]
async fn test_concurrent_flows_observe_distinct_contexts() {
    async fn flow(code: &'static str) -> String {
        let (ctx, observed_own_context) = InvocationContext::run_scoped(
            Command::submit_code(code),
            Vec::new(),
            |ctx| async move {
                // Yield so the two flows interleave.
                tokio::task::yield_now().await;
                let current = InvocationContext::current().unwrap();
                Arc::ptr_eq(&current, &ctx)
            },
        )
        .await;
        assert!(observed_own_context);
        ctx.command().code().unwrap().to_string()
    }
    let (a, b) = tokio::join!(tokio::spawn(flow("a")), tokio::spawn(flow("b")));
    assert_eq!(a.unwrap(), "a");
    assert_eq!(b.unwrap(), "b");
}

#[tokio::test]
async fn test_failure_wins_over_later_success_and_first_failure_sticks() {
    let command = Command::submit_code("boom");
    let (ctx, ()) =
        InvocationContext::run_scoped(command.clone(), Vec::new(), |ctx| async move {
            ctx.fail("first");
            ctx.fail("second");
        })
        .await;
    let events = ctx.events();
    assert_eq!(
        events.last().unwrap().kind,
        EventKind::CommandFailed {
            message: "first".to_string()
        }
    );
}

#[tokio::test]
async fn test_late_subscriber_replays_ordered_sequence() {
    let command = Command::submit_code("1");
    let (ctx, ()) = InvocationContext::run_scoped(command.clone(), Vec::new(), |ctx| async move {
        ctx.publish(
            EventKind::StandardOutputValueProduced {
                value: "one".to_string(),
            },
            ctx.command(),
        );
        ctx.publish(
            EventKind::StandardOutputValueProduced {
                value: "two".to_string(),
            },
            ctx.command(),
        );
    })
    .await;

    // Completed contexts still replay their buffered sequence.
    let (tx, mut rx) = mpsc::unbounded_channel();
    ctx.add_sink(EventSink::Channel(tx));
    let replayed = collect(&mut rx);
    assert_eq!(replayed.len(), 3);
    assert!(matches!(
        replayed[0].kind,
        EventKind::StandardOutputValueProduced { .. }
    ));
    assert!(replayed[2].kind.is_terminal());
}

#[tokio::test]
async fn test_events_published_after_completion_are_dropped() {
    let command = Command::submit_code("1");
    let (ctx, ()) =
        InvocationContext::run_scoped(command.clone(), Vec::new(), |_| async {}).await;
    ctx.publish(EventKind::KernelBusy, &command);
    assert_eq!(ctx.events().len(), 1); // the terminal only
}

#[tokio::test]
async fn test_completion_signal_resolves() {
    let command = Command::submit_code("1");
    let (ctx, ()) = InvocationContext::run_scoped(command, Vec::new(), |_| async {}).await;
    // Must return immediately even when awaited after the fact.
    ctx.completion().await;
}

#[tokio::test]
async fn test_linked_context_shares_cancellation_and_budget() {
    let parent = CancellationToken::new();
    let child = parent.child_token();
    let budget = Arc::new(Budget::new(Duration::from_secs(5)));
    let (_ctx, ()) = InvocationContext::run_linked(
        Command::submit_code("1"),
        Vec::new(),
        child,
        Some(budget.clone()),
        |ctx| {
            let parent = parent.clone();
            async move {
                assert!(!ctx.cancellation_token().is_cancelled());
                parent.cancel();
                assert!(ctx.cancellation_token().is_cancelled());
                ctx.budget().unwrap().record("routed");
            }
        },
    )
    .await;
    assert!(budget.has_checkpoint("routed"));
}

#[tokio::test]
async fn test_handling_kernel_slot() {
    let command = Command::submit_code("1");
    let (ctx, ()) = InvocationContext::run_scoped(command, Vec::new(), |ctx| async move {
        assert!(ctx.handling_kernel().is_none());
        ctx.set_handling_kernel("calc");
        assert_eq!(ctx.handling_kernel().as_deref(), Some("calc"));
    })
    .await;
    assert_eq!(ctx.handling_kernel().as_deref(), Some("calc"));
}
