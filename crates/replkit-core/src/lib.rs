//! # Replkit Core
//!
//! Kernel base, composite routing, and the command/event pipeline.
//!
//! A [`Kernel`] serializes command handling on a single worker, pushes each
//! command through a middleware pipeline inside an established
//! [`InvocationContext`], dispatches directives, and publishes the events
//! handling produces. A [`CompositeKernel`] routes commands among named
//! child kernels and re-publishes their events upward.

pub mod budget;
pub mod calc;
pub mod composite;
pub mod context;
pub mod directive;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod kernel;
pub mod middleware;

pub use budget::{Budget, BudgetMiddleware, BudgetPhase, EXECUTION_STARTED};
pub use calc::CalcEngine;
pub use composite::CompositeKernel;
pub use context::{EventSink, InvocationContext};
pub use directive::{DirectiveHandler, DirectiveInvocation, DirectiveRegistry};
pub use engine::{ExecutionOutput, LanguageEngine};
pub use error::{KernelError, KernelResult};
pub use extensions::{DiscoveredExtension, ExtensionDiscovery, KernelExtension, StaticDiscovery};
pub use kernel::{EventStream, KERNEL_DIRECTIVE, Kernel, KernelScope};
pub use middleware::{KernelMiddleware, Next};
