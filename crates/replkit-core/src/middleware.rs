//! Middleware pipeline.
//!
//! Middleware form an ordered chain of interceptors invoked with
//! `(command, context, next)`. Each interceptor may inspect or replace the
//! command, publish events, set the handling kernel on the context, delegate
//! to the rest of the chain via [`Next::run`], or short-circuit by not
//! calling it. The end of the chain is the kernel's own command handling.

use std::sync::Arc;

use async_trait::async_trait;
use replkit_protocols::Command;

use crate::context::InvocationContext;
use crate::error::KernelError;
use crate::kernel::KernelWorker;

/// An interceptor in a kernel's command pipeline.
#[async_trait]
pub trait KernelMiddleware: Send + Sync + 'static {
    async fn handle(
        &self,
        command: Command,
        ctx: Arc<InvocationContext>,
        next: Next<'_>,
    ) -> Result<(), KernelError>;
}

/// The remainder of the pipeline after the current interceptor.
pub struct Next<'a> {
    worker: &'a mut KernelWorker,
    chain: Arc<[Arc<dyn KernelMiddleware>]>,
    index: usize,
}

impl<'a> Next<'a> {
    pub(crate) fn start(worker: &'a mut KernelWorker, chain: Arc<[Arc<dyn KernelMiddleware>]>) -> Self {
        Self {
            worker,
            chain,
            index: 0,
        }
    }

    /// Invoke the rest of the chain, ending at the kernel's own handling.
    pub async fn run(
        self,
        command: Command,
        ctx: Arc<InvocationContext>,
    ) -> Result<(), KernelError> {
        if self.index < self.chain.len() {
            let middleware = self.chain[self.index].clone();
            let next = Next {
                worker: self.worker,
                chain: self.chain.clone(),
                index: self.index + 1,
            };
            middleware.handle(command, ctx, next).await
        } else {
            self.worker.handle_command(command, ctx).await
        }
    }
}
