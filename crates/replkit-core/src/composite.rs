//! Composite kernel.
//!
//! A [`CompositeKernel`] owns named child kernels and routes every incoming
//! command to exactly one of them: by explicit target name, by a leading
//! `#kernel <name>` directive, by a handling kernel chosen by middleware, or
//! by the configured default child. Events published by any descendant are
//! re-published on the composite's own stream, preserving each descendant's
//! FIFO order.

use std::sync::Arc;

use replkit_protocols::{Command, Event};
use tokio::sync::broadcast;

use crate::directive::DirectiveHandler;
use crate::error::KernelResult;
use crate::kernel::{EventStream, Kernel};
use crate::middleware::KernelMiddleware;

pub struct CompositeKernel {
    kernel: Kernel,
}

impl CompositeKernel {
    /// Create a composite kernel with no children.
    ///
    /// Commands fail with a routing error until a child is added.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            kernel: Kernel::build(name.into(), None),
        }
    }

    pub fn name(&self) -> &str {
        self.kernel.name()
    }

    /// The underlying kernel handle.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Add a child kernel. Child names must be unique; the first child added
    /// becomes the default route.
    pub fn add(&self, child: Kernel) -> KernelResult<()> {
        self.kernel.add_child(child)
    }

    /// Change the default route to the named child.
    pub fn set_default(&self, name: impl Into<String>) -> KernelResult<()> {
        self.kernel.set_default_child(name)
    }

    pub fn default_child(&self) -> Option<String> {
        self.kernel.default_child()
    }

    pub fn send(&self, command: Command) -> KernelResult<EventStream> {
        self.kernel.send(command)
    }

    pub async fn send_and_collect(&self, command: Command) -> KernelResult<Vec<Event>> {
        self.kernel.send_and_collect(command).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.kernel.subscribe()
    }

    pub fn add_middleware(&self, middleware: Arc<dyn KernelMiddleware>) {
        self.kernel.add_middleware(middleware);
    }

    pub fn register_directive(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn DirectiveHandler>,
    ) -> KernelResult<()> {
        self.kernel.register_directive(name, handler)
    }

    pub fn defer_command(&self, command: Command) {
        self.kernel.defer_command(command);
    }

    /// Apply `visitor` to each direct child; with `recursive`, also descend
    /// into composite children, depth-first, child before grandchildren.
    pub fn visit_subkernels(&self, visitor: &mut dyn FnMut(&Kernel), recursive: bool) {
        self.kernel.visit_subkernels(visitor, recursive);
    }
}

#[cfg(test)]
#[path = "composite_tests.rs"]
mod tests;
