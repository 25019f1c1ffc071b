//! Execution budgets.
//!
//! A [`Budget`] is a deadline tracked across one command's handling, with
//! named checkpoints recorded along the way. When the budget expires, the
//! presence or absence of the [`EXECUTION_STARTED`] checkpoint tells whether
//! expiry happened before user code started (an upstream-timeout class of
//! failure) or during user code execution (an expectation-failed class).

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use replkit_protocols::Command;
use tracing::debug;

use crate::context::InvocationContext;
use crate::error::KernelError;
use crate::middleware::{KernelMiddleware, Next};

/// Checkpoint recorded immediately before user code begins executing.
pub const EXECUTION_STARTED: &str = "execution-started";

/// Which phase of handling a budget expired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetPhase {
    /// The budget expired before user code started.
    BeforeExecution,
    /// The budget expired while user code was executing.
    DuringExecution,
}

impl fmt::Display for BudgetPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetPhase::BeforeExecution => write!(f, "before user code started"),
            BudgetPhase::DuringExecution => write!(f, "during user code execution"),
        }
    }
}

/// A deadline allowance with named checkpoints.
pub struct Budget {
    started: Instant,
    duration: Duration,
    checkpoints: Mutex<Vec<(String, Duration)>>,
}

impl Budget {
    /// Create a budget expiring `duration` from now.
    pub fn new(duration: Duration) -> Self {
        Self {
            started: Instant::now(),
            duration,
            checkpoints: Mutex::new(Vec::new()),
        }
    }

    /// Record a named checkpoint at the current instant.
    pub fn record(&self, name: impl Into<String>) {
        let name = name.into();
        debug!(checkpoint = %name, "budget checkpoint recorded");
        self.checkpoints.lock().push((name, self.started.elapsed()));
    }

    /// Whether a checkpoint with this name has been recorded.
    pub fn has_checkpoint(&self, name: &str) -> bool {
        self.checkpoints.lock().iter().any(|(n, _)| n == name)
    }

    /// Time left before expiry, zero once exceeded.
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.started.elapsed())
    }

    /// Whether the allowance has been used up.
    pub fn is_exceeded(&self) -> bool {
        self.started.elapsed() >= self.duration
    }

    /// Classify an expiry by whether user code had started.
    pub fn expiry_phase(&self) -> BudgetPhase {
        if self.has_checkpoint(EXECUTION_STARTED) {
            BudgetPhase::DuringExecution
        } else {
            BudgetPhase::BeforeExecution
        }
    }
}

/// Middleware enforcing a per-command budget over the rest of the pipeline.
pub struct BudgetMiddleware {
    duration: Duration,
}

impl BudgetMiddleware {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl KernelMiddleware for BudgetMiddleware {
    async fn handle(
        &self,
        command: Command,
        ctx: Arc<InvocationContext>,
        next: Next<'_>,
    ) -> Result<(), KernelError> {
        let budget = Arc::new(Budget::new(self.duration));
        // First budget wins so nested submissions share the root allowance.
        ctx.set_budget(budget.clone());
        let budget = ctx.budget().unwrap_or(budget);
        match tokio::time::timeout(budget.remaining(), next.run(command, ctx.clone())).await {
            Ok(result) => result,
            Err(_) => Err(KernelError::BudgetExceeded {
                phase: budget.expiry_phase(),
            }),
        }
    }
}
