//! Kernel-level errors.
//!
//! Errors arising from executing untrusted or external content are converted
//! into `CommandFailed` events by the worker; the variants here that surface
//! synchronously (`InvalidDirectiveName`, registration conflicts) are genuine
//! caller mistakes.

use thiserror::Error;

use crate::budget::BudgetPhase;

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Directive name must start with '#' or '%': {0}")]
    InvalidDirectiveName(String),

    #[error("Directive already registered: {0}")]
    DuplicateDirective(String),

    #[error("Child kernel already added: {0}")]
    DuplicateChildKernel(String),

    #[error("No child kernel named: {0}")]
    UnknownChildKernel(String),

    #[error("Kernel '{0}' has no engine and no child kernel was resolved for the command")]
    NoHandlingKernel(String),

    #[error("Kernel '{0}' is shut down")]
    KernelShutDown(String),

    #[error("Child kernel '{kernel}' failed: {message}")]
    ChildFailed { kernel: String, message: String },

    #[error("The command was cancelled")]
    Cancelled,

    #[error("Budget exceeded {phase}")]
    BudgetExceeded { phase: BudgetPhase },

    #[error("Package '{name}' is already added at version {existing}; cannot re-add at {requested}")]
    PackageVersionConflict {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("Package restore failed: {0}")]
    RestoreFailed(String),

    #[error("No package restore context is configured on kernel '{0}'")]
    NoPackageRestore(String),

    #[error("No extension discovery is configured on kernel '{0}'")]
    NoExtensionDiscovery(String),

    #[error("Extension discovery failed: {0}")]
    ExtensionDiscoveryFailed(String),

    #[error("{0:#}")]
    Execution(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn test_execution_error_concatenates_cause_chain() {
        let inner = anyhow!("index out of range");
        let outer = Err::<(), _>(inner)
            .context("evaluating expression")
            .unwrap_err();
        let display = KernelError::Execution(outer).to_string();
        assert!(display.contains("evaluating expression"));
        assert!(display.contains("index out of range"));
    }

    #[test]
    fn test_budget_exceeded_phases_are_distinguishable() {
        let before = KernelError::BudgetExceeded {
            phase: BudgetPhase::BeforeExecution,
        }
        .to_string();
        let during = KernelError::BudgetExceeded {
            phase: BudgetPhase::DuringExecution,
        }
        .to_string();
        assert_ne!(before, during);
    }

    #[test]
    fn test_cancelled_is_distinct_from_timeout() {
        let cancelled = KernelError::Cancelled.to_string();
        assert!(cancelled.contains("cancelled"));
        assert!(!cancelled.contains("Budget"));
    }
}
