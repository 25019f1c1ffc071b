//! Package restore errors.
//!
//! Restore failures and version conflicts are expected, caller-checkable
//! conditions and travel as result values; the errors here cover asking for
//! state that does not exist yet.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Package '{0}' has not been restored; call restore() first")]
    NotRestored(String),
}
