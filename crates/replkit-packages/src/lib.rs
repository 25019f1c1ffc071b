//! # Replkit Packages
//!
//! Package restore for a live execution environment: a
//! [`PackageRestoreContext`] tracks requested package references, enforces
//! the single-version-per-package invariant, and drives a pluggable
//! [`PackageRestorer`] to resolve the full requested set into loadable
//! assembly paths. Designed for repeated incremental calls against one
//! evolving environment.

pub mod error;
pub mod reference;
pub mod restore;
pub mod trigger;

pub use error::PackageError;
pub use reference::{PackageReference, ResolvedPackageReference};
pub use restore::{DirectoryRestorer, PackageRestoreContext, PackageRestorer, RestoreResult};
pub use trigger::CoalescingTrigger;
