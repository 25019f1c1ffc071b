//! # Replkit Protocols
//!
//! Command and event definitions for the replkit kernel framework.
//! Contains only value types and wire envelopes - no kernel logic.
//!
//! ## Core Types
//!
//! - [`Command`] - A unit of work submitted to a kernel
//! - [`Event`] - An observable occurrence caused by handling a command
//! - [`CommandEnvelope`] / [`EventEnvelope`] - Line-delimited wire framing

pub mod command;
pub mod error;
pub mod event;
pub mod wire;

pub use command::{Command, CommandKind};
pub use error::ProtocolError;
pub use event::{CompletionItem, Event, EventKind};
pub use wire::{CommandEnvelope, EventEnvelope};
