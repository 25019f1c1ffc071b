//! # Replkit Client
//!
//! Line-delimited JSON transport for kernels: one JSON object per line,
//! commands inbound, events outbound, correlated by a caller-chosen id.
//!
//! [`serve`] runs the kernel side of the protocol over any async
//! reader/writer pair (stdio in the shipped binary). [`KernelClient`] is the
//! caller side: it writes command lines and collects each command's event
//! lines up to the terminal event.

pub mod client;
pub mod error;
pub mod server;

pub use client::KernelClient;
pub use error::ClientError;
pub use server::serve;
