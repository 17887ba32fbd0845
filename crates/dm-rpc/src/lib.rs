//! # RPC Manager
//!
//! Service registry plus remote-call execution engine:
//!
//! - registers callable services and shares the full local list with the
//!   network (rebuilt per dispatcher, never diffed),
//! - resolves which peer should execute a call (selector strategies),
//! - tracks in-flight tasks and propagates timeouts and cancellation,
//! - executes inbound requests targeted at this dispatcher and answers
//!   with exactly one response.
//!
//! Cancellation is cooperative: cancelling a task guarantees only that the
//! *caller* stops waiting. The executing side is informed via a
//! cancellation broadcast and watches a per-task flag through its
//! [`CallContext`].

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod handler;
pub mod manager;
pub mod selector;

// Re-export main types
pub use handler::{service_fn, CallContext, ServiceHandler};
pub use manager::{RpcManager, ServiceHandle};
