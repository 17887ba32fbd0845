//! # Publish/Subscribe Engine
//!
//! Routes a value published on topic `P` to every subscriber whose pattern
//! matches `P`, with hierarchical forwarding:
//!
//! - `forward_child_data`: a subscriber on `a/b` also receives updates
//!   published on `a/b/c`, projected as `{"c": value}`.
//! - `forward_parent_data`: a subscriber on `a/b/c` also receives updates
//!   published on `a/b`, projected by extracting the `c` field (null if
//!   absent).
//!
//! Patterns use broker-style wildcards: `+` matches exactly one segment,
//! `#` matches the remainder and must be the final segment.
//!
//! Two engine variants exist: [`PubSubEngine`] for events, and
//! [`DataEngine`] which additionally retains last-known values and supports
//! pull/push.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod data;
pub mod engine;
pub mod topic;

// Re-export main types
pub use data::DataEngine;
pub use engine::{PubSubEngine, RegisterMode, RegisterOptions, TopicHandle};
pub use topic::{match_topics, MatchKind, TopicError, TopicFilter, TopicPath};

/// Default channel capacity for the engine's outgoing (to-wire) feed.
pub const OUTGOING_CHANNEL_CAPACITY: usize = 1024;
