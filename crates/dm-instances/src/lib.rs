//! # Instance Manager
//!
//! Distributed object instances built on the rpc layer through two
//! naming-convention service families:
//!
//! - `construct:<type>` — registered per constructor type; de-duplicates
//!   concurrent creation of the same identifier by parameter hash,
//! - `destruct:<identifier>` — registered per live instance; pops the
//!   requester from the instance's user list and disposes at zero.
//!
//! Each live instance additionally exposes `call:<identifier>` for method
//! dispatch. Consumers get an [`InstanceClient`] proxy that forwards
//! methods over rpc and reads mirrored properties from the data engine.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod host;
pub mod manager;
pub mod wrapper;

// Re-export main types
pub use host::{InstanceFactory, InstanceHost};
pub use manager::InstanceManager;
pub use wrapper::{GenericWrapper, InstanceClient, WrapperGenerator, WrapperParts};
