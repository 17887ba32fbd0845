//! # Integration Scenarios
//!
//! Every test here runs several full dispatcher cores against one
//! loopback hub and observes only public manager APIs.

pub mod calls;
pub mod mesh;
pub mod objects;
pub mod state;
