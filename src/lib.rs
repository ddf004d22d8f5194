//! Fencing operator
//!
//! Watches cluster nodes and fences the ones that become unreachable, so
//! workloads holding persistent volumes can be safely rescheduled.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod mechanism;
pub mod rest_api;
