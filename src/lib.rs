//! # dbramp
//!
//! Ramp-and-supervise load generator for multi-tenant database backends.
//!
//! Provisions independent tenants (each its own schema instance) at a
//! controlled rate and drives a fixed menu of read/write operations against
//! every tenant on an independent schedule, recording per-operation latency
//! and error metrics through the OTel meter API.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod telemetry;
