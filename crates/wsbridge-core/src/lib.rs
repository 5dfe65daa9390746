//! # wsbridge-core
//!
//! Shared vocabulary for the wsbridge crates:
//!
//! - **Branded IDs**: [`ids::ConnectionId`] as a newtype for type safety
//! - **Logging**: [`logging::init_subscriber`] for the process-wide `tracing` subscriber

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::ConnectionId;
