//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod notion;
pub mod telemetry;
