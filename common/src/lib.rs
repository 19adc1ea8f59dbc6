//! Provides types and functions shared by the load generator operator binaries.
#![deny(missing_docs)]
#[cfg(feature = "telemetry")]
pub mod telemetry;
