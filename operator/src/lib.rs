//! Provisions, tracks and reclaims ephemeral load generators on a Kubernetes cluster.
#![warn(missing_docs)]

pub mod error;
pub mod generator;
pub(crate) mod labels;
pub mod reclaimer;
pub mod service;
pub mod settings;
pub mod utils;

pub use error::{Error, MultiError};
