//! Errors produced while provisioning and reclaiming load generators.
use std::fmt;

use crate::{generator::Phase, utils::Interrupted};

/// Kind of cluster object a step operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// The compute unit of a load generator.
    Pod,
    /// The network-service endpoint of a load generator.
    Service,
    /// The ingress route of a load generator.
    Ingress,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Pod => write!(f, "pod"),
            Kind::Service => write!(f, "service"),
            Kind::Ingress => write!(f, "ingress"),
        }
    }
}

/// A single cluster API call, used to identify which step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Create the named object.
    Create(Kind, String),
    /// Fetch the named object.
    Get(Kind, String),
    /// List objects matching the ownership label.
    List(Kind),
    /// Delete the named object.
    Delete(Kind, String),
    /// Delete all objects matching the ownership label.
    DeleteCollection(Kind),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Create(kind, name) => write!(f, "create {kind} {name}"),
            Step::Get(kind, name) => write!(f, "get {kind} {name}"),
            Step::List(kind) => write!(f, "list {kind}s"),
            Step::Delete(kind, name) => write!(f, "delete {kind} {name}"),
            Step::DeleteCollection(kind) => write!(f, "delete collection of {kind}s"),
        }
    }
}

/// Errors produced by the operator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration key is missing or has the wrong type.
    #[error("fail to define {key}: {source}")]
    Config {
        /// Configuration key that failed to resolve.
        key: &'static str,
        /// Underlying resolution error.
        #[source]
        source: ::config::ConfigError,
    },
    /// A configured duration could not be parsed.
    #[error("fail to parse {key} {value:?}: {reason}")]
    Duration {
        /// Configuration key holding the duration.
        key: &'static str,
        /// Raw configured value.
        value: String,
        /// Why parsing failed.
        reason: String,
    },
    /// Caller supplied input that can never succeed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A cluster API call failed.
    #[error("failed to {step}: {source}")]
    Kube {
        /// The call that failed.
        step: Step,
        /// Underlying client error.
        #[source]
        source: kube::Error,
    },
    /// A cluster API call did not complete before its scope ended.
    #[error("failed to {step}: {reason}")]
    StepInterrupted {
        /// The call that was interrupted.
        step: Step,
        /// Why the call was interrupted.
        reason: Interrupted,
    },
    /// The pod did not reach the running phase before the creation scope ended.
    #[error("pod {name} is not running ({reason}); pod will be deleted, last status: {last_phase}")]
    NotReady {
        /// Name of the load generator.
        name: String,
        /// Last phase observed for the pod.
        last_phase: Phase,
        /// Why polling stopped.
        reason: Interrupted,
    },
    /// The service never reported an external address.
    #[error("the number of attempts to obtain an external address for {name} has expired after {attempts} attempts")]
    NoExternalAddress {
        /// Name of the load generator.
        name: String,
        /// Number of attempts made.
        attempts: usize,
    },
    /// A wait was interrupted before it completed.
    #[error("{operation} interrupted: {reason}")]
    Interrupted {
        /// What was being waited on.
        operation: String,
        /// Why the wait stopped.
        reason: Interrupted,
    },
    /// A long running loop was cancelled.
    #[error("cancelled")]
    Cancelled,
    /// Several independent failures.
    #[error(transparent)]
    Multi(#[from] MultiError),
}

impl Error {
    /// Combine independent results into a single result, keeping every failure.
    ///
    /// No failures yields `Ok(())`, a single failure is returned as is and anything more is
    /// wrapped in [`Error::Multi`].
    pub fn combine(results: impl IntoIterator<Item = Result<(), Error>>) -> Result<(), Error> {
        let mut errors: Vec<Error> = results.into_iter().filter_map(Result::err).collect();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multi(MultiError(errors))),
        }
    }

    /// Report whether the error was caused by caller input rather than the cluster.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    /// Iterate over every underlying failure, flattening aggregated errors.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &Error> + '_> {
        match self {
            Error::Multi(multi) => Box::new(multi.0.iter().flat_map(Error::iter)),
            err => Box::new(std::iter::once(err)),
        }
    }
}

/// Ordered collection of independent failures.
#[derive(Debug)]
pub struct MultiError(pub Vec<Error>);

impl MultiError {
    /// Underlying errors in the order they were collected.
    pub fn errors(&self) -> &[Error] {
        &self.0
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
