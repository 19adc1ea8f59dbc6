//! A load generator is a pod, a service and an ingress that share one name and are created,
//! observed and deleted as a unit.
pub(crate) mod gateway;
pub(crate) mod manager;
pub(crate) mod objects;
pub(crate) mod resources;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{utils::Scope, Error};

pub use gateway::{ClusterGateway, KubeGateway};
pub use manager::Manager;
pub use resources::{Resource, ResourceOverride, ResourceOverrides, Resources};

#[cfg(test)]
pub use gateway::MockClusterGateway;

/// Run phase of a load generator, mirrored from its pod.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepted by the cluster but not all containers are running yet.
    Pending,
    /// Bound to a node with its container running.
    Running,
    /// Container exited successfully.
    Succeeded,
    /// Container exited with a failure.
    Failed,
    /// Phase could not be determined.
    #[default]
    Unknown,
}

impl Phase {
    /// Terminal phases never change again; generators in them are due for reclaiming.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }
}

impl From<Option<&str>> for Phase {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some("Pending") => Phase::Pending,
            Some("Running") => Phase::Running,
            Some("Succeeded") => Phase::Succeeded,
            Some("Failed") => Phase::Failed,
            _ => Phase::Unknown,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::Unknown => "Unknown",
        };
        f.write_str(phase)
    }
}

/// Read model of a load generator, synthesized from its pod and service on every read.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadGenerator {
    /// Name shared by the pod, service and ingress.
    pub name: String,
    /// Address of the service inside the cluster.
    pub cluster_ip: Option<String>,
    /// Address assigned by the load balancer, only when external exposure was requested.
    pub external_ip: Option<String>,
    /// Port advertised by the service and the container.
    pub port: Option<i32>,
    /// Phase of the pod.
    pub status: Phase,
    /// Creation time of the pod.
    pub created_at: Option<DateTime<Utc>>,
}

/// Environment variable injected into the load generator container.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    #[serde(alias = "val")]
    pub value: String,
}

/// Caller supplied description of a load generator to create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreationSpec {
    /// Container image reference.
    pub image: String,
    /// Overrides merged field by field over the configured defaults.
    pub resources: ResourceOverrides,
    /// Environment of the container, in order.
    pub env: Vec<EnvVar>,
    /// Replacement for the container entrypoint.
    pub commands: Vec<String>,
    /// Wait for the load balancer to assign an external address.
    pub expose_external_ip: bool,
}

/// Define the lifecycle operations consumed by the dispatch service and the reclaimers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeneratorManager: Send + Sync {
    /// Create a load generator and wait for it to run.
    ///
    /// The caller's scope bounds the waits; cleanup after a failure runs outside of it.
    async fn create(&self, scope: &Scope, spec: CreationSpec) -> Result<LoadGenerator, Error>;
    /// List every load generator carrying the ownership label.
    async fn list(&self) -> Result<Vec<LoadGenerator>, Error>;
    /// Delete the pod, service and ingress of one load generator.
    async fn delete(&self, name: &str) -> Result<(), Error>;
    /// Delete every object carrying the ownership label.
    async fn delete_all(&self) -> Result<(), Error>;
}
