use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::ObjectMeta;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{Kind, Step},
    generator::{
        objects, ClusterGateway, CreationSpec, GeneratorManager, LoadGenerator, Phase, Resources,
    },
    labels::{generator_labels, ownership_selector},
    settings::Settings,
    utils::Scope,
    Error,
};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const EXTERNAL_ADDRESS_ATTEMPTS: usize = 5;

/// Drives the pod, service and ingress of every load generator through a [`ClusterGateway`].
pub struct Manager<G> {
    gateway: Arc<G>,
    settings: Arc<Settings>,
    rollbacks: TaskTracker,
}

impl<G> Clone for Manager<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            settings: self.settings.clone(),
            rollbacks: self.rollbacks.clone(),
        }
    }
}

async fn step<T>(
    scope: &Scope,
    step: Step,
    call: impl Future<Output = Result<T, kube::Error>>,
) -> Result<T, Error> {
    match scope.run(call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(Error::Kube { step, source }),
        Err(reason) => Err(Error::StepInterrupted { step, reason }),
    }
}

impl<G: ClusterGateway + 'static> Manager<G> {
    /// Manager sharing the gateway and settings with its other users.
    pub fn new(gateway: Arc<G>, settings: Arc<Settings>) -> Self {
        Self {
            gateway,
            settings,
            rollbacks: TaskTracker::new(),
        }
    }

    /// Wait until every rollback spawned so far has finished.
    pub async fn wait_rollbacks(&self) {
        self.rollbacks.close();
        self.rollbacks.wait().await;
    }

    fn optional_timeout(&self, resolved: Result<Duration, Error>) -> Option<Duration> {
        match resolved {
            Ok(timeout) => Some(timeout),
            Err(err) => {
                warn!(%err, "proceeding without a timeout");
                None
            }
        }
    }

    /// Deletions never inherit a caller's scope so a short request cannot cut cleanup short.
    fn delete_scope(&self) -> Scope {
        Scope::detached().with_timeout(self.optional_timeout(self.settings.delete_timeout()))
    }

    async fn provision(
        &self,
        scope: &Scope,
        metadata: ObjectMeta,
        name: &str,
        port: i32,
        spec: CreationSpec,
        resources: Resources,
    ) -> Result<LoadGenerator, Error> {
        let expose_external_ip = spec.expose_external_ip;

        step(
            scope,
            Step::Create(Kind::Ingress, name.to_owned()),
            self.gateway
                .create_ingress(objects::ingress(metadata.clone(), name)),
        )
        .await?;

        let service = step(
            scope,
            Step::Create(Kind::Service, name.to_owned()),
            self.gateway
                .create_service(objects::service(metadata.clone(), name, port)),
        )
        .await?;

        let pod = step(
            scope,
            Step::Create(Kind::Pod, name.to_owned()),
            self.gateway
                .create_pod(objects::pod(metadata, name, spec, resources, port)),
        )
        .await?;
        let pod = self.wait_running(scope, name, pod).await?;

        let external_ip = if expose_external_ip {
            Some(self.wait_external_address(scope, name).await?)
        } else {
            None
        };

        Ok(LoadGenerator {
            name: name.to_owned(),
            cluster_ip: objects::cluster_ip(&service),
            external_ip,
            port: Some(port),
            status: objects::phase(&pod),
            created_at: objects::created_at(&pod),
        })
    }

    /// Poll the pod until it runs. Only the scope bounds the number of polls.
    async fn wait_running(&self, scope: &Scope, name: &str, mut pod: Pod) -> Result<Pod, Error> {
        let not_ready = |pod: &Pod, reason| Error::NotReady {
            name: name.to_owned(),
            last_phase: objects::phase(pod),
            reason,
        };
        loop {
            if let Err(reason) = scope.sleep(POLL_INTERVAL).await {
                return Err(not_ready(&pod, reason));
            }
            match scope.run(self.gateway.get_pod(name)).await {
                Ok(Ok(current)) => pod = current,
                Ok(Err(err)) => warn!(%err, generator = %name, "load generator status check failed"),
                Err(reason) => return Err(not_ready(&pod, reason)),
            }
            let phase = objects::phase(&pod);
            debug!(generator = %name, %phase, "load generator status");
            if phase == Phase::Running {
                return Ok(pod);
            }
        }
    }

    async fn wait_external_address(&self, scope: &Scope, name: &str) -> Result<String, Error> {
        let interrupted = |reason| Error::Interrupted {
            operation: format!("waiting for the external address of {name}"),
            reason,
        };
        for _ in 0..EXTERNAL_ADDRESS_ATTEMPTS {
            scope.sleep(POLL_INTERVAL).await.map_err(interrupted)?;
            let service = match scope.run(self.gateway.get_service(name)).await {
                Ok(Ok(service)) => service,
                Ok(Err(source)) => {
                    return Err(Error::Kube {
                        step: Step::Get(Kind::Service, name.to_owned()),
                        source,
                    })
                }
                Err(reason) => return Err(interrupted(reason)),
            };
            if let Some(address) = objects::external_ip(&service) {
                return Ok(address);
            }
        }
        Err(Error::NoExternalAddress {
            name: name.to_owned(),
            attempts: EXTERNAL_ADDRESS_ATTEMPTS,
        })
    }

    async fn delete_services(&self, scope: &Scope, selector: &str) -> Result<(), Error> {
        let services = step(
            scope,
            Step::List(Kind::Service),
            self.gateway.list_services(selector),
        )
        .await?;
        let mut results = Vec::with_capacity(services.len());
        for name in services.into_iter().filter_map(|service| service.metadata.name) {
            let deleted = step(
                scope,
                Step::Delete(Kind::Service, name.clone()),
                self.gateway.delete_service(&name),
            )
            .await;
            results.push(deleted);
        }
        Error::combine(results)
    }
}

#[async_trait]
impl<G: ClusterGateway + 'static> GeneratorManager for Manager<G> {
    async fn create(&self, scope: &Scope, spec: CreationSpec) -> Result<LoadGenerator, Error> {
        let resources = self
            .settings
            .default_resources()?
            .with_overrides(&spec.resources);
        resources.validate()?;

        let label = self.settings.label()?;
        let name = format!("{label}-{}", Uuid::new_v4());
        let port = self.settings.port()?;
        let scope = scope.with_timeout(self.optional_timeout(self.settings.create_timeout()));
        let metadata = ObjectMeta {
            name: Some(name.clone()),
            labels: Some(generator_labels(&label, &name)),
            ..Default::default()
        };

        let rollback = Rollback::arm(self.clone(), name.clone());
        let generator = self
            .provision(&scope, metadata, &name, port, spec, resources)
            .await?;
        rollback.disarm();

        info!(generator = %name, "load generator created");
        Ok(generator)
    }

    async fn list(&self) -> Result<Vec<LoadGenerator>, Error> {
        let selector = ownership_selector(&self.settings.label()?);
        let (pods, services) = tokio::try_join!(
            async {
                self.gateway
                    .list_pods(&selector)
                    .await
                    .map_err(|source| Error::Kube {
                        step: Step::List(Kind::Pod),
                        source,
                    })
            },
            async {
                self.gateway
                    .list_services(&selector)
                    .await
                    .map_err(|source| Error::Kube {
                        step: Step::List(Kind::Service),
                        source,
                    })
            },
        )?;

        let services: HashMap<String, Service> = services
            .into_iter()
            .filter_map(|service| Some((service.metadata.name.clone()?, service)))
            .collect();
        Ok(pods
            .iter()
            .map(|pod| {
                let service = pod
                    .metadata
                    .name
                    .as_ref()
                    .and_then(|name| services.get(name));
                objects::load_generator(pod, service)
            })
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        let scope = self.delete_scope();
        let (pod, service, ingress) = tokio::join!(
            step(
                &scope,
                Step::Delete(Kind::Pod, name.to_owned()),
                self.gateway.delete_pod(name),
            ),
            step(
                &scope,
                Step::Delete(Kind::Service, name.to_owned()),
                self.gateway.delete_service(name),
            ),
            step(
                &scope,
                Step::Delete(Kind::Ingress, name.to_owned()),
                self.gateway.delete_ingress(name),
            ),
        );
        Error::combine([pod, service, ingress])?;
        debug!(generator = %name, "load generator deleted");
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), Error> {
        let selector = ownership_selector(&self.settings.label()?);
        let scope = self.delete_scope();

        let pods = step(
            &scope,
            Step::DeleteCollection(Kind::Pod),
            self.gateway.delete_pods(&selector),
        )
        .await;
        let services = self.delete_services(&scope, &selector).await;
        let ingresses = step(
            &scope,
            Step::DeleteCollection(Kind::Ingress),
            self.gateway.delete_ingresses(&selector),
        )
        .await;
        Error::combine([pods, services, ingresses])
    }
}

/// Deletes a partially created load generator when dropped while still armed.
///
/// The deletion runs on a spawned task with its own scope, so neither a failed step nor the
/// caller dropping the creation future can stop it.
struct Rollback<G: ClusterGateway + 'static> {
    manager: Option<Manager<G>>,
    name: String,
}

impl<G: ClusterGateway + 'static> Rollback<G> {
    fn arm(manager: Manager<G>, name: String) -> Self {
        Self {
            manager: Some(manager),
            name,
        }
    }

    fn disarm(mut self) {
        self.manager = None;
    }
}

impl<G: ClusterGateway + 'static> Drop for Rollback<G> {
    fn drop(&mut self) {
        let Some(manager) = self.manager.take() else {
            return;
        };
        let name = std::mem::take(&mut self.name);
        match Handle::try_current() {
            Ok(handle) => {
                let rollbacks = manager.rollbacks.clone();
                let rollback = async move {
                    match manager.delete(&name).await {
                        Ok(()) => info!(generator = %name, "rolled back load generator"),
                        Err(err) => {
                            warn!(%err, generator = %name, "fail to delete objects of load generator")
                        }
                    }
                };
                rollbacks.spawn_on(rollback, &handle);
            }
            Err(_) => warn!(generator = %name, "no runtime left to roll back load generator"),
        }
    }
}
