//! Dispatch boundary between callers and the lifecycle manager.
pub mod http;

use std::sync::Arc;

use futures::{future::join_all, stream::FuturesUnordered, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    generator::{CreationSpec, GeneratorManager, LoadGenerator},
    reclaimer::{Completed, Outdated, Policy, Reclaimer},
    settings::Settings,
    utils::{Clock, Scope, UtcClock},
    Error,
};

/// Fans batched requests out to a [`GeneratorManager`].
pub struct Service<M> {
    manager: Arc<M>,
}

impl<M> Clone for Service<M> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

impl<M: GeneratorManager> Service<M> {
    /// Service dispatching to `manager`.
    pub fn new(manager: Arc<M>) -> Self {
        Self { manager }
    }

    /// Liveness greeting.
    pub fn hello(&self) -> &'static str {
        "Hello!"
    }

    /// Create every load generator concurrently, results in request order.
    ///
    /// The first failure cancels the creations still in flight and is the error returned.
    /// Every failed creation still rolls back its own objects.
    pub async fn create_many(
        &self,
        scope: &Scope,
        specs: Vec<CreationSpec>,
    ) -> Result<Vec<LoadGenerator>, Error> {
        let group = scope.child();
        let mut generators: Vec<Option<LoadGenerator>> = specs.iter().map(|_| None).collect();
        let mut creations: FuturesUnordered<_> = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                let group = &group;
                async move { (index, self.manager.create(group, spec).await) }
            })
            .collect();

        let mut failure = None;
        while let Some((index, created)) = creations.next().await {
            match created {
                Ok(generator) => generators[index] = Some(generator),
                Err(err) if failure.is_none() => {
                    group.cancel();
                    failure = Some(err);
                }
                Err(err) => debug!(%err, "creation aborted after an earlier failure"),
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(generators.into_iter().flatten().collect()),
        }
    }

    /// Delete every named load generator, attempting all of them whatever the others do.
    pub async fn delete_many(&self, names: &[String]) -> Result<(), Error> {
        let results = join_all(names.iter().map(|name| self.manager.delete(name))).await;
        Error::combine(results)
    }

    /// Every load generator currently in the cluster.
    pub async fn list(&self) -> Result<Vec<LoadGenerator>, Error> {
        self.manager.list().await
    }

    /// Delete every object carrying the ownership label.
    pub async fn delete_all(&self) -> Result<(), Error> {
        self.manager.delete_all().await
    }
}

/// Spawn both reclaimers; they stop when `token` is cancelled.
pub fn start_reclaimers<M>(
    manager: Arc<M>,
    settings: Arc<Settings>,
    token: CancellationToken,
) -> Vec<JoinHandle<()>>
where
    M: GeneratorManager + 'static,
{
    vec![
        spawn_reclaimer(
            Reclaimer::new(manager.clone(), settings.clone(), Completed, UtcClock),
            token.clone(),
        ),
        spawn_reclaimer(
            Reclaimer::new(manager, settings, Outdated, UtcClock),
            token,
        ),
    ]
}

fn spawn_reclaimer<M, P, C>(
    reclaimer: Reclaimer<M, P, C>,
    token: CancellationToken,
) -> JoinHandle<()>
where
    M: GeneratorManager + 'static,
    P: Policy + 'static,
    C: Clock + Send + Sync + 'static,
{
    tokio::spawn(async move {
        match reclaimer.run(token).await {
            Err(Error::Cancelled) => debug!(reclaimer = P::NAME, "reclaimer stopped"),
            Err(err) => error!(%err, reclaimer = P::NAME, "reclaimer ended"),
            Ok(()) => {}
        }
    })
}
