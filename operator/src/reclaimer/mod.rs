//! Background loops deleting load generators that are no longer useful.
//!
//! Both loops share one shape and differ only in the [`Policy`] selecting what to delete.
mod completed;
mod outdated;

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use k8s_openapi::chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    generator::{GeneratorManager, LoadGenerator},
    settings::Settings,
    utils::{Clock, Scope},
    Error,
};

pub use completed::Completed;
pub use outdated::Outdated;

/// Decides which load generators a reclaimer deletes.
pub trait Policy: Send + Sync {
    /// Name used in logs.
    const NAME: &'static str;
    /// Flag enabling the reclaimer; a missing flag disables it.
    const ENABLED_KEY: &'static str;
    /// Duration between passes, also handed to [`Policy::select`].
    const PERIOD_KEY: &'static str;

    /// Names of the generators to delete, in listing order.
    fn select(
        &self,
        generators: &[LoadGenerator],
        now: DateTime<Utc>,
        period: Duration,
    ) -> Vec<String>;
}

/// Periodically lists load generators and deletes the ones its policy selects.
pub struct Reclaimer<M, P, C> {
    manager: Arc<M>,
    settings: Arc<Settings>,
    policy: P,
    clock: C,
}

impl<M, P, C> Reclaimer<M, P, C>
where
    M: GeneratorManager,
    P: Policy,
    C: Clock + Send + Sync,
{
    /// Reclaimer deleting through `manager`.
    pub fn new(manager: Arc<M>, settings: Arc<Settings>, policy: P, clock: C) -> Self {
        Self {
            manager,
            settings,
            policy,
            clock,
        }
    }

    /// Run passes until `token` is cancelled.
    ///
    /// A failed pass is logged and the loop carries on. The loop only ends when the period
    /// cannot be resolved or on cancellation, which is reported as [`Error::Cancelled`].
    pub async fn run(&self, token: CancellationToken) -> Result<(), Error> {
        let scope = Scope::new(token);
        loop {
            let period = self.settings.resolve_duration(P::PERIOD_KEY)?;

            if self.settings.enabled(P::ENABLED_KEY) {
                if let Err(err) = self.pass(period).await {
                    error!(%err, reclaimer = P::NAME, "failed to reclaim load generators");
                }
            } else {
                debug!(reclaimer = P::NAME, "reclaimer disabled, skipping pass");
            }

            if scope.sleep(period).await.is_err() {
                return Err(Error::Cancelled);
            }
        }
    }

    /// Delete every selected generator concurrently, returning the names that were selected.
    pub async fn pass(&self, period: Duration) -> Result<Vec<String>, Error> {
        info!(reclaimer = P::NAME, "start reclaiming load generators");
        let generators = self.manager.list().await?;
        let names = self.policy.select(&generators, self.clock.now(), period);
        if names.is_empty() {
            return Ok(names);
        }

        let results = join_all(names.iter().map(|name| self.manager.delete(name))).await;
        Error::combine(results)?;
        info!(
            reclaimer = P::NAME,
            generators = names.join(","),
            "reclaimed load generators"
        );
        Ok(names)
    }
}
