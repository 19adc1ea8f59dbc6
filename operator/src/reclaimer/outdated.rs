use std::time::Duration;

use k8s_openapi::chrono::{DateTime, Utc};

use crate::{generator::LoadGenerator, reclaimer::Policy};

/// Selects generators created more than the configured time-to-live ago, whatever their phase.
///
/// The time-to-live is also the period between passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Outdated;

impl Policy for Outdated {
    const NAME: &'static str = "outdated";
    const ENABLED_KEY: &'static str = "cleaning.outdated.enabled";
    const PERIOD_KEY: &'static str = "cleaning.outdated.ttl";

    fn select(
        &self,
        generators: &[LoadGenerator],
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Vec<String> {
        // A ttl chrono cannot represent makes nothing old enough.
        let Some(oldest_kept) = k8s_openapi::chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
        else {
            return Vec::new();
        };
        generators
            .iter()
            .filter(|generator| {
                generator
                    .created_at
                    .is_some_and(|created_at| created_at < oldest_kept)
            })
            .map(|generator| generator.name.clone())
            .collect()
    }
}
