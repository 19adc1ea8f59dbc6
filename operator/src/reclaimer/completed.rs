use std::time::Duration;

use k8s_openapi::chrono::{DateTime, Utc};

use crate::{generator::LoadGenerator, reclaimer::Policy};

/// Selects generators whose pod has finished, successfully or not.
#[derive(Debug, Clone, Copy, Default)]
pub struct Completed;

impl Policy for Completed {
    const NAME: &'static str = "completed";
    const ENABLED_KEY: &'static str = "cleaning.completed.enabled";
    const PERIOD_KEY: &'static str = "cleaning.completed.interval";

    fn select(
        &self,
        generators: &[LoadGenerator],
        _now: DateTime<Utc>,
        _period: Duration,
    ) -> Vec<String> {
        generators
            .iter()
            .filter(|generator| generator.status.is_terminal())
            .map(|generator| generator.name.clone())
            .collect()
    }
}
