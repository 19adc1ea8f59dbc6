use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity,
};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Limit and request of a single resource, as quantity strings.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Upper bound, e.g. `"2"` or `"2Gi"`.
    pub limit: String,
    /// Amount reserved at scheduling, e.g. `"500m"` or `"1Gi"`.
    pub request: String,
}

/// Cpu and memory of the load generator container.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Resources {
    /// Cpu quantities.
    pub cpu: Resource,
    /// Memory quantities.
    pub memory: Resource,
}

/// Partial [`Resource`]; unset or empty fields keep the default.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ResourceOverride {
    /// Limit override.
    pub limit: Option<String>,
    /// Request override.
    pub request: Option<String>,
}

/// Partial [`Resources`] supplied by the caller.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ResourceOverrides {
    /// Cpu overrides.
    pub cpu: Option<ResourceOverride>,
    /// Memory overrides.
    pub memory: Option<ResourceOverride>,
}

fn pick(value: &Option<String>, default: String) -> String {
    match value {
        Some(value) if !value.is_empty() => value.to_owned(),
        _ => default,
    }
}

impl Resource {
    fn merge(self, overrides: Option<&ResourceOverride>) -> Self {
        match overrides {
            Some(overrides) => Self {
                limit: pick(&overrides.limit, self.limit),
                request: pick(&overrides.request, self.request),
            },
            None => self,
        }
    }
}

impl Resources {
    /// Apply caller overrides field by field over these defaults.
    pub fn with_overrides(self, overrides: &ResourceOverrides) -> Self {
        Self {
            cpu: self.cpu.merge(overrides.cpu.as_ref()),
            memory: self.memory.merge(overrides.memory.as_ref()),
        }
    }

    /// Check every quantity parses, naming the first one that does not.
    pub fn validate(&self) -> Result<(), Error> {
        for (field, value) in [
            ("cpu limit", &self.cpu.limit),
            ("cpu request", &self.cpu.request),
            ("memory limit", &self.memory.limit),
            ("memory request", &self.memory.request),
        ] {
            if !is_quantity(value) {
                return Err(Error::InvalidArgument(format!(
                    "fail to parse {field}: {value:?} is not a valid quantity"
                )));
            }
        }
        Ok(())
    }
}

impl From<Resources> for ResourceRequirements {
    fn from(value: Resources) -> Self {
        ResourceRequirements {
            limits: Some(BTreeMap::from_iter([
                ("cpu".to_owned(), Quantity(value.cpu.limit)),
                ("memory".to_owned(), Quantity(value.memory.limit)),
            ])),
            requests: Some(BTreeMap::from_iter([
                ("cpu".to_owned(), Quantity(value.cpu.request)),
                ("memory".to_owned(), Quantity(value.memory.request)),
            ])),
            ..Default::default()
        }
    }
}

/// Report whether `value` is a Kubernetes quantity, e.g. `"100m"`, `"1.5"`, `"2Gi"` or `"1e3"`.
fn is_quantity(value: &str) -> bool {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    let number_end = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_end);

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return false;
    }

    match suffix {
        "" | "Ki" | "Mi" | "Gi" | "Ti" | "Pi" | "Ei" | "n" | "u" | "m" | "k" | "M" | "G"
        | "T" | "P" | "E" => true,
        exponent => {
            let Some(exponent) = exponent.strip_prefix(['e', 'E']) else {
                return false;
            };
            let digits = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        }
    }
}
