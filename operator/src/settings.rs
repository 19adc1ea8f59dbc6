//! Configuration provider resolving named values at call time.
use std::{path::Path, time::Duration};

use ::config::{Config, ConfigError, Environment, File, FileFormat};
use serde::de::DeserializeOwned;

use crate::{generator::Resources, Error};

/// Port the HTTP surface listens on.
pub const HTTP_PORT_KEY: &str = "service.ports.http";
/// Default log directive when `RUST_LOG` is not set.
pub const LOG_LEVEL_KEY: &str = "log.level";
/// Namespace every load generator is created in.
pub const NAMESPACE_KEY: &str = "kubernetes.namespace";
/// Ownership label key, also the generated name prefix.
pub const LABEL_KEY: &str = "kubernetes.generator.label";
/// Port advertised by the service and the container.
pub const PORT_KEY: &str = "kubernetes.generator.port";
/// Deadline for a whole creation.
pub const CREATE_TIMEOUT_KEY: &str = "kubernetes.timeouts.create";
/// Deadline for a deletion.
pub const DELETE_TIMEOUT_KEY: &str = "kubernetes.timeouts.delete";
/// Default cpu and memory limits and requests.
pub const DEFAULT_RESOURCES_KEY: &str = "default_resources";

const ENV_PREFIX: &str = "LG";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_SEPARATOR: &str = "__";

/// Operator settings loaded from a file with environment overrides.
///
/// Nothing is resolved eagerly; each accessor reads its key when called so a bad value only
/// fails the operation that needs it.
#[derive(Debug, Clone)]
pub struct Settings {
    inner: Config,
}

impl Settings {
    /// Load settings from `path`, overridden by `LG_` prefixed environment variables.
    ///
    /// Nested keys use double underscores: `LG_KUBERNETES__NAMESPACE` sets `kubernetes.namespace`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let inner = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_PREFIX_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;
        Ok(Self { inner })
    }

    /// Build settings from an in-memory YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let inner = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Ok(Self { inner })
    }

    /// Resolve the value stored under `key`.
    pub fn resolve<T: DeserializeOwned>(&self, key: &'static str) -> Result<T, Error> {
        self.inner
            .get::<T>(key)
            .map_err(|source| Error::Config { key, source })
    }

    /// Resolve a Go style duration string stored under `key`.
    pub fn resolve_duration(&self, key: &'static str) -> Result<Duration, Error> {
        let value: String = self.resolve(key)?;
        parse_duration(&value).map_err(|reason| Error::Duration { key, value, reason })
    }

    /// Resolve a flag; a missing or malformed flag reads as disabled.
    pub fn enabled(&self, key: &'static str) -> bool {
        self.resolve::<bool>(key).unwrap_or(false)
    }

    /// Ownership label key.
    pub fn label(&self) -> Result<String, Error> {
        self.resolve(LABEL_KEY)
    }

    /// Port advertised by load generators.
    pub fn port(&self) -> Result<i32, Error> {
        self.resolve(PORT_KEY)
    }

    /// Target namespace.
    pub fn namespace(&self) -> Result<String, Error> {
        self.resolve(NAMESPACE_KEY)
    }

    /// HTTP listen port.
    pub fn http_port(&self) -> Result<u16, Error> {
        self.resolve(HTTP_PORT_KEY)
    }

    /// Default log directive, if configured.
    pub fn log_level(&self) -> Option<String> {
        self.resolve(LOG_LEVEL_KEY).ok()
    }

    /// Deadline applied to each creation.
    pub fn create_timeout(&self) -> Result<Duration, Error> {
        self.resolve_duration(CREATE_TIMEOUT_KEY)
    }

    /// Deadline applied to each deletion.
    pub fn delete_timeout(&self) -> Result<Duration, Error> {
        self.resolve_duration(DELETE_TIMEOUT_KEY)
    }

    /// Resources applied when the caller overrides nothing.
    pub fn default_resources(&self) -> Result<Resources, Error> {
        self.resolve(DEFAULT_RESOURCES_KEY)
    }

    /// Check the values every operation depends on, reporting all missing ones at once.
    pub fn validate(&self) -> Result<(), Error> {
        Error::combine([
            self.namespace().map(drop),
            self.label().map(drop),
            self.port().map(drop),
        ])
    }
}

const MAX_FRACTION_DIGITS: usize = 18;

/// Parse a Go style duration such as `"1h30m"`, `"1.5s"` or `"250ms"`.
///
/// A duration is a sequence of decimal numbers, each with an optional fraction and a unit
/// suffix. Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration cannot be empty".to_owned());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut remaining = s;
    let mut total_nanos: u128 = 0;
    while !remaining.is_empty() {
        let num_end = remaining
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(remaining.len());
        if num_end == 0 {
            return Err(format!(
                "expected a number at position {} in {s:?}",
                s.len() - remaining.len()
            ));
        }
        let number = &remaining[..num_end];
        remaining = &remaining[num_end..];

        let unit_end = remaining
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(remaining.len());
        let unit = &remaining[..unit_end];
        remaining = &remaining[unit_end..];

        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "" => return Err(format!("missing unit in duration {s:?}")),
            unit => return Err(format!("unknown unit {unit:?} in duration {s:?}")),
        };

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(format!("invalid number in duration {s:?}"));
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| format!("invalid number in duration {s:?}"))?
        };
        let overflows = || format!("duration {s:?} overflows");
        total_nanos = whole
            .checked_mul(unit_nanos)
            .and_then(|nanos| total_nanos.checked_add(nanos))
            .ok_or_else(overflows)?;
        if !fraction.is_empty() {
            // Digits past this precision are below a nanosecond for every unit.
            let fraction = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
            let digits: u128 = fraction
                .parse()
                .map_err(|_| format!("invalid number in duration {s:?}"))?;
            let scale = 10u128.pow(fraction.len() as u32);
            total_nanos = digits
                .checked_mul(unit_nanos)
                .and_then(|nanos| total_nanos.checked_add(nanos / scale))
                .ok_or_else(overflows)?;
        }
    }

    let secs = u64::try_from(total_nanos / 1_000_000_000)
        .map_err(|_| format!("duration {s:?} overflows"))?;
    Ok(Duration::new(secs, (total_nanos % 1_000_000_000) as u32))
}
