//! Provides helper functions for initializing log and trace collection and publication.
use anyhow::Result;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace::Tracer, Resource};
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter, Registry};

const SERVICE_NAME: &str = "lg-operator";

/// Initialize logging and, when an OTLP endpoint is given, trace export.
///
/// `RUST_LOG` takes precedence over `default_level`; with neither set the filter defaults to INFO.
pub async fn init(otlp_endpoint: Option<String>, default_level: Option<&str>) -> Result<()> {
    let default_directive = match default_level {
        Some(level) => level.parse::<LevelFilter>()?,
        None => LevelFilter::INFO,
    };

    // Setup filters
    let log_filter = EnvFilter::builder()
        .with_default_directive(default_directive.into())
        .from_env()?;

    // Setup tracing layers
    let telemetry = match otlp_endpoint {
        Some(endpoint) => {
            let otlp_filter = EnvFilter::builder()
                .with_default_directive(default_directive.into())
                .from_env()?;
            Some(
                tracing_opentelemetry::layer()
                    .with_tracer(tracer(endpoint)?)
                    .with_filter(otlp_filter),
            )
        }
        None => None,
    };
    let logger = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .compact()
        .with_filter(log_filter);

    let collector = Registry::default().with(telemetry).with(logger);

    // Initialize tracing
    tracing::subscriber::set_global_default(collector)?;

    Ok(())
}

/// Flush any pending spans before the process exits.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

fn tracer(otlp_endpoint: String) -> Result<Tracer> {
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(otlp_endpoint),
        )
        .with_trace_config(opentelemetry_sdk::trace::config().with_resource(Resource::new(
            vec![
                KeyValue::new(
                    "hostname",
                    gethostname::gethostname()
                        .into_string()
                        .unwrap_or_else(|_| "unknown".to_owned()),
                ),
                KeyValue::new("service.name", SERVICE_NAME),
            ],
        )))
        .install_batch(runtime::Tokio)?;
    Ok(tracer)
}
