use anyhow::{Context, Result};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, Resource};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::{Config, Environment};

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    /// OTLP collector; console-only logging when unset.
    pub otlp_endpoint: Option<String>,
    pub export_timeout: Duration,
}

impl TelemetryConfig {
    pub fn from_config(config: &Config) -> Self {
        let environment = match config.app.environment {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        Self {
            service_name: config.app.name.clone(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: environment.to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            export_timeout: Duration::from_secs(30),
        }
    }
}

/// Keeps the exporter alive until `shutdown`.
pub struct TelemetryHandles {
    exporting: bool,
}

impl TelemetryHandles {
    /// Flushes pending spans.
    pub async fn shutdown(self) -> Result<()> {
        if self.exporting {
            info!("Shutting down tracer provider");
            global::shutdown_tracer_provider();
        }
        Ok(())
    }
}

/// Installs the log subscriber and, when an endpoint is configured, the
/// OTLP span exporter.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryHandles> {
    setup_tracing_subscriber()?;

    info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        "Initializing telemetry"
    );

    let exporting = match &config.otlp_endpoint {
        Some(endpoint) => {
            init_otlp(&config, endpoint)?;
            info!(%endpoint, "Span export enabled");
            true
        }
        None => {
            info!("No OTLP endpoint configured, console logging only");
            false
        }
    };

    Ok(TelemetryHandles { exporting })
}

fn resource(config: &TelemetryConfig) -> Resource {
    Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", config.service_version.clone()),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ])
}

fn init_otlp(config: &TelemetryConfig, endpoint: &str) -> Result<()> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_timeout(config.export_timeout),
        )
        .with_trace_config(
            opentelemetry_sdk::trace::config()
                .with_resource(resource(config))
                .with_sampler(opentelemetry_sdk::trace::Sampler::AlwaysOn),
        )
        .install_batch(runtime::Tokio)
        .context("Failed to initialize OTLP tracer")?;
    Ok(())
}

fn setup_tracing_subscriber() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{}=debug,tower_http=info", env!("CARGO_CRATE_NAME")).into());

    Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize tracing subscriber")?;
    Ok(())
}
