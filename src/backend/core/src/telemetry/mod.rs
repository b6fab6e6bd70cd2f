//! Telemetry: logging, tracing and metrics.
//!
//! - **Logging**: structured JSON/pretty/compact output via `tracing-subscriber`
//! - **Tracing**: optional OTLP span export through OpenTelemetry
//! - **Metrics**: Prometheus recorder plus [`metrics::EngineMetrics`] helpers
//!
//! # Example
//!
//! ```rust,no_run
//! use tollgate_core::config::ObservabilityConfig;
//! use tollgate_core::telemetry::init_telemetry;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let handle = init_telemetry(&ObservabilityConfig::default())?;
//! // ... run the engine ...
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use self::logging::{env_filter, init_logging, LogFormat};
pub use self::metrics::{init_metrics, EngineMetrics, MetricsRegistry};
pub use self::tracing::{build_tracer, shutdown_tracing};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ObservabilityConfig;

/// Initialize logging, optional OTLP export and optional Prometheus metrics.
///
/// Call once at startup, from inside a Tokio runtime when an OTLP endpoint is
/// configured.
pub fn init_telemetry(config: &ObservabilityConfig) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(config.metrics_enabled, &config.service_name)?;

    let filter = env_filter(&config.log_level)?;

    let otel_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = build_tracer(endpoint, &config.service_name)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };
    let tracing_enabled = otel_layer.is_some();

    let registry = tracing_subscriber::registry().with(filter).with(otel_layer);

    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init()?,
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init()?,
    }

    ::tracing::info!(
        service_name = %config.service_name,
        otlp = tracing_enabled,
        metrics = metrics.is_enabled(),
        "Telemetry initialized"
    );

    Ok(TelemetryHandle {
        metrics,
        tracing_enabled,
    })
}

/// Handle for managing telemetry lifecycle.
pub struct TelemetryHandle {
    /// Metrics handle for rendering the Prometheus exposition
    pub metrics: MetricsRegistry,
    tracing_enabled: bool,
}

impl TelemetryHandle {
    /// Flush spans and shut down exporters.
    pub fn shutdown(self) {
        if self.tracing_enabled {
            shutdown_tracing();
        }
        // Note: Using ::tracing to refer to the crate, not our local module
        ::tracing::info!("Telemetry shutdown complete");
    }
}
