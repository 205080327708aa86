//! Log subscriber and metrics recorder setup.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LogFormat};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` directives win over the configured level.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
    }
}

/// Installs the Prometheus recorder behind the `metrics` macros.
pub fn install_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!("repository_saves_total", "Entity saves that committed events");
    metrics::describe_counter!(
        "repository_conflicts_total",
        "Entity saves rejected by the expected-version check"
    );
    metrics::describe_counter!("dispatcher_deliveries_total", "Delivered events by outcome");
    metrics::describe_counter!("subscription_parked_total", "Events parked by a consumer group");
    metrics::describe_histogram!(
        "repository_events_replayed",
        "Events replayed per entity load"
    );

    Ok(handle)
}
