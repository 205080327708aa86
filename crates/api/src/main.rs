//! API server entry point.

use api::config::Config;
use event_store::{InMemoryEventStore, PostgresEventStore, SubscriptionStore};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Serves HTTP over `store` until a shutdown signal, then drains the
/// background tasks.
async fn serve<S>(
    store: S,
    backend: &'static str,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError>
where
    S: SubscriptionStore + Clone + 'static,
{
    let runtime = api::start_runtime(store, backend, config).await?;
    let app = api::create_app(runtime.state.clone(), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, backend, group = %config.subscription_group, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // HTTP first, then the command loop and the dispatcher
    runtime.shutdown().await;
    served?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Configuration and telemetry
    let config = Config::from_env()?;
    api::telemetry::init_tracing(&config);
    let metrics_handle = api::telemetry::install_metrics()?;

    // 2. Event store backend, then serve
    match &config.database_url {
        Some(url) => {
            let store = PostgresEventStore::connect(url).await?;
            store.run_migrations().await?;
            tracing::info!("connected to Postgres event store");
            serve(store, "postgres", &config, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, events are kept in memory only");
            serve(InMemoryEventStore::new(), "memory", &config, metrics_handle).await
        }
    }
}
