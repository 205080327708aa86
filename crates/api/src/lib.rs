//! HTTP command surface and process wiring for trade execution.
//!
//! Provides REST endpoints for requesting trades and reading trades and
//! accounts, and starts the background pieces that carry a trade to its
//! credit decision: the command loop and the event dispatcher. Structured
//! logging uses tracing and metrics are exported for Prometheus.

pub mod config;
pub mod error;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use dispatch::{DispatcherHandle, EventDispatcher};
use event_store::{EventStore, EventStoreError, SubscriptionSettings, SubscriptionStore};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use trading::{
    ChannelCommandBus, CommandLoopHandle, CreditService, StoreSequenceProvider, TradeService,
    spawn_command_loop, trading_resolver, trading_router,
};

use config::Config;
pub use routes::AppState;

/// Capacity of the channel between trades and the command loop.
const COMMAND_BUS_CAPACITY: usize = 256;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/trades", post(routes::trades::execute::<S>))
        .route("/trades/{id}", get(routes::trades::get::<S>))
        .route("/accounts/{id}", get(routes::accounts::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// The running background side of the service.
pub struct Runtime<S> {
    pub state: Arc<AppState<S>>,
    dispatcher: DispatcherHandle,
    command_loop: CommandLoopHandle,
}

impl<S> Runtime<S> {
    /// Drains the command loop, then stops the dispatcher. Each gets the
    /// grace period before it is aborted.
    pub async fn shutdown(self) {
        self.command_loop.stop().await;
        self.dispatcher.stop().await;
        tracing::info!("background tasks stopped");
    }
}

/// Builds the services over `store` and starts the command loop and the
/// event dispatcher.
pub async fn start_runtime<S>(
    store: S,
    backend: &'static str,
    config: &Config,
) -> Result<Runtime<S>, EventStoreError>
where
    S: SubscriptionStore + Clone + 'static,
{
    let (bus, commands) = ChannelCommandBus::new(COMMAND_BUS_CAPACITY);
    let sequence = Arc::new(StoreSequenceProvider::new(store.clone()));

    let trades = Arc::new(TradeService::new(store.clone(), bus, sequence));
    let credit = Arc::new(CreditService::new(
        store.clone(),
        config.default_credit_limit_cents,
    ));

    let command_loop = spawn_command_loop(commands, Arc::clone(&credit), config.shutdown_grace);

    let settings = SubscriptionSettings::new(config.subscription_group.clone())
        .max_retry_count(config.subscription_max_retries);
    let dispatcher = match EventDispatcher::new(
        Arc::new(store),
        settings,
        trading_resolver(),
        trading_router(Arc::clone(&trades), Arc::clone(&credit)),
    )
    .with_shutdown_grace(config.shutdown_grace)
    .start()
    .await
    {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            command_loop.stop().await;
            return Err(e);
        }
    };

    Ok(Runtime {
        state: Arc::new(AppState {
            trades,
            credit,
            backend,
        }),
        dispatcher,
        command_loop,
    })
}
