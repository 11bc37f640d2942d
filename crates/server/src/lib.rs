//! Demo HTTP server for the aggregate runtime.
//!
//! Routes bank account commands to aggregate processes, runs an activity log
//! event handler over the global stream, and exposes Prometheus metrics.

pub mod activity;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{AggregateConfig, AggregateSupervisor};
use event_handler::{HandlerConfig, HandlerHandle, HandlerSupervisor};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use activity::{ACTIVITY_LOG, ActivityLog};
use routes::accounts::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/accounts/{id}", get(routes::accounts::get::<S>))
        .route("/accounts/{id}/open", post(routes::accounts::open::<S>))
        .route("/accounts/{id}/deposit", post(routes::accounts::deposit::<S>))
        .route("/accounts/{id}/withdraw", post(routes::accounts::withdraw::<S>))
        .route("/accounts/{id}/close", post(routes::accounts::close::<S>))
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

/// Creates the application state over `event_store`.
pub fn create_state<S: EventStore + Clone>(
    event_store: S,
    config: AggregateConfig,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        accounts: AggregateSupervisor::with_config(event_store, config),
        activity: Arc::new(ActivityLog::new()),
    })
}

/// Starts the activity log under a handler supervisor.
pub fn start_activity_log<S: EventStore + Clone>(state: &AppState<S>) -> HandlerHandle {
    let supervisor = HandlerSupervisor::new(state.accounts.store().clone());
    supervisor.start(state.activity.clone(), HandlerConfig::new(ACTIVITY_LOG))
}
