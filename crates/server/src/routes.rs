//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::trace::trace_id_middleware;
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        // Subject registry
        .route("/v1/subjects", post(handlers::register_subject))
        .route(
            "/v1/subjects/{subject_id}",
            delete(handlers::remove_subject),
        )
        .route(
            "/v1/subjects/{subject_id}/counts",
            get(handlers::get_counts),
        )
        // Votes
        .route(
            "/v1/subjects/{subject_id}/votes/{voter_id}",
            get(handlers::get_vote_summary).post(handlers::apply_vote),
        )
        .route(
            "/v1/subjects/{subject_id}/votes/{voter_id}/state",
            get(handlers::get_voter_state),
        )
        .route(
            "/v1/voters/{voter_id}/states",
            post(handlers::get_voter_states),
        );

    let mut router = Router::new().merge(api_routes);

    // Unauthenticated: only mount on deployments that restrict access upstream.
    if state.config.server.admin_enabled {
        let admin_routes = Router::new()
            .route(
                "/v1/admin/subjects/{subject_id}/reconcile",
                post(handlers::reconcile_subject),
            )
            .route("/v1/admin/reconcile", post(handlers::reconcile_all));
        router = router.merge(admin_routes);
    }

    // When enabled, this endpoint MUST be network-restricted to Prometheus
    // scrapers. See crate::metrics module documentation.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    // Order of execution: TraceLayer -> trace id span -> Handler
    router
        .layer(middleware::from_fn(trace_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
