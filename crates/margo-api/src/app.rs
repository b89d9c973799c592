use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use margo_store::StateStore;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Read-only status surface (spec.md's ambient API, see SPEC_FULL.md §4). No
/// mutating routes: the only legitimate desired-state input is the WFM, so
/// there's nothing here for a bearer token to protect beyond what binding
/// to localhost already achieves.
pub fn build_app(store: Arc<dyn StateStore>) -> Router {
    let state = AppState { store };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/status", get(handlers::status))
        .route("/deployments/:id", get(handlers::get_deployment))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
