//! API router configuration

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::callback_handler::{
    call_status, cancel_call, check_availability, health_check, originate_callback, AppState,
};

/// Build the API router
pub fn build_router(state: AppState) -> Router {
    let health_routes = Router::new().route("/health", get(health_check));

    let callback_routes = Router::new()
        .route("/callback/check-availability", post(check_availability))
        .route("/callback/originate", post(originate_callback))
        .route("/callback/status/:leg_id", get(call_status))
        .route("/callback/cancel/:leg_id", delete(cancel_call));

    Router::new()
        .merge(health_routes)
        .merge(callback_routes)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
