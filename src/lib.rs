pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod services;
pub mod state;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use state::AppState;

/// Build the HTTP router.
///
/// Portal routes pass the API-key gate, then the optional JWT gate, then
/// tenant resolution, in that order.
pub fn app(state: AppState) -> Router {
    Router::new()
        // Public
        .route("/health", get(handlers::health))
        .merge(portal_routes(state.clone()))
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn portal_routes(state: AppState) -> Router<AppState> {
    use handlers::portal;

    Router::new()
        .route(
            "/portal/course-registrations",
            post(portal::register_courses).delete(portal::unregister_courses),
        )
        .route("/portal/course-registrations/duplicate", post(portal::duplicate_registration))
        .route("/portal/course-registrations/terms", get(portal::registration_terms))
        // Layers run outermost-last: api key -> jwt -> tenant
        .layer(from_fn_with_state(state.clone(), middleware::resolve_tenant_middleware))
        .layer(from_fn_with_state(state.clone(), middleware::jwt_auth_middleware))
        .layer(from_fn_with_state(state, middleware::api_key_middleware))
}
