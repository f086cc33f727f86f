//! Route table

use axum::{
    Router,
    routing::{get, post},
    middleware as axum_middleware,
};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};

use crate::{handlers, middleware, AppState};

pub const DATASETS_PATH: &str = "/datasets/";

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::check))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login));

    // Everything touching records requires a user JWT
    let user_routes = Router::new()
        .route("/", get(handlers::health::api_root))
        .route(
            DATASETS_PATH,
            get(handlers::datasets::list).post(handlers::datasets::create),
        )
        .route(
            "/datasets/:id/",
            get(handlers::datasets::retrieve)
                .put(handlers::datasets::update)
                .patch(handlers::datasets::partial_update)
                .delete(handlers::datasets::destroy),
        )
        .route(
            "/auth/me",
            get(handlers::auth::me).delete(handlers::auth::delete_me),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_user_auth
        ));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}
