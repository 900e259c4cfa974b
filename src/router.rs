//! HTTP routing.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers, middleware, state::AppState};

/// Build the full router around the application state.
pub fn create_router(state: AppState) -> Router {
    // Admin routes (Basic auth)
    let admin_routes = Router::new()
        .route("/jarvis", get(handlers::admin::stats))
        .route("/jarvis/keys/{uuid}", get(handlers::admin::key_detail))
        .route(
            "/jarvis/keys/{uuid}/revoke",
            post(handlers::admin::revoke_key),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        // Key lifecycle
        .route("/api/register", post(handlers::keys::register))
        .route("/api/update", post(handlers::keys::update_email))
        .route("/api/confirm/{code}", get(handlers::keys::confirm))
        // Links
        .route(
            "/api/send",
            get(handlers::links::send_link).post(handlers::links::send_link),
        )
        .route("/api/flush", post(handlers::links::flush_queue))
        // Bookmarklet routes
        .route("/", post(handlers::keys::register_bookmarklet))
        .route("/send", post(handlers::links::send_link))
        .route("/send2", get(handlers::links::send_link_image))
        .route("/confirm/{code}", get(handlers::keys::confirm))
        // Chrome extension routes
        .route("/chrome/register", post(handlers::keys::register_chrome))
        .route("/chrome/send", post(handlers::links::send_link))
        .route("/chrome/ping", post(handlers::links::ping))
        .merge(admin_routes)
        // Bookmarklets and extensions call in from arbitrary origins
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
