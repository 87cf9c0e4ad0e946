// ABOUTME: Route table for the service

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/is_alive", get(handlers::is_alive))
        .route("/sha", get(handlers::sha))
        .route(
            "/repl/:exercise/:participant",
            get(handlers::attach_repl)
                .post(handlers::create_repl)
                .delete(handlers::delete_repl),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
