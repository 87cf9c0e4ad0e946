// ABOUTME: HTTP boundary: routes, handlers, shared state, and error mapping

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
