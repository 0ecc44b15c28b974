pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod poll;
pub mod stream;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
pub use stream::StreamRegistry;

use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};

/// Build the full route tree. Shared by the server binary and the
/// integration tests so both exercise the same wiring.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/poll", get(poll::poll))
        .route("/stream", get(stream::stream))
        .route("/chats/{chat_id}/messages", post(messages::send_message))
        .route("/chats/{chat_id}/read", post(messages::mark_read))
        .layer(axum_middleware::from_fn(middleware::require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        // Clients only ever parse JSON; axum's default 405 has an empty body
        .method_not_allowed_fallback(method_not_allowed)
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}
