pub mod health;
pub mod tool;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Builds the two conceptual endpoints of §6: `GET /health` and the single
/// `POST /tool` dispatcher that fronts every core operation (§4.6).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/tool", post(tool::tool_handler))
        .with_state(state)
}
