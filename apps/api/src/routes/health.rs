use axum::Json;
use serde_json::{json, Value};

/// GET /health (§6).
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "cv-wizard-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
