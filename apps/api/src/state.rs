use std::sync::Arc;

use crate::config::Config;
use crate::wizard::Orchestrator;

/// Shared application state injected into all route handlers via Axum
/// extractors. The Wizard Orchestrator (C5) already owns `Arc<dyn ...>`
/// handles to every collaborator (store, blobs, LLM gateway, PDF renderer,
/// document extractor, stable-profile store), so `AppState` just wraps it
/// plus the config the Tool Dispatcher (C6) itself needs (debug-export
/// gating, cleanup toggles).
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Config,
}
