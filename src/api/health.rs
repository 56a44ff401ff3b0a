use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Map, Value};

use crate::protocol::ProviderKind;
use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary. Credentials are reported
/// only as present or absent.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut providers = Map::with_capacity(ProviderKind::ALL.len());
    for kind in ProviderKind::ALL {
        let upstream = state.upstream(kind);
        providers.insert(
            kind.as_str().to_string(),
            json!({
                "url": upstream.completions_url().as_str(),
                "default_model": upstream.default_model(),
                "api_key_configured": upstream.has_configured_key(),
            }),
        );
    }

    Json(json!({
        "status": "chat-relay is running",
        "providers": providers,
        "features": {
            "log_level": state.config.features.log_level,
        }
    }))
}
