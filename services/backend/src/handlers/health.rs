use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn detailed_health(State(state): State<AppState>) -> Json<Value> {
    let store_healthy = state.settlement.store_healthy().await;
    let store_kind = if state.config.database.use_in_memory {
        "memory"
    } else {
        "postgres"
    };

    Json(json!({
        "status": if store_healthy { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "components": {
            "store": {
                "kind": store_kind,
                "status": if store_healthy { "healthy" } else { "unhealthy" },
            },
        }
    }))
}
