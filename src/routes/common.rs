//! Health, readiness and version routes, mounted outside the API prefix.

use crate::response;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::Response, routing::get, Router};
use serde_json::{json, Map, Value};

fn extra(key: &str, value: Value) -> Map<String, Value> {
    Map::from_iter([(key.to_string(), value)])
}

async fn health() -> Response {
    response::response200(extra("status", json!("ok")), Some("ok"))
}

/// 503 with `status: degraded` while the database is unreachable.
async fn ready(State(state): State<AppState>) -> Response {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => response::response200(extra("database", json!("ok")), Some("ok")),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            let mut body = extra("database", json!("unavailable"));
            body.insert("status".into(), json!("degraded"));
            response::respond(StatusCode::SERVICE_UNAVAILABLE, "degraded", body)
        }
    }
}

async fn version() -> Response {
    let mut body = extra("name", json!(env!("CARGO_PKG_NAME")));
    body.insert("version".into(), json!(env!("CARGO_PKG_VERSION")));
    response::response200(body, None)
}

pub fn common_routes_with_ready(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/version", get(version))
        .with_state(state)
}
