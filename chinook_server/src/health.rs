//! Liveness and readiness for the catalog server, outside the JSON API prefix.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;

#[derive(Serialize)]
struct Readiness {
    catalog: &'static str,
    database: bool,
}

async fn live() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// 503 until the pool can answer a trivial query.
async fn ready(State(pool): State<PgPool>) -> (StatusCode, Json<Readiness>) {
    match sqlx::query("SELECT 1").execute(&pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(Readiness {
                catalog: "chinook",
                database: true,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "catalog database unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Readiness {
                    catalog: "chinook",
                    database: false,
                }),
            )
        }
    }
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({ "server": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }))
}

pub fn routes(pool: PgPool) -> Router {
    Router::new()
        .route("/health", get(live))
        .route("/ready", get(ready))
        .route("/version", get(version))
        .with_state(pool)
}
