//! HTTP transport for the Metrics Registry (spec.md §6: "the repository
//! ships an HTTP endpoint exposing them as JSON; this is not part of the
//! core"). Bind address defaults to `:8080`, overridable by `HEALTH_ADDR`.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::metrics::Metrics;

const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

fn addr_from_env() -> String {
    std::env::var("HEALTH_ADDR").unwrap_or_else(|_| DEFAULT_HEALTH_ADDR.to_string())
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler(State(metrics): State<Metrics>) -> Json<Value> {
    Json(serde_json::to_value(metrics.snapshot()).unwrap_or_default())
}

/// Binds and serves `/healthz` and `/metrics` until the process exits.
pub async fn serve(metrics: Metrics) -> std::io::Result<()> {
    let addr = addr_from_env();
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "health endpoint listening");
    axum::serve(listener, app).await
}
