//! Liveness endpoint.

use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct PingResponse {
    message: &'static str,
}

pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { message: "pong" })
}
