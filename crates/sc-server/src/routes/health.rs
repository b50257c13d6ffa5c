//! Liveness probe.

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = String)),
    tag = "system"
)]
pub async fn health_check() -> &'static str {
    "ok"
}
