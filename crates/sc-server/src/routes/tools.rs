//! External tool availability.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::context::AppContext;
use crate::error::AppError;

/// Availability of one external tool.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
    pub path: Option<String>,
}

impl From<sc_av::ToolInfo> for ToolStatus {
    fn from(info: sc_av::ToolInfo) -> Self {
        Self {
            name: info.name,
            available: info.available,
            version: info.version,
            path: info.path.map(|p| p.display().to_string()),
        }
    }
}

/// GET /api/tools
#[utoipa::path(
    get,
    path = "/api/tools",
    responses((status = 200, description = "ffmpeg and ffprobe availability", body = Vec<ToolStatus>)),
    tag = "system"
)]
pub async fn list_tools(State(ctx): State<AppContext>) -> Result<Json<Vec<ToolStatus>>, AppError> {
    let tools = ctx.tools.clone();
    // `check_all` runs `-version` synchronously.
    let infos = tokio::task::spawn_blocking(move || tools.check_all())
        .await
        .map_err(|e| sc_core::Error::Internal(format!("tool check failed: {e}")))?;
    Ok(Json(infos.into_iter().map(ToolStatus::from).collect()))
}
