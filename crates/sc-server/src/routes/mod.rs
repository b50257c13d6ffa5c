//! Route handlers for the HTTP API.

pub mod download;
pub mod health;
pub mod tools;
pub mod upload;

use serde::Serialize;

/// Body of every error response.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub error: String,
}
