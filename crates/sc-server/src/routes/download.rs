//! GET /download/{filename}: hand a finished video to its uploader, once.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use sc_av::ScratchSpace;
use tokio_util::io::ReaderStream;

use crate::context::AppContext;
use crate::error::AppError;

/// Name the browser saves the video under.
pub const DOWNLOAD_NAME: &str = "video-output.mp4";

const NOT_FOUND: &str = "File not found";

/// GET /download/{filename}
#[utoipa::path(
    get,
    path = "/download/{filename}",
    params(("filename" = String, Path, description = "File name from the upload response's download_url")),
    responses(
        (status = 200, description = "The video; deleted once the response ends", content_type = "video/mp4"),
        (status = 404, description = "Unknown, expired or already downloaded", body = super::ErrorBody)
    ),
    tag = "conversion"
)]
pub async fn download(
    State(ctx): State<AppContext>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let entry = ctx
        .downloads
        .claim(&filename)
        .ok_or_else(|| AppError::not_found(NOT_FOUND))?;

    let scratch = ctx.coordinator.scratch().clone();
    let file = match tokio::fs::File::open(&entry.path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!("Registered output {} unreadable: {e}", entry.path.display());
            scratch.release(&entry.path);
            return Err(AppError::not_found(NOT_FOUND));
        }
    };
    let length = file.metadata().await.ok().map(|m| m.len());

    tracing::info!("Serving download {filename}");

    // The guard rides inside the body stream, so the file is removed when
    // the body is dropped, whether fully sent or aborted.
    let guard = DeleteOnDrop {
        scratch,
        path: entry.path,
    };
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _held = &guard;
        chunk
    });

    Ok(video_response(Body::from_stream(stream), length))
}

/// HEAD /download/{filename}
///
/// Reports whether the download is still available without claiming it.
pub async fn download_head(
    State(ctx): State<AppContext>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let entry = ctx
        .downloads
        .peek(&filename)
        .ok_or_else(|| AppError::not_found(NOT_FOUND))?;
    let length = tokio::fs::metadata(&entry.path)
        .await
        .map_err(|_| AppError::not_found(NOT_FOUND))?
        .len();

    Ok(video_response(Body::empty(), Some(length)))
}

fn video_response(body: Body, length: Option<u64>) -> Response {
    let mut response = (
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{DOWNLOAD_NAME}\""),
            ),
        ],
        body,
    )
        .into_response();

    if let Some(len) = length {
        response.headers_mut().insert(header::CONTENT_LENGTH, len.into());
    }

    response
}

struct DeleteOnDrop {
    scratch: Arc<ScratchSpace>,
    path: PathBuf,
}

impl Drop for DeleteOnDrop {
    fn drop(&mut self) {
        self.scratch.release(&self.path);
    }
}
