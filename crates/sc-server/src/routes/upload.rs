//! POST /upload: receive an image and an audio track, convert them, and
//! answer with a download link.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use sc_av::ScratchSpace;
use sc_core::media::MediaKind;
use sc_core::{ArtifactKind, JobId};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::context::AppContext;
use crate::conversion::{ConversionError, ConversionJob, UploadedFile};
use crate::error::AppError;

pub const SUCCESS_MESSAGE: &str = "Video created successfully!";

/// Successful conversion.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    /// Relative URL; valid for a single download.
    pub download_url: String,
}

/// Multipart form accepted by `/upload`.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    /// PNG, JPG, JPEG, GIF or BMP.
    #[schema(value_type = String, format = Binary)]
    image: Vec<u8>,
    /// MP3, WAV, M4A, AAC or OGG.
    #[schema(value_type = String, format = Binary)]
    audio: Vec<u8>,
}

/// POST /upload
#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Video created", body = UploadResponse),
        (status = 400, description = "Missing or invalid files", body = super::ErrorBody),
        (status = 413, description = "A file exceeds the upload limit", body = super::ErrorBody),
        (status = 500, description = "Conversion failed", body = super::ErrorBody)
    ),
    tag = "conversion"
)]
pub async fn upload(
    State(ctx): State<AppContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let mut multipart = multipart.map_err(|e| {
        tracing::debug!("Rejected upload: {e}");
        AppError::bad_request("Malformed upload")
    })?;

    let mut job = ConversionJob::new(JobId::new());
    let scratch = ctx.coordinator.scratch().clone();

    // Until the coordinator owns the job, partially received files are ours
    // to delete, including when the client goes away mid-upload.
    let mut guard = UploadGuard::new(scratch.clone());
    receive_files(&mut multipart, &mut job, &scratch, &mut guard, ctx.max_upload_bytes()).await?;
    guard.disarm();

    tracing::info!(
        job_id = %job.id(),
        image = job.image.as_ref().map(|f| f.original_name.as_str()),
        audio = job.audio.as_ref().map(|f| f.original_name.as_str()),
        "Upload received"
    );

    // Runs detached so cleanup and registration complete even if the client
    // disconnects while waiting.
    let coordinator = ctx.coordinator.clone();
    let downloads = ctx.downloads.clone();
    let task = tokio::spawn(async move {
        let output = coordinator.run(&mut job).await?;
        Ok::<_, ConversionError>(downloads.register(job.id(), output))
    });

    let filename = task.await.map_err(|e| {
        tracing::error!("Conversion task failed: {e}");
        AppError::internal()
    })??;

    Ok(Json(UploadResponse {
        success: true,
        message: SUCCESS_MESSAGE.into(),
        download_url: format!("/download/{filename}"),
    }))
}

/// Stream the `image` and `audio` fields into scratch space.
///
/// Unknown fields and repeats of an already received field are drained and
/// ignored. A field without a file name does not count as a file.
async fn receive_files(
    multipart: &mut Multipart,
    job: &mut ConversionJob,
    scratch: &ScratchSpace,
    guard: &mut UploadGuard,
    limit: u64,
) -> Result<(), AppError> {
    let job_id = job.id();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let kind = match field.name() {
            Some("image") => MediaKind::Image,
            Some("audio") => MediaKind::Audio,
            other => {
                tracing::debug!(job_id = %job_id, field = ?other, "Ignoring unknown field");
                drain(&mut field).await?;
                continue;
            }
        };

        let already_received = match kind {
            MediaKind::Image => job.image.is_some(),
            MediaKind::Audio => job.audio.is_some(),
        };
        let Some(original_name) = field.file_name().map(str::to_owned) else {
            drain(&mut field).await?;
            continue;
        };
        if already_received {
            tracing::debug!(job_id = %job_id, field = %kind, "Ignoring repeated field");
            drain(&mut field).await?;
            continue;
        }

        let path = scratch.allocate(job_id, ArtifactKind::upload_for(kind));
        guard.track(path.clone());
        let written = write_field(&mut field, &path, limit).await?;
        tracing::debug!(job_id = %job_id, field = %kind, bytes = written, "Stored upload");

        let file = UploadedFile {
            original_name,
            path,
        };
        match kind {
            MediaKind::Image => job.image = Some(file),
            MediaKind::Audio => job.audio = Some(file),
        }
    }

    Ok(())
}

async fn write_field(field: &mut Field<'_>, path: &Path, limit: u64) -> Result<u64, AppError> {
    let mut file = tokio::fs::File::create(path).await.map_err(scratch_error)?;
    let mut written: u64 = 0;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len() as u64;
        if written > limit {
            tracing::info!("Upload exceeded {limit} bytes");
            return Err(AppError::payload_too_large());
        }
        file.write_all(&chunk).await.map_err(scratch_error)?;
    }
    file.flush().await.map_err(scratch_error)?;

    Ok(written)
}

async fn drain(field: &mut Field<'_>) -> Result<(), AppError> {
    while field.chunk().await.map_err(multipart_error)?.is_some() {}
    Ok(())
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::payload_too_large()
    } else {
        tracing::debug!("Malformed multipart body: {e}");
        AppError::bad_request("Malformed upload")
    }
}

fn scratch_error(e: std::io::Error) -> AppError {
    tracing::error!("Failed to store upload: {e}");
    ConversionError::Scratch(e.to_string()).into()
}

/// Deletes tracked upload files on drop unless disarmed.
struct UploadGuard {
    scratch: Arc<ScratchSpace>,
    paths: Vec<PathBuf>,
    armed: bool,
}

impl UploadGuard {
    fn new(scratch: Arc<ScratchSpace>) -> Self {
        Self {
            scratch,
            paths: Vec::new(),
            armed: true,
        }
    }

    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        if self.armed {
            self.scratch
                .release_all(self.paths.iter().map(PathBuf::as_path));
        }
    }
}
