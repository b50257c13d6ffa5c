//! A single conversion job and its uploaded inputs.

use std::path::{Path, PathBuf};

use sc_core::{JobId, JobStatus};

/// A file received from the uploader and written into scratch space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// The name the client sent; only its extension is trusted.
    pub original_name: String,
    /// Where the bytes were written.
    pub path: PathBuf,
}

/// One image + one audio track on their way to becoming a video.
///
/// Created when an upload arrives and driven to `Done` or `Failed` by the
/// [`Coordinator`](super::Coordinator). `output_path` is set only after the
/// encoder succeeded.
#[derive(Debug)]
pub struct ConversionJob {
    id: JobId,
    pub image: Option<UploadedFile>,
    pub audio: Option<UploadedFile>,
    status: JobStatus,
    output_path: Option<PathBuf>,
}

impl ConversionJob {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            image: None,
            audio: None,
            status: JobStatus::Validating,
            output_path: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// Scratch paths of whichever uploads are present.
    pub fn upload_paths(&self) -> Vec<&Path> {
        [self.image.as_ref(), self.audio.as_ref()]
            .into_iter()
            .flatten()
            .map(|f| f.path.as_path())
            .collect()
    }

    pub(crate) fn advance(&mut self, to: JobStatus) {
        if self.status.can_transition_to(to) {
            tracing::debug!(job_id = %self.id, from = %self.status, to = %to, "Job transition");
            self.status = to;
        } else {
            tracing::warn!(job_id = %self.id, from = %self.status, to = %to, "Ignoring illegal job transition");
        }
    }

    pub(crate) fn complete(&mut self, output: PathBuf) {
        self.advance(JobStatus::Done);
        self.output_path = Some(output);
    }
}
