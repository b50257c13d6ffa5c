//! The conversion pipeline: one uploaded image and one audio track in, one
//! letterboxed MP4 out.
//!
//! [`Coordinator`] drives a [`ConversionJob`] through its stages and owns the
//! cleanup of every scratch file the job creates. Stages are reached through
//! the traits in [`stages`] so the coordinator can run against fakes.

pub mod coordinator;
pub mod job;
pub mod stages;

use std::fmt;
use std::time::Duration;

use sc_core::media::Rejection;

pub use coordinator::{Coordinator, StageLimits};
pub use job::{ConversionJob, UploadedFile};
pub use stages::{
    Compositor, DurationProbe, Encoder, FfmpegEncoder, FfprobeDurationProbe, ImageCompositor,
};

/// Text returned to the client for every non-validation failure.
pub const GENERIC_FAILURE: &str = "Failed to create video. Check the console for details.";

/// The stages that can fail after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Composite,
    Probe,
    Encode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Composite => write!(f, "composite"),
            Self::Probe => write!(f, "probe"),
            Self::Encode => write!(f, "encode"),
        }
    }
}

/// Why a conversion job failed.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// The upload was refused before any processing.
    #[error(transparent)]
    Validation(#[from] Rejection),

    #[error("image processing failed: {0}")]
    ImageProcessing(String),

    #[error("audio probe failed: {0}")]
    Probe(String),

    #[error("encoding failed: {0}")]
    Encode(String),

    /// A stage ran past its deadline and was cancelled.
    #[error("{stage} stage timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    /// Writing an upload into scratch space failed.
    #[error("scratch space error: {0}")]
    Scratch(String),
}

impl ConversionError {
    /// Wrap a library error raised inside `stage`.
    pub fn from_stage(stage: Stage, err: sc_core::Error) -> Self {
        if let sc_core::Error::Timeout { after, .. } = err {
            return Self::Timeout { stage, after };
        }
        let detail = err.to_string();
        match stage {
            Stage::Composite => Self::ImageProcessing(detail),
            Stage::Probe => Self::Probe(detail),
            Stage::Encode => Self::Encode(detail),
        }
    }

    /// The message safe to show the uploader.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(rejection) => rejection.to_string(),
            _ => GENERIC_FAILURE.to_string(),
        }
    }

    /// HTTP status for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            _ => 500,
        }
    }
}
