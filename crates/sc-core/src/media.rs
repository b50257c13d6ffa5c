//! Media-domain rules: which uploads are accepted, what a job produces, and
//! the states a job moves through.
//!
//! All enums serialize in snake_case and implement `Display` manually for a
//! consistent string representation in logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::ids::JobId;

/// Image extensions accepted for upload (lowercase, without the dot).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];

/// Audio extensions accepted for upload (lowercase, without the dot).
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac", "ogg"];

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// The two input roles a conversion job needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    /// The allow-list of extensions for this kind.
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Image => IMAGE_EXTENSIONS,
            Self::Audio => AUDIO_EXTENSIONS,
        }
    }

    /// The multipart field name that carries this kind of file.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }

    /// The rejection reported when a filename fails this kind's allow-list.
    pub fn rejection(&self) -> Rejection {
        match self {
            Self::Image => Rejection::InvalidImageFormat,
            Self::Audio => Rejection::InvalidAudioFormat,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

// ---------------------------------------------------------------------------
// Extension validation
// ---------------------------------------------------------------------------

/// Why an upload was refused before any processing started.
///
/// The `Display` text is the exact message returned to the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Both image and audio files are required")]
    MissingFiles,
    #[error("Invalid image format. Use PNG, JPG, JPEG, GIF, or BMP")]
    InvalidImageFormat,
    #[error("Invalid audio format. Use MP3, WAV, M4A, AAC, or OGG")]
    InvalidAudioFormat,
}

/// Lowercased suffix after the last dot of `filename`, if any.
///
/// A name whose only dot is the leading one (`.png`) has no extension.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

/// Check `filename` against a lowercase allow-list, case-insensitively.
///
/// # Examples
///
/// ```
/// use sc_core::media::{has_allowed_extension, IMAGE_EXTENSIONS};
///
/// assert!(has_allowed_extension("A.PNG", IMAGE_EXTENSIONS));
/// assert!(!has_allowed_extension("notes.txt", IMAGE_EXTENSIONS));
/// ```
pub fn has_allowed_extension(filename: &str, allowed: &[&str]) -> bool {
    extension_of(filename)
        .map(|ext| allowed.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Validate an uploaded filename for the given role.
pub fn validate_extension(filename: &str, kind: MediaKind) -> Result<(), Rejection> {
    if has_allowed_extension(filename, kind.allowed_extensions()) {
        Ok(())
    } else {
        Err(kind.rejection())
    }
}

// ---------------------------------------------------------------------------
// ArtifactKind
// ---------------------------------------------------------------------------

/// Every scratch file a job can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    UploadedImage,
    UploadedAudio,
    CompositedImage,
    OutputVideo,
}

impl ArtifactKind {
    /// Scratch file name for this artifact, unique per (job, kind).
    pub fn file_name(&self, job_id: JobId) -> String {
        match self {
            Self::UploadedImage => format!("{job_id}-image.upload"),
            Self::UploadedAudio => format!("{job_id}-audio.upload"),
            Self::CompositedImage => format!("{job_id}-composited.jpg"),
            Self::OutputVideo => output_file_name(job_id),
        }
    }

    /// The upload artifact for an input role.
    pub fn upload_for(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => Self::UploadedImage,
            MediaKind::Audio => Self::UploadedAudio,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UploadedImage => write!(f, "uploaded_image"),
            Self::UploadedAudio => write!(f, "uploaded_audio"),
            Self::CompositedImage => write!(f, "composited_image"),
            Self::OutputVideo => write!(f, "output_video"),
        }
    }
}

const OUTPUT_PREFIX: &str = "output_video_";
const OUTPUT_SUFFIX: &str = ".mp4";

/// Public file name of a job's output video, as it appears in download URLs.
pub fn output_file_name(job_id: JobId) -> String {
    format!("{OUTPUT_PREFIX}{job_id}{OUTPUT_SUFFIX}")
}

/// Recover the job id from an output file name produced by [`output_file_name`].
pub fn job_id_from_output_name(name: &str) -> Option<JobId> {
    name.strip_prefix(OUTPUT_PREFIX)?
        .strip_suffix(OUTPUT_SUFFIX)?
        .parse()
        .ok()
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a conversion job.
///
/// `Validating → Compositing → Probing → Encoding → Done`, with a transition
/// to `Failed` allowed from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Validating,
    Compositing,
    Probing,
    Encoding,
    Done,
    Failed,
}

impl JobStatus {
    /// Whether the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// The next state on the success path, if any.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Validating => Some(Self::Compositing),
            Self::Compositing => Some(Self::Probing),
            Self::Probing => Some(Self::Encoding),
            Self::Encoding => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(&self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validating => write!(f, "validating"),
            Self::Compositing => write!(f, "compositing"),
            Self::Probing => write!(f, "probing"),
            Self::Encoding => write!(f, "encoding"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
