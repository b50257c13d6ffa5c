//! # sc-av
//!
//! Media processing for stillcast: everything that touches pixels, samples or
//! external processes.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout,
//!   cancellation and line-by-line stdout streaming.
//! - **Scratch space** ([`ScratchSpace`]) -- job-scoped temporary file names
//!   and idempotent cleanup.
//! - **Compositing** ([`composite`]) -- letterbox a still image onto the
//!   1280x720 black canvas.
//! - **Probing** ([`probe_duration`]) -- read an audio track's duration.
//! - **Encoding** ([`encode`]) -- loop the still over the audio into an MP4.

pub mod command;
pub mod composite;
pub mod encode;
pub mod probe;
pub mod tools;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use composite::{composite, CanvasSpec, Letterbox, CANVAS};
pub use encode::{encode, EncodeRequest, ProgressTracker};
pub use probe::{parse_duration, probe_duration};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use workspace::ScratchSpace;
