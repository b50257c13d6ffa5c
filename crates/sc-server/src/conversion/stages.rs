//! Stage seams for the coordinator and their production implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sc_av::{EncodeRequest, Letterbox, ToolRegistry};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Letterboxes the uploaded image onto the output canvas.
#[async_trait]
pub trait Compositor: Send + Sync {
    async fn composite(&self, input: &Path, output: &Path) -> sc_core::Result<Letterbox>;
}

/// Reports an audio track's duration in seconds.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe(&self, audio: &Path, cancel: &CancellationToken) -> sc_core::Result<f64>;
}

/// Produces the output video.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: Option<UnboundedSender<f64>>,
        cancel: &CancellationToken,
    ) -> sc_core::Result<()>;
}

/// [`Compositor`] backed by [`sc_av::composite`] on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct ImageCompositor;

#[async_trait]
impl Compositor for ImageCompositor {
    async fn composite(&self, input: &Path, output: &Path) -> sc_core::Result<Letterbox> {
        let input: PathBuf = input.to_path_buf();
        let output: PathBuf = output.to_path_buf();
        tokio::task::spawn_blocking(move || sc_av::composite(&input, &output))
            .await
            .map_err(|e| sc_core::Error::Internal(format!("compositing task failed: {e}")))?
    }
}

/// [`DurationProbe`] backed by ffprobe.
#[derive(Debug, Clone)]
pub struct FfprobeDurationProbe {
    tools: Arc<ToolRegistry>,
}

impl FfprobeDurationProbe {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn probe(&self, audio: &Path, cancel: &CancellationToken) -> sc_core::Result<f64> {
        sc_av::probe_duration(&self.tools, audio, cancel).await
    }
}

/// [`Encoder`] backed by ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    tools: Arc<ToolRegistry>,
}

impl FfmpegEncoder {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: Option<UnboundedSender<f64>>,
        cancel: &CancellationToken,
    ) -> sc_core::Result<()> {
        sc_av::encode(&self.tools, request, progress, cancel).await
    }
}
