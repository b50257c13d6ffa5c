//! Still-image + audio to MP4 encoding using ffmpeg.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Inputs and destination of one encode.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    /// The composited 1280x720 frame.
    pub image: PathBuf,
    pub audio: PathBuf,
    /// Probed audio duration; the output is cut to exactly this length.
    pub duration_secs: f64,
    pub output: PathBuf,
}

impl EncodeRequest {
    /// The full ffmpeg argument list for this request.
    ///
    /// The still is looped for the whole track, `-t` caps the output at the
    /// probed duration and `-shortest` stops at the audio's end should the
    /// probe have overestimated it. Progress goes to stdout as key=value
    /// blocks.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-loop", "1", "-i"]
            .into_iter()
            .map(String::from)
            .collect();
        args.push(path_arg(&self.image));
        args.push("-i".into());
        args.push(path_arg(&self.audio));
        args.extend(
            [
                "-c:v",
                "libx264",
                "-tune",
                "stillimage",
                "-c:a",
                "aac",
                "-b:a",
                "192k",
                "-pix_fmt",
                "yuv420p",
                "-preset",
                "ultrafast",
                "-t",
            ]
            .into_iter()
            .map(String::from),
        );
        args.push(self.duration_secs.to_string());
        args.extend(
            ["-shortest", "-progress", "pipe:1", "-nostats"]
                .into_iter()
                .map(String::from),
        );
        args.push(path_arg(&self.output));
        args
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Incremental parser for ffmpeg `-progress` output.
///
/// Feed it one line at a time; every `progress=` line closes a block and
/// yields the percentage of `duration_secs` encoded so far.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    duration_secs: f64,
    last_out_time_us: Option<i64>,
}

impl ProgressTracker {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            last_out_time_us: None,
        }
    }

    /// Consume one line. Returns a percentage in `0.0..=100.0` at the end of
    /// each progress block.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();
        if let Some(val) = line
            .strip_prefix("out_time_us=")
            .or_else(|| line.strip_prefix("out_time_ms="))
        {
            // N/A before the first frame; keep the previous value.
            if let Ok(us) = val.trim().parse::<i64>() {
                self.last_out_time_us = Some(us);
            }
            None
        } else if let Some(state) = line.strip_prefix("progress=") {
            if state.trim() == "end" {
                return Some(100.0);
            }
            let us = self.last_out_time_us?;
            if self.duration_secs <= 0.0 {
                return None;
            }
            let elapsed = us as f64 / 1_000_000.0;
            Some((elapsed / self.duration_secs * 100.0).clamp(0.0, 100.0))
        } else {
            None
        }
    }
}

/// Loop `request.image` over `request.audio` into an H.264/AAC MP4.
///
/// Percentages are sent on `progress` when given. The child is killed if
/// `cancel` fires. Never retried; on failure the error carries ffmpeg's
/// stderr and any partial output is left for the caller to release.
pub async fn encode(
    tools: &ToolRegistry,
    request: &EncodeRequest,
    progress: Option<UnboundedSender<f64>>,
    cancel: &CancellationToken,
) -> sc_core::Result<()> {
    let ffmpeg = tools.require("ffmpeg")?;

    tracing::info!(
        "Encoding {:?} + {:?} -> {:?} ({:.3}s)",
        request.image,
        request.audio,
        request.output,
        request.duration_secs
    );

    let mut cmd = ToolCommand::new(ffmpeg.path.clone());
    // Deadline is owned by the caller through `cancel`.
    cmd.without_timeout();
    cmd.args(request.ffmpeg_args());

    let mut tracker = ProgressTracker::new(request.duration_secs);
    cmd.execute_streaming(cancel, |line| {
        if let Some(pct) = tracker.feed(line) {
            if let Some(tx) = &progress {
                let _ = tx.send(pct);
            }
        }
    })
    .await?;

    Ok(())
}
