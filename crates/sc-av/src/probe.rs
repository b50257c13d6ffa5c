//! Audio duration probing via the `ffprobe` CLI.
//!
//! Shells out to `ffprobe -v error -print_format json -show_format` and reads
//! `format.duration`. There is no fallback: a track without a usable
//! duration is a probe error.

use std::path::Path;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Probe the duration of `audio` in seconds.
///
/// The child is killed if `cancel` fires.
pub async fn probe_duration(
    tools: &ToolRegistry,
    audio: &Path,
    cancel: &CancellationToken,
) -> sc_core::Result<f64> {
    let ffprobe = tools.require("ffprobe")?;

    let mut cmd = ToolCommand::new(ffprobe.path.clone());
    cmd.args(["-v", "error", "-print_format", "json", "-show_format"]);
    cmd.arg(audio.to_string_lossy().as_ref());

    let output = cmd.execute_streaming(cancel, |_| {}).await?;
    let seconds = parse_duration(&output.stdout)?;

    tracing::debug!("Probed {}: {seconds:.3}s", audio.display());
    Ok(seconds)
}

/// Extract a strictly positive, finite `format.duration` from ffprobe JSON.
pub fn parse_duration(json: &str) -> sc_core::Result<f64> {
    let parsed: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| sc_core::Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let raw = parsed
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| sc_core::Error::Probe("no duration reported".into()))?;

    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|_| sc_core::Error::Probe(format!("unparseable duration '{raw}'")))?;

    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(sc_core::Error::Probe(format!(
            "duration must be positive, got '{raw}'"
        )));
    }

    Ok(seconds)
}
