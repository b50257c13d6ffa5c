//! Shared test harness for integration tests.
//!
//! [`TestHarness`] serves the full router on a random port. Compositing uses
//! the real `image` pipeline; probing and encoding are fakes, so these tests
//! run without ffmpeg installed.

#![allow(dead_code)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sc_av::{EncodeRequest, ScratchSpace, ToolRegistry};
use sc_core::config::Config;
use sc_server::conversion::{Coordinator, DurationProbe, Encoder, ImageCompositor, StageLimits};
use sc_server::AppContext;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Reports one second per byte of audio; empty files fail like a corrupt WAV.
pub struct BytesProbe;

#[async_trait]
impl DurationProbe for BytesProbe {
    async fn probe(&self, audio: &Path, _cancel: &CancellationToken) -> sc_core::Result<f64> {
        let len = tokio::fs::metadata(audio).await?.len();
        if len == 0 {
            return Err(sc_core::Error::Probe("no duration reported".into()));
        }
        Ok(len as f64)
    }
}

/// Writes the audio bytes followed by the composited JPEG, so a download can
/// be traced back to the upload that produced it.
pub struct EchoEncoder;

#[async_trait]
impl Encoder for EchoEncoder {
    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: Option<UnboundedSender<f64>>,
        _cancel: &CancellationToken,
    ) -> sc_core::Result<()> {
        let mut body = tokio::fs::read(&request.audio).await?;
        body.extend(tokio::fs::read(&request.image).await?);
        // Let concurrent jobs interleave.
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::fs::write(&request.output, body).await?;
        if let Some(tx) = progress {
            let _ = tx.send(100.0);
        }
        Ok(())
    }
}

/// A running server plus handles into its state.
pub struct TestHarness {
    pub addr: SocketAddr,
    pub ctx: AppContext,
    pub client: reqwest::Client,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

impl TestHarness {
    /// Start a server with default configuration.
    pub async fn start() -> Self {
        Self::with_config(Config::default()).await
    }

    /// Start a server with `config`; scratch and static paths are redirected
    /// into a fresh temp directory.
    pub async fn with_config(mut config: Config) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        config.scratch.dir = dir.path().join("scratch");
        config.server.static_dir = dir.path().join("public");

        let scratch = Arc::new(ScratchSpace::new(&config.scratch.dir).expect("scratch space"));
        let coordinator = Arc::new(Coordinator::new(
            scratch,
            Arc::new(ImageCompositor),
            Arc::new(BytesProbe),
            Arc::new(EchoEncoder),
            StageLimits::from_config(&config.conversion),
        ));
        let ctx = AppContext::new(config, Arc::new(ToolRegistry::default()), coordinator);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        let cancel = CancellationToken::new();
        tokio::spawn(sc_server::serve(listener, ctx.clone(), cancel.clone()));

        Self {
            addr,
            ctx,
            client: reqwest::Client::new(),
            cancel,
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Files currently in scratch space.
    pub fn scratch_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.ctx.coordinator.scratch().root())
            .expect("scratch dir readable")
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        files.sort();
        files
    }

    /// Poll until scratch space is empty, for deletions that land just after
    /// a response completes. Returns whatever is left.
    pub async fn wait_for_empty_scratch(&self) -> Vec<PathBuf> {
        for _ in 0..50 {
            if self.scratch_files().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.scratch_files()
    }

    pub async fn upload(&self, form: reqwest::multipart::Form) -> reqwest::Response {
        self.client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .await
            .expect("upload request failed")
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Encode a solid-colour PNG of the given size.
pub fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("png encode");
    out.into_inner()
}

pub fn file_part(bytes: Vec<u8>, name: &str) -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(bytes).file_name(name.to_string())
}

/// A form with both fields populated.
pub fn full_form(
    image: Vec<u8>,
    image_name: &str,
    audio: Vec<u8>,
    audio_name: &str,
) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .part("image", file_part(image, image_name))
        .part("audio", file_part(audio, audio_name))
}
