//! Drives a [`ConversionJob`] through validation, compositing, probing and
//! encoding, releasing every scratch file the job no longer needs.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sc_av::{EncodeRequest, ScratchSpace, ToolRegistry};
use sc_core::config::ConversionConfig;
use sc_core::media::{validate_extension, MediaKind, Rejection};
use sc_core::{ArtifactKind, JobStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::job::ConversionJob;
use super::stages::{
    Compositor, DurationProbe, Encoder, FfmpegEncoder, FfprobeDurationProbe, ImageCompositor,
};
use super::{ConversionError, Stage};

/// Deadlines for the stages that run external processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLimits {
    pub probe: Duration,
    pub encode: Duration,
}

impl StageLimits {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            probe: config.probe_timeout(),
            encode: config.encode_timeout(),
        }
    }
}

impl Default for StageLimits {
    fn default() -> Self {
        Self::from_config(&ConversionConfig::default())
    }
}

/// Runs conversion jobs. Cheap to share behind an `Arc`; jobs never share
/// scratch paths, so any number may run concurrently.
pub struct Coordinator {
    scratch: Arc<ScratchSpace>,
    compositor: Arc<dyn Compositor>,
    probe: Arc<dyn DurationProbe>,
    encoder: Arc<dyn Encoder>,
    limits: StageLimits,
}

impl Coordinator {
    pub fn new(
        scratch: Arc<ScratchSpace>,
        compositor: Arc<dyn Compositor>,
        probe: Arc<dyn DurationProbe>,
        encoder: Arc<dyn Encoder>,
        limits: StageLimits,
    ) -> Self {
        Self {
            scratch,
            compositor,
            probe,
            encoder,
            limits,
        }
    }

    /// The production pipeline: `image` for compositing, ffprobe and ffmpeg
    /// from `tools`.
    pub fn with_tools(
        scratch: Arc<ScratchSpace>,
        tools: Arc<ToolRegistry>,
        limits: StageLimits,
    ) -> Self {
        Self::new(
            scratch,
            Arc::new(ImageCompositor),
            Arc::new(FfprobeDurationProbe::new(tools.clone())),
            Arc::new(FfmpegEncoder::new(tools)),
            limits,
        )
    }

    pub fn scratch(&self) -> &Arc<ScratchSpace> {
        &self.scratch
    }

    /// Run `job` to completion.
    ///
    /// On success the job is `Done`, only the output video is left in scratch
    /// space and its path is returned. On failure the job is `Failed` and
    /// every file it created has been released.
    pub async fn run(&self, job: &mut ConversionJob) -> Result<PathBuf, ConversionError> {
        let span = tracing::info_span!("conversion", job_id = %job.id());
        self.drive(job).instrument(span).await
    }

    async fn drive(&self, job: &mut ConversionJob) -> Result<PathBuf, ConversionError> {
        let (image, audio) = match validate(job) {
            Ok(inputs) => inputs,
            Err(rejection) => {
                tracing::info!("Upload rejected: {rejection}");
                let uploads: Vec<PathBuf> =
                    job.upload_paths().into_iter().map(Path::to_path_buf).collect();
                return self.fail(job, rejection.into(), &uploads);
            }
        };

        // Compositing
        job.advance(JobStatus::Compositing);
        let composited = self.scratch.allocate(job.id(), ArtifactKind::CompositedImage);
        let intermediates = vec![image.clone(), audio.clone(), composited.clone()];

        let fit = match self.compositor.composite(&image, &composited).await {
            Ok(fit) => fit,
            Err(e) => {
                let err = ConversionError::from_stage(Stage::Composite, e);
                return self.fail(job, err, &intermediates);
            }
        };
        tracing::debug!(
            "Composited {}x{} image with bands l={} r={} t={} b={}",
            fit.width,
            fit.height,
            fit.left,
            fit.right,
            fit.top,
            fit.bottom
        );

        // Probing
        job.advance(JobStatus::Probing);
        let cancel = CancellationToken::new();
        let probed = bounded(
            Stage::Probe,
            self.limits.probe,
            &cancel,
            self.probe.probe(&audio, &cancel),
        )
        .await;
        let duration_secs = match probed {
            Ok(secs) => secs,
            Err(err) => return self.fail(job, err, &intermediates),
        };
        tracing::info!("Audio duration: {duration_secs:.3}s");

        // Encoding
        job.advance(JobStatus::Encoding);
        let output = self.scratch.allocate(job.id(), ArtifactKind::OutputVideo);
        let request = EncodeRequest {
            image: composited,
            audio,
            duration_secs,
            output: output.clone(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = tokio::spawn(log_progress(rx).in_current_span());
        let cancel = CancellationToken::new();
        let encoded = bounded(
            Stage::Encode,
            self.limits.encode,
            &cancel,
            self.encoder.encode(&request, Some(tx), &cancel),
        )
        .await;
        let _ = reporter.await;

        self.scratch
            .release_all(intermediates.iter().map(PathBuf::as_path));

        match encoded {
            Ok(()) => {
                job.complete(output.clone());
                tracing::info!("Video created successfully: {}", output.display());
                Ok(output)
            }
            Err(err) => self.fail(job, err, &[output]),
        }
    }

    fn fail(
        &self,
        job: &mut ConversionJob,
        err: ConversionError,
        release: &[PathBuf],
    ) -> Result<PathBuf, ConversionError> {
        match &err {
            ConversionError::Validation(_) => {}
            other => tracing::error!(stage = %job.status(), "Conversion failed: {other}"),
        }
        self.scratch.release_all(release.iter().map(PathBuf::as_path));
        job.advance(JobStatus::Failed);
        Err(err)
    }
}

/// Both inputs present and each on its allow-list.
fn validate(job: &ConversionJob) -> Result<(PathBuf, PathBuf), Rejection> {
    let (Some(image), Some(audio)) = (&job.image, &job.audio) else {
        return Err(Rejection::MissingFiles);
    };
    validate_extension(&image.original_name, MediaKind::Image)?;
    validate_extension(&audio.original_name, MediaKind::Audio)?;
    Ok((image.path.clone(), audio.path.clone()))
}

/// How long a cancelled stage gets to kill and reap its child before it is
/// dropped.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Await `work` for at most `limit`.
///
/// On expiry `cancel` fires and `work` is driven to completion (within
/// [`CANCEL_GRACE`]) so the stage can kill its child process before the
/// caller releases the files that process was writing.
async fn bounded<T>(
    stage: Stage,
    limit: Duration,
    cancel: &CancellationToken,
    work: impl Future<Output = sc_core::Result<T>>,
) -> Result<T, ConversionError> {
    tokio::pin!(work);

    tokio::select! {
        res = &mut work => res.map_err(|e| ConversionError::from_stage(stage, e)),
        _ = tokio::time::sleep(limit) => {
            tracing::warn!(%stage, ?limit, "Stage deadline passed; cancelling");
            cancel.cancel();
            if tokio::time::timeout(CANCEL_GRACE, &mut work).await.is_err() {
                tracing::warn!(%stage, "Stage ignored cancellation; dropping it");
            }
            Err(ConversionError::Timeout {
                stage,
                after: limit,
            })
        }
    }
}

/// Log each whole-percent step reported by the encoder.
async fn log_progress(mut rx: mpsc::UnboundedReceiver<f64>) {
    let mut last = None;
    while let Some(pct) = rx.recv().await {
        let whole = pct.floor() as u32;
        if last != Some(whole) {
            tracing::info!("Processing: {whole}% done");
            last = Some(whole);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::job::UploadedFile;
    use async_trait::async_trait;
    use sc_av::{Letterbox, CANVAS};
    use sc_core::JobId;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedSender;

    // ---- fakes ----

    struct FakeCompositor {
        fail: bool,
    }

    #[async_trait]
    impl Compositor for FakeCompositor {
        async fn composite(&self, input: &Path, output: &Path) -> sc_core::Result<Letterbox> {
            std::fs::write(output, b"partial-jpeg")?;
            if self.fail {
                return Err(sc_core::Error::Image(format!("cannot decode {}", input.display())));
            }
            Ok(Letterbox::fit(800, 600, CANVAS))
        }
    }

    enum ProbeBehavior {
        Seconds(f64),
        Fail,
        Hang,
    }

    struct FakeProbe {
        behavior: ProbeBehavior,
        saw_cancel: AtomicBool,
    }

    #[async_trait]
    impl DurationProbe for FakeProbe {
        async fn probe(&self, _audio: &Path, cancel: &CancellationToken) -> sc_core::Result<f64> {
            match self.behavior {
                ProbeBehavior::Seconds(s) => Ok(s),
                ProbeBehavior::Fail => Err(sc_core::Error::Probe("no duration reported".into())),
                ProbeBehavior::Hang => {
                    cancel.cancelled().await;
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    Err(sc_core::Error::Cancelled { tool: "ffprobe".into() })
                }
            }
        }
    }

    #[derive(Clone, Copy)]
    enum EncodeBehavior {
        Succeed,
        Fail,
        Hang,
    }

    struct FakeEncoder {
        behavior: EncodeBehavior,
        seen: Mutex<Vec<EncodeRequest>>,
        saw_cancel: AtomicBool,
    }

    impl FakeEncoder {
        fn new(behavior: EncodeBehavior) -> Self {
            Self {
                behavior,
                seen: Mutex::new(Vec::new()),
                saw_cancel: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Encoder for FakeEncoder {
        async fn encode(
            &self,
            request: &EncodeRequest,
            progress: Option<UnboundedSender<f64>>,
            cancel: &CancellationToken,
        ) -> sc_core::Result<()> {
            self.seen.lock().unwrap().push(request.clone());
            assert!(request.image.exists(), "composited image must exist while encoding");
            assert!(request.audio.exists(), "audio must exist while encoding");
            std::fs::write(&request.output, b"partial-mp4")?;
            if let Some(tx) = &progress {
                let _ = tx.send(50.0);
            }
            match self.behavior {
                EncodeBehavior::Succeed => {
                    std::fs::write(&request.output, b"mp4")?;
                    if let Some(tx) = &progress {
                        let _ = tx.send(100.0);
                    }
                    Ok(())
                }
                EncodeBehavior::Fail => Err(sc_core::Error::tool("ffmpeg", "Conversion failed!")),
                EncodeBehavior::Hang => {
                    cancel.cancelled().await;
                    // The partial output must still be there when the
                    // stage sees the cancellation.
                    assert!(request.output.exists());
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    Err(sc_core::Error::Cancelled { tool: "ffmpeg".into() })
                }
            }
        }
    }

    // ---- harness ----

    struct Setup {
        coordinator: Coordinator,
        scratch: Arc<ScratchSpace>,
        probe: Arc<FakeProbe>,
        encoder: Arc<FakeEncoder>,
    }

    fn setup(compose_fails: bool, probe: ProbeBehavior, encode: EncodeBehavior) -> Setup {
        setup_with_limits(compose_fails, probe, encode, StageLimits::default())
    }

    fn setup_with_limits(
        compose_fails: bool,
        probe: ProbeBehavior,
        encode: EncodeBehavior,
        limits: StageLimits,
    ) -> Setup {
        let scratch = Arc::new(ScratchSpace::ephemeral().unwrap());
        let encoder = Arc::new(FakeEncoder::new(encode));
        let probe = Arc::new(FakeProbe {
            behavior: probe,
            saw_cancel: AtomicBool::new(false),
        });
        let coordinator = Coordinator::new(
            scratch.clone(),
            Arc::new(FakeCompositor { fail: compose_fails }),
            probe.clone(),
            encoder.clone(),
            limits,
        );
        Setup {
            coordinator,
            scratch,
            probe,
            encoder,
        }
    }

    fn upload(scratch: &ScratchSpace, job: JobId, kind: MediaKind, name: &str) -> UploadedFile {
        let path = scratch.allocate(job, ArtifactKind::upload_for(kind));
        std::fs::write(&path, b"bytes").unwrap();
        UploadedFile {
            original_name: name.into(),
            path,
        }
    }

    fn job_with(scratch: &ScratchSpace, image: Option<&str>, audio: Option<&str>) -> ConversionJob {
        let mut job = ConversionJob::new(JobId::new());
        let id = job.id();
        job.image = image.map(|n| upload(scratch, id, MediaKind::Image, n));
        job.audio = audio.map(|n| upload(scratch, id, MediaKind::Audio, n));
        job
    }

    fn scratch_files(scratch: &ScratchSpace) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(scratch.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    // ---- tests ----

    #[tokio::test]
    async fn success_keeps_only_the_output() {
        let s = setup(false, ProbeBehavior::Seconds(5.0), EncodeBehavior::Succeed);
        let mut job = job_with(&s.scratch, Some("cover.PNG"), Some("song.wav"));

        let output = s.coordinator.run(&mut job).await.unwrap();

        assert_eq!(job.status(), JobStatus::Done);
        assert_eq!(job.output_path(), Some(output.as_path()));
        assert_eq!(std::fs::read(&output).unwrap(), b"mp4");
        assert_eq!(
            scratch_files(&s.scratch),
            vec![format!("output_video_{}.mp4", job.id())]
        );
    }

    #[tokio::test]
    async fn encoder_receives_probed_duration_and_job_paths() {
        let s = setup(false, ProbeBehavior::Seconds(187.432), EncodeBehavior::Succeed);
        let mut job = job_with(&s.scratch, Some("a.jpg"), Some("b.mp3"));
        s.coordinator.run(&mut job).await.unwrap();

        let seen = s.encoder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let req = &seen[0];
        assert_eq!(req.duration_secs, 187.432);
        assert_eq!(req.image, s.scratch.allocate(job.id(), ArtifactKind::CompositedImage));
        assert_eq!(req.audio, s.scratch.allocate(job.id(), ArtifactKind::UploadedAudio));
    }

    #[tokio::test]
    async fn missing_audio_is_rejected_and_image_released() {
        let s = setup(false, ProbeBehavior::Seconds(5.0), EncodeBehavior::Succeed);
        let mut job = job_with(&s.scratch, Some("cover.png"), None);

        let err = s.coordinator.run(&mut job).await.unwrap_err();
        assert!(matches!(err, ConversionError::Validation(Rejection::MissingFiles)));
        assert_eq!(err.public_message(), "Both image and audio files are required");
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(scratch_files(&s.scratch).is_empty());
        assert!(s.encoder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_extensions_are_rejected_in_order() {
        let s = setup(false, ProbeBehavior::Seconds(5.0), EncodeBehavior::Succeed);

        let mut job = job_with(&s.scratch, Some("notes.txt"), Some("notes.txt"));
        let err = s.coordinator.run(&mut job).await.unwrap_err();
        assert!(matches!(err, ConversionError::Validation(Rejection::InvalidImageFormat)));

        let mut job = job_with(&s.scratch, Some("a.bmp"), Some("clip.flac"));
        let err = s.coordinator.run(&mut job).await.unwrap_err();
        assert!(matches!(err, ConversionError::Validation(Rejection::InvalidAudioFormat)));

        assert!(scratch_files(&s.scratch).is_empty());
    }

    #[tokio::test]
    async fn composite_failure_releases_everything() {
        let s = setup(true, ProbeBehavior::Seconds(5.0), EncodeBehavior::Succeed);
        let mut job = job_with(&s.scratch, Some("a.png"), Some("b.mp3"));

        let err = s.coordinator.run(&mut job).await.unwrap_err();
        assert!(matches!(err, ConversionError::ImageProcessing(_)));
        assert_eq!(err.http_status(), 500);
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(scratch_files(&s.scratch).is_empty());
    }

    #[tokio::test]
    async fn probe_failure_releases_uploads_and_composite() {
        let s = setup(false, ProbeBehavior::Fail, EncodeBehavior::Succeed);
        let mut job = job_with(&s.scratch, Some("a.png"), Some("broken.wav"));

        let err = s.coordinator.run(&mut job).await.unwrap_err();
        assert!(matches!(err, ConversionError::Probe(_)));
        assert!(scratch_files(&s.scratch).is_empty());
        assert!(job.output_path().is_none());
    }

    #[tokio::test]
    async fn encode_failure_releases_partial_output() {
        let s = setup(false, ProbeBehavior::Seconds(5.0), EncodeBehavior::Fail);
        let mut job = job_with(&s.scratch, Some("a.png"), Some("b.ogg"));

        let err = s.coordinator.run(&mut job).await.unwrap_err();
        assert!(matches!(err, ConversionError::Encode(ref m) if m.contains("Conversion failed!")));
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.output_path().is_none());
        assert!(scratch_files(&s.scratch).is_empty());
    }

    #[tokio::test]
    async fn probe_timeout_cancels_and_cleans_up() {
        let limits = StageLimits {
            probe: Duration::from_millis(50),
            encode: Duration::from_secs(5),
        };
        let s = setup_with_limits(false, ProbeBehavior::Hang, EncodeBehavior::Succeed, limits);
        let mut job = job_with(&s.scratch, Some("a.png"), Some("b.mp3"));

        let err = s.coordinator.run(&mut job).await.unwrap_err();
        assert!(matches!(err, ConversionError::Timeout { stage: Stage::Probe, .. }));
        assert!(
            s.probe.saw_cancel.load(Ordering::SeqCst),
            "running probe must observe the cancellation"
        );
        assert!(scratch_files(&s.scratch).is_empty());
    }

    #[tokio::test]
    async fn encode_timeout_releases_partial_output() {
        let limits = StageLimits {
            probe: Duration::from_secs(5),
            encode: Duration::from_millis(50),
        };
        let s = setup_with_limits(false, ProbeBehavior::Seconds(5.0), EncodeBehavior::Hang, limits);
        let mut job = job_with(&s.scratch, Some("a.png"), Some("b.mp3"));

        let err = s.coordinator.run(&mut job).await.unwrap_err();
        assert!(matches!(
            err,
            ConversionError::Timeout { stage: Stage::Encode, after } if after == Duration::from_millis(50)
        ));
        assert!(s.encoder.saw_cancel.load(Ordering::SeqCst));
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(scratch_files(&s.scratch).is_empty());
    }

    #[tokio::test]
    async fn concurrent_jobs_do_not_share_paths() {
        let s = setup(false, ProbeBehavior::Seconds(1.0), EncodeBehavior::Succeed);
        let coordinator = Arc::new(s.coordinator);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let coordinator = coordinator.clone();
            let mut job = job_with(&s.scratch, Some("a.png"), Some("b.mp3"));
            handles.push(tokio::spawn(async move {
                let out = coordinator.run(&mut job).await.unwrap();
                (job.id(), out)
            }));
        }

        let mut outputs = std::collections::HashSet::new();
        for handle in handles {
            let (id, out) = handle.await.unwrap();
            assert!(out.to_string_lossy().contains(&id.to_string()));
            assert!(outputs.insert(out));
        }
        assert_eq!(scratch_files(&s.scratch).len(), 4);
    }

    #[test]
    fn limits_follow_config() {
        let cfg = ConversionConfig {
            probe_timeout_secs: 7,
            encode_timeout_secs: 70,
        };
        let limits = StageLimits::from_config(&cfg);
        assert_eq!(limits.probe, Duration::from_secs(7));
        assert_eq!(limits.encode, Duration::from_secs(70));
    }
}
