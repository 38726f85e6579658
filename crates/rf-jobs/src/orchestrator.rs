//! Job orchestrator.
//!
//! Owns the job state machine. `submit` validates, creates the record, and
//! spawns the job; the spawned work runs three phases:
//!
//! - **A**: read (and for images decode) the upload once, ask for a subject
//!   hint, then set progress to 30. Videos get their hint and attention
//!   from a handful of sampled stills.
//! - **B**: run one format task per requested format with bounded
//!   parallelism. Each finished task, successful or not, bumps the
//!   processed count and writes `30 + round(60 * processed / total)`.
//! - **C**: mark the job completed at 100.
//!
//! A task failure is logged and counted. Anything that stops tasks from
//! running at all fails the job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rf_av::{FfmpegTranscoder, ToolRegistry, Transcoder};
use rf_core::config::Config;
use rf_core::events::{EventBus, EventPayload};
use rf_core::{Error, FormatCatalog, JobId, MediaKind, Result};
use rf_imaging::{analyze_subject, HttpVisionAnalyzer, NoopAnalyzer, OptimizerChain, SubjectAnalyzer, SubjectHint};

use crate::job::{total_formats, Job, JobUpdate, NewJob, RequestedWork, SubmitOptions};
use crate::progress::{ProgressTracker, PHASE_A_CHECKPOINT};
use crate::runner::{FormatTaskRunner, TaskError, TaskInput};
use crate::store::JobStore;

/// An uploaded file waiting to be processed.
#[derive(Debug, Clone)]
pub struct Upload {
    pub path: PathBuf,
    pub original_file_name: String,
    pub mime_type: String,
}

/// Tunables of the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Root under which each job gets a `<job_id>/` artifact directory.
    pub output_dir: PathBuf,
    pub max_parallel_tasks: usize,
    pub analysis_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_dir: config.server.output_dir.clone(),
            max_parallel_tasks: config.jobs.max_parallel_tasks,
            analysis_timeout: config.analysis.timeout(),
        }
    }
}

struct Inner {
    store: Arc<dyn JobStore>,
    catalog: Arc<FormatCatalog>,
    runner: FormatTaskRunner,
    analyzer: Arc<dyn SubjectAnalyzer>,
    events: Arc<EventBus>,
    settings: OrchestratorSettings,
}

/// Cheaply cloneable handle to the job engine.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        catalog: Arc<FormatCatalog>,
        runner: FormatTaskRunner,
        events: Arc<EventBus>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                catalog,
                runner,
                analyzer: Arc::new(NoopAnalyzer),
                events,
                settings,
            }),
        }
    }

    /// Replace the subject analyzer. Must be called before the handle is
    /// cloned.
    pub fn with_analyzer(self, analyzer: Arc<dyn SubjectAnalyzer>) -> Self {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => {
                tracing::warn!("orchestrator already shared; analyzer not replaced");
                return Self { inner: shared };
            }
        };
        Self {
            inner: Arc::new(Inner { analyzer, ..inner }),
        }
    }

    /// Wire the production collaborators from config.
    pub fn from_config(
        config: &Config,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn JobStore>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let catalog = Arc::new(config.format_catalog()?);
        let chain = OptimizerChain::from_config(&tools, &config.optimizer);
        let transcoder: Arc<dyn Transcoder> =
            Arc::new(FfmpegTranscoder::new(tools, config.video.clone()));
        let runner = FormatTaskRunner::new(chain, transcoder, config.video.clone())
            .with_placeholder_on_failure(config.jobs.video_placeholder_on_failure);

        let orchestrator = Self::new(
            store,
            catalog,
            runner,
            events,
            OrchestratorSettings::from_config(config),
        );
        Ok(match HttpVisionAnalyzer::from_config(&config.analysis) {
            Some(analyzer) => orchestrator.with_analyzer(Arc::new(analyzer)),
            None => orchestrator,
        })
    }

    pub fn catalog(&self) -> &FormatCatalog {
        &self.inner.catalog
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Validate and create a job, then start it in the background.
    ///
    /// Returns as soon as the record exists, in `processing` at progress 0.
    pub async fn submit(
        &self,
        upload: Upload,
        requested_work: RequestedWork,
        options: SubmitOptions,
    ) -> Result<Job> {
        if total_formats(&requested_work) == 0 {
            return Err(Error::Validation("no formats selected".into()));
        }
        if MediaKind::from_mime(&upload.mime_type).is_none() {
            return Err(Error::Validation(format!(
                "unsupported media type: {}",
                upload.mime_type
            )));
        }
        let file_size = match tokio::fs::metadata(&upload.path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                return Err(Error::Validation(format!(
                    "input file not found: {}",
                    upload.path.display()
                )))
            }
        };

        let job = self.inner.store.create(NewJob {
            original_file_name: upload.original_file_name.clone(),
            file_size,
            mime_type: upload.mime_type.clone(),
            requested_work,
        })?;

        tracing::info!(
            job_id = %job.id,
            file = %job.original_file_name,
            mime = %job.mime_type,
            formats = job.total_formats(),
            "job submitted"
        );
        self.inner.events.broadcast(EventPayload::JobCreated {
            job_id: job.id,
            total_formats: job.total_formats(),
        });

        let inner = self.inner.clone();
        let spawned = job.clone();
        tokio::spawn(async move {
            inner.run_job(spawned, upload.path, options).await;
        });

        Ok(job)
    }

    pub fn get_job(&self, id: JobId) -> Result<Job> {
        self.inner
            .store
            .get(id)?
            .ok_or_else(|| Error::not_found("job", id))
    }

    /// Every job, newest first.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        self.inner.store.list()
    }

    /// Wait until the job is completed or failed.
    pub async fn wait_for_terminal(&self, id: JobId, timeout: Duration) -> Result<Job> {
        let mut rx = self.inner.events.subscribe();
        let wait = async {
            loop {
                let job = self.get_job(id)?;
                if job.is_terminal() {
                    return Ok(job);
                }
                match rx.recv().await {
                    Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        return Err(Error::Internal("event bus closed".into()));
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Internal(format!("job {id} did not finish within {timeout:?}")))?
    }
}

impl Inner {
    async fn run_job(&self, job: Job, input_path: PathBuf, options: SubmitOptions) {
        let id = job.id;
        match self.drive(&job, &input_path, options).await {
            Ok(done) => {
                if done.results.is_empty() && done.total_formats() > 0 {
                    tracing::warn!(job_id = %id, "job completed without any successful format");
                }
                tracing::info!(job_id = %id, results = done.results.len(), "job completed");
                self.events.broadcast(EventPayload::JobCompleted {
                    job_id: id,
                    results: done.results.len(),
                });
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(job_id = %id, error = %message, "job failed");
                if let Err(store_err) = self.store.update(id, JobUpdate::failed(&message)) {
                    tracing::error!(job_id = %id, error = %store_err, "could not record job failure");
                }
                self.events.broadcast(EventPayload::JobFailed {
                    job_id: id,
                    error: message,
                });
            }
        }
    }

    async fn drive(&self, job: &Job, input_path: &Path, options: SubmitOptions) -> Result<Job> {
        let id = job.id;

        // Phase A
        let mut input = TaskInput::prepare(
            id,
            input_path,
            &job.mime_type,
            &self.settings.output_dir,
            options,
        )
        .await?;

        let hint = match input.image_bytes() {
            Some(bytes) => {
                analyze_subject(
                    self.analyzer.as_ref(),
                    bytes,
                    &job.mime_type,
                    self.settings.analysis_timeout,
                )
                .await
            }
            None => self.analyze_video(&mut input).await,
        };
        self.write(id, JobUpdate::progress(PHASE_A_CHECKPOINT))?;
        self.events.broadcast(EventPayload::JobProgress {
            job_id: id,
            progress: PHASE_A_CHECKPOINT,
            phase: "prepared".into(),
        });

        // Phase B
        let total = total_formats(&job.requested_work);
        if total > 0 {
            tokio::fs::create_dir_all(&input.output_dir).await?;
            self.run_formats(job, &input, hint.as_ref(), total).await?;
        }

        // Phase C
        self.write(id, JobUpdate::completed())
    }

    /// Sample stills from a video and fold their subject hints into one.
    async fn analyze_video(&self, input: &mut TaskInput) -> Option<SubjectHint> {
        let frames = self.runner.sample_video(input).await;
        if frames.is_empty() {
            return None;
        }

        let timeout = self.settings.analysis_timeout;
        let hints: Vec<SubjectHint> = futures::future::join_all(
            frames
                .iter()
                .map(|frame| analyze_subject(self.analyzer.as_ref(), frame, "image/png", timeout)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        let hint = SubjectHint::combine(&hints);
        tracing::debug!(
            job_id = %input.job_id,
            frames = frames.len(),
            hints = hints.len(),
            subject = hint.is_some(),
            "video analysis finished"
        );
        hint
    }

    async fn run_formats(
        &self,
        job: &Job,
        input: &TaskInput,
        hint: Option<&SubjectHint>,
        total: usize,
    ) -> Result<()> {
        let id = job.id;
        let tracker = ProgressTracker::new(total);
        let parallel = self.settings.max_parallel_tasks.max(1);

        let work: Vec<(String, String)> = job
            .requested_work
            .iter()
            .flat_map(|(platform, names)| names.iter().map(move |name| (platform.clone(), name.clone())))
            .collect();

        let mut finished = futures::stream::iter(work)
            .map(|(platform, name)| async move { self.run_format(input, &platform, &name, hint).await })
            .buffer_unordered(parallel);

        while let Some(outcome) = finished.next().await {
            let mut update = JobUpdate::default();
            match outcome {
                Ok(result) => {
                    tracing::info!(
                        job_id = %id,
                        platform = %result.platform,
                        format = %result.format,
                        optimized = result.optimized,
                        bytes = result.file_size,
                        "format completed"
                    );
                    self.events.broadcast(EventPayload::FormatCompleted {
                        job_id: id,
                        platform: result.platform.clone(),
                        format: result.format.clone(),
                        optimized: result.optimized,
                    });
                    update = update.with_result(result);
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %id,
                        platform = %e.platform,
                        format = %e.format,
                        error = %e.cause,
                        "format failed"
                    );
                    self.events.broadcast(EventPayload::FormatFailed {
                        job_id: id,
                        platform: e.platform,
                        format: e.format,
                        error: e.cause.to_string(),
                    });
                }
            }

            let progress = tracker.record();
            self.write(id, update.with_progress(progress))?;
            self.events.broadcast(EventPayload::JobProgress {
                job_id: id,
                progress,
                phase: "formats".into(),
            });
        }
        Ok(())
    }

    async fn run_format(
        &self,
        input: &TaskInput,
        platform: &str,
        name: &str,
        hint: Option<&SubjectHint>,
    ) -> std::result::Result<crate::job::FormatResult, TaskError> {
        let spec = self.catalog.get(platform, name).ok_or_else(|| {
            TaskError::new(platform, name, Error::not_found("format", format!("{platform}/{name}")))
        })?;
        self.runner.run(input, spec, hint).await
    }

    /// Apply an update, treating a vanished record as a persistence failure.
    fn write(&self, id: JobId, update: JobUpdate) -> Result<Job> {
        self.store
            .update(id, update)?
            .ok_or_else(|| Error::Persistence(format!("job {id} disappeared from the store")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::store::MemoryJobStore;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use image::{ImageFormat, Rgb, RgbImage};
    use rf_core::config::VideoConfig;
    use rf_core::Dimensions;
    use rf_imaging::{BoundingBox, CropStrategy};
    use std::io::Cursor;

    struct NoVideo;

    #[async_trait]
    impl Transcoder for NoVideo {
        fn name(&self) -> &'static str {
            "none"
        }

        async fn probe(&self, _input: &Path) -> Result<Dimensions> {
            Err(Error::tool("ffprobe", "not installed"))
        }

        async fn transcode(
            &self,
            _input: &Path,
            _output: &Path,
            _request: &rf_av::TranscodeRequest,
        ) -> Result<()> {
            Err(Error::tool("ffmpeg", "not installed"))
        }
    }

    /// Landscape video that transcodes instantly and yields flat stills.
    struct StillVideo;

    #[async_trait]
    impl Transcoder for StillVideo {
        fn name(&self) -> &'static str {
            "still"
        }

        async fn probe(&self, _input: &Path) -> Result<Dimensions> {
            Ok(Dimensions::new(1920, 1080))
        }

        async fn transcode(
            &self,
            _input: &Path,
            output: &Path,
            _request: &rf_av::TranscodeRequest,
        ) -> Result<()> {
            tokio::fs::write(output, b"mp4").await?;
            Ok(())
        }

        async fn sample_frames(&self, _input: &Path, count: usize) -> Result<Vec<Vec<u8>>> {
            let mut buf = Cursor::new(Vec::new());
            image::DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 36, Rgb([50, 50, 50])))
                .write_to(&mut buf, ImageFormat::Png)
                .unwrap();
            Ok(vec![buf.into_inner(); count])
        }
    }

    /// Reports a subject near the right edge of every image it sees.
    struct RightSubject;

    #[async_trait]
    impl SubjectAnalyzer for RightSubject {
        fn name(&self) -> &'static str {
            "right"
        }

        async fn analyze(&self, _image: &[u8], _mime_type: &str) -> Result<SubjectHint> {
            Ok(SubjectHint {
                bounding_box: Some(BoundingBox { x: 85.0, y: 30.0, width: 10.0, height: 40.0 }),
                confidence: 0.8,
                ..SubjectHint::default()
            })
        }
    }

    fn orchestrator(output_dir: &Path) -> Orchestrator {
        orchestrator_with(output_dir, Arc::new(NoVideo))
    }

    fn orchestrator_with(output_dir: &Path, transcoder: Arc<dyn Transcoder>) -> Orchestrator {
        let runner = FormatTaskRunner::new(
            OptimizerChain::baseline_only(),
            transcoder,
            VideoConfig::default(),
        );
        Orchestrator::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(FormatCatalog::builtin()),
            runner,
            Arc::new(EventBus::default()),
            OrchestratorSettings {
                output_dir: output_dir.to_path_buf(),
                max_parallel_tasks: 2,
                analysis_timeout: Duration::from_secs(1),
            },
        )
    }

    fn upload(path: PathBuf, mime: &str) -> Upload {
        Upload {
            original_file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path,
            mime_type: mime.into(),
        }
    }

    fn work(pairs: &[(&str, &[&str])]) -> RequestedWork {
        pairs
            .iter()
            .map(|(p, names)| (p.to_string(), names.iter().map(|n| n.to_string()).collect()))
            .collect()
    }

    fn png(dir: &Path) -> PathBuf {
        let path = dir.join("in.png");
        RgbImage::from_fn(120, 80, |x, y| Rgb([x as u8, y as u8, 0]))
            .save(&path)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let err = orch
            .submit(upload(png(dir.path()), "image/png"), RequestedWork::new(), SubmitOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Validation(_));
        assert!(orch.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_mime_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let err = orch
            .submit(
                upload(png(dir.path()), "application/pdf"),
                work(&[("instagram", &["Square"])]),
                SubmitOptions::default(),
            )
            .await
            .unwrap_err();
        assert_matches!(err, Error::Validation(_));
    }

    #[tokio::test]
    async fn missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let err = orch
            .submit(
                upload(dir.path().join("nope.png"), "image/png"),
                work(&[("instagram", &["Square"])]),
                SubmitOptions::default(),
            )
            .await
            .unwrap_err();
        assert_matches!(err, Error::Validation(_));
    }

    #[tokio::test]
    async fn submit_returns_processing_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let job = orch
            .submit(
                upload(png(dir.path()), "image/png"),
                work(&[("instagram", &["Square"])]),
                SubmitOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 0);
        assert_eq!(job.file_size, std::fs::metadata(dir.path().join("in.png")).unwrap().len());

        let done = orch.wait_for_terminal(job.id, Duration::from_secs(30)).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.results.len(), 1);
    }

    #[tokio::test]
    async fn platforms_without_formats_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let err = orch
            .submit(
                upload(png(dir.path()), "image/png"),
                work(&[("instagram", &[]), ("twitter", &[])]),
                SubmitOptions::default(),
            )
            .await
            .unwrap_err();
        assert_matches!(err, Error::Validation(ref m) if m.contains("no formats"));
        assert!(orch.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn video_stills_feed_the_subject_crop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![0u8; 256]).unwrap();
        let orch = orchestrator_with(dir.path(), Arc::new(StillVideo))
            .with_analyzer(Arc::new(RightSubject));

        let job = orch
            .submit(
                upload(path, "video/mp4"),
                work(&[("instagram", &["Square"])]),
                SubmitOptions::default(),
            )
            .await
            .unwrap();
        let done = orch.wait_for_terminal(job.id, Duration::from_secs(10)).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.results[0].crop_strategy, Some(CropStrategy::Subject));
    }

    #[tokio::test]
    async fn flat_video_stills_without_analysis_stay_centered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![0u8; 256]).unwrap();
        let orch = orchestrator_with(dir.path(), Arc::new(StillVideo));

        let job = orch
            .submit(
                upload(path, "video/mp4"),
                work(&[("instagram", &["Square"])]),
                SubmitOptions::default(),
            )
            .await
            .unwrap();
        let done = orch.wait_for_terminal(job.id, Duration::from_secs(10)).await.unwrap();
        assert_eq!(done.results[0].crop_strategy, Some(CropStrategy::Center));
    }

    #[tokio::test]
    async fn undecodable_input_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.jpg");
        std::fs::write(&path, b"this is not an image").unwrap();
        let orch = orchestrator(dir.path());

        let job = orch
            .submit(
                upload(path, "image/jpeg"),
                work(&[("instagram", &["Square", "Story"])]),
                SubmitOptions::default(),
            )
            .await
            .unwrap();
        let done = orch.wait_for_terminal(job.id, Duration::from_secs(10)).await.unwrap();
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error.unwrap().contains("decode"));
        assert!(done.progress < 100);
    }

    #[tokio::test]
    async fn failed_video_tasks_still_complete_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![0u8; 128]).unwrap();
        let orch = orchestrator(dir.path());

        let job = orch
            .submit(
                upload(path, "video/mp4"),
                work(&[("tiktok", &["Video"]), ("youtube", &["Shorts"])]),
                SubmitOptions::default(),
            )
            .await
            .unwrap();
        let done = orch.wait_for_terminal(job.id, Duration::from_secs(10)).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.results.is_empty());

        let failures = orch
            .events()
            .history(job.id)
            .into_iter()
            .filter(|e| matches!(e.payload, EventPayload::FormatFailed { .. }))
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        assert_matches!(orch.get_job(JobId::new()), Err(Error::NotFound { .. }));
    }
}
