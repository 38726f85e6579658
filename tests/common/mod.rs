//! Shared test harness for integration tests.
//!
//! [`TestHarness`] wires an orchestrator over a [`RecordingStore`] inside a
//! temporary directory, with fakes for the out-of-process collaborators.
//! [`TestHarness::with_server`] starts axum on a random port for HTTP-level
//! testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use rf_av::{ToolRegistry, TranscodeRequest, Transcoder};
use rf_core::config::Config;
use rf_core::events::EventBus;
use rf_core::{Dimensions, Error, FormatCatalog, JobId, Result};
use rf_imaging::{EncodeRequest, Encoded, Encoder, OptimizerChain};
use rf_jobs::{
    FormatTaskRunner, Job, JobStatus, JobStore, JobUpdate, MemoryJobStore, NewJob, Orchestrator,
    OrchestratorSettings, RequestedWork, SubmitOptions, Upload,
};
use rf_server::context::AppContext;
use rf_server::router::build_router;

/// Wait this long for a job to settle before failing a test.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// RecordingStore
// ---------------------------------------------------------------------------

/// A [`MemoryJobStore`] that remembers every state it handed back.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryJobStore,
    seen: Mutex<Vec<(JobId, JobStatus, u8)>>,
}

impl RecordingStore {
    /// `(status, progress)` after each successful write to `id`, starting
    /// with its creation.
    pub fn history(&self, id: JobId) -> Vec<(JobStatus, u8)> {
        self.seen
            .lock()
            .iter()
            .filter(|(job, _, _)| *job == id)
            .map(|(_, status, progress)| (*status, *progress))
            .collect()
    }

    pub fn progress_sequence(&self, id: JobId) -> Vec<u8> {
        self.history(id).into_iter().map(|(_, p)| p).collect()
    }

    fn record(&self, job: &Job) {
        self.seen.lock().push((job.id, job.status, job.progress));
    }
}

impl JobStore for RecordingStore {
    fn create(&self, new: NewJob) -> Result<Job> {
        let job = self.inner.create(new)?;
        self.record(&job);
        Ok(job)
    }

    fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.inner.get(id)
    }

    fn update(&self, id: JobId, update: JobUpdate) -> Result<Option<Job>> {
        let job = self.inner.update(id, update)?;
        if let Some(job) = &job {
            self.record(job);
        }
        Ok(job)
    }

    fn list(&self) -> Result<Vec<Job>> {
        self.inner.list()
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Transcoder for hosts without ffmpeg: every call fails like a missing tool.
pub struct MissingFfmpeg;

#[async_trait]
impl Transcoder for MissingFfmpeg {
    fn name(&self) -> &'static str {
        "missing"
    }

    async fn probe(&self, _input: &Path) -> Result<Dimensions> {
        Err(Error::tool("ffprobe", "not installed"))
    }

    async fn transcode(&self, _input: &Path, _output: &Path, _request: &TranscodeRequest) -> Result<()> {
        Err(Error::tool("ffmpeg", "not installed"))
    }
}

/// Advanced tier that never answers in time.
pub struct StallingOptimizer {
    pub calls: Mutex<usize>,
}

impl StallingOptimizer {
    pub fn new() -> Self {
        Self { calls: Mutex::new(0) }
    }
}

#[async_trait]
impl Encoder for StallingOptimizer {
    fn name(&self) -> &'static str {
        "stalling"
    }

    async fn encode(&self, _input: Bytes, _request: &EncodeRequest) -> Result<Encoded> {
        *self.calls.lock() += 1;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(Error::encode("stalling", "woke up"))
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

pub struct TestHarness {
    pub dir: tempfile::TempDir,
    pub config: Config,
    pub store: Arc<RecordingStore>,
    pub events: Arc<EventBus>,
    pub orchestrator: Orchestrator,
}

impl TestHarness {
    /// Baseline-only optimizer, no ffmpeg, two parallel tasks.
    pub fn new() -> Self {
        Self::build(OptimizerChain::baseline_only(), 2)
    }

    pub fn build(chain: OptimizerChain, max_parallel_tasks: usize) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");

        let mut config = Config::default();
        config.server.upload_dir = dir.path().join("uploads");
        config.server.output_dir = dir.path().join("output");
        config.jobs.max_parallel_tasks = max_parallel_tasks;

        let store = Arc::new(RecordingStore::default());
        let events = Arc::new(EventBus::default());
        let runner = FormatTaskRunner::new(chain, Arc::new(MissingFfmpeg), config.video.clone());
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(FormatCatalog::builtin()),
            runner,
            events.clone(),
            OrchestratorSettings::from_config(&config),
        );

        Self {
            dir,
            config,
            store,
            events,
            orchestrator,
        }
    }

    /// Start an axum server on a random port over this harness.
    pub async fn with_server(self) -> (Self, SocketAddr) {
        let ctx = AppContext::new(
            self.config.clone(),
            self.orchestrator.clone(),
            self.store.clone(),
            Arc::new(ToolRegistry::default()),
        );
        let app = build_router(ctx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (self, addr)
    }

    /// Write a JPEG with some structure to the temp dir.
    pub fn write_jpeg(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, jpeg_bytes(width, height)).expect("failed to write jpeg");
        path
    }

    /// Submit a file already on disk.
    pub async fn submit(&self, path: &Path, mime_type: &str, work: RequestedWork) -> Result<Job> {
        let upload = Upload {
            path: path.to_path_buf(),
            original_file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            mime_type: mime_type.to_string(),
        };
        self.orchestrator
            .submit(upload, work, SubmitOptions::default())
            .await
    }

    pub async fn wait(&self, id: JobId) -> Job {
        self.orchestrator
            .wait_for_terminal(id, JOB_TIMEOUT)
            .await
            .expect("job did not reach a terminal state")
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.server.output_dir
    }
}

/// Encode a gradient JPEG.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .expect("failed to encode jpeg");
    out.into_inner()
}

/// Build a request map from `(platform, [names])` pairs.
pub fn work(entries: &[(&str, &[&str])]) -> RequestedWork {
    entries
        .iter()
        .map(|(platform, names)| {
            (
                platform.to_string(),
                names.iter().map(|n| n.to_string()).collect(),
            )
        })
        .collect()
}
