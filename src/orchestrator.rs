//! Job Orchestrator: drives a job from submission to a terminal status.
//!
//! `submit` records the job and hands its id to a [`Dispatcher`]. Whoever
//! consumes the dispatched ids (see [`crate::worker`]) calls [`Orchestrator::run`],
//! which moves the job through preprocessing, model loading, transcription and
//! finalization. Failures below the job boundary are retried or skipped;
//! whatever is left becomes the job's terminal status and message.

use crate::audio::{AudioBuffer, AudioDecoder};
use crate::checkpoint::{Checkpoint, CheckpointStore, Stage};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Result, ScribedError};
use crate::job::{Job, JobId, JobOptions, JobRepository, JobStatus};
use crate::model::ModelManager;
use crate::pipeline::{ChunkPipeline, PipelineSettings, SegmentMerger, Window, WindowObserver};
use crate::resilience::{CircuitBreaker, RetryPolicy};
use crate::store::{KeySpace, SharedStore};
use crate::stt::{ModelLoader, Segment};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Hands submitted job ids to whatever executes them.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, job_id: &JobId) -> Result<()>;
}

/// Dispatcher that only records ids; the caller runs jobs itself.
#[derive(Debug, Default)]
pub struct ManualDispatcher {
    dispatched: Mutex<Vec<JobId>>,
}

impl ManualDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids dispatched so far, oldest first.
    pub fn dispatched(&self) -> Vec<JobId> {
        self.dispatched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Dispatcher for ManualDispatcher {
    async fn dispatch(&self, job_id: &JobId) -> Result<()> {
        self.dispatched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job_id.clone());
        Ok(())
    }
}

/// External collaborators the orchestrator is wired to.
pub struct OrchestratorParts {
    pub store: Arc<dyn SharedStore>,
    pub loader: Arc<dyn ModelLoader>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub clock: Arc<dyn Clock>,
}

/// A failure tagged with the stage it happened in.
#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    error: ScribedError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageFailure>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, StageFailure> {
        self.map_err(|error| StageFailure { stage, error })
    }
}

pub struct Orchestrator {
    jobs: JobRepository,
    checkpoints: CheckpointStore,
    model: Arc<ModelManager>,
    breaker: Arc<CircuitBreaker>,
    pipeline: ChunkPipeline,
    decoder: Arc<dyn AudioDecoder>,
    dispatcher: Arc<dyn Dispatcher>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    chunk_threshold_secs: f64,
    cancel_flags: Mutex<HashMap<JobId, Arc<AtomicBool>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("jobs", &self.jobs)
            .field("pipeline", &self.pipeline)
            .field("chunk_threshold_secs", &self.chunk_threshold_secs)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(config: &Config, parts: OrchestratorParts) -> Self {
        let keys = KeySpace::new(config.store.key_prefix.clone());
        let breaker = Arc::new(CircuitBreaker::new(
            config.circuit.failure_threshold,
            config.circuit.cool_down(),
            parts.clock.clone(),
        ));
        let model = Arc::new(ModelManager::new(
            parts.loader,
            breaker.clone(),
            config.pipeline.infer_timeout_multiplier,
        ));
        let checkpoints = CheckpointStore::new(
            parts.store.clone(),
            keys.clone(),
            config.store.checkpoint_ttl(),
        );
        let retry = RetryPolicy::from(&config.retry);
        let pipeline = ChunkPipeline::new(
            model.clone(),
            checkpoints.clone(),
            retry.clone(),
            parts.clock.clone(),
            PipelineSettings::from(&config.pipeline),
        );

        Self {
            jobs: JobRepository::new(parts.store, keys, config.store.job_retention()),
            checkpoints,
            model,
            breaker,
            pipeline,
            decoder: parts.decoder,
            dispatcher: parts.dispatcher,
            retry,
            clock: parts.clock,
            chunk_threshold_secs: config.pipeline.chunk_threshold_secs,
            cancel_flags: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the retry policy used for model loads and inference.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.pipeline = ChunkPipeline::new(
            self.model.clone(),
            self.checkpoints.clone(),
            retry.clone(),
            self.clock.clone(),
            self.pipeline.settings().clone(),
        );
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &Arc<ModelManager> {
        &self.model
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Records a job for `input` and dispatches it.
    ///
    /// The job id is derived from the file content and `options`. When a
    /// job with that id exists and has not failed, it is returned unchanged
    /// and nothing is dispatched; a cancelled job is restarted with
    /// [`Orchestrator::resume`]. A failed job is requeued from scratch.
    pub async fn submit(&self, input: &Path, options: JobOptions) -> Result<Job> {
        options.validate()?;
        let bytes = tokio::fs::read(input)
            .await
            .map_err(|e| ScribedError::AudioUnreadable {
                message: format!("{}: {e}", input.display()),
            })?;
        let id = JobId::derive(&bytes, &options)?;

        let job = match self.jobs.load(&id).await? {
            Some(existing) if existing.status != JobStatus::Failed => {
                info!(job_id = %id, status = %existing.status, "Duplicate submission, returning existing job");
                return Ok(existing);
            }
            Some(mut previous) => {
                info!(job_id = %id, "Resubmitting failed job");
                previous.requeue()?;
                previous.input_path = Some(input.to_path_buf());
                // Starts over, skipped windows included.
                self.checkpoints.clear(&id).await?;
                previous
            }
            None => Job::new(id, options, Some(input.to_path_buf()), self.clock.now()),
        };

        self.jobs.clear_cancel(&job.id).await?;
        self.jobs.save(&job).await?;
        self.dispatcher.dispatch(&job.id).await?;
        info!(job_id = %job.id, input = %input.display(), "Job submitted");
        Ok(job)
    }

    /// Current record of a job.
    pub async fn job(&self, id: &JobId) -> Result<Job> {
        self.jobs
            .load(id)
            .await?
            .ok_or_else(|| ScribedError::JobNotFound { id: id.to_string() })
    }

    /// Runs a job to a terminal status.
    ///
    /// Failures are reported through the returned job's status and message;
    /// `Err` means the job could not be read or written at all. A job that is
    /// already terminal is returned as is.
    pub async fn run(&self, id: &JobId) -> Result<Job> {
        let mut job = self.job(id).await?;
        if job.status.is_terminal() {
            debug!(job_id = %id, status = %job.status, "Job already finished");
            return Ok(job);
        }

        let flag = self.register(id);
        let outcome = self.execute(&mut job, &flag).await;
        self.unregister(id);

        let now = self.clock.now();
        match outcome {
            Ok(()) => {
                info!(
                    job_id = %id,
                    segments = job.segments.len(),
                    note = job.error_message.as_deref().unwrap_or(""),
                    "Job completed"
                );
            }
            Err(StageFailure {
                error: ScribedError::Cancelled { .. },
                stage,
            }) => {
                job.mark_cancelled(now)?;
                info!(job_id = %id, %stage, progress = job.progress, "Job cancelled");
            }
            Err(StageFailure { stage, error }) => {
                job.fail(stage, &error.to_string(), now)?;
                error!(job_id = %id, %stage, progress = job.progress, error = %error, "Job failed");
            }
        }

        self.jobs.save(&job).await?;
        if let Err(e) = self.jobs.clear_cancel(id).await {
            warn!(job_id = %id, error = %e, "Failed to clear cancel marker");
        }
        Ok(job)
    }

    /// Runs a job again, continuing from its latest checkpoint when one is
    /// usable. Failed and cancelled jobs are requeued first; completed jobs
    /// are returned unchanged.
    pub async fn resume(&self, id: &JobId) -> Result<Job> {
        let mut job = self.job(id).await?;
        if job.status.is_restartable() {
            job.requeue()?;
            self.jobs.clear_cancel(id).await?;
            self.jobs.save(&job).await?;
        }
        info!(job_id = %id, status = %job.status, "Resuming job");
        self.run(id).await
    }

    /// Cancels a queued job at once; a running job stops at the next window
    /// boundary, in this process or any other sharing the store.
    pub async fn cancel(&self, id: &JobId) -> Result<Job> {
        let mut job = self.job(id).await?;
        job.request_cancel(self.clock.now())?;
        self.jobs.save(&job).await?;

        if job.status == JobStatus::Cancelling || job.status == JobStatus::Cancelled {
            self.jobs.request_cancel(id).await?;
        }
        if let Some(flag) = self.flag(id) {
            flag.store(true, Ordering::SeqCst);
        }
        info!(job_id = %id, status = %job.status, "Cancel requested");
        Ok(job)
    }

    async fn execute(
        &self,
        job: &mut Job,
        flag: &AtomicBool,
    ) -> std::result::Result<(), StageFailure> {
        let resume_from = self.resumable_checkpoint(&job.id).await;

        job.start().at(Stage::Preprocessing)?;
        self.jobs.save(job).await.at(Stage::Preprocessing)?;

        if resume_from.is_none() {
            job.options.validate().at(Stage::Preprocessing)?;
        }
        let audio = self.decode(job).await.at(Stage::Preprocessing)?;
        let total = audio.duration_secs();
        job.total_duration = Some(total);
        job.advance_progress(self.pipeline.settings().progress.base);
        adopt_cancel(job, &self.jobs, flag, self.clock.as_ref())
            .await
            .at(Stage::Preprocessing)?;
        self.jobs.save(job).await.at(Stage::Preprocessing)?;

        let model = &self.model;
        self.retry
            .run("model_load", move |_| model.ensure_loaded())
            .await
            .at(Stage::ModelLoading)?;
        if resume_from.is_none() {
            let checkpoint =
                Checkpoint::new(job.id.clone(), Stage::ModelLoading, 0.0, total, self.clock.now());
            if let Err(e) = self.checkpoints.save(&checkpoint).await {
                warn!(job_id = %job.id, error = %e, "Checkpoint write failed");
            }
        }

        let options = job.options.transcribe_options();
        let mut observer = JobObserver {
            job: &mut *job,
            jobs: &self.jobs,
            flag,
            clock: self.clock.as_ref(),
        };

        let (segments, note) = if total <= self.chunk_threshold_secs {
            if observer.cancel_requested().await.at(Stage::Transcribing)? {
                return Err(StageFailure {
                    stage: Stage::Transcribing,
                    error: ScribedError::Cancelled {
                        id: observer.job.id.to_string(),
                    },
                });
            }
            debug!(job_id = %observer.job.id, duration = total, "Direct transcription");
            let segments = self.transcribe_direct(&audio, &options).await.at(Stage::Transcribing)?;
            (segments, None)
        } else {
            debug!(job_id = %observer.job.id, duration = total, "Chunked transcription");
            let id = observer.job.id.clone();
            let outcome = self
                .pipeline
                .run(&id, &audio, &options, resume_from.as_ref(), &mut observer)
                .await
                .at(Stage::Transcribing)?;
            (outcome.segments, outcome.skipped_summary)
        };

        let settings = self.pipeline.settings();
        job.advance_progress(settings.progress.base + settings.progress.span);
        if let Some(note) = note {
            job.note_error(format!("{}: {note}", Stage::Transcribing));
        }
        job.complete(segments, self.clock.now()).at(Stage::Postprocessing)?;
        Ok(())
    }

    async fn transcribe_direct(
        &self,
        audio: &AudioBuffer,
        options: &crate::stt::TranscribeOptions,
    ) -> Result<Vec<Segment>> {
        let model = &self.model;
        let segments = self
            .retry
            .run("model_infer", move |_| model.infer(audio, options))
            .await?;

        let whole = Window {
            index: 0,
            start: 0.0,
            grid_start: 0.0,
            end: audio.duration_secs(),
        };
        let mut merger = SegmentMerger::new();
        merger.push_window(&whole, segments);
        Ok(merger.into_segments())
    }

    async fn decode(&self, job: &Job) -> Result<AudioBuffer> {
        let path = job
            .input_path
            .clone()
            .ok_or_else(|| ScribedError::InvalidJobState {
                message: format!("job {} has no input file", job.id),
            })?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ScribedError::AudioUnreadable {
                message: format!("{}: {e}", path.display()),
            })?;

        let decoder = self.decoder.clone();
        tokio::task::spawn_blocking(move || decoder.decode(&bytes))
            .await
            .map_err(|e| ScribedError::Other(format!("decode task failed: {e}")))?
    }

    async fn resumable_checkpoint(&self, id: &JobId) -> Option<Checkpoint> {
        match self.checkpoints.load(id).await {
            Ok(checkpoint) => checkpoint.filter(Checkpoint::is_resumable),
            Err(e) => {
                warn!(job_id = %id, error = %e, "Checkpoint unreadable, starting from the beginning");
                None
            }
        }
    }

    fn register(&self, id: &JobId) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), flag.clone());
        flag
    }

    fn unregister(&self, id: &JobId) {
        self.cancel_flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    fn flag(&self, id: &JobId) -> Option<Arc<AtomicBool>> {
        self.cancel_flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

/// Publishes window progress on the job record and answers cancel checks.
struct JobObserver<'a> {
    job: &'a mut Job,
    jobs: &'a JobRepository,
    flag: &'a AtomicBool,
    clock: &'a dyn Clock,
}

/// Picks up a cancel recorded since the run started, so a later write never
/// puts a cancelling job back to processing.
async fn adopt_cancel(
    job: &mut Job,
    jobs: &JobRepository,
    flag: &AtomicBool,
    clock: &dyn Clock,
) -> Result<()> {
    if job.status != JobStatus::Processing {
        return Ok(());
    }
    let cancelled = flag.load(Ordering::SeqCst)
        || matches!(
            jobs.load(&job.id).await?,
            Some(stored) if matches!(stored.status, JobStatus::Cancelling | JobStatus::Cancelled)
        );
    if cancelled {
        job.request_cancel(clock.now())?;
    }
    Ok(())
}

#[async_trait]
impl WindowObserver for JobObserver<'_> {
    async fn progress(&mut self, value: f64) -> Result<()> {
        if !self.job.advance_progress(value) {
            return Ok(());
        }
        let persisted = match adopt_cancel(self.job, self.jobs, self.flag, self.clock).await {
            Ok(()) => self.jobs.save(self.job).await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            warn!(job_id = %self.job.id, error = %e, "Progress update not persisted");
        }
        Ok(())
    }

    async fn cancel_requested(&mut self) -> Result<bool> {
        if self.flag.load(Ordering::SeqCst) {
            return Ok(true);
        }
        match self.jobs.cancel_requested(&self.job.id).await {
            Ok(requested) => Ok(requested),
            Err(e) => {
                warn!(job_id = %self.job.id, error = %e, "Cancel marker unreadable");
                Ok(false)
            }
        }
    }
}
