//! Sequential window-by-window transcription of long audio.

use super::merge::SegmentMerger;
use super::progress::ProgressPlan;
use super::window::{Window, plan_windows};
use crate::audio::AudioBuffer;
use crate::checkpoint::{Checkpoint, CheckpointStore, Stage};
use crate::clock::{Clock, elapsed_between};
use crate::config::PipelineConfig;
use crate::error::{Result, ScribedError};
use crate::job::JobId;
use crate::model::ModelManager;
use crate::resilience::RetryPolicy;
use crate::stt::{Segment, TranscribeOptions};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Checkpoint metadata key listing window numbers skipped so far.
const SKIPPED_WINDOWS_KEY: &str = "skipped_windows";

/// Seconds of slack when matching a checkpoint offset to the window grid.
const GRID_EPSILON: f64 = 1e-6;

/// Receives progress and answers cancellation checks at window boundaries.
#[async_trait]
pub trait WindowObserver: Send {
    /// Called after every window with the new job progress.
    async fn progress(&mut self, value: f64) -> Result<()>;

    /// Called before every window. Returning true stops the run with
    /// [`ScribedError::Cancelled`].
    async fn cancel_requested(&mut self) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub window_secs: f64,
    pub overlap_secs: f64,
    pub checkpoint_interval: Duration,
    pub progress: ProgressPlan,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            window_secs: config.window_secs,
            overlap_secs: config.overlap_secs,
            checkpoint_interval: config.checkpoint_interval(),
            progress: ProgressPlan::from(config),
        }
    }
}

/// Result of a full pass over the windows.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub segments: Vec<Segment>,
    pub windows_total: usize,
    /// Windows transcribed by this run; resumed windows are not counted.
    pub windows_run: usize,
    /// One-based numbers of windows that failed after all retries.
    pub skipped: Vec<usize>,
    /// Human-readable summary of `skipped`, when any.
    pub skipped_summary: Option<String>,
}

/// Drives one job's windows through the model in temporal order.
pub struct ChunkPipeline {
    model: Arc<ModelManager>,
    checkpoints: CheckpointStore,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
}

impl std::fmt::Debug for ChunkPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPipeline")
            .field("settings", &self.settings)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ChunkPipeline {
    pub fn new(
        model: Arc<ModelManager>,
        checkpoints: CheckpointStore,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            model,
            checkpoints,
            retry,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Transcribes `audio` window by window.
    ///
    /// With a resumable `resume_from` checkpoint, windows whose grid end is
    /// at or before the checkpoint's processed duration are not run again
    /// and the checkpoint's segments seed the output.
    pub async fn run(
        &self,
        job_id: &JobId,
        audio: &AudioBuffer,
        options: &TranscribeOptions,
        resume_from: Option<&Checkpoint>,
        observer: &mut dyn WindowObserver,
    ) -> Result<PipelineOutcome> {
        let total = audio.duration_secs();
        let windows = plan_windows(total, self.settings.window_secs, self.settings.overlap_secs);
        if windows.is_empty() {
            return Err(ScribedError::AudioEmpty);
        }
        let windows_total = windows.len();

        let mut merger = SegmentMerger::new();
        let mut skipped: Vec<usize> = Vec::new();
        let mut processed = 0.0;
        let mut done = 0;

        if let Some(checkpoint) = resume_from.filter(|c| c.is_resumable()) {
            done = windows
                .iter()
                .take_while(|w| w.end <= checkpoint.processed_duration + GRID_EPSILON)
                .count();
            if done > 0 {
                merger = SegmentMerger::resume(checkpoint.segments.clone());
                skipped = skipped_from(checkpoint);
                // Windows an earlier run gave up on are tried again, so the
                // run restarts at the first of them.
                if let Some(redo) = skipped.first().map(|number| number - 1)
                    && redo < done
                {
                    info!(
                        job_id = %job_id,
                        skipped = ?skipped,
                        "Re-running windows skipped by an earlier run"
                    );
                    merger.rewind(windows[redo].grid_start);
                    skipped.clear();
                    done = redo;
                    self.reset_checkpoint(job_id, done, &windows, total, &merger).await;
                }
            }
            if done > 0 {
                processed = windows[done - 1].end;
                info!(
                    job_id = %job_id,
                    resumed_windows = done,
                    processed,
                    "Resuming transcription from checkpoint"
                );
            }
        }
        let resumed = done;
        let mut last_checkpoint = self.clock.now();

        for window in &windows[done..] {
            if observer.cancel_requested().await? {
                info!(job_id = %job_id, window = window.number(), "Cancellation observed");
                return Err(ScribedError::Cancelled {
                    id: job_id.to_string(),
                });
            }

            match self.transcribe_window(window, audio, options).await {
                Ok(segments) => {
                    let added = merger.push_window(window, segments);
                    debug!(job_id = %job_id, window = window.number(), added, "Window merged");
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        job_id = %job_id,
                        window = window.number(),
                        start = window.start,
                        end = window.end,
                        error = %e,
                        "Window skipped after retries"
                    );
                    skipped.push(window.number());
                }
                Err(e) => return Err(e),
            }

            done += 1;
            processed = window.end;
            observer
                .progress(self.settings.progress.after_window(done, windows_total))
                .await?;

            let now = self.clock.now();
            if elapsed_between(last_checkpoint, now) >= self.settings.checkpoint_interval {
                let checkpoint = self.checkpoint(
                    job_id,
                    Stage::Transcribing,
                    processed,
                    total,
                    &merger,
                    done,
                    &skipped,
                );
                self.save_checkpoint(&checkpoint).await;
                last_checkpoint = now;
            }
        }

        if skipped.len() >= windows_total {
            return Err(ScribedError::InferenceFailed {
                message: format!("all {windows_total} windows failed"),
            });
        }

        let checkpoint = self.checkpoint(
            job_id,
            Stage::Completed,
            total,
            total,
            &merger,
            done,
            &skipped,
        );
        self.save_checkpoint(&checkpoint).await;

        let skipped_summary = describe_skipped(&skipped, self.retry.max_attempts);
        info!(
            job_id = %job_id,
            windows_total,
            windows_run = done - resumed,
            skipped = skipped.len(),
            "Transcription windows finished"
        );
        Ok(PipelineOutcome {
            segments: merger.into_segments(),
            windows_total,
            windows_run: done - resumed,
            skipped,
            skipped_summary,
        })
    }

    async fn transcribe_window(
        &self,
        window: &Window,
        audio: &AudioBuffer,
        options: &TranscribeOptions,
    ) -> Result<Vec<Segment>> {
        let slice = &audio.slice(window.start, window.end);
        let model = &self.model;
        self.retry
            .run("model_infer", move |_| model.infer(slice, options))
            .await
    }

    #[allow(clippy::too_many_arguments)]
    fn checkpoint(
        &self,
        job_id: &JobId,
        stage: Stage,
        processed: f64,
        total: f64,
        merger: &SegmentMerger,
        windows_completed: usize,
        skipped: &[usize],
    ) -> Checkpoint {
        let mut checkpoint =
            Checkpoint::new(job_id.clone(), stage, processed, total, self.clock.now());
        checkpoint.segments = merger.segments().to_vec();
        checkpoint.windows_completed = windows_completed;
        if !skipped.is_empty() {
            checkpoint
                .metadata
                .insert(SKIPPED_WINDOWS_KEY.to_string(), serde_json::json!(skipped));
        }
        checkpoint
    }

    /// Replaces the stored checkpoint with one at the rewound position.
    /// A plain save would be refused because it moves backwards.
    async fn reset_checkpoint(
        &self,
        job_id: &JobId,
        done: usize,
        windows: &[Window],
        total: f64,
        merger: &SegmentMerger,
    ) {
        if let Err(e) = self.checkpoints.clear(job_id).await {
            warn!(job_id = %job_id, error = %e, "Checkpoint reset failed");
            return;
        }
        let processed = done.checked_sub(1).map_or(0.0, |last| windows[last].end);
        let checkpoint =
            self.checkpoint(job_id, Stage::Transcribing, processed, total, merger, done, &[]);
        self.save_checkpoint(&checkpoint).await;
    }

    /// Checkpoints are best effort; a store outage must not fail the job.
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) {
        if let Err(e) = self.checkpoints.save(checkpoint).await {
            warn!(
                job_id = %checkpoint.job_id,
                stage = %checkpoint.stage,
                error = %e,
                "Checkpoint write failed"
            );
        }
    }
}

fn skipped_from(checkpoint: &Checkpoint) -> Vec<usize> {
    checkpoint
        .metadata
        .get(SKIPPED_WINDOWS_KEY)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

/// Formats skipped window numbers as ranges, e.g.
/// "window 45–46 failed after 3 attempts".
pub fn describe_skipped(skipped: &[usize], attempts: u32) -> Option<String> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &number in skipped {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == number => *end = number,
            _ => ranges.push((number, number)),
        }
    }
    if ranges.is_empty() {
        return None;
    }

    let parts: Vec<String> = ranges
        .iter()
        .map(|&(start, end)| {
            if start == end {
                format!("window {start}")
            } else {
                format!("window {start}–{end}")
            }
        })
        .collect();
    Some(format!("{} failed after {attempts} attempts", parts.join(", ")))
}
