//! Job records: identity, status state machine, and persistence.

use crate::checkpoint::Stage;
use crate::defaults;
use crate::error::{Result, ScribedError};
use crate::store::{KeySpace, SharedStore};
use crate::stt::{Segment, TranscribeOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Content-derived job identity: SHA-256 over the input bytes and the
/// canonical JSON of the requested options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn derive(input: &[u8], options: &JobOptions) -> Result<Self> {
        let mut hasher = Sha256::new();
        hasher.update(input);
        hasher.update(b"\n");
        hasher.update(serde_json::to_vec(options)?);
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelling,
    Cancelled,
}

impl JobStatus {
    /// No further transitions happen from a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Terminal statuses `resume` may start over from.
    pub fn is_restartable(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Caller-chosen options. Part of the job identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Spoken language; `None` or "auto" detects it.
    pub language_in: Option<String>,
    /// Translation target; only English is supported.
    pub language_out: Option<String>,
    pub engine: String,
    pub word_timestamps: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            language_in: None,
            language_out: None,
            engine: "whisper".to_string(),
            word_timestamps: false,
        }
    }
}

impl JobOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(target) = &self.language_out
            && target != defaults::TRANSLATION_TARGET
        {
            return Err(ScribedError::UnsupportedInput {
                message: format!(
                    "translation target '{target}' is not supported, only '{}'",
                    defaults::TRANSLATION_TARGET
                ),
            });
        }
        if self.engine.trim().is_empty() {
            return Err(ScribedError::UnsupportedInput {
                message: "engine must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn transcribe_options(&self) -> TranscribeOptions {
        let language = self
            .language_in
            .clone()
            .filter(|l| l != defaults::AUTO_LANGUAGE);
        let translate = self.language_out.is_some() && language.as_deref() != self.language_out.as_deref();
        TranscribeOptions {
            language,
            translate,
            word_timestamps: self.word_timestamps,
        }
    }
}

/// One transcription request.
///
/// Progress only moves forward while processing; once a job is completed,
/// failed, or cancelled, every mutator refuses with `InvalidJobState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    pub options: JobOptions,
    pub input_path: Option<PathBuf>,
    pub total_duration: Option<f64>,
    pub segments: Vec<Segment>,
    pub error_message: Option<String>,
    pub failed_stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, options: JobOptions, input_path: Option<PathBuf>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0.0,
            options,
            input_path,
            total_duration: None,
            segments: Vec::new(),
            error_message: None,
            failed_stage: None,
            created_at: now,
            completed_at: None,
        }
    }

    fn ensure_not_terminal(&self, action: &str) -> Result<()> {
        if self.status.is_terminal() {
            return Err(ScribedError::InvalidJobState {
                message: format!("cannot {action} job {} in status {}", self.id, self.status),
            });
        }
        Ok(())
    }

    /// Queued (or interrupted processing) -> processing.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_not_terminal("start")?;
        if self.status == JobStatus::Cancelling {
            return Err(ScribedError::Cancelled {
                id: self.id.to_string(),
            });
        }
        self.status = JobStatus::Processing;
        Ok(())
    }

    /// Raises progress to `value`; lower values are ignored. Returns whether
    /// progress changed.
    pub fn advance_progress(&mut self, value: f64) -> bool {
        if !matches!(self.status, JobStatus::Processing | JobStatus::Cancelling) {
            return false;
        }
        let value = value.clamp(0.0, 100.0);
        if value > self.progress {
            self.progress = value;
            true
        } else {
            false
        }
    }

    /// Records a non-fatal problem (e.g. skipped windows) without failing.
    pub fn note_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    pub fn complete(&mut self, segments: Vec<Segment>, now: DateTime<Utc>) -> Result<()> {
        self.ensure_not_terminal("complete")?;
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.segments = segments;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Marks the job failed at `stage`. Progress is left where it was.
    pub fn fail(&mut self, stage: Stage, message: &str, now: DateTime<Utc>) -> Result<()> {
        self.ensure_not_terminal("fail")?;
        self.status = JobStatus::Failed;
        self.failed_stage = Some(stage);
        self.error_message = Some(format!("{stage}: {message}"));
        self.completed_at = Some(now);
        Ok(())
    }

    /// Queued jobs cancel at once; processing jobs move to `cancelling`
    /// until the pipeline reaches a window boundary.
    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            JobStatus::Queued => self.mark_cancelled(now),
            JobStatus::Processing => {
                self.status = JobStatus::Cancelling;
                Ok(())
            }
            JobStatus::Cancelling => Ok(()),
            _ => self.ensure_not_terminal("cancel"),
        }
    }

    /// Puts a failed or cancelled job back in the queue with a clean slate.
    pub fn requeue(&mut self) -> Result<()> {
        if !self.status.is_restartable() {
            return Err(ScribedError::InvalidJobState {
                message: format!("cannot requeue job {} in status {}", self.id, self.status),
            });
        }
        self.status = JobStatus::Queued;
        self.progress = 0.0;
        self.segments.clear();
        self.error_message = None;
        self.failed_stage = None;
        self.completed_at = None;
        Ok(())
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_not_terminal("cancel")?;
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        Ok(())
    }
}

/// Persists [`Job`] records and cancellation markers in the shared store.
#[derive(Clone)]
pub struct JobRepository {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    retention: Duration,
}

impl fmt::Debug for JobRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRepository")
            .field("keys", &self.keys)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl JobRepository {
    pub fn new(store: Arc<dyn SharedStore>, keys: KeySpace, retention: Duration) -> Self {
        Self {
            store,
            keys,
            retention,
        }
    }

    pub async fn load(&self, id: &JobId) -> Result<Option<Job>> {
        match self.store.get(&self.keys.key("job", id.as_str())).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, job: &Job) -> Result<()> {
        let json = serde_json::to_string(job)?;
        self.store
            .set(&self.keys.key("job", job.id.as_str()), &json, Some(self.retention))
            .await
    }

    /// Leaves a marker any worker process can observe between windows.
    pub async fn request_cancel(&self, id: &JobId) -> Result<()> {
        self.store
            .set(&self.keys.key("cancel", id.as_str()), "1", Some(self.retention))
            .await
    }

    pub async fn cancel_requested(&self, id: &JobId) -> Result<bool> {
        Ok(self
            .store
            .get(&self.keys.key("cancel", id.as_str()))
            .await?
            .is_some())
    }

    pub async fn clear_cancel(&self, id: &JobId) -> Result<()> {
        self.store.delete(&self.keys.key("cancel", id.as_str())).await
    }
}
