//! Latest-wins progress snapshots that let an interrupted job resume.

use crate::error::{Result, ScribedError};
use crate::job::JobId;
use crate::store::{KeySpace, SharedStore};
use crate::stt::Segment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Processing stages in the order a job passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocessing,
    ModelLoading,
    Transcribing,
    Postprocessing,
    Completed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Preprocessing => "preprocessing",
            Stage::ModelLoading => "model_loading",
            Stage::Transcribing => "transcribing",
            Stage::Postprocessing => "postprocessing",
            Stage::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: JobId,
    pub stage: Stage,
    /// Seconds of audio fully transcribed, measured on the window grid.
    pub processed_duration: f64,
    pub total_duration: f64,
    /// Merged output up to `processed_duration`.
    pub segments: Vec<Segment>,
    pub windows_completed: usize,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        job_id: JobId,
        stage: Stage,
        processed_duration: f64,
        total_duration: f64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            stage,
            processed_duration,
            total_duration,
            segments: Vec::new(),
            windows_completed: 0,
            metadata: BTreeMap::new(),
            updated_at,
        }
    }

    /// Whether a run may pick up from here instead of starting over.
    pub fn is_resumable(&self) -> bool {
        self.stage > Stage::Preprocessing
    }

    pub fn segments_completed(&self) -> usize {
        self.segments.len()
    }
}

/// Checkpoint persistence with monotonic writes.
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    ttl: Duration,
}

impl fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("keys", &self.keys)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn SharedStore>, keys: KeySpace, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    fn key(&self, job_id: &JobId) -> String {
        self.keys.key("checkpoint", job_id.as_str())
    }

    /// Writes `checkpoint` unless a snapshot with a larger processed duration
    /// is already stored. Returns whether it was written.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<bool> {
        if !(0.0..=checkpoint.total_duration).contains(&checkpoint.processed_duration) {
            return Err(ScribedError::InvalidJobState {
                message: format!(
                    "checkpoint for {} has processed duration {:.1}s outside 0..={:.1}s",
                    checkpoint.job_id, checkpoint.processed_duration, checkpoint.total_duration
                ),
            });
        }

        let json = serde_json::to_string(checkpoint)?;
        let written = self
            .store
            .set_if_not_lower(
                &self.key(&checkpoint.job_id),
                &json,
                checkpoint.processed_duration,
                Some(self.ttl),
            )
            .await?;

        debug!(
            job_id = %checkpoint.job_id,
            stage = %checkpoint.stage,
            processed = checkpoint.processed_duration,
            written,
            "Checkpoint save"
        );
        Ok(written)
    }

    pub async fn load(&self, job_id: &JobId) -> Result<Option<Checkpoint>> {
        match self.store.get(&self.key(job_id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn clear(&self, job_id: &JobId) -> Result<()> {
        self.store.delete(&self.key(job_id)).await
    }
}
