//! Lifecycle of the single in-memory transcription model.

use crate::audio::AudioBuffer;
use crate::error::{Result, ScribedError};
use crate::resilience::CircuitBreaker;
use crate::stt::{LoadedModel, ModelLoader, Segment, TranscribeOptions};
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Circuit name guarding model loads.
pub const MODEL_LOAD: &str = "model_load";
/// Circuit name guarding inference calls.
pub const MODEL_INFER: &str = "model_infer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelStatus {
    pub loaded: bool,
    pub name: String,
    pub device: Option<String>,
    pub memory_used: u64,
}

/// Owns the loaded model.
///
/// The model slot sits behind one async mutex. An inference holds it until
/// the backend call returns, even when the caller has already given up on a
/// timeout, so at most one inference runs at a time and `unload` waits for
/// an in-flight inference to finish. Loads go through the [`MODEL_LOAD`]
/// circuit, inference through [`MODEL_INFER`].
pub struct ModelManager {
    loader: Arc<dyn ModelLoader>,
    slot: Arc<Mutex<Option<LoadedModel>>>,
    status: StdMutex<ModelStatus>,
    breaker: Arc<CircuitBreaker>,
    timeout_multiplier: f64,
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("status", &self.status())
            .field("timeout_multiplier", &self.timeout_multiplier)
            .finish_non_exhaustive()
    }
}

impl ModelManager {
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        breaker: Arc<CircuitBreaker>,
        timeout_multiplier: f64,
    ) -> Self {
        let status = ModelStatus {
            loaded: false,
            name: loader.model_name().to_string(),
            device: None,
            memory_used: 0,
        };
        Self {
            loader,
            slot: Arc::new(Mutex::new(None)),
            status: StdMutex::new(status),
            breaker,
            timeout_multiplier,
        }
    }

    /// Loads the model unless it is already resident.
    pub async fn ensure_loaded(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        self.load_into(&mut slot).await
    }

    async fn load_into(&self, slot: &mut Option<LoadedModel>) -> Result<()> {
        if slot.is_some() {
            return Ok(());
        }

        let loader = self.loader.clone();
        let model = self
            .breaker
            .call(MODEL_LOAD, || async move {
                tokio::task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|e| ScribedError::ModelLoadFailed {
                        message: format!("load task failed: {e}"),
                    })?
            })
            .await?;

        info!(
            model = %self.loader.model_name(),
            device = %model.device,
            memory_bytes = model.memory_bytes,
            "Model loaded"
        );
        self.set_status(ModelStatus {
            loaded: true,
            name: model.transcriber.model_name().to_string(),
            device: Some(model.device.clone()),
            memory_used: model.memory_bytes,
        });
        *slot = Some(model);
        Ok(())
    }

    /// Releases the model. Returns the bytes freed, zero when nothing was
    /// loaded.
    pub async fn unload(&self) -> u64 {
        let mut slot = self.slot.lock().await;
        let freed = slot.take().map(|m| m.memory_bytes).unwrap_or(0);
        self.set_status(ModelStatus {
            loaded: false,
            name: self.loader.model_name().to_string(),
            device: None,
            memory_used: 0,
        });
        if freed > 0 {
            info!(freed_bytes = freed, "Model unloaded");
        } else {
            debug!("Unload requested with no model resident");
        }
        freed
    }

    /// Status without waiting for an in-flight inference.
    pub fn status(&self) -> ModelStatus {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_status(&self, status: ModelStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Transcribes one window, loading the model first if needed.
    ///
    /// The call times out after the window length times the configured
    /// multiplier. A timed-out inference keeps running on the blocking pool
    /// and keeps the model locked until the backend returns; the next caller
    /// waits for it.
    pub async fn infer(
        &self,
        audio: &AudioBuffer,
        options: &TranscribeOptions,
    ) -> Result<Vec<Segment>> {
        let mut slot = self.slot.clone().lock_owned().await;
        self.load_into(&mut slot).await?;
        let Some(model) = slot.as_ref() else {
            return Err(ScribedError::ModelLoadFailed {
                message: "model slot empty after load".to_string(),
            });
        };

        let transcriber = model.transcriber.clone();
        let timeout = infer_timeout(audio.duration_secs(), self.timeout_multiplier);
        let audio = audio.clone();
        let options = options.clone();

        self.breaker
            .call(MODEL_INFER, || async move {
                let task = tokio::task::spawn_blocking(move || {
                    let result = transcriber.transcribe(&audio, &options);
                    drop(slot);
                    result
                });
                match tokio::time::timeout(timeout, task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => Err(ScribedError::InferenceFailed {
                        message: format!("inference task failed: {e}"),
                    }),
                    Err(_) => Err(ScribedError::InferenceTimeout { timeout }),
                }
            })
            .await
    }
}

fn infer_timeout(audio_secs: f64, multiplier: f64) -> Duration {
    Duration::from_secs_f64((audio_secs * multiplier).max(1.0))
}
