//! Whisper-based speech-to-text transcription.
//!
//! This module provides a Whisper implementation of the Transcriber trait using whisper-rs,
//! and the [`WhisperLoader`] the model manager uses to bring it into memory.
//!
//! # Feature Gate
//!
//! Real inference requires the `whisper` feature and cmake:
//!
//! ```bash
//! cargo build --features whisper
//! ```

use crate::audio::AudioBuffer;
use crate::defaults;
use crate::error::{Result, ScribedError};
use crate::stt::segment::Segment;
use crate::stt::transcriber::{LoadedModel, ModelLoader, TranscribeOptions, Transcriber};
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(feature = "whisper")]
use std::sync::{Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Configuration for Whisper transcriber.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Path to the Whisper model file
    pub model_path: PathBuf,
    /// Default language code when a job does not name one ("auto" detects)
    pub language: String,
    /// Number of threads for inference (None = auto-detect)
    pub threads: Option<usize>,
    /// Offload to the compiled GPU backend when there is one
    pub use_gpu: bool,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(defaults::DEFAULT_MODEL_PATH),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            threads: None,
            use_gpu: true,
        }
    }
}

impl From<&crate::config::ModelConfig> for WhisperConfig {
    fn from(config: &crate::config::ModelConfig) -> Self {
        Self {
            model_path: config.path.clone(),
            language: config.language.clone(),
            threads: config.threads,
            use_gpu: config.use_gpu,
        }
    }
}

impl WhisperConfig {
    /// Model name derived from the file stem ("ggml-base.bin" -> "ggml-base").
    pub fn model_name(&self) -> String {
        self.model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string()
    }

    fn device(&self) -> &'static str {
        if self.use_gpu {
            defaults::gpu_backend()
        } else {
            "CPU"
        }
    }
}

/// Whisper-based transcriber implementation.
///
/// The WhisperContext is wrapped in a Mutex; a fresh state is created per call.
#[cfg(feature = "whisper")]
pub struct WhisperTranscriber {
    context: Mutex<WhisperContext>,
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

/// Whisper-based transcriber placeholder (without whisper feature).
///
/// Loads succeed when the model file exists; every inference call fails.
#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperTranscriber {
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl WhisperTranscriber {
    /// Load the model named by `config`.
    ///
    /// # Errors
    /// `ModelNotFound` if the file is missing, `ModelLoadFailed` if whisper.cpp
    /// rejects it.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(ScribedError::ModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = config.model_name();

        let mut context_params = WhisperContextParameters::default();
        context_params.use_gpu(config.use_gpu);
        // Fused attention kernels avoid the standalone softmax kernel that crashes on sm_120.
        context_params.flash_attn(true);
        let context = WhisperContext::new_with_params(
            config
                .model_path
                .to_str()
                .ok_or_else(|| ScribedError::ModelLoadFailed {
                    message: "Invalid UTF-8 in model path".to_string(),
                })?,
            context_params,
        )
        .map_err(|e| ScribedError::ModelLoadFailed {
            message: format!("Failed to load Whisper model: {}", e),
        })?;

        Ok(Self {
            context: Mutex::new(context),
            config,
            model_name,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperTranscriber {
    /// Create a new Whisper transcriber (stub implementation).
    pub fn new(config: WhisperConfig) -> Result<Self> {
        if !config.model_path.exists() {
            return Err(ScribedError::ModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }
        let model_name = config.model_name();
        Ok(Self { config, model_name })
    }

    /// Get the configuration
    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

/// Convert i16 audio samples to f32 normalized to [-1.0, 1.0]
///
/// Whisper expects audio in f32 format normalized to the range [-1.0, 1.0].
pub fn convert_audio(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

#[cfg(feature = "whisper")]
impl Transcriber for WhisperTranscriber {
    fn transcribe(
        &self,
        audio: &AudioBuffer,
        options: &TranscribeOptions,
    ) -> Result<Vec<Segment>> {
        let audio = audio.to_model_rate();
        let audio_f32 = convert_audio(audio.samples());

        let context = self
            .context
            .lock()
            .map_err(|e| ScribedError::InferenceFailed {
                message: format!("Failed to acquire context lock: {}", e),
            })?;

        let mut state = context
            .create_state()
            .map_err(|e| ScribedError::InferenceFailed {
                message: format!("Failed to create Whisper state: {}", e),
            })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        let language = options
            .language
            .as_deref()
            .unwrap_or(self.config.language.as_str());
        if language == defaults::AUTO_LANGUAGE {
            params.set_language(None);
        } else {
            params.set_language(Some(language));
        }
        params.set_translate(options.translate);

        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }

        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio_f32)
            .map_err(|e| ScribedError::InferenceFailed {
                message: format!("Whisper inference failed: {}", e),
            })?;

        // Whisper timestamps are in centiseconds.
        let segments = state
            .as_iter()
            .map(|segment| {
                let text = segment.to_string().trim().to_string();
                let start = segment.start_timestamp() as f64 / 100.0;
                let end = segment.end_timestamp() as f64 / 100.0;
                let segment = Segment::new(text, start, end);
                if options.word_timestamps {
                    segment.with_estimated_words()
                } else {
                    segment
                }
            })
            .filter(|segment| !segment.text.is_empty())
            .collect();

        Ok(segments)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(not(feature = "whisper"))]
impl Transcriber for WhisperTranscriber {
    fn transcribe(
        &self,
        _audio: &AudioBuffer,
        _options: &TranscribeOptions,
    ) -> Result<Vec<Segment>> {
        Err(ScribedError::InferenceFailed {
            message: concat!(
                "Whisper feature not enabled. This binary was built without speech recognition.\n",
                "To fix: cargo build --release --features whisper\n",
                "If build fails with cmake errors, install: sudo apt install cmake"
            )
            .to_string(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Loads a [`WhisperTranscriber`] on demand for the model manager.
#[derive(Debug, Clone)]
pub struct WhisperLoader {
    config: WhisperConfig,
    model_name: String,
}

impl WhisperLoader {
    pub fn new(config: WhisperConfig) -> Self {
        let model_name = config.model_name();
        Self { config, model_name }
    }
}

impl ModelLoader for WhisperLoader {
    fn load(&self) -> Result<LoadedModel> {
        let transcriber = WhisperTranscriber::new(self.config.clone())?;
        // The weights dominate resident memory, so the file size is a fair estimate.
        let memory_bytes = std::fs::metadata(&self.config.model_path)
            .map(|m| m.len())
            .unwrap_or(0);

        tracing::info!(
            model = %self.model_name,
            device = self.config.device(),
            memory_bytes,
            "Loaded Whisper model"
        );

        Ok(LoadedModel {
            transcriber: Arc::new(transcriber),
            device: self.config.device().to_string(),
            memory_bytes,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
