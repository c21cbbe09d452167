use crate::defaults;
use crate::error::{Result, ScribedError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    pub circuit: CircuitConfig,
    pub rate_limit: RateLimitConfig,
    pub model: ModelConfig,
    pub store: StoreConfig,
    pub worker: WorkerConfig,
}

/// Chunking, progress, and checkpoint cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunk_threshold_secs: f64,
    pub window_secs: f64,
    pub overlap_secs: f64,
    pub progress_base: f64,
    pub progress_span: f64,
    pub checkpoint_interval_secs: u64,
    pub infer_timeout_multiplier: f64,
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub cool_down_secs: u64,
}

/// What the rate limiter answers when the shared store is unreachable
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Admit the request.
    #[default]
    Open,
    /// Reject the request.
    Closed,
}

/// Sliding-window rate limiting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
    pub fail_mode: FailMode,
}

/// Speech-to-text model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub language: String,
    pub threads: Option<usize>,
    pub use_gpu: bool,
}

/// Shared key-value store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL; `None` keeps everything in process memory.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub checkpoint_ttl_secs: u64,
    pub job_retention_secs: u64,
}

/// Worker process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_threshold_secs: defaults::CHUNK_THRESHOLD_SECS,
            window_secs: defaults::WINDOW_SECS,
            overlap_secs: defaults::OVERLAP_SECS,
            progress_base: defaults::PROGRESS_BASE,
            progress_span: defaults::PROGRESS_SPAN,
            checkpoint_interval_secs: defaults::CHECKPOINT_INTERVAL_SECS,
            infer_timeout_multiplier: defaults::INFER_TIMEOUT_MULTIPLIER,
        }
    }
}

impl PipelineConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_delay_ms: defaults::RETRY_INITIAL_DELAY_MS,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            multiplier: defaults::RETRY_MULTIPLIER,
        }
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::FAILURE_THRESHOLD,
            cool_down_secs: defaults::CIRCUIT_COOL_DOWN_SECS,
        }
    }
}

impl CircuitConfig {
    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: defaults::RATE_WINDOW_SECS,
            max_requests: defaults::RATE_MAX_REQUESTS,
            fail_mode: FailMode::Open,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(defaults::DEFAULT_MODEL_PATH),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            threads: None,
            use_gpu: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: defaults::KEY_PREFIX.to_string(),
            checkpoint_ttl_secs: defaults::CHECKPOINT_TTL_SECS,
            job_retention_secs: defaults::JOB_RETENTION_SECS,
        }
    }
}

impl StoreConfig {
    pub fn checkpoint_ttl(&self) -> Duration {
        Duration::from_secs(self.checkpoint_ttl_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::WORKER_CONCURRENCY,
            queue_capacity: defaults::DISPATCH_QUEUE_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScribedError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ScribedError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(ScribedError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SCRIBED_MODEL_PATH → model.path
    /// - SCRIBED_LANGUAGE → model.language
    /// - SCRIBED_REDIS_URL → store.redis_url
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("SCRIBED_MODEL_PATH")
            && !path.is_empty()
        {
            self.model.path = PathBuf::from(path);
        }

        if let Ok(language) = std::env::var("SCRIBED_LANGUAGE")
            && !language.is_empty()
        {
            self.model.language = language;
        }

        if let Ok(url) = std::env::var("SCRIBED_REDIS_URL")
            && !url.is_empty()
        {
            self.store.redis_url = Some(url);
        }

        self
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> Result<()> {
            Err(ScribedError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        }

        let p = &self.pipeline;
        if p.window_secs <= 0.0 {
            return invalid("pipeline.window_secs", "must be positive");
        }
        if p.overlap_secs < 0.0 || p.overlap_secs >= p.window_secs {
            return invalid(
                "pipeline.overlap_secs",
                "must be non-negative and smaller than window_secs",
            );
        }
        if p.chunk_threshold_secs < 0.0 {
            return invalid("pipeline.chunk_threshold_secs", "must not be negative");
        }
        if p.progress_base < 0.0 || p.progress_span < 0.0 || p.progress_base + p.progress_span > 100.0
        {
            return invalid(
                "pipeline.progress_span",
                "progress_base + progress_span must stay within 0..=100",
            );
        }
        if p.infer_timeout_multiplier <= 0.0 {
            return invalid("pipeline.infer_timeout_multiplier", "must be positive");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts", "must be at least 1");
        }
        if self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier", "must be at least 1.0");
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return invalid("retry.max_delay_ms", "must not be below initial_delay_ms");
        }
        if self.circuit.failure_threshold == 0 {
            return invalid("circuit.failure_threshold", "must be at least 1");
        }
        if self.rate_limit.window_secs == 0 || self.rate_limit.max_requests == 0 {
            return invalid("rate_limit", "window_secs and max_requests must be positive");
        }
        if self.worker.concurrency == 0 || self.worker.queue_capacity == 0 {
            return invalid("worker", "concurrency and queue_capacity must be positive");
        }
        if self.store.key_prefix.is_empty() {
            return invalid("store.key_prefix", "must not be empty");
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/scribed/config.toml on Linux, or a relative
    /// `scribed/config.toml` when no config directory can be determined.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_default()
            .join("scribed")
            .join("config.toml")
    }
}
