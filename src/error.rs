//! Error types for scribed.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribedError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Input validation errors
    #[error("Audio input is empty")]
    AudioEmpty,

    #[error("Audio input is unreadable: {message}")]
    AudioUnreadable { message: String },

    #[error("Unsupported input: {message}")]
    UnsupportedInput { message: String },

    // Model errors
    #[error("Transcription model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Model load failed: {message}")]
    ModelLoadFailed { message: String },

    #[error("Transcription inference failed: {message}")]
    InferenceFailed { message: String },

    #[error("Transcription inference timed out after {timeout:?}")]
    InferenceTimeout { timeout: Duration },

    // Circuit breaker
    #[error("Circuit open for {dependency}, retry after {retry_after:?}")]
    CircuitOpen {
        dependency: String,
        retry_after: Duration,
    },

    // Shared store errors
    #[error("Shared store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[cfg(feature = "redis-store")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // Job errors
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Job {id} was cancelled")]
    Cancelled { id: String },

    #[error("Invalid job state: {message}")]
    InvalidJobState { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl ScribedError {
    /// Errors worth retrying with backoff: the dependency may recover.
    pub fn is_transient(&self) -> bool {
        match self {
            ScribedError::ModelLoadFailed { .. }
            | ScribedError::InferenceFailed { .. }
            | ScribedError::InferenceTimeout { .. }
            | ScribedError::CircuitOpen { .. }
            | ScribedError::StoreUnavailable { .. } => true,
            #[cfg(feature = "redis-store")]
            ScribedError::Redis(e) => {
                e.is_io_error() || e.is_timeout() || e.is_connection_dropped()
            }
            _ => false,
        }
    }

    /// Bad, corrupt, or empty input. Never retried, never trips a circuit.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ScribedError::AudioEmpty
                | ScribedError::AudioUnreadable { .. }
                | ScribedError::UnsupportedInput { .. }
        )
    }

    /// Whether a circuit breaker should count this error against its dependency.
    pub fn counts_against_circuit(&self) -> bool {
        !self.is_validation() && !matches!(self, ScribedError::CircuitOpen { .. })
    }

    /// How long a caller should wait before trying again, if the error says.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ScribedError::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ScribedError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = ScribedError::ConfigInvalidValue {
            key: "pipeline.overlap_secs".to_string(),
            message: "must be smaller than window_secs".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for pipeline.overlap_secs: must be smaller than window_secs"
        );
    }

    #[test]
    fn test_circuit_open_display() {
        let error = ScribedError::CircuitOpen {
            dependency: "model_infer".to_string(),
            retry_after: Duration::from_secs(12),
        };
        assert_eq!(
            error.to_string(),
            "Circuit open for model_infer, retry after 12s"
        );
    }

    #[test]
    fn test_inference_failed_display() {
        let error = ScribedError::InferenceFailed {
            message: "out of memory".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Transcription inference failed: out of memory"
        );
    }

    #[test]
    fn test_job_not_found_display() {
        let error = ScribedError::JobNotFound {
            id: "abc123".to_string(),
        };
        assert_eq!(error.to_string(), "Job not found: abc123");
    }

    #[test]
    fn test_validation_errors_are_not_transient() {
        let errors = [
            ScribedError::AudioEmpty,
            ScribedError::AudioUnreadable {
                message: "bad header".to_string(),
            },
            ScribedError::UnsupportedInput {
                message: "mp3".to_string(),
            },
        ];
        for error in errors {
            assert!(error.is_validation(), "{error} should be validation");
            assert!(!error.is_transient(), "{error} should not be transient");
            assert!(!error.counts_against_circuit());
        }
    }

    #[test]
    fn test_dependency_errors_are_transient() {
        let errors = [
            ScribedError::ModelLoadFailed {
                message: "oom".to_string(),
            },
            ScribedError::InferenceFailed {
                message: "cuda".to_string(),
            },
            ScribedError::InferenceTimeout {
                timeout: Duration::from_secs(300),
            },
            ScribedError::StoreUnavailable {
                message: "refused".to_string(),
            },
        ];
        for error in errors {
            assert!(error.is_transient(), "{error} should be transient");
            assert!(error.counts_against_circuit());
        }
    }

    #[test]
    fn test_circuit_open_is_transient_but_not_counted() {
        let error = ScribedError::CircuitOpen {
            dependency: "model_load".to_string(),
            retry_after: Duration::from_secs(5),
        };
        assert!(error.is_transient());
        assert!(!error.counts_against_circuit());
        assert_eq!(error.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_cancelled_is_fatal() {
        let error = ScribedError::Cancelled {
            id: "job".to_string(),
        };
        assert!(!error.is_transient());
        assert!(!error.is_validation());
        assert_eq!(error.retry_after(), None);
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: ScribedError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: ScribedError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: ScribedError = io_error.into();
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ScribedError>();
        assert_sync::<ScribedError>();
    }
}
