//! Default configuration constants for scribed.
//!
//! Shared by the config sections and the components that can be built without
//! a config file (tests, library users wiring things by hand).

/// Sample rate the model consumes, in Hz.
///
/// Inputs are normalized to 16kHz mono by the upstream media tool; the WAV
/// decoder resamples anything else as a fallback.
pub const SAMPLE_RATE: u32 = 16000;

/// Audio longer than this (seconds) goes through the chunk pipeline.
///
/// Shorter audio is transcribed with a single direct model call.
pub const CHUNK_THRESHOLD_SECS: f64 = 300.0;

/// Length of one transcription window in seconds.
pub const WINDOW_SECS: f64 = 30.0;

/// Lead-in each window shares with its predecessor, in seconds.
///
/// Long enough to contain a word cut at the boundary, short enough that the
/// duplicated inference work stays around 3%.
pub const OVERLAP_SECS: f64 = 1.0;

/// Progress reached once validation and pre-processing are done.
pub const PROGRESS_BASE: f64 = 25.0;

/// Progress range spread evenly across transcription windows.
pub const PROGRESS_SPAN: f64 = 50.0;

/// Wall-clock cadence of checkpoint writes during transcription, in seconds.
pub const CHECKPOINT_INTERVAL_SECS: u64 = 300;

/// Per-window inference timeout as a multiple of the window's audio length.
pub const INFER_TIMEOUT_MULTIPLIER: f64 = 10.0;

/// Consecutive failures before a circuit opens.
pub const FAILURE_THRESHOLD: u32 = 5;

/// Time an open circuit waits before allowing a trial call, in seconds.
pub const CIRCUIT_COOL_DOWN_SECS: u64 = 60;

/// Attempts per operation (first try included) before giving up.
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// First backoff delay in milliseconds.
pub const RETRY_INITIAL_DELAY_MS: u64 = 500;

/// Upper bound for a single backoff delay in milliseconds.
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Growth factor between consecutive backoff delays.
pub const RETRY_MULTIPLIER: f64 = 2.0;

/// Sliding window length for the rate limiter, in seconds.
pub const RATE_WINDOW_SECS: u64 = 60;

/// Requests admitted per client within one rate window.
pub const RATE_MAX_REQUESTS: u32 = 100;

/// Time-to-live of a checkpoint in the shared store, in seconds (7 days).
pub const CHECKPOINT_TTL_SECS: u64 = 7 * 24 * 3600;

/// Retention of job records in the shared store, in seconds (30 days).
pub const JOB_RETENTION_SECS: u64 = 30 * 24 * 3600;

/// Prefix applied to every key written to the shared store.
pub const KEY_PREFIX: &str = "scribed";

/// Default Whisper model file.
pub const DEFAULT_MODEL_PATH: &str = "models/ggml-base.bin";

/// Default language code for transcription.
///
/// "auto" lets Whisper detect the spoken language automatically.
pub const DEFAULT_LANGUAGE: &str = "auto";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// The only translation target the model supports.
pub const TRANSLATION_TARGET: &str = "en";

/// Jobs run concurrently by one worker process.
pub const WORKER_CONCURRENCY: usize = 2;

/// Capacity of the in-process dispatch queue.
pub const DISPATCH_QUEUE_CAPACITY: usize = 256;

/// Report the GPU backend compiled into this build.
///
/// Returns a human-readable name based on the compile-time feature flags.
/// Only one GPU backend can be active at a time; if none is enabled, returns "CPU".
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else if cfg!(feature = "hipblas") {
        "HipBLAS (AMD)"
    } else if cfg!(feature = "openblas") {
        "OpenBLAS"
    } else {
        "CPU"
    }
}
