//! scribed - resilient transcription jobs for long audio
//!
//! Submits audio as content-addressed jobs, transcribes long inputs window by
//! window through a single shared model, and survives crashes, flaky
//! inference, and cancellation along the way.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod checkpoint;
#[cfg(feature = "cli")]
pub mod cli;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod error;
pub mod job;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod rate_limit;
pub mod resilience;
pub mod store;
pub mod stt;
pub mod worker;

// Job lifecycle
pub use job::{Job, JobId, JobOptions, JobStatus};
pub use orchestrator::{Dispatcher, ManualDispatcher, Orchestrator, OrchestratorParts};
pub use worker::{ChannelDispatcher, run_worker};

// Core seams
pub use audio::{AudioBuffer, AudioDecoder};
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use store::{SharedStore, MemoryStore};
pub use stt::{ModelLoader, Segment, Transcriber};

// Resilience
pub use checkpoint::{Checkpoint, CheckpointStore, Stage};
pub use model::{ModelManager, ModelStatus};
pub use rate_limit::RateLimiter;
pub use resilience::{CircuitBreaker, CircuitState, RetryPolicy};

// Error handling
pub use error::{Result, ScribedError};

// Config
pub use config::Config;

/// Crate version, suffixed with `+<short hash>` when built from a git checkout.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{version}+{hash}"),
        _ => version.to_string(),
    }
}
