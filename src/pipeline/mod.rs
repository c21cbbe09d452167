//! Long-audio transcription: window planning, overlap merging, progress
//! accounting, and the sequential chunk pipeline.

pub mod chunked;
pub mod merge;
pub mod progress;
pub mod window;

pub use chunked::{ChunkPipeline, PipelineOutcome, PipelineSettings, WindowObserver, describe_skipped};
pub use merge::SegmentMerger;
pub use progress::ProgressPlan;
pub use window::{Window, plan_windows};
