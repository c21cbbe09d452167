//! Speech-to-text: the model seam and its implementations.

pub mod segment;
pub mod transcriber;
pub mod whisper;

pub use segment::{Segment, Word, clean_transcription};
pub use transcriber::{
    LoadedModel, MockModelLoader, MockTranscriber, ModelLoader, TranscribeOptions, Transcriber,
};
pub use whisper::{WhisperConfig, WhisperLoader, WhisperTranscriber};
