use crate::audio::AudioBuffer;
use crate::clock::ManualClock;
use crate::error::{Result, ScribedError};
use crate::stt::segment::Segment;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Per-call inference options derived from a job's options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscribeOptions {
    /// Spoken language, `None` for auto-detection.
    pub language: Option<String>,
    /// Translate the speech into English instead of transcribing verbatim.
    pub translate: bool,
    /// Attach word-level timings to each segment.
    pub word_timestamps: bool,
}

/// Trait for speech-to-text transcription.
///
/// This trait allows swapping implementations (real Whisper vs mock).
/// Implementations are not assumed to tolerate concurrent calls; the model
/// manager serializes access.
pub trait Transcriber: Send + Sync {
    /// Transcribe audio to timestamped segments.
    ///
    /// Segment times are relative to the start of `audio`.
    fn transcribe(&self, audio: &AudioBuffer, options: &TranscribeOptions)
    -> Result<Vec<Segment>>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;
}

/// Implement Transcriber for Arc<T> to allow sharing across jobs.
impl<T: Transcriber> Transcriber for Arc<T> {
    fn transcribe(
        &self,
        audio: &AudioBuffer,
        options: &TranscribeOptions,
    ) -> Result<Vec<Segment>> {
        (**self).transcribe(audio, options)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// A model resident in memory, ready for inference.
pub struct LoadedModel {
    pub transcriber: Arc<dyn Transcriber>,
    /// Device the model lives on ("CPU", "CUDA", ...).
    pub device: String,
    /// Approximate bytes held by the model.
    pub memory_bytes: u64,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("model_name", &self.transcriber.model_name())
            .field("device", &self.device)
            .field("memory_bytes", &self.memory_bytes)
            .finish()
    }
}

/// Knows how to bring a model into memory. Loading is blocking and expensive.
pub trait ModelLoader: Send + Sync {
    /// Load the model.
    fn load(&self) -> Result<LoadedModel>;

    /// Name reported before the model is loaded.
    fn model_name(&self) -> &str;
}

/// Mock transcriber for testing.
///
/// Returns one segment spanning the whole input, optionally failing on chosen
/// call numbers (zero-based) and advancing a [`ManualClock`] per call to
/// simulate inference time.
#[derive(Debug, Default)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    should_fail: bool,
    failing_calls: HashSet<usize>,
    calls: AtomicUsize,
    clock: Option<(ManualClock, Duration)>,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            ..Self::default()
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail on every call
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Fail only on the given call numbers (zero-based).
    pub fn failing_on_calls(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.failing_calls.extend(calls);
        self
    }

    /// Advance `clock` by `per_call` on every call.
    pub fn advancing(mut self, clock: ManualClock, per_call: Duration) -> Self {
        self.clock = Some((clock, per_call));
        self
    }

    /// Number of transcribe calls so far, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(
        &self,
        audio: &AudioBuffer,
        options: &TranscribeOptions,
    ) -> Result<Vec<Segment>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((clock, per_call)) = &self.clock {
            clock.advance(*per_call);
        }

        if self.should_fail || self.failing_calls.contains(&call) {
            return Err(ScribedError::InferenceFailed {
                message: "mock transcription failure".to_string(),
            });
        }

        let segment = Segment::new(self.response.clone(), 0.0, audio.duration_secs());
        let segment = if options.word_timestamps {
            segment.with_estimated_words()
        } else {
            segment
        };
        Ok(vec![segment])
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Mock loader handing out a shared transcriber, counting loads.
#[derive(Debug)]
pub struct MockModelLoader {
    transcriber: Arc<MockTranscriber>,
    memory_bytes: u64,
    failing_loads: usize,
    loads: AtomicUsize,
}

impl MockModelLoader {
    /// Loader that always succeeds, reporting `memory_bytes` per load.
    pub fn new(transcriber: Arc<MockTranscriber>, memory_bytes: u64) -> Self {
        Self {
            transcriber,
            memory_bytes,
            failing_loads: 0,
            loads: AtomicUsize::new(0),
        }
    }

    /// Fail the first `count` load attempts.
    pub fn failing_first(mut self, count: usize) -> Self {
        self.failing_loads = count;
        self
    }

    /// Number of load attempts so far, failed ones included.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for MockModelLoader {
    fn load(&self) -> Result<LoadedModel> {
        let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failing_loads {
            return Err(ScribedError::ModelLoadFailed {
                message: "mock load failure".to_string(),
            });
        }
        Ok(LoadedModel {
            transcriber: self.transcriber.clone(),
            device: "CPU".to_string(),
            memory_bytes: self.memory_bytes,
        })
    }

    fn model_name(&self) -> &str {
        self.transcriber.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_second() -> AudioBuffer {
        AudioBuffer::new(vec![0i16; 16000], 16000)
    }

    #[test]
    fn test_mock_transcriber_returns_response() {
        let transcriber = MockTranscriber::new("test-model").with_response("Hello, this is a test");

        let segments = transcriber
            .transcribe(&one_second(), &TranscribeOptions::default())
            .unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "Hello, this is a test");
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[0].end, 1.0);
    }

    #[test]
    fn test_mock_transcriber_returns_error_when_configured() {
        let transcriber = MockTranscriber::new("test-model").with_failure();

        match transcriber.transcribe(&one_second(), &TranscribeOptions::default()) {
            Err(ScribedError::InferenceFailed { message }) => {
                assert_eq!(message, "mock transcription failure");
            }
            _ => panic!("Expected InferenceFailed error"),
        }
    }

    #[test]
    fn test_mock_transcriber_fails_on_selected_calls() {
        let transcriber = MockTranscriber::new("m").failing_on_calls([1]);
        let options = TranscribeOptions::default();

        assert!(transcriber.transcribe(&one_second(), &options).is_ok());
        assert!(transcriber.transcribe(&one_second(), &options).is_err());
        assert!(transcriber.transcribe(&one_second(), &options).is_ok());
        assert_eq!(transcriber.call_count(), 3);
    }

    #[test]
    fn test_mock_transcriber_word_timestamps() {
        let transcriber = MockTranscriber::new("m").with_response("two words");
        let options = TranscribeOptions {
            word_timestamps: true,
            ..TranscribeOptions::default()
        };

        let segments = transcriber.transcribe(&one_second(), &options).unwrap();
        assert_eq!(segments[0].words.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_mock_transcriber_advances_clock() {
        use crate::clock::Clock;

        let clock = ManualClock::new();
        let start = clock.now();
        let transcriber =
            MockTranscriber::new("m").advancing(clock.clone(), Duration::from_secs(7));

        transcriber
            .transcribe(&one_second(), &TranscribeOptions::default())
            .unwrap();

        assert_eq!((clock.now() - start).num_seconds(), 7);
    }

    #[test]
    fn test_transcriber_trait_is_object_safe() {
        let transcriber: Box<dyn Transcriber> =
            Box::new(MockTranscriber::new("test-model").with_response("boxed test"));

        assert_eq!(transcriber.model_name(), "test-model");
        let segments = transcriber
            .transcribe(&one_second(), &TranscribeOptions::default())
            .unwrap();
        assert_eq!(segments[0].text, "boxed test");
    }

    #[test]
    fn test_mock_loader_counts_and_fails_first() {
        let loader = MockModelLoader::new(Arc::new(MockTranscriber::new("m")), 1024)
            .failing_first(1);

        assert!(loader.load().is_err());
        let model = loader.load().unwrap();
        assert_eq!(model.memory_bytes, 1024);
        assert_eq!(model.device, "CPU");
        assert_eq!(loader.load_count(), 2);
        assert_eq!(loader.model_name(), "m");
    }
}
