//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use scribed::audio::FixedDecoder;
use scribed::clock::{Clock, ManualClock};
use scribed::config::Config;
use scribed::orchestrator::{ManualDispatcher, Orchestrator, OrchestratorParts};
use scribed::resilience::RetryPolicy;
use scribed::store::{MemoryStore, SharedStore};
use scribed::stt::{LoadedModel, ModelLoader, Segment, TranscribeOptions, Transcriber};
use scribed::{AudioBuffer, Result};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Loader handing out any transcriber.
pub struct FixedLoader(pub Arc<dyn Transcriber>);

impl ModelLoader for FixedLoader {
    fn load(&self) -> Result<LoadedModel> {
        Ok(LoadedModel {
            transcriber: self.0.clone(),
            device: "CPU".to_string(),
            memory_bytes: 1 << 20,
        })
    }

    fn model_name(&self) -> &str {
        "fixture"
    }
}

/// Wraps a transcriber and parks the call with the given zero-based index
/// until the test releases it.
pub struct Gate<T> {
    inner: T,
    halt_at: usize,
    calls: std::sync::atomic::AtomicUsize,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

pub struct GateHandle {
    entered: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

impl GateHandle {
    /// Waits until the gated call has started.
    pub async fn entered(&self) {
        while self.entered.try_recv().is_err() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

pub fn gate<T>(inner: T, halt_at: usize) -> (Gate<T>, GateHandle) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    (
        Gate {
            inner,
            halt_at,
            calls: Default::default(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        },
        GateHandle {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

impl<T> Gate<T> {
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl<T: Transcriber> Transcriber for Gate<T> {
    fn transcribe(&self, audio: &AudioBuffer, options: &TranscribeOptions) -> Result<Vec<Segment>> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call == self.halt_at {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
        }
        self.inner.transcribe(audio, options)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Shared store that remembers every progress value written to a job record.
#[derive(Clone, Default)]
pub struct ProgressLog {
    inner: MemoryStore,
    progress: Arc<Mutex<Vec<f64>>>,
    statuses: Arc<Mutex<Vec<String>>>,
}

impl ProgressLog {
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: MemoryStore::with_clock(clock),
            progress: Arc::default(),
            statuses: Arc::default(),
        }
    }

    pub fn values(&self) -> Vec<f64> {
        self.progress.lock().unwrap().clone()
    }

    /// Job statuses in write order.
    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl SharedStore for ProgressLog {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        if key.contains(":job:") {
            let record: serde_json::Value = serde_json::from_str(value)?;
            if let Some(progress) = record["progress"].as_f64() {
                self.progress.lock().unwrap().push(progress);
            }
            if let Some(status) = record["status"].as_str() {
                self.statuses.lock().unwrap().push(status.to_owned());
            }
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn set_if_not_lower(
        &self,
        key: &str,
        value: &str,
        score: f64,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.inner.set_if_not_lower(key, value, score, ttl).await
    }

    async fn window_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
        member: &str,
    ) -> Result<bool> {
        self.inner.window_admit(key, now_ms, window_ms, limit, member).await
    }
}

/// An input file on disk; the decoder ignores its content.
pub fn input_file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, name.as_bytes()).unwrap();
    path
}

/// Orchestrator over `store` transcribing `audio_secs` of silence at 100 Hz.
pub fn orchestrator(
    store: Arc<dyn SharedStore>,
    transcriber: Arc<dyn Transcriber>,
    clock: &ManualClock,
    audio_secs: f64,
) -> Orchestrator {
    orchestrator_with(&Config::default(), store, transcriber, clock, audio_secs)
}

pub fn orchestrator_with(
    config: &Config,
    store: Arc<dyn SharedStore>,
    transcriber: Arc<dyn Transcriber>,
    clock: &ManualClock,
    audio_secs: f64,
) -> Orchestrator {
    Orchestrator::new(
        config,
        OrchestratorParts {
            store,
            loader: Arc::new(FixedLoader(transcriber)),
            decoder: Arc::new(FixedDecoder::silence(audio_secs, 100)),
            dispatcher: Arc::new(ManualDispatcher::new()),
            clock: Arc::new(clock.clone()),
        },
    )
    .with_retry(RetryPolicy::immediate(3))
}
