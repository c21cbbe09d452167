//! Real Whisper inference behind the model manager and orchestrator.
//!
//! Needs a ggml model; set `SCRIBED_MODEL_PATH` or place one at the default
//! path. Without a model the tests print a notice and pass.
#![cfg(feature = "whisper")]

use scribed::audio::wav::WavDecoder;
use scribed::config::Config;
use scribed::defaults;
use scribed::job::{JobOptions, JobStatus};
use scribed::orchestrator::{ManualDispatcher, Orchestrator, OrchestratorParts};
use scribed::store::MemoryStore;
use scribed::stt::{TranscribeOptions, WhisperConfig, WhisperLoader};
use scribed::{AudioDecoder, CircuitBreaker, ModelManager, SystemClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn find_model() -> Option<PathBuf> {
    let path = std::env::var_os("SCRIBED_MODEL_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(defaults::DEFAULT_MODEL_PATH));
    if path.exists() {
        Some(path)
    } else {
        eprintln!(
            "\nNo Whisper model at {}; skipping backend tests. Set SCRIBED_MODEL_PATH to run them.\n",
            path.display()
        );
        None
    }
}

fn whisper_config(path: &Path) -> WhisperConfig {
    WhisperConfig {
        model_path: path.to_path_buf(),
        language: "en".to_string(),
        threads: None,
        use_gpu: false,
    }
}

/// Writes `secs` of a quiet 440 Hz tone as 44.1 kHz stereo WAV.
fn write_tone(path: &Path, secs: f64) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (secs * 44100.0) as usize;
    for n in 0..frames {
        let t = n as f64 / 44100.0;
        let sample = ((t * 440.0 * std::f64::consts::TAU).sin() * 2000.0) as i16;
        writer.write_sample(sample).unwrap();
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn synthesized_wav_decodes_to_model_rate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_tone(&path, 2.0);

    let audio = WavDecoder::new()
        .decode(&std::fs::read(&path).unwrap())
        .unwrap();
    assert_eq!(audio.sample_rate(), defaults::SAMPLE_RATE);
    assert!((audio.duration_secs() - 2.0).abs() < 0.01);
}

#[tokio::test(flavor = "multi_thread")]
async fn model_manager_loads_infers_and_unloads() {
    let Some(model) = find_model() else { return };
    let manager = ModelManager::new(
        Arc::new(WhisperLoader::new(whisper_config(&model))),
        Arc::new(CircuitBreaker::new(5, Duration::from_secs(60), Arc::new(SystemClock))),
        10.0,
    );

    manager.ensure_loaded().await.unwrap();
    let status = manager.status();
    assert!(status.loaded);
    assert_eq!(status.device.as_deref(), Some("CPU"));
    assert!(status.memory_used > 0);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_tone(&path, 3.0);
    let audio = WavDecoder::new()
        .decode(&std::fs::read(&path).unwrap())
        .unwrap();
    let segments = manager
        .infer(&audio, &TranscribeOptions::default())
        .await
        .unwrap();
    for segment in &segments {
        assert!(segment.start >= 0.0 && segment.end <= 3.0 + 0.5);
    }

    assert!(manager.unload().await > 0);
    assert!(!manager.status().loaded);
}

#[tokio::test(flavor = "multi_thread")]
async fn short_file_runs_to_completion() {
    let Some(model) = find_model() else { return };
    let mut config = Config::default();
    config.model.path = model.clone();
    config.model.use_gpu = false;

    let orchestrator = Orchestrator::new(
        &config,
        OrchestratorParts {
            store: Arc::new(MemoryStore::new()),
            loader: Arc::new(WhisperLoader::new(WhisperConfig::from(&config.model))),
            decoder: Arc::new(WavDecoder::new()),
            dispatcher: Arc::new(ManualDispatcher::new()),
            clock: Arc::new(SystemClock),
        },
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.wav");
    write_tone(&path, 5.0);

    let job = orchestrator.submit(&path, JobOptions::default()).await.unwrap();
    let done = orchestrator.run(&job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed, "{:?}", done.error_message);
    assert_eq!(done.progress, 100.0);
    assert!(orchestrator.model().status().loaded);
}
