//! A 65-minute job driven end to end through the public API.

mod common;

use common::{ProgressLog, input_file, orchestrator, orchestrator_with};
use scribed::config::Config;
use scribed::clock::ManualClock;
use scribed::job::{JobOptions, JobStatus};
use scribed::stt::MockTranscriber;
use scribed::Stage;
use std::sync::Arc;
use std::time::Duration;

const SIXTY_FIVE_MINUTES: f64 = 65.0 * 60.0;

#[tokio::test]
async fn sixty_five_minute_job_completes_with_even_progress() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let store = ProgressLog::with_clock(Arc::new(clock.clone()));
    let transcriber = Arc::new(
        MockTranscriber::new("mock")
            .with_response("said something")
            .advancing(clock.clone(), Duration::from_secs(20)),
    );
    let orchestrator = orchestrator(
        Arc::new(store.clone()),
        transcriber.clone(),
        &clock,
        SIXTY_FIVE_MINUTES,
    );

    let job = orchestrator
        .submit(&input_file(&dir, "lecture.wav"), JobOptions::default())
        .await
        .unwrap();
    let done = orchestrator.run(&job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100.0);
    assert_eq!(done.error_message, None);
    assert_eq!(transcriber.call_count(), 130);

    // Progress: never decreases, 25 before the first window, 50 after
    // window 65 of 130, 75 after the last window, 100 at completion.
    let progress = store.values();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert!(progress.contains(&25.0));
    let after_65 = progress.iter().position(|p| *p == 50.0).unwrap();
    let after_64 = progress[after_65 - 1];
    assert!((after_64 - (25.0 + 50.0 * 64.0 / 130.0)).abs() < 1e-9);
    assert!(progress.contains(&75.0));
    assert_eq!(progress.last().copied(), Some(100.0));

    // Segments cover the whole timeline in order without gaps wider than
    // the overlap and without overlapping each other.
    let segments = &done.segments;
    assert_eq!(segments.len(), 130);
    assert_eq!(segments[0].start, 0.0);
    assert_eq!(segments.last().unwrap().end, SIXTY_FIVE_MINUTES);
    for pair in segments.windows(2) {
        let gap = pair[1].start - pair[0].end;
        assert!(gap <= 1.0 + 1e-9, "gap {gap} between {:?} and {:?}", pair[0], pair[1]);
        assert!(gap >= -1e-9, "segments overlap: {:?} {:?}", pair[0], pair[1]);
    }

    let checkpoint = orchestrator.checkpoints().load(&job.id).await.unwrap().unwrap();
    assert_eq!(checkpoint.stage, Stage::Completed);
    assert_eq!(checkpoint.processed_duration, SIXTY_FIVE_MINUTES);
    assert_eq!(checkpoint.windows_completed, 130);
}

#[tokio::test]
async fn skipped_windows_are_named_in_the_job_error() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    // Windows 45 and 46 (calls 44..=49) fail every attempt. Six failures in
    // a row would trip the default circuit, so raise its threshold.
    let transcriber = Arc::new(MockTranscriber::new("mock").failing_on_calls(44..50));
    let mut config = Config::default();
    config.circuit.failure_threshold = 10;
    let orchestrator = orchestrator_with(
        &config,
        Arc::new(scribed::MemoryStore::new()),
        transcriber.clone(),
        &clock,
        SIXTY_FIVE_MINUTES,
    );

    let job = orchestrator
        .submit(&input_file(&dir, "lecture.wav"), JobOptions::default())
        .await
        .unwrap();
    let done = orchestrator.run(&job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(
        done.error_message.as_deref(),
        Some("transcribing: window 45–46 failed after 3 attempts")
    );
    assert_eq!(done.segments.len(), 128);
    let hole = done
        .segments
        .windows(2)
        .find(|w| w[1].start - w[0].end > 1.0)
        .unwrap();
    assert_eq!(hole[0].end, 1320.0);
    assert_eq!(hole[1].start, 1379.0);
}

#[tokio::test]
async fn identical_submissions_share_one_job() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let orchestrator = orchestrator(
        Arc::new(scribed::MemoryStore::new()),
        Arc::new(MockTranscriber::new("mock")),
        &clock,
        60.0,
    );
    let input = input_file(&dir, "clip.wav");

    let first = orchestrator.submit(&input, JobOptions::default()).await.unwrap();
    orchestrator.run(&first.id).await.unwrap();
    let second = orchestrator.submit(&input, JobOptions::default()).await.unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.status, JobStatus::Completed);

    let translated = orchestrator
        .submit(
            &input,
            JobOptions {
                language_out: Some("en".to_string()),
                ..JobOptions::default()
            },
        )
        .await
        .unwrap();
    assert_ne!(translated.id, first.id);
}
