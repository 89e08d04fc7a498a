//! End-to-end tests for the motion processor lifecycle.
//!
//! These run `MotionProcessor` against the scripted detector with a paused
//! clock, covering:
//! - Memoized, retried and cancellable initialization
//! - The send loop feeding frames and results turning into events
//! - Stop, restart and source rebinding

use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use lane_motion::cancel::Canceller;
use lane_motion::frame::{Frame, FrameFormat, FrameSource};
use lane_motion::motion::{
    DetectionResult, DetectorSettings, InitError, Lane, Landmark, LandmarkSet, MotionEvent,
    MotionProcessor, MotionTuning, PoseLandmark, ProcessorPhase,
};
use lane_motion::sim::{DetectorScript, ScriptedDetectorFactory};
use tokio::time::sleep;

/// Always-playing source that counts grabs.
#[derive(Default)]
struct CountingSource {
    grabs: AtomicU64,
    paused: bool,
}

impl CountingSource {
    fn paused() -> Self {
        Self {
            grabs: AtomicU64::new(0),
            paused: true,
        }
    }

    fn grabs(&self) -> u64 {
        self.grabs.load(Ordering::SeqCst)
    }
}

impl FrameSource for CountingSource {
    fn dimensions(&self) -> (u32, u32) {
        (640, 480)
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn grab_frame(&self) -> Option<Frame> {
        self.grabs.fetch_add(1, Ordering::SeqCst);
        Some(Frame::blank(8, 6, FrameFormat::Rgba))
    }
}

fn pose(cx: f32, dy: f32) -> DetectionResult {
    let shoulder_y = 0.45 + dy;
    let hip_y = 0.7 + dy;
    DetectionResult::with(LandmarkSet::from_tracked(&[
        (PoseLandmark::Nose, Landmark::new(cx, 0.3 + dy, 0.9)),
        (PoseLandmark::LeftShoulder, Landmark::new(cx + 0.11, shoulder_y, 0.9)),
        (PoseLandmark::RightShoulder, Landmark::new(cx - 0.11, shoulder_y, 0.9)),
        (PoseLandmark::LeftHip, Landmark::new(cx + 0.09, hip_y, 0.9)),
        (PoseLandmark::RightHip, Landmark::new(cx - 0.09, hip_y, 0.9)),
    ]))
}

fn processor(factory: &ScriptedDetectorFactory) -> MotionProcessor<ScriptedDetectorFactory> {
    MotionProcessor::new(
        factory.clone(),
        DetectorSettings::default(),
        MotionTuning::default(),
    )
}

fn idle_factory() -> ScriptedDetectorFactory {
    ScriptedDetectorFactory::new(DetectorScript::sequential([]))
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<MotionEvent>) -> Vec<MotionEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_init_creates_one_detector() {
    let factory = idle_factory();
    factory.set_create_delay(Duration::from_millis(200));
    let processor = processor(&factory);
    assert_eq!(processor.phase(), ProcessorPhase::Uninitialized);

    let other = processor.clone();
    let (a, b, c) = tokio::join!(processor.init(None), other.init(None), processor.init(None));
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(factory.create_calls(), 1);
    assert!(processor.is_ready());
    assert_eq!(processor.phase(), ProcessorPhase::Ready);

    processor.init(None).await.unwrap();
    assert_eq!(factory.create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_init_retries_rotate_asset_sources() {
    let factory = idle_factory();
    factory.fail_next_creates(2);
    let processor = processor(&factory);

    processor.init(None).await.unwrap();

    assert_eq!(factory.create_calls(), 3);
    let settings = processor.settings();
    let expected: Vec<Option<String>> = (0..3)
        .map(|attempt| settings.asset_source(attempt).map(str::to_string))
        .collect();
    assert_eq!(factory.asset_sources(), expected);
    assert_ne!(expected[0], expected[1]);
    assert_eq!(expected[0], expected[2]);
}

#[tokio::test(start_paused = true)]
async fn test_init_waits_for_availability() {
    let factory = idle_factory();
    factory.set_available(false);
    let processor = processor(&factory);

    let enabler = async {
        sleep(Duration::from_millis(300)).await;
        assert_eq!(factory.create_calls(), 0);
        factory.set_available(true);
    };
    let (result, ()) = tokio::join!(processor.init(None), enabler);

    result.unwrap();
    assert_eq!(factory.create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_init_leaves_processor_unready() {
    let factory = idle_factory();
    factory.set_create_delay(Duration::from_secs(10));
    let processor = processor(&factory);
    let (canceller, signal) = Canceller::new();

    let cancel_later = async {
        sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    };
    let (result, ()) = tokio::join!(processor.init(Some(&signal)), cancel_later);

    assert_eq!(result, Err(InitError::Cancelled));
    sleep(Duration::from_secs(20)).await;
    assert!(!processor.is_ready());
    assert_eq!(processor.phase(), ProcessorPhase::Uninitialized);

    // A later init starts over
    factory.set_create_delay(Duration::ZERO);
    processor.init(None).await.unwrap();
    assert!(processor.is_ready());
    assert_eq!(factory.create_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_already_cancelled_signal_is_rejected_up_front() {
    let factory = idle_factory();
    let processor = processor(&factory);
    let (canceller, signal) = Canceller::new();
    canceller.cancel();

    assert_eq!(processor.init(Some(&signal)).await, Err(InitError::Cancelled));
    assert_eq!(factory.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_ready_reports_success() {
    let factory = idle_factory();
    factory.set_create_delay(Duration::from_millis(100));
    let processor = processor(&factory);
    let (canceller, signal) = Canceller::new();

    let mut init = pin!(processor.init(Some(&signal)));
    assert!(init.as_mut().now_or_never().is_none());

    // The init task finishes while the caller is not being polled
    sleep(Duration::from_millis(200)).await;
    assert!(processor.is_ready());
    canceller.cancel();

    assert_eq!(init.await, Ok(()));
    assert!(processor.is_ready());
    assert_eq!(processor.phase(), ProcessorPhase::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_joining_caller_cancel_only_abandons_its_wait() {
    let factory = idle_factory();
    factory.set_create_delay(Duration::from_secs(1));
    let processor = processor(&factory);
    let (canceller, signal) = Canceller::new();

    let joiner = async {
        sleep(Duration::from_millis(100)).await;
        let wait = processor.init(Some(&signal));
        let cancel = async {
            sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        };
        let (result, ()) = tokio::join!(wait, cancel);
        result
    };
    let (first, joined) = tokio::join!(processor.init(None), joiner);

    assert_eq!(joined, Err(InitError::Cancelled));
    first.unwrap();
    assert!(processor.is_ready());
    assert_eq!(factory.create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_init_deadline_reports_last_error() {
    let factory = idle_factory();
    factory.set_available(false);
    let settings = DetectorSettings {
        init_deadline_secs: 5,
        availability_timeout_ms: 1000,
        ..DetectorSettings::default()
    };
    let processor = MotionProcessor::new(factory.clone(), settings, MotionTuning::default());

    let err = processor.init(None).await.unwrap_err();

    match err {
        InitError::DeadlineExceeded {
            deadline,
            last_error,
        } => {
            assert_eq!(deadline, Duration::from_secs(5));
            assert!(last_error.contains("not available"), "{}", last_error);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!processor.is_ready());
    assert_eq!(processor.phase(), ProcessorPhase::Uninitialized);
    assert_eq!(factory.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_init_deadline_before_first_attempt_completes() {
    let factory = idle_factory();
    factory.set_available(false);
    let settings = DetectorSettings {
        init_deadline_secs: 2,
        ..DetectorSettings::default()
    };
    let processor = MotionProcessor::new(factory, settings, MotionTuning::default());

    let err = processor.init(None).await.unwrap_err();
    assert_eq!(
        err,
        InitError::DeadlineExceeded {
            deadline: Duration::from_secs(2),
            last_error: "no attempt completed".to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_running_processor_emits_lane_change() {
    let mut results: Vec<DetectionResult> = (0..10).map(|_| pose(0.5, 0.0)).collect();
    results.extend((0..20).map(|_| pose(0.75, 0.0)));
    let factory = ScriptedDetectorFactory::new(DetectorScript::sequential(results));
    let processor = processor(&factory);
    let mut events = processor.subscribe();
    let mut state = processor.state();
    let source = Arc::new(CountingSource::default());

    processor.start(source.clone(), None).await.unwrap();
    assert!(processor.is_started());
    assert_eq!(processor.phase(), ProcessorPhase::Running);

    sleep(Duration::from_secs(2)).await;

    assert!(factory.is_exhausted());
    assert!(factory.submitted() >= 30);
    assert_eq!(source.grabs(), factory.submitted());
    assert_eq!(drain(&mut events), vec![MotionEvent::Move { lane: Lane::Left }]);

    assert!(state.has_changed().unwrap());
    let snapshot = state.borrow_and_update().clone();
    assert_eq!(snapshot.lane, Lane::Left);
    assert_eq!(snapshot.frames_processed, 30);
    assert!(snapshot.last_landmarks_at.is_some());
    assert_eq!(processor.snapshot(), snapshot);
}

#[tokio::test(start_paused = true)]
async fn test_send_rate_is_capped() {
    let factory = idle_factory();
    let settings = DetectorSettings {
        send_rate_hz: 10.0,
        ..DetectorSettings::default()
    };
    let processor = MotionProcessor::new(factory.clone(), settings, MotionTuning::default());

    processor
        .start(Arc::new(CountingSource::default()), None)
        .await
        .unwrap();
    sleep(Duration::from_millis(1050)).await;

    // First tick fires immediately, then one every 100ms
    assert_eq!(factory.submitted(), 11);
}

#[tokio::test(start_paused = true)]
async fn test_jump_flag_clears_without_further_results() {
    let mut results: Vec<DetectionResult> = (0..30).map(|_| pose(0.5, 0.0)).collect();
    for dy in [1.0, 2.0, 3.0, 3.0, 2.0, 1.0, 0.0] {
        results.push(pose(0.5, -0.03 * dy));
    }
    let factory = ScriptedDetectorFactory::new(DetectorScript::sequential(results));
    let processor = processor(&factory);
    let mut events = processor.subscribe();

    processor
        .start(Arc::new(CountingSource::default()), None)
        .await
        .unwrap();

    let jump = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(MotionEvent::Jump) => break,
                Ok(_) => {}
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await;
    assert!(jump.is_ok(), "no jump detected");
    assert!(processor.snapshot().is_jumping);

    sleep(Duration::from_millis(500)).await;
    assert!(factory.is_exhausted());
    assert!(!processor.snapshot().is_jumping);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_keeps_state() {
    let results: Vec<DetectionResult> = (0..20).map(|_| pose(0.25, 0.0)).collect();
    let factory = ScriptedDetectorFactory::new(DetectorScript::sequential(results));
    let processor = processor(&factory);

    processor
        .start(Arc::new(CountingSource::default()), None)
        .await
        .unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(processor.snapshot().lane, Lane::Right);

    processor.stop();
    assert!(!processor.is_started());
    assert!(processor.is_ready());
    assert_eq!(processor.phase(), ProcessorPhase::Stopped);

    let snapshot = processor.snapshot();
    assert_eq!(snapshot.lane, Lane::Right);
    assert_eq!(snapshot.frames_processed, 20);
    assert!(snapshot.last_landmarks_at.is_none());

    let submitted = factory.submitted();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(factory.submitted(), submitted);

    processor.stop();
    assert_eq!(processor.phase(), ProcessorPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_start_is_harmless() {
    let factory = idle_factory();
    let processor = processor(&factory);
    processor.stop();
    assert_eq!(processor.phase(), ProcessorPhase::Uninitialized);
    assert!(!processor.is_started());
}

#[tokio::test(start_paused = true)]
async fn test_restart_resets_motion_state() {
    let results: Vec<DetectionResult> = (0..20).map(|_| pose(0.25, 0.0)).collect();
    let factory = ScriptedDetectorFactory::new(DetectorScript::sequential(results));
    let processor = processor(&factory);
    let source = Arc::new(CountingSource::default());

    processor.start(source.clone(), None).await.unwrap();
    sleep(Duration::from_secs(1)).await;
    processor.stop();
    assert_eq!(processor.snapshot().lane, Lane::Right);

    processor.start(source, None).await.unwrap();
    assert_eq!(processor.phase(), ProcessorPhase::Running);
    let snapshot = processor.snapshot();
    assert_eq!(snapshot.lane, Lane::Center);
    assert_eq!(snapshot.frames_processed, 0);
    assert_eq!(factory.create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_while_running_rebinds_source() {
    let factory = idle_factory();
    let processor = processor(&factory);
    let first = Arc::new(CountingSource::default());
    let second = Arc::new(CountingSource::default());

    processor.start(first.clone(), None).await.unwrap();
    sleep(Duration::from_millis(200)).await;
    let first_grabs = first.grabs();
    assert!(first_grabs > 0);

    processor.start(second.clone(), None).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    assert_eq!(first.grabs(), first_grabs);
    assert!(second.grabs() > 0);
    assert_eq!(factory.create_calls(), 1);
    assert!(processor.is_started());
}

#[tokio::test(start_paused = true)]
async fn test_paused_source_is_not_sampled() {
    let factory = idle_factory();
    let processor = processor(&factory);
    let source = Arc::new(CountingSource::paused());

    processor.start(source.clone(), None).await.unwrap();
    sleep(Duration::from_millis(500)).await;

    assert_eq!(source.grabs(), 0);
    assert_eq!(factory.submitted(), 0);
    assert!(processor.is_started());
}

#[tokio::test(start_paused = true)]
async fn test_submission_errors_do_not_stop_the_loop() {
    let factory = idle_factory();
    factory.set_fail_submissions(true);
    let processor = processor(&factory);

    processor
        .start(Arc::new(CountingSource::default()), None)
        .await
        .unwrap();
    sleep(Duration::from_millis(500)).await;

    assert!(factory.submitted() > 5);
    assert!(processor.is_started());
    assert_eq!(processor.snapshot().frames_processed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_propagates_init_failure() {
    let factory = idle_factory();
    factory.set_available(false);
    let settings = DetectorSettings {
        init_deadline_secs: 1,
        ..DetectorSettings::default()
    };
    let processor = MotionProcessor::new(factory, settings, MotionTuning::default());

    let err = processor
        .start(Arc::new(CountingSource::default()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, InitError::DeadlineExceeded { .. }));
    assert!(!processor.is_started());
}
