//! Scripted landmark detector.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::trace::Trace;
use crate::frame::Frame;
use crate::motion::{
    DetectionResult, DetectorError, DetectorFactory, DetectorOptions, LandmarkDetector,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a detector answers to each submitted frame.
#[derive(Debug, Clone)]
pub enum DetectorScript {
    /// One result per submission, in order, then silence.
    Sequential(VecDeque<DetectionResult>),
    /// Results keyed by time since the first submission. Each submission
    /// emits the newest result that has come due, skipping any older ones.
    Timed(VecDeque<(Duration, DetectionResult)>),
}

impl DetectorScript {
    pub fn sequential(results: impl IntoIterator<Item = DetectionResult>) -> Self {
        DetectorScript::Sequential(results.into_iter().collect())
    }

    pub fn from_trace(trace: &Trace) -> Self {
        DetectorScript::Timed(trace.timed_results().into_iter().collect())
    }

    fn next(&mut self, elapsed: Duration) -> Option<DetectionResult> {
        match self {
            DetectorScript::Sequential(results) => results.pop_front(),
            DetectorScript::Timed(results) => {
                let mut due = None;
                while results.front().is_some_and(|(at, _)| *at <= elapsed) {
                    due = results.pop_front().map(|(_, result)| result);
                }
                due
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        match self {
            DetectorScript::Sequential(results) => results.is_empty(),
            DetectorScript::Timed(results) => results.is_empty(),
        }
    }
}

struct FactoryState {
    script: Mutex<DetectorScript>,
    available: AtomicBool,
    /// `create` fails this many more times before succeeding.
    failures_left: AtomicU32,
    create_delay: Mutex<Duration>,
    create_calls: AtomicU32,
    asset_sources: Mutex<Vec<Option<String>>>,
    submitted: AtomicU64,
    fail_submissions: AtomicBool,
}

/// Factory for [`ScriptedDetector`]s. Clones share counters and the script,
/// so a test can keep a handle after handing one to a processor.
#[derive(Clone)]
pub struct ScriptedDetectorFactory {
    state: Arc<FactoryState>,
}

impl ScriptedDetectorFactory {
    pub fn new(script: DetectorScript) -> Self {
        Self {
            state: Arc::new(FactoryState {
                script: Mutex::new(script),
                available: AtomicBool::new(true),
                failures_left: AtomicU32::new(0),
                create_delay: Mutex::new(Duration::ZERO),
                create_calls: AtomicU32::new(0),
                asset_sources: Mutex::new(Vec::new()),
                submitted: AtomicU64::new(0),
                fail_submissions: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.state.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *lock(&self.state.create_delay) = delay;
    }

    /// Make every submission fail (results are still not produced).
    pub fn set_fail_submissions(&self, fail: bool) {
        self.state.fail_submissions.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> u32 {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    /// Asset source passed to each `create` call, in order.
    pub fn asset_sources(&self) -> Vec<Option<String>> {
        lock(&self.state.asset_sources).clone()
    }

    pub fn submitted(&self) -> u64 {
        self.state.submitted.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        lock(&self.state.script).is_exhausted()
    }
}

impl DetectorFactory for ScriptedDetectorFactory {
    type Detector = ScriptedDetector;

    fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    fn create(
        &self,
        asset_source: Option<&str>,
        options: &DetectorOptions,
    ) -> impl Future<Output = Result<ScriptedDetector, DetectorError>> + Send {
        let state = Arc::clone(&self.state);
        let source = asset_source.map(str::to_string);
        let delay = *lock(&state.create_delay);
        log::debug!(
            "Scripted detector create (complexity {}, assets {:?})",
            options.model_complexity,
            source
        );

        async move {
            state.create_calls.fetch_add(1, Ordering::SeqCst);
            lock(&state.asset_sources).push(source.clone());
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let failing = state
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(DetectorError::AssetLoad {
                    source_url: source.unwrap_or_else(|| "built-in".to_string()),
                    message: "simulated load failure".to_string(),
                });
            }

            Ok(ScriptedDetector {
                state,
                sender: Mutex::new(None),
                started: Mutex::new(None),
            })
        }
    }
}

/// Detector that answers from a [`DetectorScript`].
pub struct ScriptedDetector {
    state: Arc<FactoryState>,
    sender: Mutex<Option<mpsc::UnboundedSender<DetectionResult>>>,
    started: Mutex<Option<Instant>>,
}

impl LandmarkDetector for ScriptedDetector {
    fn on_results(&self, sender: mpsc::UnboundedSender<DetectionResult>) {
        *lock(&self.sender) = Some(sender);
    }

    fn submit(&self, frame: Frame) -> impl Future<Output = Result<(), DetectorError>> + Send {
        self.state.submitted.fetch_add(1, Ordering::SeqCst);

        let result = if self.state.fail_submissions.load(Ordering::SeqCst) {
            Err(DetectorError::Submit(format!(
                "simulated failure on {}x{} frame",
                frame.width, frame.height
            )))
        } else {
            let elapsed = {
                let mut started = lock(&self.started);
                started.get_or_insert_with(Instant::now).elapsed()
            };
            if let Some(result) = lock(&self.state.script).next(elapsed) {
                if let Some(sender) = lock(&self.sender).as_ref() {
                    // Receiver gone means the processor was dropped
                    let _ = sender.send(result);
                }
            }
            Ok(())
        };
        std::future::ready(result)
    }
}
