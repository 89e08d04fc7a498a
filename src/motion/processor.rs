//! Motion signal processor lifecycle.
//!
//! `Uninitialized -> Initializing -> Ready -> Running <-> Stopped`
//!
//! Initialization is memoized and runs as its own task, so callers that give
//! up waiting never stall it for the others. Once running, a send loop feeds
//! frames to the detector at a capped rate and a pump task hands each result
//! to the [`MotionAnalyzer`] in arrival order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::analyzer::MotionAnalyzer;
use super::detector::{
    DetectorError, DetectorFactory, DetectorSettings, InitError, LandmarkDetector,
};
use super::landmarks::DetectionResult;
use super::state::{MotionEvent, MotionSnapshot};
use super::tuning::MotionTuning;
use crate::cancel::{self, guarded, poll_until, CancelSignal, Canceller, Interrupted};
use crate::frame::FrameSource;

/// Poll interval while waiting for the detector capability to load.
const AVAILABILITY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Buffered motion events per subscriber before the slowest one lags.
const EVENT_CAPACITY: usize = 64;

/// Lifecycle phase of a [`MotionProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorPhase {
    Uninitialized,
    Initializing,
    Ready,
    Running,
    Stopped,
}

type InitFuture = Shared<BoxFuture<'static, Result<(), InitError>>>;

struct InitFlight {
    id: u64,
    future: InitFuture,
}

struct RunState {
    canceller: Canceller,
    task: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Arrival time on tokio's clock, so paused-time tests see consistent dt.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

struct ProcessorInner<F: DetectorFactory> {
    factory: Arc<F>,
    settings: DetectorSettings,
    analyzer: Mutex<MotionAnalyzer>,
    phase: Mutex<ProcessorPhase>,
    ready: AtomicBool,
    running: AtomicBool,
    detector: Mutex<Option<Arc<F::Detector>>>,
    init_flight: Mutex<Option<InitFlight>>,
    next_flight: AtomicU64,
    source: Mutex<Option<Arc<dyn FrameSource>>>,
    run: Mutex<Option<RunState>>,
    jump_timer: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<MotionSnapshot>,
    events_tx: broadcast::Sender<MotionEvent>,
}

/// Turns frames from a [`FrameSource`] into lane and jump events.
///
/// Clones share the same detector, analyzer and run state.
pub struct MotionProcessor<F: DetectorFactory> {
    inner: Arc<ProcessorInner<F>>,
}

impl<F: DetectorFactory> Clone for MotionProcessor<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: DetectorFactory> std::fmt::Debug for MotionProcessor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionProcessor")
            .field("phase", &self.phase())
            .field("ready", &self.is_ready())
            .field("started", &self.is_started())
            .finish()
    }
}

impl<F: DetectorFactory> MotionProcessor<F> {
    pub fn new(factory: F, settings: DetectorSettings, tuning: MotionTuning) -> Self {
        let (state_tx, _) = watch::channel(MotionSnapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ProcessorInner {
                factory: Arc::new(factory),
                settings,
                analyzer: Mutex::new(MotionAnalyzer::new(tuning)),
                phase: Mutex::new(ProcessorPhase::Uninitialized),
                ready: AtomicBool::new(false),
                running: AtomicBool::new(false),
                detector: Mutex::new(None),
                init_flight: Mutex::new(None),
                next_flight: AtomicU64::new(1),
                source: Mutex::new(None),
                run: Mutex::new(None),
                jump_timer: Mutex::new(None),
                state_tx,
                events_tx,
            }),
        }
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.inner.settings
    }

    pub fn phase(&self) -> ProcessorPhase {
        *lock(&self.inner.phase)
    }

    /// A detector is loaded and configured.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// The send loop is running.
    pub fn is_started(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Latest published state.
    pub fn snapshot(&self) -> MotionSnapshot {
        self.inner.state_tx.borrow().clone()
    }

    /// Receiver that observes every published state.
    pub fn state(&self) -> watch::Receiver<MotionSnapshot> {
        self.inner.state_tx.subscribe()
    }

    /// Receiver for move and jump notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MotionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Load the detector. Concurrent callers share one initialization.
    ///
    /// The signal passed by the caller that starts the initialization cancels
    /// the work itself; a signal passed by a joining caller only abandons that
    /// caller's wait.
    pub async fn init(&self, cancel: Option<&CancelSignal>) -> Result<(), InitError> {
        if self.is_ready() {
            return Ok(());
        }
        if let Some(signal) = cancel {
            signal.check().map_err(|_| InitError::Cancelled)?;
        }

        let future = {
            let mut slot = lock(&self.inner.init_flight);
            match slot.as_ref() {
                Some(flight) => {
                    log::debug!("Joining in-flight detector initialization #{}", flight.id);
                    flight.future.clone()
                }
                None => {
                    let id = self.inner.next_flight.fetch_add(1, Ordering::SeqCst);
                    self.inner
                        .set_phase_if(ProcessorPhase::Uninitialized, ProcessorPhase::Initializing);
                    let signal = cancel.cloned().unwrap_or_else(CancelSignal::never);
                    let inner = Arc::clone(&self.inner);
                    let handle = tokio::spawn(async move { inner.run_init(id, signal).await });
                    let future = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(InitError::TaskFailed(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    *slot = Some(InitFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        match guarded(future, None, cancel).await {
            Ok(result) => result,
            // Cancelled after the detector was already installed
            Err(_) if self.is_ready() => Ok(()),
            Err(_) => Err(InitError::Cancelled),
        }
    }

    /// Initialize if needed and start feeding frames from `source`.
    ///
    /// Calling this while already running only swaps the frame source. A
    /// fresh start resets the motion state.
    pub async fn start(
        &self,
        source: Arc<dyn FrameSource>,
        cancel: Option<&CancelSignal>,
    ) -> Result<(), InitError> {
        self.init(cancel).await?;
        if let Some(signal) = cancel {
            signal.check().map_err(|_| InitError::Cancelled)?;
        }

        let mut run = lock(&self.inner.run);
        *lock(&self.inner.source) = Some(source);
        if run.is_some() {
            log::debug!("Motion processor already running, frame source rebound");
            return Ok(());
        }

        {
            let mut analyzer = lock(&self.inner.analyzer);
            analyzer.reset();
            self.inner.state_tx.send_replace(analyzer.snapshot().clone());
        }

        let (canceller, stop) = Canceller::new();
        let interval = self.inner.settings.send_interval();
        let task = tokio::spawn(send_loop(Arc::downgrade(&self.inner), stop, interval));
        *run = Some(RunState { canceller, task });
        self.inner.running.store(true, Ordering::SeqCst);
        *lock(&self.inner.phase) = ProcessorPhase::Running;

        log::info!(
            "Motion processor started ({:.0} Hz send rate)",
            1.0 / interval.as_secs_f64()
        );
        Ok(())
    }

    /// Halt the send loop. Idempotent; the last state stays readable.
    pub fn stop(&self) {
        let run = lock(&self.inner.run).take();
        self.inner.running.store(false, Ordering::SeqCst);

        if let Some(run) = run {
            run.canceller.cancel();
            run.task.abort();
            *lock(&self.inner.phase) = ProcessorPhase::Stopped;
            log::info!("Motion processor stopped");
        }

        let mut analyzer = lock(&self.inner.analyzer);
        analyzer.clear_freshness();
        self.inner.state_tx.send_replace(analyzer.snapshot().clone());
    }

    /// Treat the current stance as neutral.
    pub fn calibrate(&self) {
        let mut analyzer = lock(&self.inner.analyzer);
        analyzer.calibrate();
        self.inner.state_tx.send_replace(analyzer.snapshot().clone());
    }
}

impl<F: DetectorFactory> ProcessorInner<F> {
    fn set_phase_if(&self, from: ProcessorPhase, to: ProcessorPhase) {
        let mut phase = lock(&self.phase);
        if *phase == from {
            *phase = to;
        }
    }

    fn detector(&self) -> Option<Arc<F::Detector>> {
        lock(&self.detector).clone()
    }

    async fn run_init(self: Arc<Self>, id: u64, cancel: CancelSignal) -> Result<(), InitError> {
        let result = match self.init_with_retry(&cancel).await {
            Ok(_) if cancel.is_cancelled() => Err(InitError::Cancelled),
            other => other,
        };

        match &result {
            Ok(detector) => {
                let (tx, rx) = mpsc::unbounded_channel();
                detector.on_results(tx);
                spawn_result_pump(Arc::downgrade(&self), rx);
                *lock(&self.detector) = Some(Arc::clone(detector));
                self.ready.store(true, Ordering::SeqCst);
                self.set_phase_if(ProcessorPhase::Initializing, ProcessorPhase::Ready);
                log::info!("Landmark detector ready");
            }
            Err(e) => {
                *lock(&self.detector) = None;
                self.ready.store(false, Ordering::SeqCst);
                self.set_phase_if(ProcessorPhase::Initializing, ProcessorPhase::Uninitialized);
                log::error!("Landmark detector initialization failed: {}", e);
            }
        }

        let mut slot = lock(&self.init_flight);
        if slot.as_ref().is_some_and(|flight| flight.id == id) {
            *slot = None;
        }
        result.map(|_| ())
    }

    async fn init_with_retry(&self, cancel: &CancelSignal) -> Result<Arc<F::Detector>, InitError> {
        let deadline_budget = self.settings.init_deadline();
        let deadline = tokio::time::Instant::now() + deadline_budget;
        let backoff = self.settings.backoff();
        let mut last_error: Option<DetectorError> = None;
        let mut attempt: u32 = 0;

        let deadline_exceeded = |last_error: Option<DetectorError>| InitError::DeadlineExceeded {
            deadline: deadline_budget,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt completed".to_string()),
        };

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(deadline_exceeded(last_error));
            }

            let source = self.settings.asset_source(attempt);
            log::info!(
                "Initializing landmark detector (attempt {}, assets: {})",
                attempt + 1,
                source.unwrap_or("built-in")
            );

            match guarded(self.init_attempt(source), Some(remaining), Some(cancel)).await {
                Ok(Ok(detector)) => return Ok(Arc::new(detector)),
                Ok(Err(e)) => {
                    log::warn!("Detector initialization attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
                Err(Interrupted::Cancelled) => return Err(InitError::Cancelled),
                Err(Interrupted::TimedOut(_)) => return Err(deadline_exceeded(last_error)),
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let delay = backoff.delay(attempt, remaining);
            log::info!("Retrying detector initialization in {:?}", delay);
            if cancel::sleep(delay, Some(cancel)).await.is_err() {
                return Err(InitError::Cancelled);
            }
            attempt = attempt.saturating_add(1);
        }
    }

    async fn init_attempt(&self, source: Option<&str>) -> Result<F::Detector, DetectorError> {
        let factory = &self.factory;
        let available = poll_until(
            || factory.is_available(),
            self.settings.availability_timeout(),
            AVAILABILITY_POLL_INTERVAL,
        )
        .await;
        if !available {
            return Err(DetectorError::Unavailable);
        }
        self.factory.create(source, &self.settings.options()).await
    }

    fn handle_result(self: &Arc<Self>, result: &DetectionResult) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let (events, snapshot, jump_duration) = {
            let mut analyzer = lock(&self.analyzer);
            let events = analyzer.process(result, now());
            (
                events,
                analyzer.snapshot().clone(),
                analyzer.tuning().jump_duration(),
            )
        };
        self.state_tx.send_replace(snapshot);

        for event in events {
            log::info!("Motion detected: {:?}", event);
            if event == MotionEvent::Jump {
                self.schedule_jump_clear(jump_duration);
            }
            // No subscribers is fine
            let _ = self.events_tx.send(event);
        }
    }

    fn schedule_jump_clear(self: &Arc<Self>, after: Duration) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire_jump();
            }
        });
        if let Some(previous) = lock(&self.jump_timer).replace(task) {
            previous.abort();
        }
    }

    fn expire_jump(&self) {
        let mut analyzer = lock(&self.analyzer);
        if analyzer.expire_jump(now()) {
            self.state_tx.send_replace(analyzer.snapshot().clone());
        }
    }
}

fn spawn_result_pump<F: DetectorFactory>(
    inner: Weak<ProcessorInner<F>>,
    mut results: mpsc::UnboundedReceiver<DetectionResult>,
) {
    tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.handle_result(&result);
        }
        log::debug!("Detector result channel closed");
    });
}

async fn send_loop<F: DetectorFactory>(
    inner: Weak<ProcessorInner<F>>,
    stop: CancelSignal,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let (source, detector) = {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let source = lock(&inner.source).clone();
            (source, inner.detector())
        };
        let (Some(source), Some(detector)) = (source, detector) else {
            continue;
        };
        if !source.is_sampleable() {
            continue;
        }
        let Some(frame) = source.grab_frame() else {
            continue;
        };

        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            result = detector.submit(frame) => {
                if let Err(e) = result {
                    log::warn!("Frame submission failed: {}", e);
                }
            }
        }
    }
}
