//! In-memory camera: scripted device grants, streams and a sink whose media
//! clock follows tokio time.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::capture::{
    CaptureBackend, ConstraintSet, DeviceError, MediaStream, SinkError, TrackInfo,
    TrackReadyState, TrackSettings, VideoSink,
};
use crate::frame::{Frame, FrameFormat, FrameSource, Resolution};

/// Frame rate of a healthy simulated stream.
const SIM_FPS: f64 = 30.0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a granted stream behaves once bound to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderBehavior {
    /// Metadata loads, play succeeds, the clock advances.
    Healthy,
    /// Plays but the media clock never moves (black/frozen surface).
    Frozen,
    /// Dimensions never become available.
    MetadataNever,
    /// `play()` is rejected.
    PlayRejects,
}

/// What the device does with one request.
#[derive(Debug, Clone, PartialEq)]
pub enum GrantOutcome {
    Grant(RenderBehavior),
    Deny(DeviceError),
}

/// One scripted response, resolved after `delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedGrant {
    pub delay: Duration,
    pub outcome: GrantOutcome,
}

impl ScriptedGrant {
    pub fn healthy() -> Self {
        Self::grant(RenderBehavior::Healthy)
    }

    pub fn frozen() -> Self {
        Self::grant(RenderBehavior::Frozen)
    }

    pub fn grant(behavior: RenderBehavior) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: GrantOutcome::Grant(behavior),
        }
    }

    pub fn deny(error: DeviceError) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: GrantOutcome::Deny(error),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct StreamState {
    id: String,
    behavior: RenderBehavior,
    constraints: Option<ConstraintSet>,
    stopped: AtomicBool,
}

/// A granted simulated stream. Clones share state.
#[derive(Clone)]
pub struct SimStream {
    state: Arc<StreamState>,
}

impl std::fmt::Debug for SimStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimStream")
            .field("id", &self.state.id)
            .field("behavior", &self.state.behavior)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl SimStream {
    pub fn new(id: impl Into<String>, behavior: RenderBehavior, constraints: Option<ConstraintSet>) -> Self {
        Self {
            state: Arc::new(StreamState {
                id: id.into(),
                behavior,
                constraints,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn behavior(&self) -> RenderBehavior {
        self.state.behavior
    }

    pub fn constraints(&self) -> Option<ConstraintSet> {
        self.state.constraints
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    pub fn resolution(&self) -> Resolution {
        self.state
            .constraints
            .map(|c| c.resolution)
            .unwrap_or_default()
    }
}

impl MediaStream for SimStream {
    fn id(&self) -> String {
        self.state.id.clone()
    }

    fn video_tracks(&self) -> Vec<TrackInfo> {
        let constraints = self.state.constraints;
        vec![TrackInfo {
            label: "Simulated camera".to_string(),
            ready_state: if self.is_stopped() {
                TrackReadyState::Ended
            } else {
                TrackReadyState::Live
            },
            enabled: true,
            muted: false,
            settings: Some(TrackSettings {
                resolution: self.resolution(),
                frame_rate: constraints.and_then(|c| c.frame_rate),
                facing: constraints.map(|c| c.facing),
            }),
        }]
    }

    fn stop(&self) {
        if !self.state.stopped.swap(true, Ordering::SeqCst) {
            log::debug!("Simulated stream {} stopped", self.state.id);
        }
    }
}

#[derive(Default)]
struct SinkState {
    stream: Option<SimStream>,
    playing_since: Option<Instant>,
    attach_count: u32,
    play_count: u32,
}

/// Simulated video element. Also a [`FrameSource`] for the motion processor.
#[derive(Default)]
pub struct SimSink {
    state: Mutex<SinkState>,
}

impl SimSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(&self) -> Option<SimStream> {
        lock(&self.state).stream.clone()
    }

    pub fn attach_count(&self) -> u32 {
        lock(&self.state).attach_count
    }

    pub fn play_count(&self) -> u32 {
        lock(&self.state).play_count
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.state).playing_since.is_some()
    }

    fn renderable(state: &SinkState) -> Option<&SimStream> {
        state
            .stream
            .as_ref()
            .filter(|s| !s.is_stopped() && s.behavior() != RenderBehavior::MetadataNever)
    }

    fn size(state: &SinkState) -> (u32, u32) {
        match Self::renderable(state) {
            Some(stream) => {
                let res = stream.resolution();
                (res.width, res.height)
            }
            None => (0, 0),
        }
    }

    fn elapsed_media_time(state: &SinkState) -> f64 {
        match (Self::renderable(state), state.playing_since) {
            (Some(stream), Some(since)) if stream.behavior() == RenderBehavior::Healthy => {
                since.elapsed().as_secs_f64()
            }
            _ => 0.0,
        }
    }
}

impl VideoSink<SimStream> for SimSink {
    fn attach(&self, stream: Option<SimStream>) {
        let mut state = lock(&self.state);
        state.playing_since = None;
        if stream.is_some() {
            state.attach_count += 1;
        }
        state.stream = stream;
    }

    fn reset(&self) {
        let mut state = lock(&self.state);
        state.stream = None;
        state.playing_since = None;
    }

    fn metadata_ready(&self) -> bool {
        Self::renderable(&lock(&self.state)).is_some()
    }

    fn dimensions(&self) -> (u32, u32) {
        Self::size(&lock(&self.state))
    }

    fn play(&self) -> impl Future<Output = Result<(), SinkError>> + Send {
        let result = {
            let mut state = lock(&self.state);
            state.play_count += 1;
            match state.stream.as_ref().map(SimStream::behavior) {
                None => Err(SinkError::NoSource),
                Some(RenderBehavior::PlayRejects) => Err(SinkError::NotAllowed(
                    "simulated autoplay rejection".to_string(),
                )),
                Some(_) => {
                    state.playing_since = Some(Instant::now());
                    Ok(())
                }
            }
        };
        std::future::ready(result)
    }

    fn is_paused(&self) -> bool {
        lock(&self.state).playing_since.is_none()
    }

    fn is_ended(&self) -> bool {
        lock(&self.state)
            .stream
            .as_ref()
            .is_some_and(SimStream::is_stopped)
    }

    fn current_time(&self) -> f64 {
        Self::elapsed_media_time(&lock(&self.state))
    }

    fn decoded_frames(&self) -> Option<u64> {
        let state = lock(&self.state);
        state.stream.as_ref()?;
        Some((Self::elapsed_media_time(&state) * SIM_FPS) as u64)
    }
}

impl FrameSource for SimSink {
    fn dimensions(&self) -> (u32, u32) {
        Self::size(&lock(&self.state))
    }

    fn is_paused(&self) -> bool {
        lock(&self.state).playing_since.is_none()
    }

    fn grab_frame(&self) -> Option<Frame> {
        let (width, height) = Self::size(&lock(&self.state));
        if width == 0 || height == 0 {
            return None;
        }
        Some(Frame::blank(width, height, FrameFormat::Rgb))
    }
}

struct BackendState {
    script: VecDeque<ScriptedGrant>,
    fallback: ScriptedGrant,
    requests: Vec<Option<ConstraintSet>>,
    granted: Vec<SimStream>,
}

struct BackendShared {
    state: Mutex<BackendState>,
    supported: AtomicBool,
    foreground: AtomicBool,
    probe_sinks: AtomicBool,
    next_id: AtomicU64,
}

/// Scripted capture backend.
///
/// Requests consume the script front to back; once it runs out every request
/// gets the fallback (a healthy immediate grant unless changed). Clones share
/// the script and the request log.
#[derive(Clone)]
pub struct SimBackend {
    shared: Arc<BackendShared>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    pub fn new() -> Self {
        Self::with_script(Vec::new())
    }

    pub fn with_script(script: impl IntoIterator<Item = ScriptedGrant>) -> Self {
        Self {
            shared: Arc::new(BackendShared {
                state: Mutex::new(BackendState {
                    script: script.into_iter().collect(),
                    fallback: ScriptedGrant::healthy(),
                    requests: Vec::new(),
                    granted: Vec::new(),
                }),
                supported: AtomicBool::new(true),
                foreground: AtomicBool::new(true),
                probe_sinks: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn push(&self, grant: ScriptedGrant) {
        lock(&self.shared.state).script.push_back(grant);
    }

    pub fn set_fallback(&self, grant: ScriptedGrant) {
        lock(&self.shared.state).fallback = grant;
    }

    pub fn set_supported(&self, supported: bool) {
        self.shared.supported.store(supported, Ordering::SeqCst);
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.shared.foreground.store(foreground, Ordering::SeqCst);
    }

    /// Offer detached probe sinks to the manager.
    pub fn set_probe_sinks(&self, enabled: bool) {
        self.shared.probe_sinks.store(enabled, Ordering::SeqCst);
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<Option<ConstraintSet>> {
        lock(&self.shared.state).requests.clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.shared.state).requests.len()
    }

    /// Every stream granted so far, including ones later stopped.
    pub fn granted(&self) -> Vec<SimStream> {
        lock(&self.shared.state).granted.clone()
    }

    /// Granted streams whose tracks are still running.
    pub fn live_streams(&self) -> Vec<SimStream> {
        self.granted()
            .into_iter()
            .filter(|s| !s.is_stopped())
            .collect()
    }
}

impl CaptureBackend for SimBackend {
    type Stream = SimStream;
    type Sink = SimSink;

    fn is_supported(&self) -> bool {
        self.shared.supported.load(Ordering::SeqCst)
    }

    fn is_foreground(&self) -> bool {
        self.shared.foreground.load(Ordering::SeqCst)
    }

    fn request_stream(
        &self,
        constraints: Option<ConstraintSet>,
    ) -> impl Future<Output = Result<SimStream, DeviceError>> + Send {
        let grant = {
            let mut state = lock(&self.shared.state);
            state.requests.push(constraints);
            let fallback = state.fallback.clone();
            state.script.pop_front().unwrap_or(fallback)
        };
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);

        async move {
            if !grant.delay.is_zero() {
                tokio::time::sleep(grant.delay).await;
            }
            match grant.outcome {
                GrantOutcome::Grant(behavior) => {
                    let stream = SimStream::new(format!("sim-{}", id), behavior, constraints);
                    lock(&shared.state).granted.push(stream.clone());
                    Ok(stream)
                }
                GrantOutcome::Deny(error) => Err(error),
            }
        }
    }

    fn create_probe_sink(&self) -> Option<SimSink> {
        self.shared
            .probe_sinks
            .load(Ordering::SeqCst)
            .then(SimSink::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_healthy_sink_clock_advances() {
        let stream = SimStream::new("s", RenderBehavior::Healthy, None);
        let sink = SimSink::new();
        sink.attach(Some(stream));
        assert!(sink.metadata_ready());
        sink.play().await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(sink.current_time() >= 0.5);
        assert!(sink.decoded_frames().unwrap() >= 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frozen_sink_clock_stays() {
        let sink = SimSink::new();
        sink.attach(Some(SimStream::new("s", RenderBehavior::Frozen, None)));
        sink.play().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.current_time(), 0.0);
        assert_eq!(sink.decoded_frames(), Some(0));
    }

    #[tokio::test]
    async fn test_play_rejects_and_no_source() {
        let sink = SimSink::new();
        assert_eq!(sink.play().await, Err(SinkError::NoSource));
        sink.attach(Some(SimStream::new("s", RenderBehavior::PlayRejects, None)));
        assert!(matches!(sink.play().await, Err(SinkError::NotAllowed(_))));
        assert!(VideoSink::is_paused(&sink));
    }

    #[tokio::test]
    async fn test_stopped_stream_ends_sink() {
        let stream = SimStream::new("s", RenderBehavior::Healthy, None);
        let sink = SimSink::new();
        sink.attach(Some(stream.clone()));
        stream.stop();
        assert!(sink.is_ended());
        assert!(!sink.metadata_ready());
        assert!(!stream.is_live());
    }

    #[tokio::test]
    async fn test_backend_script_then_fallback() {
        let backend = SimBackend::with_script([ScriptedGrant::deny(DeviceError::NotFound)]);
        assert_eq!(
            backend.request_stream(None).await.unwrap_err(),
            DeviceError::NotFound
        );
        let stream = backend.request_stream(None).await.unwrap();
        assert_eq!(stream.behavior(), RenderBehavior::Healthy);
        assert_eq!(backend.request_count(), 2);
        assert_eq!(backend.granted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_source_view() {
        let sink = SimSink::new();
        assert!(!sink.is_sampleable());
        sink.attach(Some(SimStream::new("s", RenderBehavior::Healthy, None)));
        sink.play().await.unwrap();
        assert!(sink.is_sampleable());
        let frame = sink.grab_frame().unwrap();
        assert_eq!((frame.width, frame.height), (640, 480));
    }
}
