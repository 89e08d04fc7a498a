//! Device acquisition manager.
//!
//! Obtains a camera stream that is visibly rendering into a sink. Requests
//! walk the platform's constraint profiles, every granted stream goes through
//! the render-health probe, and render failures trigger a fresh-stream retry
//! with sink reset and (on platforms that wedge) an opposite-camera kick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};

use super::constraints::{ConstraintProfile, ConstraintSet, FacingMode};
use super::device::{describe_tracks, CaptureBackend, DeviceError, MediaStream, VideoSink};
use super::errors::AcquireError;
use super::health;
use super::platform::PlatformProfile;
use super::session::CaptureSession;
use super::settings::AcquisitionSettings;
use crate::cancel::poll_until;

/// Upper bound on the kick request's permission wait.
const KICK_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Poll interval while waiting for the host to come to the foreground.
const FOREGROUND_POLL_INTERVAL: Duration = Duration::from_millis(100);

type AcquireFuture<S> = Shared<BoxFuture<'static, Result<S, AcquireError>>>;

struct InFlight<S> {
    id: u64,
    future: AcquireFuture<S>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ManagerInner<B: CaptureBackend> {
    backend: Arc<B>,
    profile: PlatformProfile,
    constraints: ConstraintProfile,
    settings: AcquisitionSettings,
    session: Mutex<CaptureSession<B>>,
    in_flight: Mutex<Option<InFlight<B::Stream>>>,
    next_flight: AtomicU64,
}

/// Acquires renderable camera streams for one capture session.
///
/// Clones share the same session, so at most one acquisition is ever in
/// flight across all of them.
pub struct AcquisitionManager<B: CaptureBackend> {
    inner: Arc<ManagerInner<B>>,
}

impl<B: CaptureBackend> Clone for AcquisitionManager<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: CaptureBackend> std::fmt::Debug for AcquisitionManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionManager")
            .field("profile", &self.inner.profile)
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

impl<B: CaptureBackend> AcquisitionManager<B> {
    pub fn new(backend: B, profile: PlatformProfile, settings: AcquisitionSettings) -> Self {
        let constraints = ConstraintProfile::for_platform(&profile);
        Self::with_constraints(backend, profile, constraints, settings)
    }

    /// Use an explicit constraint ordering instead of the platform default.
    pub fn with_constraints(
        backend: B,
        profile: PlatformProfile,
        constraints: ConstraintProfile,
        settings: AcquisitionSettings,
    ) -> Self {
        log::info!(
            "Capture platform: {} ({} constraint profiles)",
            profile,
            constraints.len()
        );
        Self {
            inner: Arc::new(ManagerInner {
                backend: Arc::new(backend),
                profile,
                constraints,
                settings,
                session: Mutex::new(CaptureSession::default()),
                in_flight: Mutex::new(None),
                next_flight: AtomicU64::new(1),
            }),
        }
    }

    pub fn profile(&self) -> PlatformProfile {
        self.inner.profile
    }

    pub fn constraints(&self) -> &ConstraintProfile {
        &self.inner.constraints
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.inner.settings
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Fresh-stream attempts made over the life of the session.
    pub fn attempts(&self) -> u64 {
        lock(&self.inner.session).attempts()
    }

    /// Late grants that were released after their request timed out.
    pub fn late_discards(&self) -> u32 {
        lock(&self.inner.session).late_discards()
    }

    /// The stream currently adopted by the session.
    pub fn current_stream(&self) -> Option<B::Stream> {
        lock(&self.inner.session).stream().cloned()
    }

    pub fn is_acquiring(&self) -> bool {
        lock(&self.inner.in_flight).is_some()
    }

    /// Acquire with the configured permission timeout and platform retry budget.
    pub async fn acquire(&self, sink: Arc<B::Sink>) -> Result<B::Stream, AcquireError> {
        let timeout = self.inner.settings.permission_timeout();
        self.acquire_renderable_stream(sink, None, timeout, None).await
    }

    /// Obtain a stream that is visibly rendering into `sink`.
    ///
    /// Calls made while another acquisition is in flight join it and receive
    /// the same result; the device is only asked once.
    pub async fn acquire_renderable_stream(
        &self,
        sink: Arc<B::Sink>,
        existing: Option<B::Stream>,
        permission_timeout: Duration,
        render_retry_count: Option<u32>,
    ) -> Result<B::Stream, AcquireError> {
        let (id, future) = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some(flight) => {
                    log::info!("Joining in-flight camera acquisition #{}", flight.id);
                    (flight.id, flight.future.clone())
                }
                None => {
                    let id = self.inner.next_flight.fetch_add(1, Ordering::SeqCst);
                    let inner = Arc::clone(&self.inner);
                    let future = async move {
                        inner
                            .acquire(sink, existing, permission_timeout, render_retry_count)
                            .await
                    }
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    (id, future)
                }
            }
        };

        let result = future.await;

        let mut slot = lock(&self.inner.in_flight);
        if slot.as_ref().is_some_and(|flight| flight.id == id) {
            *slot = None;
        }
        result
    }

    /// Re-validate and re-bind the stream this session already owns, e.g.
    /// after the host returns to the foreground. Never requests new hardware.
    pub async fn recover_foreground_preview(
        &self,
        sink: Arc<B::Sink>,
    ) -> Result<B::Stream, AcquireError> {
        let pending = lock(&self.inner.in_flight)
            .as_ref()
            .map(|flight| flight.future.clone());
        if let Some(future) = pending {
            log::info!("Foreground recovery joining in-flight acquisition");
            return future.await;
        }

        let stream = lock(&self.inner.session).stream().cloned().ok_or_else(|| {
            AcquireError::NotRendering("no stream owned by this session".into())
        })?;

        if !stream.is_live() {
            log::warn!(
                "Foreground recovery: owned stream ended in background ({})",
                describe_tracks(&stream)
            );
            return Err(AcquireError::NotRendering(
                "owned stream ended while in background".into(),
            ));
        }

        log::info!("Foreground recovery: rebinding {}", describe_tracks(&stream));
        health::verify_renderable::<B::Stream, B::Sink>(&sink, &stream, &self.inner.settings)
            .await?;
        lock(&self.inner.session).adopt(stream.clone(), sink);
        Ok(stream)
    }

    /// Stop all tracks and detach the sink.
    pub fn cleanup(&self) {
        lock(&self.inner.session).teardown();
    }
}

impl<B: CaptureBackend> ManagerInner<B> {
    async fn acquire(
        &self,
        sink: Arc<B::Sink>,
        existing: Option<B::Stream>,
        permission_timeout: Duration,
        render_retry_count: Option<u32>,
    ) -> Result<B::Stream, AcquireError> {
        if !self.backend.is_supported() {
            log::error!("Camera capture API missing on {}", self.profile);
            return Err(AcquireError::ApiMissing);
        }

        if let Some(stream) = existing {
            if let Some(stream) = self.try_existing(&sink, stream).await {
                return Ok(stream);
            }
        }

        let retries = render_retry_count
            .or(self.settings.render_retry_count)
            .unwrap_or_else(|| self.profile.default_render_retries());
        let late_at_start = lock(&self.session).late_discards();

        let mut last_render_error = None;
        let mut last_request_error = None;

        for attempt in 0..=retries {
            let session_attempt = lock(&self.session).next_attempt();
            log::info!(
                "Camera acquisition attempt {}/{} (session attempt #{})",
                attempt + 1,
                retries + 1,
                session_attempt
            );

            self.wait_for_foreground().await;

            let stream = match self.request_with_fallback(attempt, permission_timeout).await {
                Ok(stream) => stream,
                Err(e) if e.is_permanent() => {
                    log::error!("Camera acquisition aborted: {} ({})", e, e.code());
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("Camera request failed on attempt {}: {}", attempt + 1, e);
                    last_request_error = Some(e);
                    continue;
                }
            };

            match self.validate(&sink, &stream).await {
                Ok(()) => {
                    log::info!("Camera rendering: {}", describe_tracks(&stream));
                    lock(&self.session).adopt(stream.clone(), Arc::clone(&sink));
                    return Ok(stream);
                }
                Err(e) => {
                    log::warn!(
                        "Stream failed render check on attempt {}: {} ({})",
                        attempt + 1,
                        e,
                        describe_tracks(&stream)
                    );
                    stream.stop();
                    sink.attach(None);
                    sink.reset();
                    last_render_error = Some(e);
                    if attempt < retries {
                        self.recover_after_render_failure(permission_timeout).await;
                    }
                }
            }
        }

        let late_grants = lock(&self.session).late_discards() > late_at_start;
        let error = match (last_render_error, last_request_error) {
            (Some(render), _) => render,
            (None, Some(AcquireError::PermissionTimeout { .. })) if late_grants => {
                AcquireError::LateStreamDiscarded
            }
            (None, Some(request)) => request,
            (None, None) => AcquireError::NotRendering("no renderable stream obtained".into()),
        };
        log::error!(
            "Camera acquisition exhausted after {} attempts: {} ({})",
            retries + 1,
            error,
            error.code()
        );
        Err(error)
    }

    /// Fast path: re-bind a stream the caller already holds.
    async fn try_existing(&self, sink: &Arc<B::Sink>, stream: B::Stream) -> Option<B::Stream> {
        if !stream.is_live() {
            log::info!("Existing stream {} is no longer live", stream.id());
            stream.stop();
            return None;
        }

        log::info!("Rebinding existing stream: {}", describe_tracks(&stream));
        match health::verify_renderable::<B::Stream, B::Sink>(sink, &stream, &self.settings).await
        {
            Ok(()) => {
                lock(&self.session).adopt(stream.clone(), Arc::clone(sink));
                Some(stream)
            }
            Err(e) => {
                log::warn!("Existing stream failed render check: {}", e);
                stream.stop();
                sink.attach(None);
                sink.reset();
                None
            }
        }
    }

    /// Walk the rotated constraint list, then one unconstrained request.
    async fn request_with_fallback(
        &self,
        attempt: u32,
        permission_timeout: Duration,
    ) -> Result<B::Stream, AcquireError> {
        for constraints in self.constraints.rotated(attempt) {
            match self
                .request_with_timeout(Some(constraints), permission_timeout)
                .await
            {
                Ok(stream) => {
                    log::info!(
                        "Camera granted with {}: {}",
                        constraints,
                        describe_tracks(&stream)
                    );
                    return Ok(stream);
                }
                Err(e) if e.is_permanent() => return Err(e),
                Err(e @ AcquireError::PermissionTimeout { .. }) => return Err(e),
                Err(e) => log::warn!("Constraint profile {} failed: {}", constraints, e),
            }
        }

        log::warn!("All constraint profiles failed; trying best-effort request");
        let stream = self.request_with_timeout(None, permission_timeout).await?;
        log::info!("Camera granted best-effort: {}", describe_tracks(&stream));
        Ok(stream)
    }

    /// Issue one device request bounded by `limit`. A grant that lands after
    /// the timeout is stopped as soon as it arrives.
    async fn request_with_timeout(
        &self,
        constraints: Option<ConstraintSet>,
        limit: Duration,
    ) -> Result<B::Stream, AcquireError> {
        let backend = Arc::clone(&self.backend);
        let mut request = tokio::spawn(async move { backend.request_stream(constraints).await });

        match tokio::time::timeout(limit, &mut request).await {
            Ok(Ok(result)) => result.map_err(AcquireError::Device),
            Ok(Err(join_error)) => Err(AcquireError::Device(DeviceError::Other(format!(
                "camera request task failed: {}",
                join_error
            )))),
            Err(_) => {
                let counter = lock(&self.session).late_discard_counter();
                tokio::spawn(async move {
                    if let Ok(Ok(stream)) = request.await {
                        log::warn!(
                            "Discarding late camera grant: {}",
                            describe_tracks(&stream)
                        );
                        stream.stop();
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                });
                log::warn!("Camera request timed out after {:?}", limit);
                Err(AcquireError::PermissionTimeout {
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    /// Run the render probe, on a detached probe sink where that is safe.
    async fn validate(&self, sink: &Arc<B::Sink>, stream: &B::Stream) -> Result<(), AcquireError> {
        let probe = if self.settings.probe_detached_sink && self.profile.allows_detached_probe() {
            self.backend.create_probe_sink()
        } else {
            None
        };

        match probe {
            Some(probe) => {
                log::debug!("Validating on detached probe sink");
                let result =
                    health::verify_renderable::<B::Stream, B::Sink>(&probe, stream, &self.settings)
                        .await;
                probe.attach(None);
                result?;
                sink.attach(Some(stream.clone()));
                health::play_with_timeout::<B::Stream, B::Sink>(sink, &self.settings).await
            }
            None => {
                health::verify_renderable::<B::Stream, B::Sink>(sink, stream, &self.settings).await
            }
        }
    }

    async fn recover_after_render_failure(&self, permission_timeout: Duration) {
        if self.profile.wedges_after_interruption() {
            self.kick_pipeline(permission_timeout.min(KICK_REQUEST_TIMEOUT))
                .await;
        }
        tokio::time::sleep(self.settings.retry_cooldown()).await;
    }

    /// Briefly open and release the opposite camera to unstick the pipeline.
    async fn kick_pipeline(&self, limit: Duration) {
        log::info!("Kicking camera pipeline with an opposite-facing stream");
        let constraints = ConstraintSet::kick(FacingMode::User);
        match self.request_with_timeout(Some(constraints), limit).await {
            Ok(stream) => {
                match self.backend.create_probe_sink() {
                    Some(probe) => {
                        probe.attach(Some(stream.clone()));
                        if let Err(e) =
                            health::play_with_timeout::<B::Stream, B::Sink>(&probe, &self.settings)
                                .await
                        {
                            log::debug!("Kick stream play failed: {}", e);
                        }
                        tokio::time::sleep(self.settings.kick_duration()).await;
                        probe.attach(None);
                    }
                    None => tokio::time::sleep(self.settings.kick_duration()).await,
                }
                stream.stop();
                log::debug!("Kick stream released");
            }
            Err(e) => log::warn!("Camera pipeline kick failed: {}", e),
        }
    }

    async fn wait_for_foreground(&self) {
        if self.backend.is_foreground() {
            return;
        }
        log::info!("Waiting for foreground before requesting camera");
        let backend = &self.backend;
        let visible = poll_until(
            || backend.is_foreground(),
            self.settings.foreground_wait(),
            FOREGROUND_POLL_INTERVAL,
        )
        .await;
        if !visible {
            log::warn!(
                "Still in background after {}ms; requesting anyway",
                self.settings.foreground_wait_ms
            );
        }
    }
}
