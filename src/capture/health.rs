//! Render-health probe.
//!
//! A granted stream with a live track can still show nothing: the decoder may
//! be wedged, the element may never leave the paused state, or the platform
//! may deliver a black, frozen surface. The probe binds the stream, waits for
//! metadata, plays, and then requires observable frame progress.

use super::device::{describe_tracks, MediaStream, PresentationStats, VideoSink};
use super::errors::AcquireError;
use super::settings::{AcquisitionSettings, FrameProgressHeuristic};
use crate::cancel::{guarded, poll_until, Interrupted};

/// Snapshot of every progress signal a sink exposes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSample {
    pub media_time: f64,
    pub decoded_frames: Option<u64>,
    pub presentation: Option<PresentationStats>,
}

impl FrameSample {
    pub fn take<S: MediaStream, K: VideoSink<S>>(sink: &K) -> Self {
        Self {
            media_time: sink.current_time(),
            decoded_frames: sink.decoded_frames(),
            presentation: sink.presentation(),
        }
    }
}

/// Which enabled heuristic, if any, shows progress from `before` to `after`.
pub fn detect_progress(
    before: &FrameSample,
    after: &FrameSample,
    settings: &AcquisitionSettings,
) -> Option<FrameProgressHeuristic> {
    if settings.accepts(FrameProgressHeuristic::MediaClock)
        && after.media_time - before.media_time > settings.media_time_epsilon
    {
        return Some(FrameProgressHeuristic::MediaClock);
    }

    if settings.accepts(FrameProgressHeuristic::DecodedFrames) {
        if let (Some(b), Some(a)) = (before.decoded_frames, after.decoded_frames) {
            if a > b {
                return Some(FrameProgressHeuristic::DecodedFrames);
            }
        }
    }

    if settings.accepts(FrameProgressHeuristic::Presentation) {
        match (before.presentation, after.presentation) {
            (Some(b), Some(a)) => {
                if a.presented_frames > b.presented_frames || a.media_time > b.media_time {
                    return Some(FrameProgressHeuristic::Presentation);
                }
            }
            // First callback since binding counts as a presented frame.
            (None, Some(a)) if a.presented_frames > 0 => {
                return Some(FrameProgressHeuristic::Presentation);
            }
            _ => {}
        }
    }

    None
}

/// Play `sink`, mapping rejections and hangs to `PlayFailed`.
pub async fn play_with_timeout<S: MediaStream, K: VideoSink<S>>(
    sink: &K,
    settings: &AcquisitionSettings,
) -> Result<(), AcquireError> {
    match guarded(sink.play(), Some(settings.play_timeout()), None).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AcquireError::PlayFailed(e.to_string())),
        Err(Interrupted::TimedOut(limit)) => Err(AcquireError::PlayFailed(format!(
            "play() did not settle within {:?}",
            limit
        ))),
        Err(Interrupted::Cancelled) => Err(AcquireError::PlayFailed("play() cancelled".into())),
    }
}

/// Poll the sink until a frame-progress signal fires or the budget runs out.
pub async fn wait_for_frame_progress<S: MediaStream, K: VideoSink<S>>(
    sink: &K,
    settings: &AcquisitionSettings,
) -> Result<FrameProgressHeuristic, AcquireError> {
    let baseline = FrameSample::take::<S, K>(sink);
    let mut seen = None;

    let progressed = poll_until(
        || {
            if sink.is_ended() {
                return false;
            }
            let (w, h) = sink.dimensions();
            if w == 0 || h == 0 {
                return false;
            }
            seen = detect_progress(&baseline, &FrameSample::take::<S, K>(sink), settings);
            seen.is_some()
        },
        settings.frame_health_timeout(),
        settings.frame_poll_interval(),
    )
    .await;

    match seen {
        Some(heuristic) if progressed => Ok(heuristic),
        _ => Err(AcquireError::NotRendering(format!(
            "no frame progress within {}ms (media time {:.3}s)",
            settings.frame_health_timeout_ms,
            sink.current_time()
        ))),
    }
}

/// Bind `stream` to `sink` and verify it actually renders.
pub async fn verify_renderable<S: MediaStream, K: VideoSink<S>>(
    sink: &K,
    stream: &S,
    settings: &AcquisitionSettings,
) -> Result<(), AcquireError> {
    sink.attach(Some(stream.clone()));
    log::debug!("Render probe: bound {}", describe_tracks(stream));

    let has_metadata = poll_until(
        || sink.metadata_ready(),
        settings.metadata_timeout(),
        settings.frame_poll_interval(),
    )
    .await;
    if !has_metadata {
        log::warn!(
            "Render probe: metadata not ready after {}ms for {}",
            settings.metadata_timeout_ms,
            describe_tracks(stream)
        );
        return Err(AcquireError::NotRendering(format!(
            "metadata not loaded within {}ms",
            settings.metadata_timeout_ms
        )));
    }
    let (width, height) = sink.dimensions();
    log::debug!("Render probe: metadata ready ({}x{})", width, height);

    if !stream.is_live() {
        return Err(AcquireError::NotRendering("all video tracks ended".into()));
    }

    let delivering = poll_until(
        || stream.has_delivering_track(),
        settings.live_track_timeout(),
        settings.frame_poll_interval(),
    )
    .await;
    if !delivering {
        // Some platforms report muted until the first frame is decoded.
        log::warn!(
            "Render probe: no unmuted live track after {}ms, continuing: {}",
            settings.live_track_timeout_ms,
            describe_tracks(stream)
        );
    }

    play_with_timeout::<S, K>(sink, settings).await?;
    log::debug!("Render probe: play() resolved");

    let heuristic = wait_for_frame_progress::<S, K>(sink, settings).await.map_err(|e| {
        log::warn!("Render probe failed: {} ({})", e, describe_tracks(stream));
        e
    })?;
    log::info!(
        "Render probe passed via {:?} for {}",
        heuristic,
        describe_tracks(stream)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time: f64, decoded: Option<u64>, presented: Option<(u64, f64)>) -> FrameSample {
        FrameSample {
            media_time: time,
            decoded_frames: decoded,
            presentation: presented.map(|(presented_frames, media_time)| PresentationStats {
                presented_frames,
                media_time,
            }),
        }
    }

    #[test]
    fn test_media_clock_progress_needs_epsilon() {
        let settings = AcquisitionSettings::default();
        let before = sample(1.0, None, None);
        assert_eq!(
            detect_progress(&before, &sample(1.005, None, None), &settings),
            None
        );
        assert_eq!(
            detect_progress(&before, &sample(1.1, None, None), &settings),
            Some(FrameProgressHeuristic::MediaClock)
        );
    }

    #[test]
    fn test_decoded_frame_progress() {
        let settings = AcquisitionSettings::default();
        let before = sample(0.0, Some(10), None);
        assert_eq!(
            detect_progress(&before, &sample(0.0, Some(12), None), &settings),
            Some(FrameProgressHeuristic::DecodedFrames)
        );
        assert_eq!(
            detect_progress(&before, &sample(0.0, Some(10), None), &settings),
            None
        );
    }

    #[test]
    fn test_presentation_progress() {
        let settings = AcquisitionSettings::default();
        let before = sample(0.0, None, Some((4, 0.2)));
        assert_eq!(
            detect_progress(&before, &sample(0.0, None, Some((5, 0.2))), &settings),
            Some(FrameProgressHeuristic::Presentation)
        );
        assert_eq!(
            detect_progress(&before, &sample(0.0, None, Some((4, 0.25))), &settings),
            Some(FrameProgressHeuristic::Presentation)
        );
        let fresh = sample(0.0, None, None);
        assert_eq!(
            detect_progress(&fresh, &sample(0.0, None, Some((1, 0.0))), &settings),
            Some(FrameProgressHeuristic::Presentation)
        );
    }

    #[test]
    fn test_disabled_heuristics_are_ignored() {
        let settings = AcquisitionSettings {
            frame_progress: vec![FrameProgressHeuristic::DecodedFrames],
            ..AcquisitionSettings::default()
        };
        let before = sample(0.0, Some(3), Some((1, 0.0)));
        let after = sample(2.0, Some(3), Some((9, 1.0)));
        assert_eq!(detect_progress(&before, &after, &settings), None);
    }
}
