//! Capture session bookkeeping.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::device::{CaptureBackend, MediaStream, VideoSink};

/// State owned by one acquisition manager: the adopted stream, the sink it
/// is bound to, and counters used for diagnostics and error selection.
pub struct CaptureSession<B: CaptureBackend> {
    stream: Option<B::Stream>,
    sink: Option<Arc<B::Sink>>,
    attempts: u64,
    late_discards: Arc<AtomicU32>,
}

impl<B: CaptureBackend> Default for CaptureSession<B> {
    fn default() -> Self {
        Self {
            stream: None,
            sink: None,
            attempts: 0,
            late_discards: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl<B: CaptureBackend> CaptureSession<B> {
    pub fn stream(&self) -> Option<&B::Stream> {
        self.stream.as_ref()
    }

    pub fn sink(&self) -> Option<&Arc<B::Sink>> {
        self.sink.as_ref()
    }

    /// Monotonic count of fresh-stream attempts across the session.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn next_attempt(&mut self) -> u64 {
        self.attempts += 1;
        self.attempts
    }

    /// Shared counter bumped by the late-grant discard task.
    pub fn late_discard_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.late_discards)
    }

    pub fn late_discards(&self) -> u32 {
        self.late_discards.load(Ordering::SeqCst)
    }

    /// Adopt `stream` as bound to `sink`. A previously adopted, different
    /// stream is stopped so hardware is never held twice.
    pub fn adopt(&mut self, stream: B::Stream, sink: Arc<B::Sink>) {
        if let Some(previous) = self.stream.take() {
            if previous.id() != stream.id() {
                log::info!("Releasing previous stream {}", previous.id());
                previous.stop();
            }
        }
        self.stream = Some(stream);
        self.sink = Some(sink);
    }

    /// Stop tracks and detach the sink.
    pub fn teardown(&mut self) {
        if let Some(stream) = self.stream.take() {
            log::info!("Stopping stream {}", stream.id());
            stream.stop();
        }
        if let Some(sink) = self.sink.take() {
            sink.attach(None);
        }
    }
}
