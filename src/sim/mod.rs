//! In-memory host: a scripted camera, a sink driven by tokio time, and a
//! detector that replays landmark traces.
//!
//! Used by the `simulate` and `replay` commands and by the integration tests.

mod capture;
mod detector;
mod trace;

pub use capture::{GrantOutcome, RenderBehavior, ScriptedGrant, SimBackend, SimSink, SimStream};
pub use detector::{DetectorScript, ScriptedDetector, ScriptedDetectorFactory};
pub use trace::{replay, ReplayReport, TimedEvent, Trace, TraceError, TraceFrame, TracePose};
