//! lane-motion library crate.
//!
//! Two cooperating state machines for a camera-driven runner game:
//! [`capture::AcquisitionManager`] turns "give me the camera" into a stream
//! that is visibly rendering, and [`motion::MotionProcessor`] turns pose
//! landmarks from that stream into lane changes and jumps.

pub mod cancel;
pub mod capture;
pub mod cli;
pub mod config;
pub mod frame;
pub mod motion;
pub mod retry;
pub mod sim;
