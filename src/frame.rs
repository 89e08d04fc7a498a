//! Frame types shared by the capture and motion pipelines.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Capture resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Tiny resolution (160x120) - used for throwaway pipeline kicks
    pub const TINY: Resolution = Resolution {
        width: 160,
        height: 120,
    };

    /// Low resolution (320x240)
    pub const LOW: Resolution = Resolution {
        width: 320,
        height: 240,
    };

    /// Medium resolution (640x480) - balanced, recommended
    pub const MEDIUM: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    /// HD resolution (1280x720)
    pub const HD: Resolution = Resolution {
        width: 1280,
        height: 720,
    };

    /// True when both dimensions are non-zero.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::MEDIUM
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel format of a grabbed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// RGB format (3 bytes per pixel)
    Rgb,
    /// RGBA format (4 bytes per pixel)
    Rgba,
}

/// A frame grabbed from a rendering sink.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format
    pub format: FrameFormat,
    /// Timestamp when the frame was grabbed
    pub timestamp: Instant,
}

impl Frame {
    /// Get the number of bytes per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self.format {
            FrameFormat::Rgb => 3,
            FrameFormat::Rgba => 4,
        }
    }

    /// A zero-filled frame, used where only dimensions matter.
    pub fn blank(width: u32, height: u32, format: FrameFormat) -> Self {
        let mut frame = Self {
            data: Vec::new(),
            width,
            height,
            format,
            timestamp: Instant::now(),
        };
        frame.data = vec![0; width as usize * height as usize * frame.bytes_per_pixel()];
        frame
    }
}

/// Anything the send loop can pull frames from.
///
/// Implemented by rendering sinks. Kept object-safe so a running processor can
/// be rebound to a different source without knowing its concrete type.
pub trait FrameSource: Send + Sync {
    /// Current pixel dimensions; `(0, 0)` until metadata is available.
    fn dimensions(&self) -> (u32, u32);

    /// Whether playback is paused (paused sources are skipped).
    fn is_paused(&self) -> bool;

    /// Grab the currently displayed frame, if any.
    fn grab_frame(&self) -> Option<Frame>;

    /// A source is worth sampling when it has real dimensions and is playing.
    fn is_sampleable(&self) -> bool {
        let (w, h) = self.dimensions();
        w > 0 && h > 0 && !self.is_paused()
    }
}
