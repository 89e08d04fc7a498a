//! Capture platform detection.
//!
//! The profile is resolved once per manager and never changes; it decides the
//! constraint ordering, the render retry budget and which recovery tricks are
//! safe on the current device.

use std::fmt;

use clap::ValueEnum;
use serde::Deserialize;

/// Host platform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Harmony,
    Desktop,
    Unknown,
}

impl Platform {
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Harmony => "harmony",
            Platform::Desktop => "desktop",
            Platform::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable per-session description of the capture host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformProfile {
    pub platform: Platform,
    pub is_tablet: bool,
    pub is_mobile: bool,
}

impl PlatformProfile {
    pub fn new(platform: Platform, is_tablet: bool) -> Self {
        let is_mobile = is_tablet
            || matches!(
                platform,
                Platform::Ios | Platform::Android | Platform::Harmony
            );
        Self {
            platform,
            is_tablet,
            is_mobile,
        }
    }

    /// Derive the profile from a user-agent string.
    ///
    /// `max_touch_points` disambiguates iPadOS, which reports a desktop
    /// Macintosh user agent but has a touch screen.
    pub fn detect(user_agent: &str, max_touch_points: u32) -> Self {
        let ua = user_agent.to_lowercase();

        let platform = if ua.contains("harmonyos") || ua.contains("openharmony") {
            Platform::Harmony
        } else if ua.contains("iphone")
            || ua.contains("ipad")
            || ua.contains("ipod")
            || (ua.contains("macintosh") && max_touch_points > 1)
        {
            Platform::Ios
        } else if ua.contains("android") {
            Platform::Android
        } else if ua.contains("windows")
            || ua.contains("macintosh")
            || ua.contains("linux")
            || ua.contains("cros")
        {
            Platform::Desktop
        } else {
            Platform::Unknown
        };

        let is_tablet = match platform {
            Platform::Ios => ua.contains("ipad") || ua.contains("macintosh"),
            Platform::Android => !ua.contains("mobile"),
            Platform::Harmony => ua.contains("tablet"),
            _ => ua.contains("tablet"),
        };

        Self::new(platform, is_tablet)
    }

    /// Number of fresh-stream retries after the first attempt when the caller
    /// does not specify one.
    pub fn default_render_retries(&self) -> u32 {
        match self.platform {
            Platform::Ios | Platform::Harmony => 3,
            Platform::Android => 2,
            Platform::Desktop | Platform::Unknown => 1,
        }
    }

    /// Whether the camera pipeline is known to stall silently after an
    /// interruption and needs an opposite-facing kick before a retry.
    pub fn wedges_after_interruption(&self) -> bool {
        self.platform == Platform::Ios
    }

    /// Whether a stream may be validated on an off-screen sink. Mobile Safari
    /// and HarmonyOS only decode into attached, visible elements.
    pub fn allows_detached_probe(&self) -> bool {
        matches!(self.platform, Platform::Desktop | Platform::Android)
    }
}

impl fmt::Display for PlatformProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (tablet: {}, mobile: {})",
            self.platform, self.is_tablet, self.is_mobile
        )
    }
}
