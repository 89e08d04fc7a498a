//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::enums::OutputFormat;
use crate::capture::Platform;

/// Pose-driven lane and jump controller: camera acquisition diagnostics and
/// motion-signal replay
#[derive(Parser, Debug)]
#[command(name = "lane-motion")]
#[command(version, about = "Pose-driven lane and jump controller", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the camera constraint order and retry budget for a platform
    Profiles {
        /// Target platform
        #[arg(long, value_enum, default_value = "desktop")]
        platform: Platform,

        /// Treat the device as a tablet
        #[arg(long)]
        tablet: bool,

        /// Detect the platform from a user-agent string instead
        #[arg(long, conflicts_with = "platform")]
        user_agent: Option<String>,

        /// Touch points reported alongside --user-agent
        #[arg(long, requires = "user_agent")]
        touch_points: Option<u32>,
    },
    /// Run the motion analyzer over a recorded landmark trace
    Replay {
        /// Trace file (JSON)
        trace: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Acquire a simulated camera and drive the motion processor from a trace
    Simulate {
        /// Trace file (JSON)
        trace: PathBuf,

        /// Platform profile for the acquisition manager
        #[arg(long, value_enum, default_value = "desktop")]
        platform: Platform,

        /// Treat the device as a tablet
        #[arg(long)]
        tablet: bool,

        /// Number of granted streams that never render before a healthy one
        #[arg(long, default_value = "0")]
        frozen_streams: u32,

        /// Deny camera permission
        #[arg(long)]
        deny: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Create default config file
    Init,
}
