//! Subcommand handlers for profiles, replay, simulate and config actions.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;

use super::args::ConfigAction;
use super::enums::OutputFormat;
use crate::capture::{
    describe_tracks, AcquisitionManager, ConstraintProfile, DeviceError, Platform,
    PlatformProfile,
};
use crate::config::{default_path, Config, DEFAULT_CONFIG};
use crate::frame::FrameSource;
use crate::motion::{MotionProcessor, MotionSnapshot};
use crate::sim::{
    replay, DetectorScript, ScriptedDetectorFactory, ScriptedGrant, SimBackend, SimSink,
    TimedEvent, Trace,
};

/// Extra time the simulation keeps running after the trace ends.
const SIMULATE_TAIL: Duration = Duration::from_millis(500);

/// Options for the `simulate` subcommand.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub platform: Platform,
    pub tablet: bool,
    pub frozen_streams: u32,
    pub deny: bool,
}

/// Print the constraint order each acquisition attempt would use.
pub fn show_profiles(profile: PlatformProfile, config: &Config) {
    let constraints = ConstraintProfile::for_platform(&profile);
    let retries = config
        .acquisition
        .render_retry_count
        .unwrap_or_else(|| profile.default_render_retries());

    println!(
        "Platform: {}{}",
        profile.platform,
        if profile.is_tablet { " (tablet)" } else { "" }
    );
    println!("Render retries: {} ({} attempts)", retries, retries + 1);
    println!(
        "Recovery kick: {}",
        if profile.wedges_after_interruption() {
            "yes"
        } else {
            "no"
        }
    );
    println!(
        "Detached probe sink: {}",
        if profile.allows_detached_probe() && config.acquisition.probe_detached_sink {
            "yes"
        } else {
            "no"
        }
    );
    println!();

    for attempt in 0..=retries {
        let order: Vec<String> = constraints
            .rotated(attempt)
            .iter()
            .map(|set| set.to_string())
            .collect();
        println!("  attempt {}: {} -> unconstrained", attempt + 1, order.join(" -> "));
    }
}

fn summarize(snapshot: &MotionSnapshot) -> String {
    format!(
        "lane {} jumping {} frames {} missed {} nose ({:.3}, {:.3})",
        snapshot.lane,
        snapshot.is_jumping,
        snapshot.frames_processed,
        snapshot.missed_detections,
        snapshot.smoothed.nose_x,
        snapshot.smoothed.nose_y
    )
}

fn print_event(event: &TimedEvent, format: OutputFormat) -> Result<(), String> {
    match format {
        OutputFormat::Text => {
            println!("{:>7}ms  {:?}", event.t_ms, event.event);
        }
        OutputFormat::Json => {
            let line = serde_json::to_string(event)
                .map_err(|e| format!("Failed to encode event: {}", e))?;
            println!("{}", line);
        }
    }
    Ok(())
}

/// Run the analyzer over a trace file and print what it detected.
pub fn run_replay(path: &Path, format: OutputFormat, config: &Config) -> Result<(), String> {
    let trace = Trace::load(path).map_err(|e| e.to_string())?;
    let report = replay(&trace, config.motion.clone());

    for event in &report.events {
        print_event(event, format)?;
    }
    if format == OutputFormat::Text {
        println!();
        println!(
            "{} events over {:?}: {}",
            report.events.len(),
            trace.duration(),
            summarize(&report.final_state)
        );
    }
    Ok(())
}

/// Acquire a simulated camera and run the full processor against a trace.
pub fn run_simulate(path: &Path, options: SimulateOptions, config: &Config) -> Result<(), String> {
    let trace = Trace::load(path).map_err(|e| e.to_string())?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create async runtime: {}", e))?;
    rt.block_on(simulate(trace, options, config))
}

async fn simulate(trace: Trace, options: SimulateOptions, config: &Config) -> Result<(), String> {
    let backend = SimBackend::new();
    backend.set_probe_sinks(true);
    if options.deny {
        backend.push(ScriptedGrant::deny(DeviceError::PermissionDenied));
    }
    for _ in 0..options.frozen_streams {
        backend.push(ScriptedGrant::frozen());
    }

    let profile = PlatformProfile::new(options.platform, options.tablet);
    let manager = AcquisitionManager::new(backend.clone(), profile, config.acquisition.clone());
    let sink = Arc::new(SimSink::new());

    let stream = manager
        .acquire(Arc::clone(&sink))
        .await
        .map_err(|e| format!("Camera acquisition failed [{}]: {}", e.code(), e))?;
    println!(
        "Acquired {} after {} attempt(s), {} device request(s)",
        describe_tracks(&stream),
        manager.attempts(),
        backend.request_count()
    );

    let factory = ScriptedDetectorFactory::new(DetectorScript::from_trace(&trace));
    let processor = MotionProcessor::new(
        factory.clone(),
        config.detector.clone(),
        config.motion.clone(),
    );
    let mut events = processor.subscribe();
    let source: Arc<dyn FrameSource> = sink;
    processor
        .start(source, None)
        .await
        .map_err(|e| format!("Motion processor failed to start: {}", e))?;

    let started = tokio::time::Instant::now();
    let deadline = started + trace.duration() + SIMULATE_TAIL;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            received = events.recv() => match received {
                Ok(event) => {
                    let timed = TimedEvent {
                        t_ms: started.elapsed().as_millis() as u64,
                        event,
                    };
                    print_event(&timed, OutputFormat::Text)?;
                }
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Event printer lagged, {} events skipped", missed);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    processor.stop();
    manager.cleanup();

    println!();
    println!(
        "{} frames submitted: {}",
        factory.submitted(),
        summarize(&processor.snapshot())
    );
    Ok(())
}

/// Handle config subcommand actions.
pub fn handle_config_action(
    action: ConfigAction,
    config_path: Option<&Path>,
    config: &Config,
) -> Result<(), String> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_path);

    match action {
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            if path.exists() {
                println!("# Config file: {} (exists)", path.display());
            } else {
                println!("# Config file: {} (not found, using defaults)", path.display());
            }
            println!();
            print!("{}", config.to_toml().map_err(|e| e.to_string())?);
        }
        ConfigAction::Init => {
            if path.exists() {
                return Err(format!(
                    "Config file already exists: {}\nUse 'lane-motion config show' to view current settings.",
                    path.display()
                ));
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Error creating config directory: {}", e))?;
            }
            std::fs::write(&path, DEFAULT_CONFIG)
                .map_err(|e| format!("Error writing config file: {}", e))?;

            println!("Created config file: {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_init_writes_template_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        handle_config_action(ConfigAction::Init, Some(&path), &Config::default()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, DEFAULT_CONFIG);

        let err = handle_config_action(ConfigAction::Init, Some(&path), &Config::default())
            .unwrap_err();
        assert!(err.contains("already exists"));
    }

    #[test]
    fn test_replay_missing_trace_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_replay(
            &dir.path().join("missing.json"),
            OutputFormat::Text,
            &Config::default(),
        )
        .unwrap_err();
        assert!(err.contains("failed to read trace"));
    }

    #[test]
    fn test_summary_mentions_lane() {
        let text = summarize(&MotionSnapshot::default());
        assert!(text.starts_with("lane 0 jumping false"));
    }
}
