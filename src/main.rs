use clap::Parser;
use tracing_subscriber::EnvFilter;

use lane_motion::capture::PlatformProfile;
use lane_motion::cli::{self, Args, Command, SimulateOptions};
use lane_motion::config::Config;

fn init_logging(verbose: bool) {
    let default = if verbose {
        "lane_motion=debug"
    } else {
        "lane_motion=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match Config::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match args.command {
        Command::Profiles {
            platform,
            tablet,
            user_agent,
            touch_points,
        } => {
            let profile = match user_agent {
                Some(ua) => PlatformProfile::detect(&ua, touch_points.unwrap_or(0)),
                None => PlatformProfile::new(platform, tablet),
            };
            cli::show_profiles(profile, &config);
            Ok(())
        }
        Command::Replay { trace, format } => cli::run_replay(&trace, format, &config),
        Command::Simulate {
            trace,
            platform,
            tablet,
            frozen_streams,
            deny,
        } => cli::run_simulate(
            &trace,
            SimulateOptions {
                platform,
                tablet,
                frozen_streams,
                deny,
            },
            &config,
        ),
        Command::Config { action } => {
            cli::handle_config_action(action, args.config.as_deref(), &config)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
