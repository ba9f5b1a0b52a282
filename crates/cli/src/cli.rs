//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// camctl - drive the camera acquisition core against simulated hardware
#[derive(Parser, Debug)]
#[command(
    name = "camctl",
    author,
    version,
    about = "Camera acquisition-control core",
    long_about = "Runs capture sessions from an acquisition profile against simulated camera \n\
                  backends, and validates or inspects profiles."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CAMCTL_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "CAMCTL_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulated capture session
    Run(RunArgs),

    /// Validate a profile without running
    Validate(ValidateArgs),

    /// Display profile information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to the acquisition profile (TOML or JSON)
    #[arg(short, long, default_value = "profile.toml", env = "CAMCTL_PROFILE")]
    pub profile: PathBuf,

    /// Control set to capture with
    #[arg(short, long, env = "CAMCTL_CONTROL_SET")]
    pub control_set: String,

    /// Frames to capture; more than one runs continuous mode
    #[arg(long, default_value = "1", env = "CAMCTL_FRAMES")]
    pub frames: u64,

    /// Session timeout in seconds
    #[arg(long, default_value = "60", env = "CAMCTL_TIMEOUT")]
    pub timeout: u64,

    /// Real time per millisecond of simulated exposure (0 = instant)
    #[arg(long, default_value = "1.0")]
    pub time_scale: f64,

    /// Validate the profile and control set, then exit
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "CAMCTL_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the profile to validate
    #[arg(short, long, default_value = "profile.toml", env = "CAMCTL_PROFILE")]
    pub profile: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to the profile
    #[arg(short, long, default_value = "profile.toml", env = "CAMCTL_PROFILE")]
    pub profile: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show camera descriptors in detail
    #[arg(long)]
    pub cameras: bool,

    /// Show control sets with their resolved geometry and timing
    #[arg(long)]
    pub control_sets: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::try_parse_from([
            "camctl",
            "run",
            "--profile",
            "scope.toml",
            "--control-set",
            "record",
            "--frames",
            "5",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.control_set, "record");
        assert_eq!(args.frames, 5);
        assert_eq!(args.profile, PathBuf::from("scope.toml"));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["camctl", "-q", "-v", "validate"]).is_err());
    }
}
