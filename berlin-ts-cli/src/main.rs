//! berlints - Host tool for Goodix Berlin touch controller bring-up.
//!
//! Works on files and captured register dumps, no bus access required:
//!
//! - Inspect firmware images and decide whether an update is due
//! - Decode captured touch event frames
//! - Decode IcInfo register dumps
//! - Map die channels to panel pins
//! - Compute short-test resistances
//! - Shell completion generation

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;

use berlin_ts::Generation;

mod commands;
mod config;

use commands::channel::{ShortKind, cmd_die2pin, cmd_short_calc};
use commands::completions::cmd_completions;
use commands::decode::{cmd_decode_frame, cmd_ic_info};
use commands::image::{RunningVersion, cmd_check_update, cmd_info};
use config::Config;

/// berlints - Host tool for Goodix Berlin touch controllers.
///
/// Environment variables:
///   BERLINTS_GENERATION   - Controller generation (berlin-b, berlin-d)
#[derive(Parser)]
#[command(name = "berlints")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Controller generation (defaults to the configured one, then berlin-d).
    #[arg(short, long, global = true, env = "BERLINTS_GENERATION")]
    generation: Option<GenerationArg>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Supported controller generations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum GenerationArg {
    /// Berlin B (GT9896 family).
    #[value(alias = "b")]
    BerlinB,
    /// Berlin D (GT9895/GT9916 family).
    #[value(alias = "d")]
    BerlinD,
}

impl From<GenerationArg> for Generation {
    fn from(arg: GenerationArg) -> Self {
        match arg {
            GenerationArg::BerlinB => Generation::BerlinB,
            GenerationArg::BerlinD => Generation::BerlinD,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Show information about a firmware image.
    Info {
        /// Path to the firmware binary.
        firmware: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Decide whether a firmware image should replace the running firmware.
    CheckUpdate {
        /// Path to the firmware binary.
        firmware: PathBuf,

        /// Dump of the 28-byte version record read from the device.
        #[arg(long, value_name = "FILE", conflicts_with_all = ["pid", "vid"])]
        record: Option<PathBuf>,

        /// Running patch product id (e.g. 9895).
        #[arg(long, requires = "vid")]
        pid: Option<String>,

        /// Running patch version as hex (e.g. 0x01000005).
        #[arg(long, value_parser = parse_hex_u32, requires = "pid")]
        vid: Option<u32>,

        /// Report an update even when the image is not newer.
        #[arg(long)]
        force: bool,

        /// Output the decision as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Decode a captured touch event frame.
    DecodeFrame {
        /// Frame bytes as hex (spaces, commas and 0x prefixes allowed).
        #[arg(required_unless_present = "file")]
        hex: Option<String>,

        /// Read the raw frame from a binary file instead.
        #[arg(long, value_name = "FILE", conflicts_with = "hex")]
        file: Option<PathBuf>,

        /// Output events as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Decode an IcInfo register dump.
    IcInfo {
        /// Binary dump starting at the IcInfo length field.
        dump: PathBuf,

        /// Output the decoded record as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Map unified die channel indices to panel pins.
    Die2pin {
        /// Unified die indices (sense first, then drive).
        #[arg(required = true)]
        indices: Vec<usize>,

        /// Output the mapping as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Compute the resistance of a short from raw test values.
    ShortCalc {
        /// Short peer.
        #[arg(long, value_enum, default_value = "channel")]
        peer: ShortKind,

        /// First raw value.
        v1: u16,

        /// Second raw value (ignored for GND).
        #[arg(default_value = "0")]
        v2: u16,

        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a hexadecimal value (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex value: {e}"))
}

/// Generation from the command line, then the config file, then the default.
fn resolve_generation(cli: &Cli, config: &Config) -> Generation {
    cli.generation
        .map(Generation::from)
        .or(config.device.generation)
        .unwrap_or_default()
}

fn main() -> Result<()> {
    // --- NO_COLOR and TTY detection ---
    let stdout_is_tty = console::Term::stdout().is_term();
    if env::var("NO_COLOR").is_ok() || !stdout_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "berlints v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let generation = resolve_generation(&cli, &config);
    debug!("generation: {generation}");

    match &cli.command {
        Commands::Info { firmware, json } => cmd_info(firmware, *json)?,
        Commands::CheckUpdate {
            firmware,
            record,
            pid,
            vid,
            force,
            json,
        } => {
            let running = match (record, pid, vid) {
                (Some(path), _, _) => RunningVersion::Record(path.clone()),
                (None, Some(pid), Some(vid)) => RunningVersion::Fields {
                    pid: pid.clone(),
                    vid: *vid,
                },
                _ => anyhow::bail!("either --record or --pid with --vid is required"),
            };
            cmd_check_update(firmware, &running, *force, *json)?;
        },
        Commands::DecodeFrame { hex, file, json } => {
            cmd_decode_frame(hex.as_deref(), file.as_deref(), *json)?;
        },
        Commands::IcInfo { dump, json } => cmd_ic_info(dump, *json)?,
        Commands::Die2pin { indices, json } => {
            cmd_die2pin(&config.channel_map(generation), indices, *json)?;
        },
        Commands::ShortCalc { peer, v1, v2, json } => {
            cmd_short_calc(
                generation,
                &config.short_thresholds(),
                *peer,
                *v1,
                *v2,
                *json,
            )?;
        },
        Commands::Completions { shell } => cmd_completions(*shell),
    }

    Ok(())
}
