use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde::Serialize;
use zmk_flasher::cli::sources::SourceSelection;
use zmk_flasher::cli::{block_on, tui};
use zmk_flasher::core::{ExitReason, FlashPlan};
use zmk_flasher::{adapters, config, context, logging};

#[derive(Parser)]
#[command(name = "zmk-flasher")]
#[command(about = "Flash ZMK firmware onto both halves of a split keyboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

/// Options that also exist in the config file. Only flags actually given
/// override it.
#[derive(Args, Serialize)]
struct GlobalArgs {
    /// Use simulated bootloader volumes instead of real hardware
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    json_logs: Option<bool>,

    /// Write logs to this file (the terminal is taken by the UI)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Flash firmware to a keyboard
    Flash(FlashArgs),
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("sources")
        .required(true)
        .args(["left", "left_and_right", "left_and_right_zip"])
))]
struct FlashArgs {
    /// Bootloader file for the left controller
    #[arg(short, long, requires = "right")]
    left: Option<PathBuf>,

    /// Bootloader file for the right controller
    #[arg(short, long, requires = "left")]
    right: Option<PathBuf>,

    /// One bootloader file for both controllers
    #[arg(short = 'a', long)]
    left_and_right: Option<PathBuf>,

    /// Zip holding one file named with 'left' and one named with 'right'
    #[arg(short = 'z', long)]
    left_and_right_zip: Option<PathBuf>,

    /// Mount point of the left controller; skips interactive device selection
    #[arg(short = 'm', long)]
    left_mount: Option<PathBuf>,

    /// Mount point of the right controller; skips interactive device selection
    #[arg(short = 'n', long)]
    right_mount: Option<PathBuf>,

    /// Go through every step without writing to the controllers
    #[arg(short, long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::AppConfig::new(Some(&cli.global)).context("Failed to load configuration")?;

    logging::init(logging::LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        file: config.log_file.clone(),
    })
    .context("Failed to open log file")?;

    // Quitting must not wait for a copy stuck on a vanishing volume.
    match cli.command {
        Commands::Flash(args) => {
            block_on(run_flash(config, args)).context("Failed to start async runtime")?
        }
    }
}

async fn run_flash(config: config::AppConfig, args: FlashArgs) -> Result<()> {
    let sources = SourceSelection::from_flags(
        args.left,
        args.right,
        args.left_and_right,
        args.left_and_right_zip,
    )?
    .resolve()?;

    let non_empty = |p: Option<PathBuf>| p.filter(|p| !p.as_os_str().is_empty());
    let plan = FlashPlan {
        central_source: sources.central.clone(),
        peripheral_source: sources.peripheral.clone(),
        central_mount: non_empty(args.left_mount),
        peripheral_mount: non_empty(args.right_mount),
        dry_run: args.dry_run,
    };

    let provider = adapters::get_provider(&config).context("Failed to set up device access")?;
    let ctx = context::AppContext::new(config, provider);

    let reason = tui::run(ctx, plan).await?;
    // Keeps the extracted archive until the session is over.
    drop(sources);

    match reason {
        ExitReason::Quit => Ok(()),
        ExitReason::Fatal(message) => bail!("{}", message),
    }
}
