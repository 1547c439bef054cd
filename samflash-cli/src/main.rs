//! samflash CLI - Command-line tool for programming Atmel/Microchip SAM flash
//! through the SAM-BA ROM monitor.
//!
//! ## Features
//!
//! - Write raw binary images (word by word or over XMODEM)
//! - Read-back verification
//! - GPNVM boot configuration and full-chip erase
//! - Chip identification, flash descriptor and unique identifier
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use samflash::{DeviceProfile, FlasherConfig, NativePort, SamBaFlasher, SerialConfig};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Default baud rate of the SAM-BA UART monitor.
const DEFAULT_BAUD: u32 = 115_200;

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors whose exit code differs from the generic failure code.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Bad invocation or missing setup the user has to fix.
    #[error("{0}")]
    Usage(String),
    /// Ctrl-C or a declined prompt.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error chain to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli) = err.downcast_ref::<CliError>() {
        return cli.exit_code();
    }
    match err.downcast_ref::<samflash::Error>() {
        Some(samflash::Error::Interrupted) => 130,
        Some(samflash::Error::UnknownDevice(_) | samflash::Error::Config(_)) => 2,
        _ => 1,
    }
}

/// samflash - Program Atmel/Microchip SAM flash over the SAM-BA UART monitor.
///
/// Environment variables:
///   SAMFLASH_PORT              - Default serial port
///   SAMFLASH_BAUD              - Default baud rate (default: 115200)
///   SAMFLASH_DEVICE            - Default device profile (e.g. AT91SAM3U4E)
///   SAMFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "samflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    samflash -d AT91SAM3U4E -p /dev/ttyUSB0 write firmware.bin --boot\n  \
    samflash -d sam7x512 write firmware.bin --xmodem\n  \
    samflash -d AT91SAM3U4E chip-id --json")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "SAMFLASH_PORT")]
    port: Option<String>,

    /// Baud rate of the monitor UART [default: 115200].
    #[arg(short, long, global = true, env = "SAMFLASH_BAUD")]
    baud: Option<u32>,

    /// Target device profile name.
    #[arg(short, long, global = true, env = "SAMFLASH_DEVICE")]
    device: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "SAMFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a raw binary image to flash.
    Write {
        /// Binary image file.
        file: PathBuf,

        /// Upload each page over XMODEM instead of word writes.
        #[arg(long)]
        xmodem: bool,

        /// First flash page to write.
        #[arg(long, default_value = "0")]
        start_page: u32,

        /// Configure the GPNVM bits to boot from flash afterwards.
        #[arg(long)]
        boot: bool,

        /// Skip read-back verification.
        #[arg(long)]
        no_verify: bool,
    },

    /// Compare flash contents against a binary image.
    Verify {
        /// Binary image file.
        file: PathBuf,

        /// First flash page the image was written to.
        #[arg(long, default_value = "0")]
        start_page: u32,
    },

    /// Configure the GPNVM bits to boot from flash.
    SetBoot,

    /// Erase the whole flash.
    Erase {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Read and decode the chip identification registers.
    ChipId {
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Read the flash descriptor from the flash controller.
    FlashInfo {
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Read the 128-bit unique identifier.
    Uid {
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List known device profiles.
    ListDevices {
        /// Output device list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if omitted).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

impl Cli {
    /// Suppress status lines (quiet mode or JSON on stdout).
    fn is_quiet(&self) -> bool {
        self.quiet || self.command.json()
    }
}

impl Commands {
    fn json(&self) -> bool {
        match self {
            Self::ChipId { json }
            | Self::FlashInfo { json }
            | Self::Uid { json }
            | Self::ListPorts { json }
            | Self::ListDevices { json } => *json,
            _ => false,
        }
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // JSON output keeps stderr clean unless more detail was asked for.
    let log_level = if cli.quiet || (cli.command.json() && cli.verbose == 0) {
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
        "samflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    samflash::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Write {
            file,
            xmodem,
            start_page,
            boot,
            no_verify,
        } => commands::flash::cmd_write(
            cli,
            &mut config,
            file,
            &commands::flash::WriteArgs {
                xmodem: *xmodem,
                start_page: *start_page,
                boot: *boot,
                no_verify: *no_verify,
            },
        ),
        Commands::Verify { file, start_page } => {
            commands::flash::cmd_verify(cli, &mut config, file, *start_page)
        },
        Commands::SetBoot => commands::flash::cmd_set_boot(cli, &mut config),
        Commands::Erase { yes } => commands::flash::cmd_erase(cli, &mut config, *yes),
        Commands::ChipId { json } => commands::info::cmd_chip_id(cli, &mut config, *json),
        Commands::FlashInfo { json } => commands::info::cmd_flash_info(cli, &mut config, *json),
        Commands::Uid { json } => commands::info::cmd_uid(cli, &mut config, *json),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::ListDevices { json } => commands::info::cmd_list_devices(&config, *json),
        Commands::Completions { shell } => {
            let shell = shell.or_else(Shell::from_env).ok_or_else(|| {
                CliError::Usage(
                    "Could not detect your shell; specify it, e.g. samflash completions bash"
                        .to_string(),
                )
            })?;
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "samflash", &mut std::io::stdout());
            Ok(())
        },
    }
}

/// Resolve the device profile from `--device` or the config file.
fn get_device(cli: &Cli, config: &Config) -> Result<DeviceProfile> {
    let name = cli
        .device
        .as_deref()
        .or(config.flash.device.as_deref())
        .ok_or_else(|| {
            CliError::Usage(
                "No device given; pass --device (see `samflash list-devices`)".to_string(),
            )
        })?;
    Ok(config.find_device(name)?)
}

/// Get serial port from CLI args, config or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    if selected.discovered && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Resolve device and port, open the port and run the handshake.
fn connect(cli: &Cli, config: &mut Config) -> Result<SamBaFlasher<NativePort>> {
    let profile = get_device(cli, config)?;
    let port = get_port(cli, config)?;
    let baud = cli.baud.or(config.connection.baud).unwrap_or(DEFAULT_BAUD);

    if !cli.is_quiet() {
        eprintln!(
            "{} Using {port} @ {baud} baud for {}",
            style("🔌").cyan(),
            profile.name
        );
    }

    let serial = SerialConfig::new(&port, baud);
    let mut flasher = SamBaFlasher::open(&serial, profile, FlasherConfig::default())
        .with_context(|| format!("Failed to open {port}"))?;

    if !cli.is_quiet() {
        eprintln!("{} Waiting for SAM-BA...", style("⏳").yellow());
    }
    if let Err(e) = flasher.connect() {
        let _ = flasher.close();
        return Err(e).with_context(|| format!("No SAM-BA monitor answering on {port}"));
    }
    if !cli.is_quiet() {
        let version = flasher.session().version().unwrap_or("unknown").trim().to_string();
        eprintln!("{} Connected (SAM-BA {version})", style("✓").green());
    }
    Ok(flasher)
}

/// Connect, run `op`, and close the port whatever the outcome.
fn with_flasher<T>(
    cli: &Cli,
    config: &mut Config,
    op: impl FnOnce(&mut SamBaFlasher<NativePort>) -> Result<T>,
) -> Result<T> {
    let mut flasher = connect(cli, config)?;
    let result = op(&mut flasher);
    if let Err(e) = flasher.close() {
        debug!("Closing port failed: {e}");
    }
    result
}
