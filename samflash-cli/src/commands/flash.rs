//! Write, verify, boot and erase command implementations.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use samflash::{Image, Progress, VerifyReport, WriteOptions, WriteStrategy};
use std::io::IsTerminal;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output, was_interrupted, with_flasher};

/// Flags of the `write` subcommand.
pub(crate) struct WriteArgs {
    pub xmodem: bool,
    pub start_page: u32,
    pub boot: bool,
    pub no_verify: bool,
}

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Renders library progress as an indicatif bar on stderr.
///
/// Each `begin` starts a fresh bar, so the write and verify phases of one
/// operation get a bar each.
struct BarProgress {
    hidden: bool,
    phase: &'static str,
    bar: Option<ProgressBar>,
}

impl BarProgress {
    fn new(cli: &Cli, phase: &'static str) -> Self {
        Self {
            hidden: cli.quiet || !use_fancy_output(),
            phase,
            bar: None,
        }
    }
}

impl Progress for BarProgress {
    fn begin(&mut self, total: u64) {
        let pb = if self.hidden {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(total);
            #[allow(clippy::unwrap_used)] // Static template string
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} {prefix:>9} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                    )
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb
        };
        pb.set_prefix(self.phase);
        if let Some(old) = self.bar.replace(pb) {
            old.finish_and_clear();
        }
        // A second pass over the same progress sink is the read-back.
        self.phase = "Verifying";
    }

    fn advance(&mut self, units: u64, label: &str) {
        if let Some(pb) = &self.bar {
            pb.inc(units);
            pb.set_message(label.to_string());
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_and_clear();
        }
    }
}

fn load_image(file: &Path) -> Result<Image> {
    Image::from_file(file).with_context(|| format!("Failed to read image {}", file.display()))
}

/// Print the verification outcome and fail on mismatches.
fn report_verification(cli: &Cli, report: &VerifyReport) -> Result<()> {
    if report.is_ok() {
        if !cli.quiet {
            eprintln!(
                "{} Verified {} words",
                style("✓").green(),
                report.words
            );
        }
        return Ok(());
    }
    for mismatch in report.mismatches.iter().take(8) {
        eprintln!(
            "  {} 0x{:08X}: expected 0x{:08X}, read 0x{:08X}",
            style("✗").red(),
            mismatch.address,
            mismatch.expected,
            mismatch.actual
        );
    }
    anyhow::bail!(
        "Verification failed: {} of {} words differ",
        report.error_count(),
        report.words
    )
}

/// Write command implementation.
pub(crate) fn cmd_write(cli: &Cli, config: &mut Config, file: &Path, args: &WriteArgs) -> Result<()> {
    let image = load_image(file)?;
    let options = WriteOptions {
        strategy: if args.xmodem || config.flash.xmodem {
            WriteStrategy::Xmodem
        } else {
            WriteStrategy::Raw
        },
        start_page: args.start_page,
        set_boot: args.boot,
        verify: !(args.no_verify || config.flash.skip_verify),
    };

    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes)",
            style("📦").cyan(),
            file.display(),
            image.len()
        );
    }

    with_flasher(cli, config, |flasher| {
        ensure_not_interrupted()?;
        flasher.check_image_fits(&image, args.start_page)?;

        let mut progress = BarProgress::new(cli, "Writing");
        let summary = flasher.write(&image, options, &mut progress)?;
        ensure_not_interrupted()?;

        if !cli.quiet {
            eprintln!(
                "{} Wrote {} pages from page {}",
                style("✓").green(),
                summary.pages,
                args.start_page
            );
            if options.set_boot {
                eprintln!("{} Boot from flash configured", style("✓").green());
            }
        }
        match &summary.verify {
            Some(report) => report_verification(cli, report),
            None => Ok(()),
        }
    })
}

/// Verify command implementation.
pub(crate) fn cmd_verify(cli: &Cli, config: &mut Config, file: &Path, start_page: u32) -> Result<()> {
    let image = load_image(file)?;

    with_flasher(cli, config, |flasher| {
        ensure_not_interrupted()?;
        let mut progress = BarProgress::new(cli, "Verifying");
        let report = flasher.verify(&image, start_page, &mut progress)?;
        report_verification(cli, &report)
    })
}

/// Set-boot command implementation.
pub(crate) fn cmd_set_boot(cli: &Cli, config: &mut Config) -> Result<()> {
    with_flasher(cli, config, |flasher| {
        flasher.set_boot()?;
        if !cli.quiet {
            eprintln!("{} Boot from flash configured", style("✓").green());
        }
        Ok(())
    })
}

fn confirm_erase(cli: &Cli) -> Result<()> {
    if cli.non_interactive {
        return Err(CliError::Usage(
            "Erase needs --yes in non-interactive mode".to_string(),
        )
        .into());
    }
    if !(std::io::stdin().is_terminal() && std::io::stderr().is_terminal()) {
        return Err(CliError::Usage(
            "Erase confirmation needs an interactive terminal; pass --yes".to_string(),
        )
        .into());
    }
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Erase the entire flash?")
        .default(false)
        .interact_opt()
        .map_err(|e| CliError::Usage(format!("Prompt failed: {e}")))?
        .unwrap_or(false);
    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled("Erase cancelled".to_string()).into())
    }
}

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, config: &mut Config, yes: bool) -> Result<()> {
    // Fail before touching the port when the device cannot erase.
    let profile = crate::get_device(cli, config)?;
    if profile.erase_all_command.is_none() {
        return Err(samflash::Error::Unsupported(format!(
            "{} has no erase-all command",
            profile.name
        ))
        .into());
    }
    if !yes {
        confirm_erase(cli)?;
    }

    with_flasher(cli, config, |flasher| {
        if !cli.quiet {
            eprintln!("{} Erasing flash...", style("🗑").red());
        }
        flasher.erase_all()?;
        if !cli.quiet {
            eprintln!("{} Flash erased", style("✓").green());
        }
        Ok(())
    })
}
