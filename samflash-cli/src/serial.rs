//! Interactive serial port selection.
//!
//! Resolution order: `--port` / `SAMFLASH_PORT`, the configured port, then
//! discovery. Discovery narrows to SAM-BA CDC endpoints if any are present,
//! otherwise to recognised USB-UART bridges, otherwise to every port.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    samflash::{DetectedPort, detect_ports, format_port_list},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail instead of prompting).
    pub non_interactive: bool,
}

/// Result of port selection.
pub struct SelectedPort {
    pub port: DetectedPort,
    /// Whether the port was chosen through discovery rather than named.
    pub discovered: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Narrow discovered ports to the most plausible candidates.
fn candidates(ports: Vec<DetectedPort>) -> Vec<DetectedPort> {
    if ports.iter().any(DetectedPort::is_samba) {
        return ports.into_iter().filter(DetectedPort::is_samba).collect();
    }
    if ports.iter().any(|p| p.kind.is_known()) {
        return ports.into_iter().filter(|p| p.kind.is_known()).collect();
    }
    ports
}

/// Pick without prompting: exactly one candidate, or a usage error.
fn pick_non_interactive(mut candidates: Vec<DetectedPort>) -> Result<DetectedPort> {
    match candidates.len() {
        0 => Err(usage_err("No serial ports found; pass --port")),
        1 => Ok(candidates.remove(0)),
        n => Err(usage_err(&format!(
            "Found {n} candidate ports, multiple matches are ambiguous in non-interactive mode; pass --port"
        ))),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(name) = &options.port {
        return Ok(SelectedPort {
            port: find_port_by_name(name),
            discovered: false,
        });
    }

    if let Some(name) = &config.connection.serial {
        debug!("Using port from config: {name}");
        return Ok(SelectedPort {
            port: find_port_by_name(name),
            discovered: false,
        });
    }

    let ports = candidates(detect_ports());

    if options.non_interactive || ports.len() <= 1 {
        let port = pick_non_interactive(ports)?;
        if port.kind.is_known() || options.non_interactive {
            info!("Auto-selected port: {} [{}]", port.name, port.kind.name());
            return Ok(SelectedPort {
                port,
                discovered: true,
            });
        }
        ensure_interactive_terminal()?;
        return confirm_single_port(port);
    }

    ensure_interactive_terminal()?;
    select_port_interactive(ports)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

/// Look a named port up among detected ones, keeping its USB metadata.
fn find_port_by_name(name: &str) -> DetectedPort {
    detect_ports()
        .into_iter()
        .find(|p| p.name == name || p.name.eq_ignore_ascii_case(name))
        .unwrap_or_else(|| DetectedPort::plain(name))
}

fn select_port_interactive(ports: Vec<DetectedPort>) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = format_port_list(&ports)
        .into_iter()
        .map(|n| console::truncate_str(&n, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the SAM-BA serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(SelectedPort {
                port,
                discovered: true,
            })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Confirm use of a single unrecognised port.
fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let label = format_port_list(std::slice::from_ref(&port)).remove(0);
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {label}?"))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            discovered: true,
        })
    } else {
        Err(CliError::Cancelled("Port selection cancelled".to_string()).into())
    }
}

/// Offer to store a discovered port as the default.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    if config.connection.serial.as_deref() == Some(port.name.as_str()) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {} as the default port?", port.name))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(&port.name) {
            error!("Failed to save port configuration: {e}");
        }
    }
    Ok(())
}
