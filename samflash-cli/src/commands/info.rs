//! Device queries and port/device listing command implementations.

use anyhow::Result;
use console::style;
use samflash::{
    ChipIdentity, DeviceProfile, FlashDescriptor, detect_ports, format_port_list,
    format_unique_id, select_port,
};

use crate::config::Config;
use crate::{Cli, with_flasher};

/// Print `{"ok": true, "data": data}` to stdout.
fn print_json(data: serde_json::Value) -> Result<()> {
    let output = serde_json::json!({
        "ok": true,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn chip_identity_json(identity: &ChipIdentity) -> serde_json::Value {
    let field = |code: &samflash::target::chipid::Code| {
        serde_json::json!({
            "code": code.raw,
            "name": code.short,
            "description": code.description,
        })
    };
    serde_json::json!({
        "cidr": format!("0x{:08X}", identity.cidr),
        "exid": format!("0x{:08X}", identity.exid),
        "version": identity.version,
        "eproc": field(&identity.eproc),
        "nvpsiz": field(&identity.nvpsiz),
        "nvpsiz2": field(&identity.nvpsiz2),
        "sramsiz": field(&identity.sramsiz),
        "arch": field(&identity.arch),
        "nvptyp": field(&identity.nvptyp),
    })
}

fn flash_descriptor_json(descriptor: &FlashDescriptor) -> serde_json::Value {
    serde_json::json!({
        "id": descriptor.id,
        "size": descriptor.size,
        "page_size": descriptor.page_size,
        "planes": descriptor.planes,
        "locks": descriptor.locks,
    })
}

fn device_json(profile: &DeviceProfile, builtin: bool) -> serde_json::Value {
    serde_json::json!({
        "name": profile.name,
        "builtin": builtin,
        "flash_start": format!("0x{:08X}", profile.flash_start_address),
        "page_size": profile.page_size,
        "autobaud": profile.autobaud,
        "full_erase": profile.full_erase,
    })
}

/// Chip-id command implementation.
pub(crate) fn cmd_chip_id(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let identity = with_flasher(cli, config, |flasher| Ok(flasher.chip_identity()?))?;
    if json {
        return print_json(chip_identity_json(&identity));
    }
    print!("{identity}");
    Ok(())
}

/// Flash-info command implementation.
pub(crate) fn cmd_flash_info(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let descriptor = with_flasher(cli, config, |flasher| Ok(flasher.flash_descriptor()?))?;
    if json {
        return print_json(flash_descriptor_json(&descriptor));
    }
    print!("{descriptor}");
    Ok(())
}

/// Uid command implementation.
pub(crate) fn cmd_uid(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let uid = with_flasher(cli, config, |flasher| Ok(flasher.unique_id()?))?;
    let text = format_unique_id(&uid);
    if json {
        return print_json(serde_json::json!({
            "uid": text,
            "words": uid,
        }));
    }
    println!("{text}");
    Ok(())
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "kind": p.kind.name(),
                    "known": p.kind.is_known(),
                    "samba": p.is_samba(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial,
                })
            })
            .collect();
        return print_json(serde_json::json!({ "ports": ports }));
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for line in format_port_list(&detected) {
        eprintln!("  {} {}", style("•").green(), line);
    }

    if let Ok(auto_port) = select_port(&detected) {
        eprintln!(
            "\n{} Auto-selected: {}",
            style("→").green().bold(),
            style(&auto_port.name).cyan().bold()
        );
    }

    Ok(())
}

/// List devices command implementation.
pub(crate) fn cmd_list_devices(config: &Config, json: bool) -> Result<()> {
    let devices = config.all_devices();

    if json {
        let list: Vec<serde_json::Value> = devices
            .iter()
            .map(|(profile, builtin)| device_json(profile, *builtin))
            .collect();
        return print_json(serde_json::json!({ "devices": list }));
    }

    eprintln!("{}", style("Supported devices").bold().underlined());
    for (profile, builtin) in &devices {
        let origin = if *builtin { "" } else { " [config]" };
        eprintln!(
            "  {} {}{}",
            style("•").green(),
            style(profile).cyan(),
            style(origin).yellow()
        );
    }
    Ok(())
}
