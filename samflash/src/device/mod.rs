//! Serial port discovery.
//!
//! SAM-BA is reached either through the chip's own USB CDC endpoint
//! (Atmel VID 0x03EB) or through a USB-UART bridge wired to DBGU/UART0.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Known USB endpoints that may carry a SAM-BA monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum BridgeKind {
    /// The chip's ROM monitor enumerating as a CDC ACM device.
    SamBaCdc,
    /// Other Atmel/Microchip USB device (debugger VCOM, evaluation kit).
    Atmel,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Anything else.
    Unknown,
}

const ATMEL_VID: u16 = 0x03EB;
const SAMBA_CDC_PID: u16 = 0x6124;

const KNOWN_USB_DEVICES: &[(u16, &[u16], BridgeKind)] = &[
    (ATMEL_VID, &[SAMBA_CDC_PID], BridgeKind::SamBaCdc),
    (ATMEL_VID, &[], BridgeKind::Atmel),
    (0x1A86, &[0x7523, 0x7522, 0x5523, 0x55D4], BridgeKind::Ch340),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], BridgeKind::Cp210x),
    (0x0403, &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015], BridgeKind::Ftdi),
    (0x067B, &[0x2303, 0x23A3], BridgeKind::Prolific),
];

impl BridgeKind {
    /// Classify a USB VID/PID pair. Rows are checked in order, so the
    /// specific SAM-BA PID wins over the vendor-wide Atmel row.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Human-readable bridge name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SamBaCdc => "SAM-BA CDC",
            Self::Atmel => "Atmel",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether the VID/PID matched a known bridge.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Auto-selection rank, lower is preferred.
    fn rank(&self) -> u8 {
        match self {
            Self::SamBaCdc => 0,
            Self::Atmel => 1,
            Self::Ch340 | Self::Cp210x | Self::Ftdi | Self::Prolific => 2,
            Self::Unknown => 3,
        }
    }
}

/// A serial port found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Bridge classification from the USB IDs.
    pub kind: BridgeKind,
    /// USB vendor ID.
    pub vid: Option<u16>,
    /// USB product ID.
    pub pid: Option<u16>,
    /// USB manufacturer string.
    pub manufacturer: Option<String>,
    /// USB product string.
    pub product: Option<String>,
    /// USB serial number.
    pub serial: Option<String>,
}

impl DetectedPort {
    /// A port with no USB metadata.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: BridgeKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    /// Whether the port is a chip's own SAM-BA USB endpoint.
    pub fn is_samba(&self) -> bool {
        self.kind == BridgeKind::SamBaCdc
    }
}

/// List serial ports with USB metadata where available.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            return Vec::new();
        },
    };

    ports
        .into_iter()
        .map(|info| {
            let mut detected = DetectedPort::plain(info.port_name.clone());
            if let serialport::SerialPortType::UsbPort(usb) = info.port_type {
                detected.kind = BridgeKind::from_vid_pid(usb.vid, usb.pid);
                trace!(
                    "Found USB port: {} (VID: {:04X}, PID: {:04X}, {:?})",
                    info.port_name, usb.vid, usb.pid, detected.kind
                );
                detected.vid = Some(usb.vid);
                detected.pid = Some(usb.pid);
                detected.manufacturer = usb.manufacturer;
                detected.product = usb.product;
                detected.serial = usb.serial_number;
            }
            detected
        })
        .collect()
}

/// List serial ports. Always empty without the `native` feature.
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Pick the most likely SAM-BA port out of `ports`.
pub fn select_port(ports: &[DetectedPort]) -> Result<DetectedPort> {
    ports
        .iter()
        .min_by_key(|p| p.kind.rank())
        .cloned()
        .ok_or(Error::PortNotFound)
}

/// Detect ports and pick the most likely SAM-BA port.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let port = select_port(&detect_ports())?;
    info!("Auto-detected {} port: {}", port.kind.name(), port.name);
    Ok(port)
}

/// One display line per port.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let kind = if port.kind.is_known() {
                format!(" [{}]", port.kind.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };
            let product = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();
            format!("{}{kind}{product}", port.name)
        })
        .collect()
}
