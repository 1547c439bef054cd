//! In-memory ports for unit tests.
//!
//! [`ScriptedPort`] replays canned bytes and records everything written.
//! [`SimulatedMonitor`] behaves like a SAM-BA ROM monitor: it parses text
//! commands, keeps a sparse byte-addressed memory, models the EFC page
//! latch, GPNVM bits, flash descriptor, unique identifier and XMODEM
//! uploads.

use crate::error::Result;
use crate::port::Port;
use crate::protocol::crc::{checksum8, crc16_xmodem};
use crate::protocol::xmodem::{control, BLOCK_SIZE};
use crate::target::DeviceProfile;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Send library logs to the test harness. `RUST_LOG=trace` shows wire traffic.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Port that answers reads from a fixed script.
pub struct ScriptedPort {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    timeout: Duration,
    baud_rate: u32,
}

impl ScriptedPort {
    pub fn new(script: &[u8]) -> Self {
        init_logger();
        Self {
            incoming: script.iter().copied().collect(),
            written: Vec::new(),
            timeout: Duration::from_millis(10),
            baud_rate: 115200,
        }
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.incoming.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                },
                None => break,
            }
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for ScriptedPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_output(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One command word written to the EFC command register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EfcCommand {
    pub key: u8,
    pub arg: u16,
    pub opcode: u8,
}

struct XmodemReceive {
    address: u32,
    offset: u32,
    buf: Vec<u8>,
}

/// Fake SAM-BA monitor.
pub struct SimulatedMonitor {
    profile: DeviceProfile,
    flash_size: u32,
    memory: HashMap<u32, u8>,
    latch: HashMap<u32, u8>,
    pending: Vec<u8>,
    outgoing: VecDeque<u8>,
    commands: Vec<String>,
    efc_log: Vec<EfcCommand>,
    autobaud_probes: u32,
    silent: bool,
    truncate_next: bool,
    busy_polls: u32,
    busy_remaining: u32,
    never_ready: bool,
    gpnvm: [bool; 8],
    descriptor: Vec<u32>,
    frr: VecDeque<u32>,
    cidr: u32,
    exid: u32,
    uid: [u32; 4],
    uid_mode: bool,
    xmodem_checksum: bool,
    xmodem_silent: bool,
    xmodem: Option<XmodemReceive>,
    timeout: Duration,
    baud_rate: u32,
}

impl SimulatedMonitor {
    pub fn new(profile: DeviceProfile) -> Self {
        init_logger();
        Self {
            profile,
            flash_size: 0x8_0000,
            memory: HashMap::new(),
            latch: HashMap::new(),
            pending: Vec::new(),
            outgoing: VecDeque::new(),
            commands: Vec::new(),
            efc_log: Vec::new(),
            autobaud_probes: 0,
            silent: false,
            truncate_next: false,
            busy_polls: 0,
            busy_remaining: 0,
            never_ready: false,
            gpnvm: [false; 8],
            descriptor: vec![0x0000_0101, 0x0002_0000, 256, 1, 0x0002_0000, 2, 0x0001_0000, 0x0001_0000],
            frr: VecDeque::new(),
            cidr: 0x2810_0A60,
            exid: 0,
            uid: [0x1234_5678, 0x9ABC_DEF0, 0x0F1E_2D3C, 0x4B5A_6978],
            uid_mode: false,
            xmodem_checksum: false,
            xmodem_silent: false,
            xmodem: None,
            timeout: Duration::from_millis(10),
            baud_rate: 115200,
        }
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Drop the prompt from the next response.
    pub fn truncate_next_response(&mut self) {
        self.truncate_next = true;
    }

    /// Number of status polls that report busy after each EFC command.
    pub fn set_busy_polls(&mut self, polls: u32) {
        self.busy_polls = polls;
    }

    pub fn set_never_ready(&mut self, never_ready: bool) {
        self.never_ready = never_ready;
    }

    pub fn set_descriptor(&mut self, words: Vec<u32>) {
        self.descriptor = words;
    }

    pub fn set_chip_id(&mut self, cidr: u32, exid: u32) {
        self.cidr = cidr;
        self.exid = exid;
    }

    pub fn set_unique_id(&mut self, uid: [u32; 4]) {
        self.uid = uid;
    }

    /// Answer `S` with NAK instead of `C`.
    pub fn set_xmodem_checksum(&mut self, checksum: bool) {
        self.xmodem_checksum = checksum;
    }

    /// Accept `S` but never start the XMODEM exchange.
    pub fn set_xmodem_silent(&mut self, silent: bool) {
        self.xmodem_silent = silent;
    }

    pub fn set_gpnvm(&mut self, bit: usize, value: bool) {
        self.gpnvm[bit] = value;
    }

    pub fn gpnvm(&self, bit: usize) -> bool {
        self.gpnvm[bit]
    }

    /// Text commands received, autobaud probes excluded.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn efc_log(&self) -> &[EfcCommand] {
        &self.efc_log
    }

    pub fn autobaud_probes(&self) -> u32 {
        self.autobaud_probes
    }

    /// Overwrite one byte of committed memory, bypassing the EFC.
    pub fn corrupt_byte(&mut self, address: u32, value: u8) {
        self.memory.insert(address, value);
    }

    pub fn memory_byte(&self, address: u32) -> u8 {
        self.memory.get(&address).copied().unwrap_or(0xFF)
    }

    pub fn memory(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| self.memory_byte(address + i))
            .collect()
    }

    pub fn memory_word(&self, address: u32) -> u32 {
        let bytes = self.memory(address, 4);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn in_flash(&self, address: u32) -> bool {
        let start = self.profile.flash_start_address;
        address >= start && address < start + self.flash_size
    }

    fn store(&mut self, address: u32, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            let addr = address + i as u32;
            if self.in_flash(addr) {
                self.latch.insert(addr, *b);
            } else {
                self.memory.insert(addr, *b);
            }
        }
    }

    fn load(&mut self, address: u32, len: usize) -> u32 {
        if address == self.profile.efc_status_register && len == 4 {
            if self.never_ready {
                return 0;
            }
            if self.busy_remaining > 0 {
                self.busy_remaining -= 1;
                return 0;
            }
            return 1;
        }
        if Some(address) == self.profile.efc_result_register && len == 4 {
            return self.frr.pop_front().unwrap_or(0);
        }
        if Some(address) == self.profile.cidr_address && len == 4 {
            return self.cidr;
        }
        if Some(address) == self.profile.exid_address && len == 4 {
            return self.exid;
        }
        let start = self.profile.flash_start_address;
        if self.uid_mode && address >= start && address < start + 16 && len == 4 {
            return self.uid[((address - start) / 4) as usize];
        }
        let mut value = 0u32;
        for i in 0..len {
            value |= u32::from(self.memory_byte(address + i as u32)) << (8 * i);
        }
        value
    }

    fn efc_command(&mut self, word: u32) {
        let command = EfcCommand {
            key: (word >> 24) as u8,
            arg: ((word >> 8) & 0xFFFF) as u16,
            opcode: (word & 0xFF) as u8,
        };
        self.efc_log.push(command);
        if command.key != crate::target::EFC_KEY {
            return;
        }
        self.busy_remaining = self.busy_polls;

        let p = &self.profile;
        let op = Some(command.opcode);
        if command.opcode == p.write_page_command {
            let page_start = p.page_address(u32::from(command.arg));
            let page_end = page_start + p.page_size;
            let committed: Vec<(u32, u8)> = self
                .latch
                .iter()
                .filter(|(a, _)| **a >= page_start && **a < page_end)
                .map(|(a, b)| (*a, *b))
                .collect();
            for (a, b) in committed {
                self.latch.remove(&a);
                self.memory.insert(a, b);
            }
        } else if op == p.erase_all_command {
            let start = p.flash_start_address;
            let end = start + self.flash_size;
            self.memory.retain(|a, _| *a < start || *a >= end);
        } else if command.opcode == p.set_gpnvm_command {
            self.gpnvm[usize::from(command.arg) % 8] = true;
        } else if command.opcode == p.clear_gpnvm_command {
            self.gpnvm[usize::from(command.arg) % 8] = false;
        } else if op == p.get_descriptor_command {
            self.frr = self.descriptor.iter().copied().collect();
        } else if op == p.start_uid_command {
            self.uid_mode = true;
        } else if op == p.stop_uid_command {
            self.uid_mode = false;
        }
    }

    fn respond(&mut self, text: &str) {
        if self.silent {
            return;
        }
        self.outgoing.extend(text.as_bytes());
        if self.truncate_next {
            self.truncate_next = false;
        } else {
            self.outgoing.push_back(b'>');
        }
    }

    fn execute(&mut self, raw: &[u8]) {
        if raw.contains(&0x80) {
            self.autobaud_probes += 1;
            if !self.silent {
                self.outgoing.push_back(b'>');
            }
            return;
        }

        let text = String::from_utf8_lossy(raw).into_owned();
        self.commands.push(format!("{text}#"));

        let Some(cmd) = text.chars().next() else {
            self.respond("\n\r");
            return;
        };
        let mut fields = text[1..].split(',');
        let address = fields
            .next()
            .and_then(|a| u32::from_str_radix(a, 16).ok())
            .unwrap_or(0);
        let value = fields
            .next()
            .and_then(|v| u32::from_str_radix(v, 16).ok())
            .unwrap_or(0);

        match cmd {
            'V' => self.respond("\n\rv1.4 Nov 10 2004 14:39:43\n\r"),
            'W' => {
                if address == self.profile.efc_command_register {
                    self.efc_command(value);
                } else {
                    self.store(address, &value.to_le_bytes());
                }
                self.respond("\n\r");
            },
            'H' => {
                self.store(address, &(value as u16).to_le_bytes());
                self.respond("\n\r");
            },
            'O' => {
                self.store(address, &[value as u8]);
                self.respond("\n\r");
            },
            'w' => {
                let v = self.load(address, 4);
                self.respond(&format!("\n\r0x{v:08x}\n\r"));
            },
            'h' => {
                let v = self.load(address, 2);
                self.respond(&format!("\n\r0x{v:04x}\n\r"));
            },
            'o' => {
                let v = self.load(address, 1);
                self.respond(&format!("\n\r0x{v:02x}\n\r"));
            },
            'S' => {
                self.xmodem = Some(XmodemReceive {
                    address,
                    offset: 0,
                    buf: Vec::new(),
                });
                if !self.silent && !self.xmodem_silent {
                    let start = if self.xmodem_checksum { control::NAK } else { control::C };
                    self.outgoing.push_back(start);
                }
            },
            _ => self.respond("\n\r"),
        }
    }

    fn receive_xmodem(&mut self, byte: u8) {
        let crc = !self.xmodem_checksum;
        let block_len = 3 + BLOCK_SIZE + if crc { 2 } else { 1 };
        let Some(rx) = self.xmodem.as_mut() else {
            return;
        };

        if rx.buf.is_empty() {
            match byte {
                control::EOT => {
                    self.xmodem = None;
                    self.outgoing.push_back(control::ACK);
                    return;
                },
                control::SOH => {},
                _ => return,
            }
        }
        rx.buf.push(byte);
        if rx.buf.len() < block_len {
            return;
        }

        let block = std::mem::take(&mut rx.buf);
        let payload = &block[3..3 + BLOCK_SIZE];
        let check_ok = if crc {
            crc16_xmodem(payload).to_be_bytes() == block[3 + BLOCK_SIZE..]
        } else {
            checksum8(payload) == block[3 + BLOCK_SIZE]
        };
        if block[1] != !block[2] || !check_ok {
            self.outgoing.push_back(control::NAK);
            return;
        }

        let address = rx.address + rx.offset;
        rx.offset += BLOCK_SIZE as u32;
        let payload = payload.to_vec();
        self.store(address, &payload);
        self.outgoing.push_back(control::ACK);
    }
}

impl Read for SimulatedMonitor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.outgoing.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                },
                None => break,
            }
        }
        Ok(n)
    }
}

impl Write for SimulatedMonitor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            if self.xmodem.is_some() {
                self.receive_xmodem(byte);
            } else if byte == b'#' {
                let raw = std::mem::take(&mut self.pending);
                self.execute(&raw);
            } else {
                self.pending.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimulatedMonitor {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_input(&mut self) -> Result<()> {
        self.outgoing.clear();
        Ok(())
    }

    fn clear_output(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
