// src/io/serial/port.rs
//
// Serial port transport.
//
// The port is opened with a short read timeout so the read side can poll a
// closed flag: a close() from another thread unblocks a pending read within
// one poll interval. Timeouts never reach the caller; to the capture loop a
// read simply blocks until data, close, or disconnect.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serialport::SerialPort;

use super::utils::{
    to_serialport_data_bits, to_serialport_parity, to_serialport_stop_bits, Parity,
};
use crate::io::error::TransportError;
use crate::io::transport::{Connector, Transport};

/// How often a blocked read re-checks the closed flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Types and Configuration
// ============================================================================

/// Serial line settings, applied to every port a `SerialConnector` opens
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl SerialConfig {
    /// e.g. "115200 baud (8-N-1)"
    pub fn describe(&self) -> String {
        format!(
            "{} baud ({}-{}-{})",
            self.baud_rate,
            self.data_bits,
            self.parity.letter(),
            self.stop_bits
        )
    }
}

/// A port `ttytap monitor` / `relay` can be pointed at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SerialPortInfo {
    /// Path or name to pass on the command line
    pub name: String,
    /// "usb", "bluetooth", "pci" or "unknown"
    pub kind: &'static str,
    /// USB `vid:pid` in hex
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usb_id: Option<String>,
    /// Manufacturer and product strings, when the adapter reports them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SerialPortInfo {
    /// One line for the port list: `/dev/ttyUSB0  usb 0403:6001  FTDI FT232R`
    pub fn summary(&self) -> String {
        let mut line = format!("{}  {}", self.name, self.kind);
        if let Some(ref id) = self.usb_id {
            line.push(' ');
            line.push_str(id);
        }
        if let Some(ref description) = self.description {
            line.push_str("  ");
            line.push_str(description);
        }
        line
    }
}

impl From<serialport::SerialPortInfo> for SerialPortInfo {
    fn from(port: serialport::SerialPortInfo) -> Self {
        let (kind, usb_id, description) = match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                let parts: Vec<String> = [usb.manufacturer, usb.product].into_iter().flatten().collect();
                let description = if parts.is_empty() { None } else { Some(parts.join(" ")) };
                ("usb", Some(format!("{:04x}:{:04x}", usb.vid, usb.pid)), description)
            }
            serialport::SerialPortType::BluetoothPort => ("bluetooth", None, None),
            serialport::SerialPortType::PciPort => ("pci", None, None),
            serialport::SerialPortType::Unknown => ("unknown", None, None),
        };
        Self {
            name: port.port_name,
            kind,
            usb_id,
            description,
        }
    }
}

// ============================================================================
// Serial Transport
// ============================================================================

pub struct SerialTransport {
    name: String,
    // Separate handles (try_clone) so a blocked read never stalls a write
    reader: Mutex<Box<dyn SerialPort>>,
    writer: Mutex<Box<dyn SerialPort>>,
    closed: AtomicBool,
}

impl SerialTransport {
    pub fn open(name: &str, config: &SerialConfig) -> Result<Self, TransportError> {
        let port = serialport::new(name, config.baud_rate)
            .data_bits(to_serialport_data_bits(config.data_bits))
            .stop_bits(to_serialport_stop_bits(config.stop_bits))
            .parity(to_serialport_parity(&config.parity))
            .timeout(POLL_INTERVAL)
            .open()
            .map_err(|e| TransportError::open(name, e))?;
        let writer = port.try_clone().map_err(|e| TransportError::open(name, e))?;

        tlog!("[Serial:{}] Opened at {}", name, config.describe());

        Ok(Self {
            name: name.to_string(),
            reader: Mutex::new(port),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_exact(&self, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut port = self.reader.lock().map_err(|e| {
            TransportError::io(&self.name, std::io::Error::other(format!("port mutex poisoned: {}", e)))
        })?;

        let mut filled = 0;
        while filled < buf.len() {
            if self.is_closed() {
                return Err(TransportError::closed(&self.name));
            }
            match port.read(&mut buf[filled..]) {
                Ok(0) => return Err(TransportError::disconnected(&self.name)),
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                    // Poll tick, check the closed flag again
                }
                Err(e) => {
                    // A close() racing the read can surface as an arbitrary error
                    if self.is_closed() {
                        return Err(TransportError::closed(&self.name));
                    }
                    return Err(classify_io_error(&self.name, e));
                }
            }
        }
        Ok(())
    }

    fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::closed(&self.name));
        }
        let mut port = self.writer.lock().map_err(|e| {
            TransportError::io(&self.name, std::io::Error::other(format!("port mutex poisoned: {}", e)))
        })?;
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| classify_io_error(&self.name, e))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tlog!("[Serial:{}] Closing", self.name);
        }
    }
}

/// Sort an I/O error into "device went away" or a plain I/O fault.
pub(crate) fn classify_io_error(port: &str, e: std::io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset
        | ErrorKind::UnexpectedEof => TransportError::disconnected(port),
        _ => match e.raw_os_error() {
            // EIO, ENXIO, ENODEV: USB adapter unplugged
            #[cfg(unix)]
            Some(5) | Some(6) | Some(19) => TransportError::disconnected(port),
            _ => TransportError::io(port, e),
        },
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens serial ports by path with shared line settings.
#[derive(Clone, Debug, Default)]
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

impl Connector for SerialConnector {
    fn open(&self, name: &str) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(SerialTransport::open(name, &self.config)?))
    }
}

// ============================================================================
// Port Enumeration
// ============================================================================

/// Whether a port is worth offering. macOS lists every device twice; only
/// the /dev/cu.* side opens without waiting for carrier detect.
fn is_listable(name: &str) -> bool {
    !(cfg!(target_os = "macos") && name.starts_with("/dev/tty."))
}

/// Serial ports present on this host, sorted by name.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, TransportError> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::io("port enumeration", std::io::Error::other(e)))?;

    let mut listed: Vec<SerialPortInfo> = ports
        .into_iter()
        .filter(|p| is_listable(&p.port_name))
        .map(SerialPortInfo::from)
        .collect();
    listed.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(listed)
}

// ============================================================================
// Tests
// ============================================================================
