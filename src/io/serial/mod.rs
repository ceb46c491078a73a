// src/io/serial/mod.rs
//
// Serial port transport for ttytap.
// Provides cross-platform serial communication through the serialport crate.
//
// Features:
// - Blocking reads that a close() from another thread interrupts
// - Disconnect detection kept apart from other I/O errors
// - Port enumeration

pub mod port;
pub(crate) mod utils;

pub use port::{list_serial_ports, SerialConfig, SerialConnector, SerialPortInfo, SerialTransport};
pub use utils::Parity;
