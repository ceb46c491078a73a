// src/io/transport.rs
//
// Blocking byte-stream transport abstraction shared by every link type
// (serial port, file replay, in-memory).

use std::sync::{Arc, Mutex};

use super::error::TransportError;

// ============================================================================
// Traits
// ============================================================================

/// A blocking, byte-oriented link.
///
/// Implementations are shared between the capture thread (reads), whoever
/// writes to the link (relay), and whoever closes it, so every method takes
/// `&self`. `close()` must be idempotent and must make a read blocked in
/// another thread return `TransportError::Closed` promptly.
pub trait Transport: Send + Sync {
    /// Link name (port path, file path, ...)
    fn name(&self) -> &str;

    /// Fill `buf` completely, blocking until the bytes arrive, the transport
    /// is closed, or the device goes away.
    fn read_exact(&self, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Write all bytes to the link.
    fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Release the link.
    fn close(&self);
}

/// Opens transports by name.
pub trait Connector: Send + Sync {
    fn open(&self, name: &str) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Read a single byte.
pub fn read_byte(transport: &dyn Transport) -> Result<u8, TransportError> {
    let mut buf = [0u8; 1];
    transport.read_exact(&mut buf)?;
    Ok(buf[0])
}

// ============================================================================
// Link Writer
// ============================================================================

/// Cloneable write handle onto whatever transport a capture worker currently
/// has open. Writes fail with `Closed` while the worker is not running.
#[derive(Clone)]
pub struct LinkWriter {
    link: String,
    slot: Arc<Mutex<Option<Arc<dyn Transport>>>>,
}

impl LinkWriter {
    pub(crate) fn new(link: &str) -> Self {
        Self {
            link: link.to_string(),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn is_open(&self) -> bool {
        self.slot.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    pub fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        // Clone the handle out so a slow write never holds the slot lock
        let transport = self.current().ok_or_else(|| TransportError::closed(&self.link))?;
        transport.write_all(bytes)
    }

    pub(crate) fn current(&self) -> Option<Arc<dyn Transport>> {
        match self.slot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn attach(&self, transport: Arc<dyn Transport>) {
        match self.slot.lock() {
            Ok(mut guard) => *guard = Some(transport),
            Err(poisoned) => *poisoned.into_inner() = Some(transport),
        }
    }

    /// Detach and close the current transport, if any.
    pub(crate) fn release(&self) {
        let taken = match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(transport) = taken {
            transport.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory::MemoryTransport;

    #[test]
    fn test_writer_without_transport_is_closed() {
        let writer = LinkWriter::new("a");
        assert!(!writer.is_open());
        let err = writer.write(&[0x01]).unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn test_writer_forwards_to_attached_transport() {
        let (transport, handle) = MemoryTransport::new("a");
        let writer = LinkWriter::new("a");
        writer.attach(Arc::new(transport));
        assert!(writer.is_open());

        writer.write(&[0x55, 0x00, 0x00]).unwrap();
        assert_eq!(handle.written(), vec![0x55, 0x00, 0x00]);

        writer.release();
        assert!(!writer.is_open());
        assert!(handle.is_closed());
        // Releasing twice is harmless
        writer.release();
    }

    #[test]
    fn test_read_byte() {
        let (transport, handle) = MemoryTransport::new("a");
        handle.feed(&[0xAB, 0xCD]);
        assert_eq!(read_byte(&transport).unwrap(), 0xAB);
        assert_eq!(read_byte(&transport).unwrap(), 0xCD);
    }
}
