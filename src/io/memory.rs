// src/io/memory.rs
//
// In-memory transport. Bytes are pushed in through a `MemoryHandle` and
// everything written to the transport is captured for inspection. Used for
// loopback links and for exercising workers and relays without hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;

use super::error::TransportError;
use super::transport::{Connector, Transport};

/// What the test side can push into a memory transport.
enum Inbound {
    Data(Vec<u8>),
    Disconnect,
    Fault(String),
}

/// Transport end of an in-memory link.
pub struct MemoryTransport {
    name: String,
    inbound: Receiver<Inbound>,
    pending: Mutex<VecDeque<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
    // Dropping the sender wakes every reader blocked in `select!`
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
}

/// Test/driver end of an in-memory link.
#[derive(Clone)]
pub struct MemoryHandle {
    tx: Sender<Inbound>,
    written: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new(name: &str) -> (Self, MemoryHandle) {
        let (tx, rx) = channel::unbounded();
        let (close_tx, close_rx) = channel::bounded(0);
        let written = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let transport = MemoryTransport {
            name: name.to_string(),
            inbound: rx,
            pending: Mutex::new(VecDeque::new()),
            written: written.clone(),
            closed: closed.clone(),
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
        };
        let handle = MemoryHandle { tx, written, closed };
        (transport, handle)
    }

    fn next_byte(&self, pending: &mut VecDeque<u8>) -> Result<u8, TransportError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::closed(&self.name));
            }
            if let Some(byte) = pending.pop_front() {
                return Ok(byte);
            }

            select! {
                recv(self.inbound) -> msg => match msg {
                    Ok(Inbound::Data(bytes)) => pending.extend(bytes),
                    Ok(Inbound::Disconnect) | Err(_) => {
                        return Err(TransportError::disconnected(&self.name));
                    }
                    Ok(Inbound::Fault(reason)) => {
                        return Err(TransportError::io(&self.name, std::io::Error::other(reason)));
                    }
                },
                recv(self.close_rx) -> _ => {
                    return Err(TransportError::closed(&self.name));
                }
            }
        }
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_exact(&self, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for slot in buf.iter_mut() {
            *slot = self.next_byte(&mut pending)?;
        }
        Ok(())
    }

    fn write_all(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::closed(&self.name));
        }
        match self.written.lock() {
            Ok(mut guard) => guard.extend_from_slice(bytes),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(bytes),
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.close_tx.lock() {
            guard.take();
        }
    }
}

impl MemoryHandle {
    /// Push bytes for the transport to read.
    pub fn feed(&self, bytes: &[u8]) {
        let _ = self.tx.send(Inbound::Data(bytes.to_vec()));
    }

    /// Make the next read (after queued data) report a disconnect.
    pub fn disconnect(&self) {
        let _ = self.tx.send(Inbound::Disconnect);
    }

    /// Make the next read (after queued data) fail with an I/O error.
    pub fn fault(&self, reason: &str) {
        let _ = self.tx.send(Inbound::Fault(reason.to_string()));
    }

    /// Everything written to the transport so far.
    pub fn written(&self) -> Vec<u8> {
        match self.written.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Connector that hands out pre-registered memory links by name.
///
/// Each registered link can be opened once per registration; opening an
/// unknown (or already taken) name fails like a missing serial port.
#[derive(Default)]
pub struct MemoryConnector {
    links: Mutex<HashMap<String, MemoryTransport>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link and return its driver handle.
    pub fn add_link(&self, name: &str) -> MemoryHandle {
        let (transport, handle) = MemoryTransport::new(name);
        if let Ok(mut links) = self.links.lock() {
            links.insert(name.to_string(), transport);
        }
        handle
    }
}

impl Connector for MemoryConnector {
    fn open(&self, name: &str) -> Result<Arc<dyn Transport>, TransportError> {
        let mut links = self
            .links
            .lock()
            .map_err(|e| TransportError::open(name, format!("connector lock poisoned: {}", e)))?;
        links
            .remove(name)
            .map(|t| Arc::new(t) as Arc<dyn Transport>)
            .ok_or_else(|| TransportError::open(name, "no such link"))
    }
}

// ============================================================================
// Tests
// ============================================================================
