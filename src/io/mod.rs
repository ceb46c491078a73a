// src/io/mod.rs
//
// Link I/O for ttytap: transports, the frame codec, the dedup cache, capture
// workers and the consumers (monitor, relay) that drain their shared queue.
//
// Dependency order: transport -> codec -> dedup -> capture -> relay.

// Core modules
pub mod codec;
pub mod dedup;
mod error;
pub mod transport;
mod types;

// Transports
pub mod file;
pub mod memory;
pub mod serial;

// Workers and consumers
pub mod capture;
pub mod relay;

pub use capture::{CaptureConfig, CaptureWorker, DEFAULT_DEDUP_LIFETIME};
pub use codec::{decode, decode_step, encode, FrameResult, PREAMBLE};
pub use error::{CodecError, TransportError};
pub use relay::{Consumer, ConsumerSummary, LinkSummary, Monitor, Relay};
pub use transport::{Connector, LinkWriter, Transport};
pub use types::{
    event_queue, CaptureStats, EventReceiver, EventSender, LinkEvent, Message, RawByteHook,
    Termination, WorkerState,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
