// src/io/types.rs
//
// Shared types passed between capture workers and the consumer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};
use serde::Serialize;

// ============================================================================
// Messages
// ============================================================================

/// A decoded, novel frame from one link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Microseconds between decode and the worker's session start.
    pub relative_us: u64,
    /// Originating link (port name).
    pub link: String,
    /// Frame payload.
    #[serde(serialize_with = "serialize_hex")]
    pub payload: Vec<u8>,
}

impl Message {
    pub fn relative_secs(&self) -> f64 {
        self.relative_us as f64 / 1_000_000.0
    }
}

fn serialize_hex<S: serde::Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

/// Internal message from capture workers to the consumer.
///
/// Every `start()` produces exactly one `Ended` for its link, and it is
/// always the last event that session enqueues.
#[derive(Clone, Debug)]
pub enum LinkEvent {
    Message(Message),
    Ended { link: String, termination: Termination },
}

/// Sender side of the shared queue (unbounded, FIFO).
pub type EventSender = Sender<LinkEvent>;
/// Receiver side of the shared queue.
pub type EventReceiver = Receiver<LinkEvent>;

/// Create the queue shared by workers and the consumer.
pub fn event_queue() -> (EventSender, EventReceiver) {
    crossbeam::channel::unbounded()
}

/// Hook for bytes that were not consumed as a valid frame: `(link, bytes)`.
pub type RawByteHook = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

// ============================================================================
// Lifecycle
// ============================================================================

/// Why a capture session ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    /// `close()` was called; the expected shutdown path.
    ClosedByCaller,
    /// The device went away (or the stream ended).
    Disconnected,
    /// The transport could not be opened; no frames were processed.
    OpenFailure(String),
    /// Any other failure, including a panicking read loop.
    Fault(String),
}

impl Termination {
    pub fn is_error(&self) -> bool {
        !matches!(self, Termination::ClosedByCaller)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::ClosedByCaller => write!(f, "stopped"),
            Termination::Disconnected => write!(f, "disconnected"),
            Termination::OpenFailure(reason) => write!(f, "open failed: {}", reason),
            Termination::Fault(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// Capture worker state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopped(Termination),
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters updated by the read loop, readable from any thread.
#[derive(Debug, Default)]
pub(crate) struct CaptureCounters {
    frames: AtomicU64,
    duplicates: AtomicU64,
    checksum_mismatches: AtomicU64,
    raw_bytes: AtomicU64,
}

impl CaptureCounters {
    pub(crate) fn reset(&self) {
        self.frames.store(0, Ordering::Relaxed);
        self.duplicates.store(0, Ordering::Relaxed);
        self.checksum_mismatches.store(0, Ordering::Relaxed);
        self.raw_bytes.store(0, Ordering::Relaxed);
    }

    pub(crate) fn frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn checksum_mismatch(&self) {
        self.checksum_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn raw(&self, count: usize) {
        self.raw_bytes.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            total_frame_count: self.frames.load(Ordering::Relaxed),
            duplicate_count: self.duplicates.load(Ordering::Relaxed),
            checksum_mismatch_count: self.checksum_mismatches.load(Ordering::Relaxed),
            raw_byte_count: self.raw_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a worker's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Every checksum-valid frame, duplicates included.
    pub total_frame_count: u64,
    /// Valid frames suppressed by the dedup window.
    pub duplicate_count: u64,
    pub checksum_mismatch_count: u64,
    /// Bytes outside any frame (mismatched frames not included).
    pub raw_byte_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_json_uses_hex_payload() {
        let msg = Message {
            relative_us: 1_500_000,
            link: "/dev/ttyUSB0".to_string(),
            payload: vec![0x81, 0x01, 0xAB],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["payload"], "8101ab");
        assert_eq!(json["relative_us"], 1_500_000);
        assert_eq!(msg.relative_secs(), 1.5);
    }

    #[test]
    fn test_termination_display_and_json() {
        assert_eq!(Termination::ClosedByCaller.to_string(), "stopped");
        assert_eq!(Termination::Disconnected.to_string(), "disconnected");
        assert!(!Termination::ClosedByCaller.is_error());
        assert!(Termination::Disconnected.is_error());

        let json = serde_json::to_value(Termination::Fault("EIO".to_string())).unwrap();
        assert_eq!(json["reason"], "fault");
        assert_eq!(json["detail"], "EIO");
    }

    #[test]
    fn test_counters_reset() {
        let counters = CaptureCounters::default();
        counters.frame();
        counters.frame();
        counters.duplicate();
        counters.raw(3);
        let stats = counters.snapshot();
        assert_eq!(stats.total_frame_count, 2);
        assert_eq!(stats.duplicate_count, 1);
        assert_eq!(stats.raw_byte_count, 3);

        counters.reset();
        assert_eq!(counters.snapshot(), CaptureStats::default());
    }
}
