// src/io/capture.rs
//
// Per-link capture worker.
//
// A worker owns one transport while running and reads it on a dedicated
// thread: every byte is either the start of a frame (decoded through the
// codec) or an unknown byte handed to the raw-byte hook. Novel valid frames
// are pushed onto the shared event queue as `Message`s.
//
// State machine: Idle -> Running -> Stopped(ClosedByCaller | Disconnected | Fault)
//                Idle -> Stopped(OpenFailure)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::codec::{decode_step, FrameResult, PREAMBLE};
use super::dedup::DedupCache;
use super::error::TransportError;
use super::now_us;
use super::transport::{read_byte, Connector, LinkWriter, Transport};
use super::types::{
    CaptureCounters, CaptureStats, EventSender, LinkEvent, Message, RawByteHook, Termination,
    WorkerState,
};

/// Default dedup window for monitoring.
pub const DEFAULT_DEDUP_LIFETIME: Duration = Duration::from_secs(3);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Link name, passed to the connector and stamped on every message
    pub link: String,
    /// How long a payload suppresses identical payloads (zero disables)
    pub dedup_lifetime: Duration,
}

impl CaptureConfig {
    pub fn new(link: &str) -> Self {
        Self {
            link: link.to_string(),
            dedup_lifetime: DEFAULT_DEDUP_LIFETIME,
        }
    }

    pub fn with_dedup_lifetime(mut self, lifetime: Duration) -> Self {
        self.dedup_lifetime = lifetime;
        self
    }
}

// ============================================================================
// Capture Worker
// ============================================================================

pub struct CaptureWorker {
    config: CaptureConfig,
    connector: Arc<dyn Connector>,
    events: EventSender,
    raw_hook: Option<RawByteHook>,
    session_start_us: Option<u64>,
    counters: Arc<CaptureCounters>,
    /// Sessions begun, each of which queues exactly one `Ended` event
    sessions: Arc<AtomicU64>,
    writer: LinkWriter,
    state: Arc<Mutex<WorkerState>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    pub fn new(config: CaptureConfig, connector: Arc<dyn Connector>, events: EventSender) -> Self {
        let writer = LinkWriter::new(&config.link);
        Self {
            config,
            connector,
            events,
            raw_hook: None,
            session_start_us: None,
            counters: Arc::new(CaptureCounters::default()),
            sessions: Arc::new(AtomicU64::new(0)),
            writer,
            state: Arc::new(Mutex::new(WorkerState::Idle)),
            thread: None,
        }
    }

    /// Register the hook that receives bytes not consumed as valid frames.
    /// Takes effect at the next `start()`.
    pub fn set_raw_hook(&mut self, hook: RawByteHook) {
        self.raw_hook = Some(hook);
    }

    pub fn link(&self) -> &str {
        &self.config.link
    }

    /// Write handle onto this worker's transport (valid while running).
    pub fn writer(&self) -> LinkWriter {
        self.writer.clone()
    }

    pub fn state(&self) -> WorkerState {
        lock_state(&self.state).clone()
    }

    /// Termination reason once the session has stopped.
    pub fn termination(&self) -> Option<Termination> {
        match self.state() {
            WorkerState::Stopped(termination) => Some(termination),
            _ => None,
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.counters.snapshot()
    }

    pub fn total_frame_count(&self) -> u64 {
        self.counters.snapshot().total_frame_count
    }

    pub fn session_start_us(&self) -> Option<u64> {
        self.session_start_us
    }

    /// Shared count of sessions begun (open failures included). Lets a
    /// consumer tell whether every `Ended` event it expects has arrived.
    pub(crate) fn session_tally(&self) -> Arc<AtomicU64> {
        self.sessions.clone()
    }

    /// Open the transport and spawn the read loop.
    ///
    /// `start_us` fixes the session's time base; without it the first
    /// `start()` uses the current time and later restarts keep that value.
    /// On open failure the worker stops with `OpenFailure` (and its `Ended`
    /// event is queued) before the error is returned.
    pub fn start(&mut self, start_us: Option<u64>) -> Result<(), TransportError> {
        if self.state() == WorkerState::Running {
            return Err(TransportError::open(&self.config.link, "capture already running"));
        }
        // A previous session may have ended on its own; reap its thread
        self.join_thread();

        if let Some(ts) = start_us {
            self.session_start_us = Some(ts);
        }
        let session_start_us = *self.session_start_us.get_or_insert_with(now_us);
        self.counters.reset();
        // Counted before any Ended event for this session can be queued
        self.sessions.fetch_add(1, Ordering::SeqCst);

        let transport = match self.connector.open(&self.config.link) {
            Ok(t) => t,
            Err(e) => {
                tlog!("[Capture:{}] {}", self.config.link, e);
                let termination = Termination::OpenFailure(e.to_string());
                *lock_state(&self.state) = WorkerState::Stopped(termination.clone());
                let _ = self.events.send(LinkEvent::Ended {
                    link: self.config.link.clone(),
                    termination,
                });
                return Err(e);
            }
        };

        self.writer.attach(transport.clone());
        *lock_state(&self.state) = WorkerState::Running;

        tlog!(
            "[Capture:{}] Started (dedup lifetime: {:?}, raw hook: {})",
            self.config.link,
            self.config.dedup_lifetime,
            if self.raw_hook.is_some() { "yes" } else { "no" }
        );

        let session = CaptureSession {
            link: self.config.link.clone(),
            dedup_lifetime: self.config.dedup_lifetime,
            session_start_us,
            events: self.events.clone(),
            raw_hook: self.raw_hook.clone(),
            counters: self.counters.clone(),
        };
        let mut guard = SessionGuard {
            link: self.config.link.clone(),
            writer: self.writer.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            counters: self.counters.clone(),
            termination: None,
        };

        let spawned = thread::Builder::new()
            .name(format!("capture-{}", self.config.link))
            .spawn(move || {
                let mut guard = guard;
                guard.termination = Some(session.run(transport.as_ref()));
                // Releases the transport and reports the end
                drop(guard);
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                // The closure (and its guard) was dropped: the transport is
                // already released and the session recorded as faulted.
                tlog!("[Capture:{}] Failed to spawn read loop: {}", self.config.link, e);
                Err(TransportError::io(&self.config.link, e))
            }
        }
    }

    /// Release the transport and wait for the read loop to exit.
    ///
    /// Safe to call repeatedly and after the session ended on its own. Once
    /// this returns no further events are queued by this session.
    pub fn close(&mut self) {
        self.writer.release();
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                // The guard already recorded the fault during unwinding
                tlog!("[Capture:{}] Read loop panicked", self.config.link);
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock_state(state: &Mutex<WorkerState>) -> std::sync::MutexGuard<'_, WorkerState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// Read Loop
// ============================================================================

/// Everything the read loop needs, moved onto the capture thread.
struct CaptureSession {
    link: String,
    dedup_lifetime: Duration,
    session_start_us: u64,
    events: EventSender,
    raw_hook: Option<RawByteHook>,
    counters: Arc<CaptureCounters>,
}

impl CaptureSession {
    fn run(&self, transport: &dyn Transport) -> Termination {
        let mut cache = DedupCache::new();

        loop {
            let byte = match read_byte(transport) {
                Ok(b) => b,
                Err(e) => return classify(e),
            };

            cache.prune(now_us(), self.dedup_lifetime);

            if byte != PREAMBLE {
                self.counters.raw(1);
                self.deliver_raw(&[byte]);
                continue;
            }

            let result = match decode_step(|buf: &mut [u8]| transport.read_exact(buf)) {
                Ok(r) => r,
                Err(e) => return classify(e),
            };

            match result {
                FrameResult::Valid(payload) => {
                    // Duplicates still count as protocol-valid frames
                    self.counters.frame();
                    if cache.contains(&payload) {
                        self.counters.duplicate();
                        continue;
                    }

                    let now = now_us();
                    cache.insert(&payload, now);
                    let message = Message {
                        relative_us: now.saturating_sub(self.session_start_us),
                        link: self.link.clone(),
                        payload,
                    };
                    if self.events.send(LinkEvent::Message(message)).is_err() {
                        return Termination::Fault("event queue closed".to_string());
                    }
                }
                mismatch @ FrameResult::ChecksumMismatch { .. } => {
                    self.counters.checksum_mismatch();
                    self.deliver_raw(&mismatch.raw_bytes());
                }
            }
        }
    }

    fn deliver_raw(&self, bytes: &[u8]) {
        if let Some(ref hook) = self.raw_hook {
            hook(&self.link, bytes);
        }
    }
}

fn classify(err: TransportError) -> Termination {
    match err {
        TransportError::Closed(_) => Termination::ClosedByCaller,
        TransportError::Disconnected(_) => Termination::Disconnected,
        other => Termination::Fault(other.to_string()),
    }
}

/// Scoped ownership of a running session. Dropping it (normal exit or
/// unwinding) releases the transport, records the termination, and queues
/// the link's `Ended` event.
struct SessionGuard {
    link: String,
    writer: LinkWriter,
    state: Arc<Mutex<WorkerState>>,
    events: EventSender,
    counters: Arc<CaptureCounters>,
    termination: Option<Termination>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.writer.release();

        let termination = self.termination.take().unwrap_or_else(|| {
            // No result: either the read loop unwound or it never ran
            if thread::panicking() {
                Termination::Fault("capture thread panicked".to_string())
            } else {
                Termination::Fault("failed to spawn capture thread".to_string())
            }
        });
        let stats = self.counters.snapshot();
        tlog!(
            "[Capture:{}] Stream ended ({}), frames: {}, duplicates: {}, checksum errors: {}",
            self.link,
            termination,
            stats.total_frame_count,
            stats.duplicate_count,
            stats.checksum_mismatch_count
        );

        // Queue the end marker before publishing the state, so anyone who
        // observes the stopped state knows the marker is already queued
        let _ = self.events.send(LinkEvent::Ended {
            link: self.link.clone(),
            termination: termination.clone(),
        });
        *lock_state(&self.state) = WorkerState::Stopped(termination);
    }
}

// ============================================================================
// Tests
// ============================================================================
