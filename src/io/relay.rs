// src/io/relay.rs
//
// Consumers of the shared event queue.
//
// - Monitor: one capture worker, events handed to an observer.
// - Relay: two capture workers sharing one queue and one time base. Valid
//   frames are re-encoded and written to the opposite link by the consumer;
//   everything else is forwarded byte-for-byte by the workers' raw hooks,
//   bypassing the queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::capture::{CaptureConfig, CaptureWorker};
use super::codec::encode;
use super::error::TransportError;
use super::now_us;
use super::transport::{Connector, LinkWriter};
use super::types::{
    event_queue, CaptureStats, EventReceiver, LinkEvent, Message, Termination, WorkerState,
};

// ============================================================================
// Summaries
// ============================================================================

/// Final state of one link.
#[derive(Clone, Debug, Serialize)]
pub struct LinkSummary {
    pub link: String,
    pub stats: CaptureStats,
    pub termination: Option<Termination>,
}

impl LinkSummary {
    fn of(worker: &CaptureWorker) -> Self {
        Self {
            link: worker.link().to_string(),
            stats: worker.stats(),
            termination: worker.termination(),
        }
    }
}

/// What a consumer did before its links ended.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConsumerSummary {
    /// Messages dequeued
    pub messages: u64,
    /// Frames written to the opposite link
    pub forwarded: u64,
    /// Frames that could not be written (opposite link down)
    pub forward_failures: u64,
    /// Links in the order their sessions ended
    pub ended: Vec<(String, Termination)>,
}

// ============================================================================
// Consumer
// ============================================================================

/// Sessions begun on one link vs. `Ended` events seen for it.
struct LinkTally {
    begun: Arc<AtomicU64>,
    ended: u64,
}

impl LinkTally {
    /// Started at least once and every session begun has reported its end.
    fn finished(&self) -> bool {
        let begun = self.begun.load(Ordering::SeqCst);
        begun > 0 && self.ended >= begun
    }
}

/// The single consumer of a queue. Runs until every session begun on the
/// links it tracks has reported its end, so the queue is fully drained when
/// it returns. Restarting a link (e.g. retrying after an open failure) only
/// extends the wait.
pub struct Consumer {
    events: EventReceiver,
    tallies: HashMap<String, LinkTally>,
    /// Source link -> writer of the link its frames are forwarded to
    routes: HashMap<String, LinkWriter>,
}

impl Consumer {
    fn new(events: EventReceiver) -> Self {
        Self {
            events,
            tallies: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    fn track(mut self, worker: &CaptureWorker) -> Self {
        self.tallies.insert(
            worker.link().to_string(),
            LinkTally {
                begun: worker.session_tally(),
                ended: 0,
            },
        );
        self
    }

    fn route(mut self, from: &str, to: LinkWriter) -> Self {
        self.routes.insert(from.to_string(), to);
        self
    }

    fn finished(&self) -> bool {
        self.tallies.values().all(LinkTally::finished)
    }

    /// Drain the queue, forwarding where routed, and report each event.
    pub fn run<F>(mut self, mut observer: F) -> ConsumerSummary
    where
        F: FnMut(&LinkEvent),
    {
        let mut summary = ConsumerSummary::default();

        while !self.finished() {
            // Blocks while the queue is empty
            let event = match self.events.recv() {
                Ok(event) => event,
                Err(_) => break,
            };

            match &event {
                LinkEvent::Message(message) => {
                    summary.messages += 1;
                    if let Some(target) = self.routes.get(&message.link) {
                        match forward(message, target) {
                            Ok(()) => summary.forwarded += 1,
                            Err(e) => {
                                summary.forward_failures += 1;
                                tlog!(
                                    "[Relay] Dropped frame from {} ({} bytes): {}",
                                    message.link,
                                    message.payload.len(),
                                    e
                                );
                            }
                        }
                    }
                }
                LinkEvent::Ended { link, termination } => {
                    if let Some(tally) = self.tallies.get_mut(link) {
                        tally.ended += 1;
                    }
                    summary.ended.push((link.clone(), termination.clone()));
                }
            }

            observer(&event);
        }

        summary
    }
}

fn forward(message: &Message, target: &LinkWriter) -> Result<(), TransportError> {
    let frame = encode(&message.payload)
        .map_err(|e| TransportError::io(target.link(), std::io::Error::other(e)))?;
    target.write(&frame)
}

// ============================================================================
// Monitor
// ============================================================================

/// Single-link capture with deduplication.
pub struct Monitor {
    worker: CaptureWorker,
    events: Option<EventReceiver>,
}

impl Monitor {
    pub fn new(link: &str, dedup_lifetime: Duration, connector: Arc<dyn Connector>) -> Self {
        let (tx, rx) = event_queue();
        let config = CaptureConfig::new(link).with_dedup_lifetime(dedup_lifetime);
        Self {
            worker: CaptureWorker::new(config, connector, tx),
            events: Some(rx),
        }
    }

    pub fn start(&mut self) -> Result<(), TransportError> {
        self.worker.start(None)
    }

    /// Take the queue's consumer. Only the first call returns one.
    pub fn consumer(&mut self) -> Option<Consumer> {
        let worker = &self.worker;
        self.events.take().map(|rx| Consumer::new(rx).track(worker))
    }

    /// Run the consumer on the current thread until the link ends.
    pub fn run<F: FnMut(&LinkEvent)>(&mut self, observer: F) -> ConsumerSummary {
        match self.consumer() {
            Some(consumer) => consumer.run(observer),
            None => ConsumerSummary::default(),
        }
    }

    pub fn close(&mut self) -> LinkSummary {
        self.worker.close();
        LinkSummary::of(&self.worker)
    }
}

// ============================================================================
// Relay
// ============================================================================

/// Bidirectional gateway between two links.
pub struct Relay {
    a: CaptureWorker,
    b: CaptureWorker,
    events: Option<EventReceiver>,
    session_start_us: u64,
}

impl Relay {
    pub fn new(link_a: &str, link_b: &str, connector: Arc<dyn Connector>) -> Self {
        let (tx, rx) = event_queue();

        // Suppression is never acceptable in a pass-through gateway
        let config_a = CaptureConfig::new(link_a).with_dedup_lifetime(Duration::ZERO);
        let config_b = CaptureConfig::new(link_b).with_dedup_lifetime(Duration::ZERO);
        let mut a = CaptureWorker::new(config_a, connector.clone(), tx.clone());
        let mut b = CaptureWorker::new(config_b, connector, tx);

        a.set_raw_hook(passthrough(b.writer()));
        b.set_raw_hook(passthrough(a.writer()));

        Self {
            a,
            b,
            events: Some(rx),
            session_start_us: now_us(),
        }
    }

    pub fn session_start_us(&self) -> u64 {
        self.session_start_us
    }

    /// Start both links on the shared time base.
    ///
    /// Both links are always attempted; one failing does not stop the
    /// other. The first open error is returned. A link that is already
    /// running is left alone, so calling this again retries only the side
    /// that failed.
    pub fn start(&mut self) -> Result<(), TransportError> {
        let start = Some(self.session_start_us);
        let result_a = start_idle(&mut self.a, start);
        let result_b = start_idle(&mut self.b, start);
        result_a.and(result_b)
    }

    /// Take the queue's consumer. Only the first call returns one.
    pub fn consumer(&mut self) -> Option<Consumer> {
        let a_to_b = self.b.writer();
        let b_to_a = self.a.writer();
        let (a, b) = (&self.a, &self.b);
        self.events.take().map(|rx| {
            Consumer::new(rx)
                .track(a)
                .track(b)
                .route(a.link(), a_to_b)
                .route(b.link(), b_to_a)
        })
    }

    /// Run the consumer on the current thread until both links end.
    pub fn run<F: FnMut(&LinkEvent)>(&mut self, observer: F) -> ConsumerSummary {
        match self.consumer() {
            Some(consumer) => consumer.run(observer),
            None => ConsumerSummary::default(),
        }
    }

    pub fn workers(&self) -> [&CaptureWorker; 2] {
        [&self.a, &self.b]
    }

    /// Close both links (each waits for its read loop to exit).
    pub fn close(&mut self) -> [LinkSummary; 2] {
        self.a.close();
        self.b.close();
        [LinkSummary::of(&self.a), LinkSummary::of(&self.b)]
    }
}

fn start_idle(worker: &mut CaptureWorker, start_us: Option<u64>) -> Result<(), TransportError> {
    if worker.state() == WorkerState::Running {
        return Ok(());
    }
    worker.start(start_us)
}

/// Raw hook forwarding unconsumed bytes straight to another link.
fn passthrough(target: LinkWriter) -> super::types::RawByteHook {
    Arc::new(move |_link: &str, bytes: &[u8]| {
        // Opposite link down: there is nowhere to pass the bytes to
        let _ = target.write(bytes);
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory::{MemoryConnector, MemoryHandle};
    use std::thread;
    use std::time::Instant;

    fn wait_for_written(handle: &MemoryHandle, len: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let written = handle.written();
            if written.len() >= len || Instant::now() > deadline {
                return written;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn relay_pair() -> (Relay, MemoryHandle, MemoryHandle) {
        let connector = Arc::new(MemoryConnector::new());
        let a = connector.add_link("ttyA");
        let b = connector.add_link("ttyB");
        let relay = Relay::new("ttyA", "ttyB", connector);
        (relay, a, b)
    }

    #[test]
    fn test_relay_forwards_in_order_exactly_once() {
        let (mut relay, a, b) = relay_pair();
        relay.start().unwrap();
        let consumer = relay.consumer().unwrap();
        let runner = thread::spawn(move || {
            let mut seen = Vec::new();
            let summary = consumer.run(|event| {
                if let LinkEvent::Message(m) = event {
                    seen.push(m.payload.clone());
                }
            });
            (summary, seen)
        });

        let payloads: [&[u8]; 3] = [&[0x01, 0x02], &[0x03], &[0x01, 0x02]];
        let mut expected = Vec::new();
        for p in payloads {
            let frame = encode(p).unwrap();
            a.feed(&frame);
            expected.extend(frame);
        }

        let written = wait_for_written(&b, expected.len());
        let summary_links = relay.close();
        let (summary, seen) = runner.join().unwrap();

        assert_eq!(written, expected);
        assert!(a.written().is_empty());
        assert_eq!(seen, vec![vec![0x01, 0x02], vec![0x03], vec![0x01, 0x02]]);
        assert_eq!(summary.forwarded, 3);
        assert_eq!(summary.ended.len(), 2);
        assert_eq!(summary_links[0].stats.total_frame_count, 3);
        assert_eq!(summary_links[0].termination, Some(Termination::ClosedByCaller));
    }

    #[test]
    fn test_relay_forwards_both_directions() {
        let (mut relay, a, b) = relay_pair();
        relay.start().unwrap();
        let consumer = relay.consumer().unwrap();
        let runner = thread::spawn(move || consumer.run(|_| {}));

        let to_b = encode(&[0xB0]).unwrap();
        let to_a = encode(&[0xA0, 0xA1]).unwrap();
        a.feed(&to_b);
        b.feed(&to_a);

        assert_eq!(wait_for_written(&b, to_b.len()), to_b);
        assert_eq!(wait_for_written(&a, to_a.len()), to_a);
        relay.close();
        let summary = runner.join().unwrap();
        assert_eq!(summary.forwarded, 2);
    }

    #[test]
    fn test_relay_passes_noise_and_bad_frames_through_raw() {
        let (mut relay, a, b) = relay_pair();
        relay.start().unwrap();
        let consumer = relay.consumer().unwrap();
        let runner = thread::spawn(move || consumer.run(|_| {}));

        a.feed(&[0x00, 0x7E]);
        a.feed(&[0x55, 0x02, 0x01, 0x02, 0xEE]);

        let expected = vec![0x00, 0x7E, 0x02, 0x01, 0x02, 0xEE];
        assert_eq!(wait_for_written(&b, expected.len()), expected);

        relay.close();
        let summary = runner.join().unwrap();
        assert_eq!(summary.messages, 0);
        assert_eq!(relay.workers()[0].stats().checksum_mismatch_count, 1);
    }

    #[test]
    fn test_relay_does_not_suppress_repeats() {
        let (mut relay, a, b) = relay_pair();
        relay.start().unwrap();
        let consumer = relay.consumer().unwrap();
        let runner = thread::spawn(move || consumer.run(|_| {}));

        let frame = encode(&[0x42, 0x43]).unwrap();
        a.feed(&frame);
        a.feed(&frame);

        let written = wait_for_written(&b, frame.len() * 2);
        relay.close();
        runner.join().unwrap();
        assert_eq!(written.len(), frame.len() * 2);
    }

    #[test]
    fn test_relay_link_fault_leaves_other_side_running() {
        let (mut relay, a, b) = relay_pair();
        relay.start().unwrap();
        let consumer = relay.consumer().unwrap();
        let runner = thread::spawn(move || consumer.run(|_| {}));

        b.disconnect();
        let deadline = Instant::now() + Duration::from_secs(5);
        while relay.workers()[1].termination().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(relay.workers()[1].termination(), Some(Termination::Disconnected));
        assert_eq!(relay.workers()[0].state(), WorkerState::Running);

        // Frames from A now have nowhere to go
        a.feed(&encode(&[0x01]).unwrap());
        let [summary_a, summary_b] = relay.close();
        let summary = runner.join().unwrap();

        assert_eq!(summary_a.termination, Some(Termination::ClosedByCaller));
        assert_eq!(summary_b.termination, Some(Termination::Disconnected));
        assert_eq!(summary.ended[0], ("ttyB".to_string(), Termination::Disconnected));
        assert_eq!(summary.forwarded, 0);
    }

    #[test]
    fn test_relay_shares_time_base() {
        let (mut relay, _a, _b) = relay_pair();
        relay.start().unwrap();
        let start = relay.session_start_us();
        let [wa, wb] = relay.workers();
        assert_eq!(wa.session_start_us(), Some(start));
        assert_eq!(wb.session_start_us(), Some(start));
        relay.close();
    }

    #[test]
    fn test_relay_open_failure_reports_first_error() {
        let connector = Arc::new(MemoryConnector::new());
        let _a = connector.add_link("ttyA");
        let mut relay = Relay::new("ttyA", "missing", connector);

        assert!(matches!(relay.start(), Err(TransportError::Open { .. })));
        assert_eq!(relay.workers()[0].state(), WorkerState::Running);
        let [_, missing] = relay.close();
        assert!(matches!(missing.termination, Some(Termination::OpenFailure(_))));

        // Both sessions ended, so the consumer drains and returns
        let summary = relay.run(|_| {});
        assert_eq!(summary.ended.len(), 2);
    }

    #[test]
    fn test_relay_retry_after_open_failure_keeps_consuming() {
        let connector = Arc::new(MemoryConnector::new());
        let b = connector.add_link("ttyB");
        let mut relay = Relay::new("ttyA", "ttyB", connector.clone());

        assert!(matches!(relay.start(), Err(TransportError::Open { .. })));
        let consumer = relay.consumer().unwrap();
        let runner = thread::spawn(move || consumer.run(|_| {}));

        // Retry brings up A; B is already running and is not restarted
        let a = connector.add_link("ttyA");
        relay.start().unwrap();
        assert_eq!(relay.workers()[1].state(), WorkerState::Running);

        a.disconnect();
        let deadline = Instant::now() + Duration::from_secs(5);
        while relay.workers()[0].termination().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(relay.workers()[0].termination(), Some(Termination::Disconnected));

        // A's failed and finished sessions have both ended, B's has not
        thread::sleep(Duration::from_millis(50));
        assert!(!runner.is_finished());

        b.feed(&encode(&[0x0B]).unwrap());
        while relay.workers()[1].total_frame_count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        relay.close();
        let summary = runner.join().unwrap();

        assert_eq!(summary.messages, 1);
        // A is down, so B's frame has nowhere to go
        assert_eq!(summary.forward_failures, 1);
        assert_eq!(summary.ended.len(), 3);
        assert_eq!(summary.ended[2], ("ttyB".to_string(), Termination::ClosedByCaller));
    }

    #[test]
    fn test_consumer_taken_once() {
        let (mut relay, _a, _b) = relay_pair();
        assert!(relay.consumer().is_some());
        assert!(relay.consumer().is_none());
    }

    #[test]
    fn test_monitor_dedups_and_drains_on_disconnect() {
        let connector = Arc::new(MemoryConnector::new());
        let handle = connector.add_link("tty0");
        let mut monitor = Monitor::new("tty0", Duration::from_secs(3), connector);
        monitor.start().unwrap();

        let frame = encode(&[0x81, 0x01]).unwrap();
        handle.feed(&frame);
        handle.feed(&frame);
        handle.feed(&encode(&[0x82]).unwrap());
        handle.disconnect();

        let mut payloads = Vec::new();
        let summary = monitor.run(|event| {
            if let LinkEvent::Message(m) = event {
                payloads.push(m.payload.clone());
            }
        });
        let link = monitor.close();

        assert_eq!(payloads, vec![vec![0x81, 0x01], vec![0x82]]);
        assert_eq!(summary.messages, 2);
        assert_eq!(summary.forwarded, 0);
        assert_eq!(link.stats.total_frame_count, 3);
        assert_eq!(link.termination, Some(Termination::Disconnected));
        // Monitors never write back to the link
        assert!(handle.written().is_empty());
    }
}
