// src/io/dedup.rs
//
// Time-windowed cache of recently seen payloads.
//
// Entries are kept in capture order, so expiry only ever removes from the
// front. A payload can only be inserted when it is not already present,
// which keeps at most one entry per distinct payload.

use std::collections::VecDeque;
use std::time::Duration;

/// A payload and the host time (microseconds) it was first seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub captured_us: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct DedupCache {
    entries: VecDeque<DedupEntry>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, payload: &[u8]) -> bool {
        self.entries.iter().any(|e| e.payload == payload)
    }

    /// Record `payload` as seen at `now_us`. Re-inserting a payload that is
    /// still cached leaves the original entry (and its age) alone.
    pub fn insert(&mut self, payload: &[u8], now_us: u64) {
        if self.contains(payload) {
            return;
        }
        self.entries.push_back(DedupEntry {
            captured_us: now_us,
            payload: payload.to_vec(),
        });
    }

    /// Drop every entry with `captured + lifetime < now`.
    ///
    /// A zero lifetime retains nothing, which disables deduplication.
    pub fn prune(&mut self, now_us: u64, lifetime: Duration) {
        if lifetime.is_zero() {
            self.entries.clear();
            return;
        }

        let lifetime_us = u64::try_from(lifetime.as_micros()).unwrap_or(u64::MAX);
        while let Some(front) = self.entries.front() {
            if front.captured_us.saturating_add(lifetime_us) < now_us {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
