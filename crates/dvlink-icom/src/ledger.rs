//! Tracked-send ledger.
//!
//! Holds every reliable packet from the moment it is sent until the peer
//! acknowledges its sequence number or its retry budget runs out. The
//! ledger never touches the socket: [`Ledger::tick`] reports what must be
//! resent and what was given up on, and the caller does the sending.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Default time between resends of an unacknowledged packet.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);
/// Default number of resends before an entry is evicted.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
struct Entry {
    packet: Vec<u8>,
    sent_at: Instant,
    retries: u32,
}

/// Outcome of one [`Ledger::tick`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    /// Packets to put back on the wire, in sequence order.
    pub resend: Vec<(u16, Vec<u8>)>,
    /// Sequence numbers that exhausted their retry budget and were removed.
    pub evicted: Vec<u16>,
}

impl TickOutcome {
    pub fn is_empty(&self) -> bool {
        self.resend.is_empty() && self.evicted.is_empty()
    }
}

/// Sequence number -> pending reliable packet.
#[derive(Debug, Clone)]
pub struct Ledger {
    entries: BTreeMap<u16, Entry>,
    retry_interval: Duration,
    max_retries: u32,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL, DEFAULT_MAX_RETRIES)
    }
}

impl Ledger {
    pub fn new(retry_interval: Duration, max_retries: u32) -> Self {
        Ledger {
            entries: BTreeMap::new(),
            retry_interval,
            max_retries,
        }
    }

    /// Record a packet that was just sent. Replaces any older entry with
    /// the same sequence number.
    pub fn track(&mut self, seq: u16, packet: Vec<u8>, now: Instant) {
        self.entries.insert(
            seq,
            Entry {
                packet,
                sent_at: now,
                retries: 0,
            },
        );
    }

    /// Retire `seq`. Returns whether an entry was removed.
    pub fn acknowledge(&mut self, seq: u16) -> bool {
        self.entries.remove(&seq).is_some()
    }

    /// The stored bytes for `seq`, for answering a retransmit request.
    pub fn get(&self, seq: u16) -> Option<&[u8]> {
        self.entries.get(&seq).map(|e| e.packet.as_slice())
    }

    pub fn contains(&self, seq: u16) -> bool {
        self.entries.contains_key(&seq)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Earliest instant at which [`tick`](Ledger::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .map(|e| e.sent_at + self.retry_interval)
            .min()
    }

    /// Resend or evict every entry whose retry deadline has passed.
    ///
    /// An entry that has already been resent `max_retries` times is evicted
    /// instead of resent. Each sequence number is evicted at most once.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        for (&seq, entry) in self.entries.iter_mut() {
            if now < entry.sent_at + self.retry_interval {
                continue;
            }
            if entry.retries >= self.max_retries {
                outcome.evicted.push(seq);
            } else {
                entry.retries += 1;
                entry.sent_at = now;
                outcome.resend.push((seq, entry.packet.clone()));
            }
        }

        for seq in &outcome.evicted {
            self.entries.remove(seq);
        }

        if !outcome.is_empty() {
            tracing::trace!(
                resent = outcome.resend.len(),
                evicted = outcome.evicted.len(),
                pending = self.entries.len(),
                "Ledger tick"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = DEFAULT_RETRY_INTERVAL;

    #[test]
    fn nothing_due_before_interval() {
        let t0 = Instant::now();
        let mut ledger = Ledger::default();
        ledger.track(1, vec![1], t0);
        assert!(ledger.tick(t0 + STEP / 2).is_empty());
        assert_eq!(ledger.next_deadline(), Some(t0 + STEP));
    }

    #[test]
    fn unacknowledged_is_evicted_exactly_once() {
        let t0 = Instant::now();
        let mut ledger = Ledger::new(STEP, 5);
        ledger.track(7, vec![0xAA], t0);

        let mut resends = 0;
        let mut evictions = Vec::new();
        for i in 1..=20 {
            let out = ledger.tick(t0 + STEP * i);
            resends += out.resend.len();
            evictions.extend(out.evicted);
        }

        assert_eq!(resends, 5);
        assert_eq!(evictions, vec![7]);
        assert!(ledger.is_empty());
        assert_eq!(ledger.next_deadline(), None);
    }

    #[test]
    fn acknowledge_before_eviction_stops_resends() {
        for ack_after in 0..5u32 {
            let t0 = Instant::now();
            let mut ledger = Ledger::new(STEP, 5);
            ledger.track(3, vec![3], t0);

            for i in 1..=ack_after {
                assert_eq!(ledger.tick(t0 + STEP * i).resend.len(), 1);
            }
            assert!(ledger.acknowledge(3));

            for i in ack_after + 1..=20 {
                assert!(ledger.tick(t0 + STEP * i).is_empty());
            }
        }
    }

    #[test]
    fn acknowledge_unknown_is_noop() {
        let mut ledger = Ledger::default();
        assert!(!ledger.acknowledge(99));
        ledger.track(1, vec![1], Instant::now());
        assert!(!ledger.acknowledge(2));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn resend_carries_original_bytes() {
        let t0 = Instant::now();
        let mut ledger = Ledger::default();
        ledger.track(10, vec![1, 2, 3], t0);
        ledger.track(11, vec![4, 5], t0);
        assert_eq!(ledger.get(11), Some(&[4u8, 5][..]));

        let out = ledger.tick(t0 + STEP);
        assert_eq!(out.resend, vec![(10, vec![1, 2, 3]), (11, vec![4, 5])]);
    }

    #[test]
    fn resend_resets_deadline() {
        let t0 = Instant::now();
        let mut ledger = Ledger::default();
        ledger.track(1, vec![1], t0);
        ledger.tick(t0 + STEP + Duration::from_millis(100));
        assert_eq!(
            ledger.next_deadline(),
            Some(t0 + STEP * 2 + Duration::from_millis(100))
        );
    }
}
