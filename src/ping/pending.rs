//! Fixed-capacity tracking of in-flight echo requests.
//!
//! A 16-slot arena keyed by (destination, identifier, sequence). The engine
//! inserts an entry before sending each echo request; the dispatcher and the
//! expiry sweeps reclaim entries. Callers hold the engine lock around every
//! operation here, so each method is one atomic region.

use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::IcmpError;

/// Maximum outstanding echo requests. Requests beyond this fail fast with
/// `Busy` instead of queueing.
pub const MAX_PENDING: usize = 16;

/// What finally happened to one in-flight echo request.
#[derive(Debug)]
pub enum EchoOutcome {
    Replied { rtt: Duration },
    TimedOut,
    Failed(IcmpError),
}

/// One in-flight, unmatched echo request.
///
/// One-shot requests carry a waiter that the reclaiming side completes;
/// continuous-session requests have no waiter and feed the session
/// statistics directly.
#[derive(Debug)]
pub struct PendingEcho {
    pub destination: Ipv4Addr,
    pub identifier: u16,
    pub sequence: u16,
    pub send_time: Instant,
    pub waiter: Option<oneshot::Sender<EchoOutcome>>,
}

/// Index of an occupied slot, only meaningful against the table that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandle(usize);

/// Outcome of [`PendingTable::allocate`]: the reserved slot (`None` means
/// the table stayed full, i.e. `Busy`) plus any entries reclaimed by the
/// internal expiry sweep, which the engine must account exactly once.
#[derive(Debug)]
pub struct AllocResult {
    pub slot: Option<SlotHandle>,
    pub expired: Vec<PendingEcho>,
}

pub struct PendingTable {
    slots: [Option<PendingEcho>; MAX_PENDING],
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Number of occupied slots.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Reserve a slot for a new request, stamping `now` as its send time.
    ///
    /// Scans for a free slot; if the table is full, runs one expiry sweep
    /// and retries once. A still-full table, or a live duplicate of the
    /// same triple (which would break reply correlation), leaves
    /// `slot: None`.
    pub fn allocate(
        &mut self,
        destination: Ipv4Addr,
        identifier: u16,
        sequence: u16,
        waiter: Option<oneshot::Sender<EchoOutcome>>,
        now: Instant,
        timeout: Duration,
    ) -> AllocResult {
        if self.match_reply(destination, identifier, sequence).is_some() {
            return AllocResult {
                slot: None,
                expired: Vec::new(),
            };
        }

        let mut expired = Vec::new();
        let mut free = self.slots.iter().position(|s| s.is_none());
        if free.is_none() {
            expired = self.sweep_expired(now, timeout);
            free = self.slots.iter().position(|s| s.is_none());
        }

        let slot = free.map(|idx| {
            self.slots[idx] = Some(PendingEcho {
                destination,
                identifier,
                sequence,
                send_time: now,
                waiter,
            });
            SlotHandle(idx)
        });

        AllocResult { slot, expired }
    }

    /// Find the in-flight request matching an arriving reply.
    ///
    /// Linear scan for exact triple equality; first match wins (the
    /// uniqueness invariant makes ties impossible). `None` for
    /// unmatched, duplicate, or out-of-order replies.
    pub fn match_reply(
        &self,
        destination: Ipv4Addr,
        identifier: u16,
        sequence: u16,
    ) -> Option<SlotHandle> {
        self.slots.iter().position(|s| {
            s.as_ref().is_some_and(|e| {
                e.destination == destination
                    && e.identifier == identifier
                    && e.sequence == sequence
            })
        }).map(SlotHandle)
    }

    /// Release a slot, returning its entry.
    ///
    /// Idempotent: freeing an already-free slot returns `None` and changes
    /// nothing. Whichever of a racing match and sweep frees first owns the
    /// entry; the loser observes `None` and does nothing further.
    pub fn free(&mut self, handle: SlotHandle) -> Option<PendingEcho> {
        self.slots[handle.0].take()
    }

    /// Reclaim every slot whose deadline has elapsed.
    ///
    /// Returns the expired entries so the caller updates loss statistics
    /// exactly once per request.
    pub fn sweep_expired(&mut self, now: Instant, timeout: Duration) -> Vec<PendingEcho> {
        let mut expired = Vec::new();
        for slot in self.slots.iter_mut() {
            let due = slot
                .as_ref()
                .is_some_and(|e| now.duration_since(e.send_time) >= timeout);
            if due {
                if let Some(entry) = slot.take() {
                    expired.push(entry);
                }
            }
        }
        expired
    }

    /// Drop every slot belonging to one session, expired or not.
    ///
    /// Used by `ping_stop` so a late reply can never touch finalized
    /// statistics.
    pub fn purge_session(&mut self, destination: Ipv4Addr, identifier: u16) -> Vec<PendingEcho> {
        let mut purged = Vec::new();
        for slot in self.slots.iter_mut() {
            let matches = slot
                .as_ref()
                .is_some_and(|e| e.destination == destination && e.identifier == identifier);
            if matches {
                if let Some(entry) = slot.take() {
                    purged.push(entry);
                }
            }
        }
        purged
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}
