//! Shared logical clock between the two peers.
//!
//! Each side keeps a signed offset in milliseconds that is added to its local
//! monotonic clock.  The server role periodically runs one exchange:
//!
//! ```text
//!   server                                   client
//!     │  TIME_SYNC(t_local)  ───────────────▶  │  offset = t_local − now
//!     │                                         │
//!     │  ◀─────────────────────────  PONG       │
//!     │  offset = −(now − t_sent) / 2           │
//! ```
//!
//! After a round with symmetric latency both sides report the same
//! corrected timestamp.  A lost pong leaves the previous offset in place, and
//! a pong nobody asked for is ignored.  Offsets come from the peer, so all
//! clock arithmetic saturates.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::packet::Frame;

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// Source of local monotonic milliseconds.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> i64;
}

/// Milliseconds since the clock was created.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}

/// A clock that only moves when told to.  Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn starting_at(millis: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(millis)),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// TimeSyncer
// ---------------------------------------------------------------------------

/// Per-connection clock offset estimator.
///
/// Only the sync exchange writes the offset; anyone may read it.
pub struct TimeSyncer {
    clock: Arc<dyn Clock>,
    offset: AtomicI64,
    /// Local time of the last sync request we sent.
    sent_at: AtomicI64,
    /// A request is waiting for its pong.
    pending: AtomicBool,
}

impl std::fmt::Debug for TimeSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSyncer")
            .field("offset", &self.offset())
            .finish()
    }
}

impl TimeSyncer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            offset: AtomicI64::new(0),
            sent_at: AtomicI64::new(0),
            pending: AtomicBool::new(false),
        }
    }

    /// Start an exchange: remember the local time and return the request.
    pub fn begin_sync(&self) -> Frame {
        let now = self.clock.now_millis();
        self.sent_at.store(now, Ordering::SeqCst);
        self.pending.store(true, Ordering::SeqCst);
        log::debug!("[sync] → TIME_SYNC local={now}");
        Frame::time_sync(now)
    }

    /// Peer asked us to sync to `remote_ts`.  Returns the pong to send.
    pub fn on_sync_request(&self, remote_ts: i64) -> Frame {
        let received = self.clock.now_millis();
        let offset = remote_ts.saturating_sub(received);
        self.offset.store(offset, Ordering::SeqCst);
        log::debug!(
            "[sync] ← TIME_SYNC remote={remote_ts}; offset={offset} corrected={}",
            self.corrected_timestamp()
        );
        Frame::time_sync_pong()
    }

    /// Our request came back.  Assumes the one-way latency is half the
    /// round trip.
    pub fn on_pong(&self) {
        if !self.pending.swap(false, Ordering::SeqCst) {
            log::warn!("[sync] ← PONG without a pending request, ignored");
            return;
        }
        let received = self.clock.now_millis();
        let round_trip = received.saturating_sub(self.sent_at.load(Ordering::SeqCst));
        let offset = -(round_trip >> 1);
        self.offset.store(offset, Ordering::SeqCst);
        log::debug!(
            "[sync] ← PONG rtt={round_trip}ms; offset={offset} corrected={}",
            self.corrected_timestamp()
        );
    }

    /// Local monotonic time plus the current offset.
    pub fn corrected_timestamp(&self) -> i64 {
        self.clock.now_millis().saturating_add(self.offset())
    }

    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::SeqCst)
    }
}
