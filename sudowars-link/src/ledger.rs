//! Outbound packet ledger.
//!
//! [`Ledger`] remembers every command frame that has been written but not yet
//! acknowledged.  It does **not** touch the transport;
//! [`crate::connection::Connection`] calls these methods under its ledger
//! mutex and performs the actual writes.
//!
//! # Contract
//! - At most one record per packet id.
//! - An id is never handed out while a record for it exists, so wraparound
//!   cannot confuse a new packet with an unacknowledged one.
//! - On OK: the record leaves the ledger and is returned to the caller.
//! - On the first CORRUPT: the record is marked and the identical frame is
//!   handed back for retransmission.
//! - On the second CORRUPT: the record is dropped and the link gives up.

use std::collections::HashMap;
use std::time::Instant;

use crate::error::LinkError;
use crate::packet::Frame;

// ---------------------------------------------------------------------------
// OutgoingPacket
// ---------------------------------------------------------------------------

/// A command frame that has been sent but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct OutgoingPacket<M> {
    pub packet_id: u8,
    /// The command, returned to the application once delivered.
    pub command: M,
    /// Encoded frame, resent byte-for-byte on a corrupt notice.
    pub frame: Vec<u8>,
    pub checksum: u16,
    /// Time of the first transmission.
    pub sent_at: Instant,
    /// Set once the peer has reported this frame as corrupt.
    pub remote_corrupted: bool,
}

/// What to do after the peer reported a frame as corrupt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptVerdict {
    /// No record for that id; nothing to do.
    Unknown,
    /// First notice: write these bytes again.
    Resend(Vec<u8>),
    /// Second notice: the record was dropped, close the connection.
    Abandon,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Send-side bookkeeping for one connection.
#[derive(Debug)]
pub struct Ledger<M> {
    /// Candidate for the next allocation.
    next_id: u8,
    entries: HashMap<u8, OutgoingPacket<M>>,
}

impl<M> Default for Ledger<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Ledger<M> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: HashMap::new(),
        }
    }

    /// Pick the next free packet id, skipping ids still in flight.
    pub fn allocate_id(&mut self) -> Result<u8, LinkError> {
        for step in 0..=u8::MAX {
            let candidate = self.next_id.wrapping_add(step);
            if !self.entries.contains_key(&candidate) {
                self.next_id = candidate.wrapping_add(1);
                return Ok(candidate);
            }
        }
        Err(LinkError::LedgerFull)
    }

    /// Allocate an id, frame `payload` under it and record the packet.
    ///
    /// Returns the id and the bytes to write.  Nothing is recorded when
    /// framing fails.
    pub fn admit(&mut self, command: M, payload: Vec<u8>) -> Result<(u8, Vec<u8>), LinkError> {
        let packet_id = self.allocate_id()?;
        let frame = Frame::command(packet_id, payload);
        let bytes = frame.encode()?;
        self.record(OutgoingPacket {
            packet_id,
            command,
            frame: bytes.clone(),
            checksum: frame.checksum.unwrap_or_default(),
            sent_at: Instant::now(),
            remote_corrupted: false,
        });
        Ok((packet_id, bytes))
    }

    /// Insert a record.  A stale record under the same id is replaced.
    pub fn record(&mut self, packet: OutgoingPacket<M>) {
        if self.entries.insert(packet.packet_id, packet).is_some() {
            log::warn!("[ledger] replaced an in-flight record");
        }
    }

    /// Peer acknowledged `packet_id`.  Returns the delivered record, or
    /// `None` for an id that is not in flight.
    pub fn on_ok(&mut self, packet_id: u8) -> Option<OutgoingPacket<M>> {
        self.entries.remove(&packet_id)
    }

    /// Peer reported `packet_id` as corrupt.
    pub fn on_corrupt(&mut self, packet_id: u8) -> CorruptVerdict {
        match self.entries.get_mut(&packet_id) {
            None => CorruptVerdict::Unknown,
            Some(entry) if entry.remote_corrupted => {
                self.entries.remove(&packet_id);
                CorruptVerdict::Abandon
            }
            Some(entry) => {
                entry.remote_corrupted = true;
                CorruptVerdict::Resend(entry.frame.clone())
            }
        }
    }

    pub fn contains(&self, packet_id: u8) -> bool {
        self.entries.contains_key(&packet_id)
    }

    pub fn get(&self, packet_id: u8) -> Option<&OutgoingPacket<M>> {
        self.entries.get(&packet_id)
    }

    /// Number of unacknowledged packets.
    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every record, e.g. when the connection closes.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admit(ledger: &mut Ledger<&'static str>, cmd: &'static str) -> u8 {
        ledger.admit(cmd, vec![0x01, 0x02]).unwrap().0
    }

    #[test]
    fn ids_increase_and_wrap() {
        let mut ledger: Ledger<()> = Ledger::new();
        for expected in 0..=255u8 {
            assert_eq!(ledger.allocate_id().unwrap(), expected);
        }
        assert_eq!(ledger.allocate_id().unwrap(), 0);
    }

    #[test]
    fn ok_removes_record_once() {
        let mut ledger = Ledger::new();
        let id = admit(&mut ledger, "a");
        assert!(ledger.contains(id));
        let delivered = ledger.on_ok(id).unwrap();
        assert_eq!(delivered.command, "a");
        assert!(ledger.on_ok(id).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn corrupt_resends_identical_frame_then_abandons() {
        let mut ledger = Ledger::new();
        let (id, bytes) = ledger.admit("a", vec![0x01, 9, 9]).unwrap();
        assert_eq!(ledger.on_corrupt(id), CorruptVerdict::Resend(bytes));
        assert!(ledger.get(id).unwrap().remote_corrupted);
        assert_eq!(ledger.on_corrupt(id), CorruptVerdict::Abandon);
        assert!(!ledger.contains(id));
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut ledger: Ledger<()> = Ledger::new();
        assert!(ledger.on_ok(17).is_none());
        assert_eq!(ledger.on_corrupt(17), CorruptVerdict::Unknown);
    }

    #[test]
    fn wraparound_skips_unacknowledged_ids() {
        let mut ledger = Ledger::new();
        let first = admit(&mut ledger, "stuck");
        for _ in 0..255 {
            let id = admit(&mut ledger, "x");
            ledger.on_ok(id);
        }
        // Id 0 is still in flight, so the counter must step over it.
        let next = admit(&mut ledger, "fresh");
        assert_ne!(next, first);
        assert_eq!(ledger.get(first).unwrap().command, "stuck");
    }

    #[test]
    fn full_ledger_refuses_new_packets() {
        let mut ledger = Ledger::new();
        for _ in 0..256 {
            admit(&mut ledger, "x");
        }
        assert_eq!(ledger.in_flight(), 256);
        assert!(matches!(
            ledger.admit("overflow", vec![0x01]),
            Err(LinkError::LedgerFull)
        ));
        ledger.on_ok(200);
        assert_eq!(admit(&mut ledger, "y"), 200);
    }

    #[test]
    fn failed_framing_records_nothing() {
        let mut ledger = Ledger::new();
        let huge = vec![0x01; crate::packet::MAX_PAYLOAD_LEN + 1];
        assert!(matches!(ledger.admit("big", huge), Err(LinkError::Frame(_))));
        assert!(ledger.is_empty());
    }
}
