//! Wire-format definitions for link frames.
//!
//! Every message exchanged between the two peers is a [`Frame`].  This module
//! is responsible for:
//! - Defining the on-wire binary layout (magic, integrity field, id, length).
//! - Serialising a [`Frame`] into a byte buffer ready for transmission.
//! - Validating a received header/payload pair and classifying it as a
//!   control message or an application command ([`Inbound`]).
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0       1       2       3       4       5       6       7       8       9
//! +-------+-------+-------+-------+-------+-------+-------+-------+-------+-------+
//! |  'S'  |  'W'  |  tag  |   reserved    |   checksum    |  id   |  payload len  |
//! +-------+-------+-------+-------+-------+-------+-------+-------+-------+-------+
//! |                        payload ...  (first byte = discriminator)              |
//! +-------+-------+-------+-------+-------+-------+-------+-------+-------+-------+
//! ```
//!
//! Bytes 2..7 form the integrity field:
//!
//! | byte | meaning                                                       |
//! |------|---------------------------------------------------------------|
//! | 2    | integrity tag, see [`integrity`]                              |
//! | 3-4  | reserved, always zero                                         |
//! | 5-6  | RFC 1071 checksum over the payload (zero in control frames)   |
//!
//! Control frames ([`control`]) travel with an all-zero integrity field.
//! Command frames must carry [`integrity::INTERNET`].

use thiserror::Error;

/// Frame magic, the ASCII bytes `"SW"`.
pub const MAGIC: [u8; 2] = *b"SW";

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 10;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

// Byte offsets of each field within the serialised header.
const OFF_MAGIC: usize = 0;
const OFF_TAG: usize = 2;
const OFF_RESERVED: usize = 3;
const OFF_CHECKSUM: usize = 5;
const OFF_ID: usize = 7;
const OFF_PAYLOAD_LEN: usize = 8;

/// Discriminators (first payload byte) handled by the link itself.
pub mod control {
    /// Positive acknowledgement of the frame with the same id.
    pub const OK: u8 = 0x1A;
    /// The frame with the same id arrived damaged; please resend it.
    pub const CORRUPT: u8 = 0xE1;
    /// Clock sync request, followed by an 8-byte big-endian timestamp.
    pub const TIME_SYNC: u8 = 0x45;
    /// Reply to [`TIME_SYNC`].
    pub const TIME_SYNC_PONG: u8 = 0xF0;

    /// `true` if `discriminator` belongs to the link and may not start a
    /// command payload.
    pub fn is_reserved(discriminator: u8) -> bool {
        matches!(discriminator, OK | CORRUPT | TIME_SYNC | TIME_SYNC_PONG)
    }
}

/// Values of the integrity tag (header byte 2).
pub mod integrity {
    /// No checksum; only valid for control frames.
    pub const NONE: u8 = 0;
    /// RFC 1071 internet checksum over the payload in bytes 5-6.
    pub const INTERNET: u8 = 1;
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One framed message: id + payload, optionally protected by a checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Packet identifier, wraps modulo 256.
    pub packet_id: u8,
    /// `Some` for command frames, `None` for control frames.
    pub checksum: Option<u16>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A checksummed command frame.
    pub fn command(packet_id: u8, payload: Vec<u8>) -> Self {
        let checksum = Some(internet_checksum(&payload));
        Self {
            packet_id,
            checksum,
            payload,
        }
    }

    /// Acknowledge the frame `packet_id`.
    pub fn ok(packet_id: u8) -> Self {
        Self::control(packet_id, vec![control::OK])
    }

    /// Ask the peer to resend frame `packet_id`.
    pub fn corrupt(packet_id: u8) -> Self {
        Self::control(packet_id, vec![control::CORRUPT])
    }

    /// Clock sync request carrying the sender's corrected timestamp.
    pub fn time_sync(timestamp: i64) -> Self {
        let mut payload = Vec::with_capacity(9);
        payload.push(control::TIME_SYNC);
        payload.extend_from_slice(&timestamp.to_be_bytes());
        Self::control(0, payload)
    }

    /// Clock sync reply.  Two bytes on the wire, the second one padding.
    pub fn time_sync_pong() -> Self {
        Self::control(0, vec![control::TIME_SYNC_PONG, 0x00])
    }

    fn control(packet_id: u8, payload: Vec<u8>) -> Self {
        Self {
            packet_id,
            checksum: None,
            payload,
        }
    }

    /// Serialise this frame into a newly allocated byte vector.
    ///
    /// The length field is computed from the payload.  A command frame's
    /// stored checksum is written as-is, so a frame built by
    /// [`Frame::command`] and later re-encoded is byte-identical.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLong(payload_len));
        }
        let mut buf = vec![0u8; HEADER_LEN + payload_len];

        buf[OFF_MAGIC..OFF_MAGIC + 2].copy_from_slice(&MAGIC);
        if let Some(csum) = self.checksum {
            buf[OFF_TAG] = integrity::INTERNET;
            buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
        }
        buf[OFF_ID] = self.packet_id;
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(payload_len as u16).to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        Ok(buf)
    }

    /// Validate a received header and its payload.
    ///
    /// Returns [`Err`] if:
    /// - `header` is not exactly [`HEADER_LEN`] bytes,
    /// - the magic is missing,
    /// - the length field disagrees with `payload.len()`,
    /// - the payload is empty,
    /// - the integrity field is inconsistent, or the checksum does not verify,
    /// - a checksummed frame starts with a link discriminator.
    pub fn decode(header: &[u8], payload: &[u8]) -> Result<Self, FrameError> {
        if header.len() != HEADER_LEN {
            return Err(FrameError::HeaderTooShort);
        }
        if header[OFF_MAGIC..OFF_MAGIC + 2] != MAGIC {
            return Err(FrameError::BadMagic);
        }
        let declared = declared_len(header);
        if declared != payload.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }
        if payload.is_empty() {
            return Err(FrameError::EmptyPayload);
        }
        if header[OFF_RESERVED..OFF_RESERVED + 2] != [0, 0] {
            return Err(FrameError::BadIntegrityField);
        }

        let stored = u16::from_be_bytes([header[OFF_CHECKSUM], header[OFF_CHECKSUM + 1]]);
        let checksum = match header[OFF_TAG] {
            integrity::NONE => {
                if stored != 0 || !control::is_reserved(payload[0]) {
                    return Err(FrameError::BadIntegrityField);
                }
                None
            }
            integrity::INTERNET => {
                if internet_checksum(payload) != stored {
                    return Err(FrameError::ChecksumFailed);
                }
                if control::is_reserved(payload[0]) {
                    return Err(FrameError::ReservedDiscriminator(payload[0]));
                }
                Some(stored)
            }
            _ => return Err(FrameError::BadIntegrityField),
        };

        Ok(Frame {
            packet_id: header[OFF_ID],
            checksum,
            payload: payload.to_vec(),
        })
    }
}

/// Payload length declared by a raw header (bytes 8-9).
///
/// The reader needs this before the header has been validated.
pub fn declared_len(header: &[u8]) -> usize {
    u16::from_be_bytes([header[OFF_PAYLOAD_LEN], header[OFF_PAYLOAD_LEN + 1]]) as usize
}

/// Packet id of a raw header (byte 7), available even when validation fails.
pub fn raw_packet_id(header: &[u8]) -> u8 {
    header[OFF_ID]
}

// ---------------------------------------------------------------------------
// Inbound classification
// ---------------------------------------------------------------------------

/// What a received header/payload pair means to the delivery engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Peer acknowledged our frame.
    Ack(u8),
    /// Peer received our frame damaged.
    CorruptNotice(u8),
    /// Clock sync request with the peer's timestamp.
    TimeSync(i64),
    TimeSyncPong,
    /// Valid application command.
    Command { packet_id: u8, payload: Vec<u8> },
    /// Validation failed; the peer should resend `packet_id`.
    Corrupt { packet_id: u8, error: FrameError },
    /// A well-formed control frame with an unusable body.
    Ignored { packet_id: u8, discriminator: u8 },
}

impl Inbound {
    /// Decode and classify one received frame.  Never fails: framing errors
    /// become [`Inbound::Corrupt`].
    pub fn parse(header: &[u8], payload: &[u8]) -> Self {
        let frame = match Frame::decode(header, payload) {
            Ok(frame) => frame,
            Err(error) => {
                let packet_id = if header.len() > OFF_ID { header[OFF_ID] } else { 0 };
                return Inbound::Corrupt { packet_id, error };
            }
        };

        let id = frame.packet_id;
        if frame.checksum.is_some() {
            return Inbound::Command {
                packet_id: id,
                payload: frame.payload,
            };
        }

        let body = &frame.payload[1..];
        match frame.payload[0] {
            control::OK if body.is_empty() => Inbound::Ack(id),
            control::CORRUPT if body.is_empty() => Inbound::CorruptNotice(id),
            control::TIME_SYNC if body.len() == 8 => {
                let mut ts = [0u8; 8];
                ts.copy_from_slice(body);
                Inbound::TimeSync(i64::from_be_bytes(ts))
            }
            control::TIME_SYNC_PONG if body.len() <= 1 => Inbound::TimeSyncPong,
            discriminator => Inbound::Ignored {
                packet_id: id,
                discriminator,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can arise when building or validating a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("header shorter than {HEADER_LEN} bytes")]
    HeaderTooShort,
    #[error("frame does not start with the \"SW\" magic")]
    BadMagic,
    #[error("payload length field says {declared} bytes, {actual} received")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("frame carries no payload")]
    EmptyPayload,
    #[error("payload of {0} bytes does not fit the length field")]
    PayloadTooLong(usize),
    #[error("integrity field is inconsistent with the payload")]
    BadIntegrityField,
    #[error("checksum verification failed")]
    ChecksumFailed,
    #[error("command payload starts with link discriminator {0:#04x}")]
    ReservedDiscriminator(u8),
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    // Odd trailing byte, padded with a zero byte on the right.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(bytes: &[u8]) -> (&[u8], &[u8]) {
        bytes.split_at(HEADER_LEN)
    }

    #[test]
    fn command_roundtrip() {
        let frame = Frame::command(42, vec![0x01, 5, 7, 0, 0, 0, 0, 0, 0, 0, 100]);
        let bytes = frame.encode().unwrap();
        let (h, p) = split(&bytes);
        assert_eq!(Frame::decode(h, p).unwrap(), frame);
    }

    #[test]
    fn header_layout() {
        let bytes = Frame::command(0xAB, b"\x01hello".to_vec()).encode().unwrap();
        assert_eq!(&bytes[0..2], b"SW");
        assert_eq!(bytes[OFF_TAG], integrity::INTERNET);
        assert_eq!(&bytes[OFF_RESERVED..OFF_RESERVED + 2], &[0, 0]);
        assert_eq!(bytes[OFF_ID], 0xAB);
        assert_eq!(&bytes[8..10], &[0x00, 0x06]);
        assert_eq!(bytes.len(), HEADER_LEN + 6);
    }

    #[test]
    fn control_frames_have_zero_integrity_field() {
        for frame in [Frame::ok(3), Frame::corrupt(3), Frame::time_sync(-1), Frame::time_sync_pong()] {
            let bytes = frame.encode().unwrap();
            assert_eq!(&bytes[2..7], &[0, 0, 0, 0, 0]);
        }
    }

    #[test]
    fn time_sync_is_nine_bytes_big_endian() {
        let bytes = Frame::time_sync(0x0102_0304_0506_0708).encode().unwrap();
        assert_eq!(declared_len(&bytes[..HEADER_LEN]), 9);
        assert_eq!(
            &bytes[HEADER_LEN..],
            &[control::TIME_SYNC, 1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn classify_control_frames() {
        let cases = [
            (Frame::ok(9), Inbound::Ack(9)),
            (Frame::corrupt(200), Inbound::CorruptNotice(200)),
            (Frame::time_sync(-5000), Inbound::TimeSync(-5000)),
            (Frame::time_sync_pong(), Inbound::TimeSyncPong),
        ];
        for (frame, expected) in cases {
            let bytes = frame.encode().unwrap();
            let (h, p) = split(&bytes);
            assert_eq!(Inbound::parse(h, p), expected);
        }
    }

    #[test]
    fn single_byte_pong_is_accepted() {
        let bytes = Frame::control(0, vec![control::TIME_SYNC_PONG]).encode().unwrap();
        let (h, p) = split(&bytes);
        assert_eq!(Inbound::parse(h, p), Inbound::TimeSyncPong);
    }

    #[test]
    fn truncated_time_sync_is_ignored() {
        let bytes = Frame::control(0, vec![control::TIME_SYNC, 1, 2]).encode().unwrap();
        let (h, p) = split(&bytes);
        assert_eq!(
            Inbound::parse(h, p),
            Inbound::Ignored {
                packet_id: 0,
                discriminator: control::TIME_SYNC
            }
        );
    }

    #[test]
    fn flipped_payload_byte_is_corrupt() {
        let mut bytes = Frame::command(7, b"\x01abc".to_vec()).encode().unwrap();
        bytes[HEADER_LEN + 2] ^= 0x40;
        let (h, p) = split(&bytes);
        assert_eq!(
            Inbound::parse(h, p),
            Inbound::Corrupt {
                packet_id: 7,
                error: FrameError::ChecksumFailed
            }
        );
    }

    #[test]
    fn bad_magic() {
        let mut bytes = Frame::ok(1).encode().unwrap();
        bytes[1] = b'X';
        let (h, p) = split(&bytes);
        assert_eq!(Frame::decode(h, p), Err(FrameError::BadMagic));
    }

    #[test]
    fn length_mismatch() {
        let bytes = Frame::command(1, b"\x01data".to_vec()).encode().unwrap();
        let (h, p) = split(&bytes);
        assert_eq!(
            Frame::decode(h, &p[..p.len() - 1]),
            Err(FrameError::LengthMismatch {
                declared: 5,
                actual: 4
            })
        );
    }

    #[test]
    fn short_header() {
        assert_eq!(Frame::decode(&[b'S', b'W'], &[]), Err(FrameError::HeaderTooShort));
    }

    #[test]
    fn unprotected_command_is_rejected() {
        let bytes = Frame::control(4, vec![0x01, 2, 3]).encode().unwrap();
        let (h, p) = split(&bytes);
        assert_eq!(Frame::decode(h, p), Err(FrameError::BadIntegrityField));
    }

    #[test]
    fn checksummed_control_discriminator_is_rejected() {
        let bytes = Frame::command(4, vec![control::OK]).encode().unwrap();
        let (h, p) = split(&bytes);
        assert_eq!(
            Frame::decode(h, p),
            Err(FrameError::ReservedDiscriminator(control::OK))
        );
    }

    #[test]
    fn nonzero_reserved_bytes_are_rejected() {
        let mut bytes = Frame::command(4, vec![0x02]).encode().unwrap();
        bytes[OFF_RESERVED] = 1;
        let (h, p) = split(&bytes);
        assert_eq!(Frame::decode(h, p), Err(FrameError::BadIntegrityField));
    }

    #[test]
    fn oversized_payload_cannot_be_encoded() {
        let frame = Frame::command(0, vec![0x01; MAX_PAYLOAD_LEN + 1]);
        assert_eq!(frame.encode(), Err(FrameError::PayloadTooLong(MAX_PAYLOAD_LEN + 1)));
    }

    #[test]
    fn checksum_known_value() {
        // RFC 1071 example words.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn checksum_odd_length_pads_right() {
        assert_eq!(internet_checksum(&[0x12]), !0x1200);
    }
}
