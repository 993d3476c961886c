//! Error type shared by the delivery engine and its transports.

use thiserror::Error;

use crate::packet::FrameError;
use crate::state::ConnectionState;

/// Errors surfaced by [`crate::connection::Connection`] and friends.
///
/// Framing errors on the receive path never reach the caller; they are
/// answered with a corrupt notice.  [`LinkError::Frame`] only appears when
/// an outgoing command cannot be framed.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot frame command: {0}")]
    Frame(#[from] FrameError),

    /// All 256 packet ids are waiting for an acknowledgement.
    #[error("all packet ids are in flight")]
    LedgerFull,

    #[error("command encodes to an empty payload")]
    EmptyCommand,

    #[error("command discriminator {0:#04x} is reserved by the link")]
    ReservedDiscriminator(u8),

    #[error("operation requires a connected link, state is {0}")]
    NotConnected(ConnectionState),

    /// The connection was closed while the operation was pending.
    #[error("connection closed")]
    Closed,

    /// The peer's host is on the ban list.
    #[error("peer {0} is banned")]
    Banned(String),
}
