//! Connection state machine types.
//!
//! Transitions live in [`crate::connection`] and [`crate::server`]; this
//! module only names the states.
//!
//! ```text
//!             connect()                 handshake ok
//!   NONE ───────────────▶ CONNECTING ─────────────────▶ CONNECTED
//!    ▲  ▲                     │ failure                    │
//!    │  └─────────────────────┘                            │ I/O error,
//!    │                                                     │ double corruption,
//!    │        accept loop        peer accepted             │ close()
//!    └──────── LISTENING ◀──────────────────────────────── ┘ (server re-listens)
//! ```

use std::fmt;

/// All possible states of a link endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection and not accepting peers.
    #[default]
    None,
    /// An outbound connect is in progress.
    Connecting,
    /// Reader and sender tasks are running.
    Connected,
    /// A server is waiting for a peer.
    Listening,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::None => "NONE",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Listening => "LISTENING",
        };
        f.write_str(name)
    }
}
