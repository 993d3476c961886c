//! Tunable link parameters.

use std::time::Duration;

/// Interval between clock sync requests sent by the server role.
pub const DEFAULT_TIME_SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Adjustable link parameters.
///
/// `Default` yields the protocol constants; override single fields with the
/// `with_*` builders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// How often the server role sends a clock sync request.  The first one
    /// goes out one interval after the connection is established.
    pub time_sync_interval: Duration,
    /// Upper bound on a single frame read.  `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Commands encoding to more bytes than this are rejected before framing.
    pub max_payload_len: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            time_sync_interval: DEFAULT_TIME_SYNC_INTERVAL,
            read_timeout: None,
            max_payload_len: crate::packet::MAX_PAYLOAD_LEN,
        }
    }
}

impl LinkConfig {
    pub fn with_time_sync_interval(mut self, interval: Duration) -> Self {
        self.time_sync_interval = interval;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len.min(crate::packet::MAX_PAYLOAD_LEN);
        self
    }
}
