//! Notifications a connection publishes to the application.

use tokio::sync::mpsc;

use crate::state::ConnectionState;

/// Something the application may want to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The endpoint moved to a new state.
    StateChanged(ConnectionState),
    /// A command is waiting in the inbound queue.
    NewData,
    /// The peer acknowledged one of our commands; see `poll_delivered`.
    PacketDelivered,
}

pub type EventSender = mpsc::UnboundedSender<LinkEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// Create a fresh event channel.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Publish `event`, ignoring a receiver that has gone away.
pub(crate) fn emit(events: &EventSender, event: LinkEvent) {
    if events.send(event).is_err() {
        log::trace!("[link] event {event:?} dropped, no listener");
    }
}
