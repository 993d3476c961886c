//! Game notifications.
//!
//! Listeners are kept in one ordered list per [`EventKind`] and are called
//! synchronously, in registration order, from inside the mutating call that
//! produced the event.

use crate::game::{AbortReason, Phase, Slot};

/// Listener categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Changed,
    NotesChanged,
    PhaseChanged,
    Finished,
    Aborted,
}

impl EventKind {
    const ALL: [EventKind; 5] = [
        EventKind::Changed,
        EventKind::NotesChanged,
        EventKind::PhaseChanged,
        EventKind::Finished,
        EventKind::Aborted,
    ];

    fn index(self) -> usize {
        match self {
            EventKind::Changed => 0,
            EventKind::NotesChanged => 1,
            EventKind::PhaseChanged => 2,
            EventKind::Finished => 3,
            EventKind::Aborted => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// A cell or a score changed.  `cell` is `None` for board-wide changes.
    Changed {
        cell: Option<usize>,
        scores: [i32; 2],
    },
    NotesChanged {
        slot: Slot,
        cell: usize,
        mask: u16,
    },
    PhaseChanged(Phase),
    /// Every open cell is owned.
    Finished { scores: [i32; 2] },
    Aborted {
        by: Option<Slot>,
        reason: AbortReason,
    },
}

impl GameEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GameEvent::Changed { .. } => EventKind::Changed,
            GameEvent::NotesChanged { .. } => EventKind::NotesChanged,
            GameEvent::PhaseChanged(_) => EventKind::PhaseChanged,
            GameEvent::Finished { .. } => EventKind::Finished,
            GameEvent::Aborted { .. } => EventKind::Aborted,
        }
    }
}

/// Handle returned by [`Listeners::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&GameEvent) + Send>;

#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    lists: [Vec<(ListenerId, Listener)>; 5],
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: Vec<_> = EventKind::ALL
            .iter()
            .map(|k| (*k, self.lists[k.index()].len()))
            .collect();
        f.debug_struct("Listeners").field("counts", &counts).finish()
    }
}

impl Listeners {
    pub fn subscribe<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&GameEvent) + Send + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.lists[kind.index()].push((id, Box::new(listener)));
        id
    }

    /// Remove a listener.  Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        for list in &mut self.lists {
            if let Some(pos) = list.iter().position(|(lid, _)| *lid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn notify(&mut self, event: &GameEvent) {
        for (_, listener) in &mut self.lists[event.kind().index()] {
            listener(event);
        }
    }
}
