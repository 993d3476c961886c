//! The shared match state.
//!
//! Both peers hold one [`MultiplayerGame`] and apply the same commands to
//! it, possibly in a different order.  Every rule below is written so that
//! the final board and scores do not depend on that order.
//!
//! # Setting a value
//!
//! | situation                                   | outcome          | score            |
//! |---------------------------------------------|------------------|------------------|
//! | peer disconnected                           | `Ignored`        | none             |
//! | value differs from the solution             | `Penalised`      | actor -2         |
//! | correct, cell empty or exposed              | `Applied`        | actor +1         |
//! | correct, same owner and timestamp           | `AlreadyApplied` | none             |
//! | correct, earlier (timestamp, slot) than now | `Transferred`    | old -1, actor +1 |
//! | correct, later claim                        | `Superseded`     | none             |
//!
//! Ties on the timestamp go to [`Slot::Host`].
//!
//! Claims keep resolving after the board is full or a player gave up: a
//! claim that crossed the final move on the wire still has to land the same
//! way on both boards.  A finished match re-announces
//! [`GameEvent::Finished`] whenever such a claim changes the scores.
//!
//! # Giving up
//!
//! A concession may also cross the final move, or the other player's
//! concession.  It ends a finished match, and when both players gave up the
//! guest's concession stands.

use std::fmt;
use std::time::Duration;

use crate::error::GameError;
use crate::events::{EventKind, GameEvent, ListenerId, Listeners};
use crate::puzzle::{BoardSize, Puzzle};

/// Length of the countdown before play starts or resumes.
pub const COUNTDOWN: Duration = Duration::from_millis(3999);
/// Interval between countdown ticks.
pub const COUNTDOWN_TICK: Duration = Duration::from_millis(1000);

pub const CORRECT_VALUE_POINTS: i32 = 1;
pub const WRONG_VALUE_PENALTY: i32 = 2;

// ---------------------------------------------------------------------------
// Players and cells
// ---------------------------------------------------------------------------

/// A player position.  The same on both peers: the hosting peer is always
/// `Host`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    Host,
    Guest,
}

impl Slot {
    pub const BOTH: [Slot; 2] = [Slot::Host, Slot::Guest];

    pub fn other(self) -> Slot {
        match self {
            Slot::Host => Slot::Guest,
            Slot::Guest => Slot::Host,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Slot::Host => 0,
            Slot::Guest => 1,
        }
    }

    pub fn code(self) -> u8 {
        self.index() as u8
    }

    pub fn from_code(code: u8) -> Option<Slot> {
        match code {
            0 => Some(Slot::Host),
            1 => Some(Slot::Guest),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Slot::Host => "host",
            Slot::Guest => "guest",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Given(u8),
    Empty,
    /// Correctly filled by `owner`; `timestamp` is the corrected clock of
    /// the winning claim.
    Owned { value: u8, owner: Slot, timestamp: i64 },
    /// Revealed to `owner` when the other player gave up.  Scores nothing.
    Exposed { value: u8, owner: Slot },
}

impl Cell {
    pub fn value(self) -> Option<u8> {
        match self {
            Cell::Given(v) | Cell::Owned { value: v, .. } | Cell::Exposed { value: v, .. } => {
                Some(v)
            }
            Cell::Empty => None,
        }
    }

    pub fn owner(self) -> Option<Slot> {
        match self {
            Cell::Owned { owner, .. } | Cell::Exposed { owner, .. } => Some(owner),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Phase and outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    GaveUp,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Countdown,
    Active,
    Paused,
    Finished,
    Aborted {
        /// `None` when the link went down.
        by: Option<Slot>,
        reason: AbortReason,
    },
}

impl Phase {
    /// No further moves are accepted.
    pub fn is_over(self) -> bool {
        matches!(self, Phase::Finished | Phase::Aborted { .. })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Countdown => f.write_str("counting down"),
            Phase::Active => f.write_str("active"),
            Phase::Paused => f.write_str("paused"),
            Phase::Finished => f.write_str("finished"),
            Phase::Aborted {
                reason: AbortReason::Disconnected,
                ..
            } => f.write_str("aborted (peer left)"),
            Phase::Aborted {
                by: Some(slot),
                reason: AbortReason::GaveUp,
            } => write!(f, "aborted ({slot} gave up)"),
            Phase::Aborted { by: None, .. } => f.write_str("aborted"),
        }
    }
}

/// Result of [`MultiplayerGame::set_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Applied,
    /// The claim beat an earlier one; the point moved from `from`.
    Transferred { from: Slot },
    AlreadyApplied,
    /// Another claim on the cell wins.  The board was not changed.
    Superseded,
    Penalised,
    Ignored,
}

impl SetOutcome {
    /// `false` only when a competing claim won the cell.
    pub fn was_executed(self) -> bool {
        self != SetOutcome::Superseded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Defeat,
    Draw,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Win => "you won",
            Outcome::Defeat => "you lost",
            Outcome::Draw => "draw",
        })
    }
}

// ---------------------------------------------------------------------------
// MultiplayerGame
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MultiplayerGame {
    puzzle: Puzzle,
    cells: Vec<Cell>,
    /// Candidate bitmasks per slot; bit `v - 1` stands for symbol `v`.
    notes: [Vec<u16>; 2],
    scores: [i32; 2],
    paused: [bool; 2],
    phase: Phase,
    listeners: Listeners,
}

impl MultiplayerGame {
    /// A fresh match, waiting in the countdown.
    pub fn new(puzzle: Puzzle) -> Self {
        let cells = puzzle
            .givens()
            .iter()
            .map(|&g| if g == 0 { Cell::Empty } else { Cell::Given(g) })
            .collect();
        let n = puzzle.size().cells();
        Self {
            puzzle,
            cells,
            notes: [vec![0; n], vec![0; n]],
            scores: [0, 0],
            paused: [false, false],
            phase: Phase::Countdown,
            listeners: Listeners::default(),
        }
    }

    pub fn puzzle(&self) -> &Puzzle {
        &self.puzzle
    }

    pub fn size(&self) -> BoardSize {
        self.puzzle.size()
    }

    pub fn cell(&self, cell: usize) -> Result<Cell, GameError> {
        self.check_cell(cell).map(|i| self.cells[i])
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn score(&self, slot: Slot) -> i32 {
        self.scores[slot.index()]
    }

    pub fn scores(&self) -> [i32; 2] {
        self.scores
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_paused_by(&self, slot: Slot) -> bool {
        self.paused[slot.index()]
    }

    /// Every open cell has an owner.
    pub fn is_solved(&self) -> bool {
        self.cells.iter().all(|c| !matches!(c, Cell::Empty))
    }

    pub fn notes(&self, slot: Slot, cell: usize) -> Result<u16, GameError> {
        self.check_cell(cell).map(|i| self.notes[slot.index()][i])
    }

    pub fn has_note(&self, slot: Slot, cell: usize, value: u8) -> Result<bool, GameError> {
        let bit = self.note_bit(value)?;
        Ok(self.notes(slot, cell)? & bit != 0)
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&GameEvent) + Send + 'static,
    {
        self.listeners.subscribe(kind, listener)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    // -- values -------------------------------------------------------------

    /// Claim `cell` with `value` for `slot` at corrected time `timestamp`.
    pub fn set_value(
        &mut self,
        slot: Slot,
        cell: usize,
        value: u8,
        timestamp: i64,
    ) -> Result<SetOutcome, GameError> {
        let i = self.check_cell(cell)?;
        self.check_value(value)?;
        if matches!(
            self.phase,
            Phase::Aborted {
                reason: AbortReason::Disconnected,
                ..
            }
        ) {
            return Ok(SetOutcome::Ignored);
        }
        let was_finished = self.phase == Phase::Finished;
        let current = self.cells[i];
        if matches!(current, Cell::Given(_)) {
            return Err(GameError::GivenCell(cell));
        }

        let outcome = if value != self.puzzle.solution()[i] {
            self.scores[slot.index()] -= WRONG_VALUE_PENALTY;
            SetOutcome::Penalised
        } else {
            match current {
                Cell::Empty | Cell::Exposed { .. } => {
                    self.scores[slot.index()] += CORRECT_VALUE_POINTS;
                    SetOutcome::Applied
                }
                Cell::Owned {
                    owner,
                    timestamp: held,
                    ..
                } => {
                    if owner == slot && held == timestamp {
                        SetOutcome::AlreadyApplied
                    } else if (timestamp, slot) < (held, owner) {
                        self.scores[owner.index()] -= CORRECT_VALUE_POINTS;
                        self.scores[slot.index()] += CORRECT_VALUE_POINTS;
                        SetOutcome::Transferred { from: owner }
                    } else {
                        SetOutcome::Superseded
                    }
                }
                Cell::Given(_) => SetOutcome::Ignored,
            }
        };

        if matches!(outcome, SetOutcome::Applied | SetOutcome::Transferred { .. }) {
            self.cells[i] = Cell::Owned {
                value,
                owner: slot,
                timestamp,
            };
        }
        log::debug!("[game] {slot} set cell {cell} to {value} at {timestamp}: {outcome:?}");

        let changed = matches!(
            outcome,
            SetOutcome::Applied | SetOutcome::Transferred { .. } | SetOutcome::Penalised
        );
        if changed {
            self.emit(GameEvent::Changed {
                cell: Some(cell),
                scores: self.scores,
            });
        }
        if (was_finished && changed) || (self.is_solved() && !self.phase.is_over()) {
            self.set_phase(Phase::Finished);
            self.emit(GameEvent::Finished {
                scores: self.scores,
            });
        }
        Ok(outcome)
    }

    // -- notes --------------------------------------------------------------

    /// Returns `false` if the note was already there.
    pub fn add_note(&mut self, slot: Slot, cell: usize, value: u8) -> Result<bool, GameError> {
        let bit = self.note_bit(value)?;
        let before = self.notes(slot, cell)?;
        self.write_notes(slot, cell, before | bit)?;
        Ok(before & bit == 0)
    }

    /// Returns `false` if there was no such note.
    pub fn remove_note(&mut self, slot: Slot, cell: usize, value: u8) -> Result<bool, GameError> {
        let bit = self.note_bit(value)?;
        let before = self.notes(slot, cell)?;
        self.write_notes(slot, cell, before & !bit)?;
        Ok(before & bit != 0)
    }

    /// Flip every candidate of `cell`.  Returns the new mask.
    pub fn invert_notes(&mut self, slot: Slot, cell: usize) -> Result<u16, GameError> {
        let inverted = self.notes(slot, cell)? ^ self.full_mask();
        self.write_notes(slot, cell, inverted)?;
        Ok(inverted)
    }

    /// Remove every candidate of `cell`.  Returns the previous mask.
    pub fn clear_notes(&mut self, slot: Slot, cell: usize) -> Result<u16, GameError> {
        self.set_notes(slot, cell, 0)
    }

    /// Replace the candidates of `cell`.  Returns the previous mask.
    pub fn set_notes(&mut self, slot: Slot, cell: usize, mask: u16) -> Result<u16, GameError> {
        if mask & !self.full_mask() != 0 {
            let highest = 16 - mask.leading_zeros();
            return Err(GameError::ValueOutOfRange {
                value: highest as u8,
                size: self.size().side(),
            });
        }
        let before = self.notes(slot, cell)?;
        self.write_notes(slot, cell, mask)?;
        Ok(before)
    }

    fn write_notes(&mut self, slot: Slot, cell: usize, mask: u16) -> Result<(), GameError> {
        let i = self.check_cell(cell)?;
        if self.puzzle.is_given(i) {
            return Err(GameError::GivenCell(cell));
        }
        let entry = &mut self.notes[slot.index()][i];
        if *entry != mask {
            *entry = mask;
            self.emit(GameEvent::NotesChanged { slot, cell, mask });
        }
        Ok(())
    }

    // -- phase --------------------------------------------------------------

    /// Countdown elapsed: play starts.
    pub fn finish_countdown(&mut self) -> Result<(), GameError> {
        match self.phase {
            Phase::Countdown => {
                self.set_phase(Phase::Active);
                Ok(())
            }
            other => Err(GameError::WrongPhase("finishing the countdown", other)),
        }
    }

    /// `slot` pauses.  Returns `true` if the match was running or counting
    /// down and is now paused.
    pub fn pause(&mut self, slot: Slot) -> bool {
        if self.phase.is_over() {
            return false;
        }
        self.paused[slot.index()] = true;
        if matches!(self.phase, Phase::Countdown | Phase::Active) {
            self.set_phase(Phase::Paused);
            return true;
        }
        false
    }

    /// `slot` toggles its ready flag.  When nobody holds the match paused
    /// any more a new countdown starts.  Returns `true` on that transition.
    pub fn set_ready(&mut self, slot: Slot, ready: bool) -> bool {
        if !ready {
            self.pause(slot);
            return false;
        }
        if self.phase.is_over() {
            return false;
        }
        self.paused[slot.index()] = false;
        if self.phase == Phase::Paused && !self.paused.iter().any(|&p| p) {
            self.set_phase(Phase::Countdown);
            return true;
        }
        false
    }

    /// End the match early.  A player giving up hands every open cell to the
    /// opponent without points.  A give-up also ends a finished match, and
    /// settles crossing give-ups on the guest.  Returns `false` if nothing
    /// changed.
    pub fn abort(&mut self, by: Option<Slot>, reason: AbortReason) -> bool {
        match (self.phase, by, reason) {
            (
                Phase::Aborted {
                    by: Some(Slot::Host),
                    reason: AbortReason::GaveUp,
                },
                Some(Slot::Guest),
                AbortReason::GaveUp,
            ) => return self.concede_for_guest(),
            (Phase::Finished, Some(_), AbortReason::GaveUp) => {}
            (phase, ..) if phase.is_over() => return false,
            _ => {}
        }
        if reason == AbortReason::Disconnected {
            self.paused = [true, true];
        }
        if let (Some(quitter), AbortReason::GaveUp) = (by, reason) {
            let solution = self.puzzle.solution();
            let mut exposed = false;
            for (i, cell) in self.cells.iter_mut().enumerate() {
                if *cell == Cell::Empty {
                    *cell = Cell::Exposed {
                        value: solution[i],
                        owner: quitter.other(),
                    };
                    exposed = true;
                }
            }
            if exposed {
                self.emit(GameEvent::Changed {
                    cell: None,
                    scores: self.scores,
                });
            }
        }
        log::info!("[game] match aborted by {by:?}: {reason:?}");
        self.set_phase(Phase::Aborted { by, reason });
        self.emit(GameEvent::Aborted { by, reason });
        true
    }

    /// Both players gave up: hand the cells exposed to the guest over to the
    /// host and record the guest as the one who quit.
    fn concede_for_guest(&mut self) -> bool {
        for cell in self.cells.iter_mut() {
            if let Cell::Exposed { owner, .. } = cell {
                *owner = Slot::Host;
            }
        }
        self.emit(GameEvent::Changed {
            cell: None,
            scores: self.scores,
        });
        let (by, reason) = (Some(Slot::Guest), AbortReason::GaveUp);
        log::info!("[game] both players gave up; the guest's concession stands");
        self.set_phase(Phase::Aborted { by, reason });
        self.emit(GameEvent::Aborted { by, reason });
        true
    }

    /// Result from the point of view of `local`.  `None` while the match is
    /// running or after the link dropped.
    pub fn outcome(&self, local: Slot) -> Option<Outcome> {
        match self.phase {
            Phase::Aborted {
                by: Some(quitter),
                reason: AbortReason::GaveUp,
            } => Some(if quitter == local {
                Outcome::Defeat
            } else {
                Outcome::Win
            }),
            Phase::Finished => {
                let (mine, theirs) = (self.score(local), self.score(local.other()));
                Some(match mine.cmp(&theirs) {
                    std::cmp::Ordering::Greater => Outcome::Win,
                    std::cmp::Ordering::Less => Outcome::Defeat,
                    std::cmp::Ordering::Equal => Outcome::Draw,
                })
            }
            _ => None,
        }
    }

    // -- helpers ------------------------------------------------------------

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            log::debug!("[game] phase {} -> {}", self.phase, phase);
            self.phase = phase;
            self.emit(GameEvent::PhaseChanged(phase));
        }
    }

    fn emit(&mut self, event: GameEvent) {
        self.listeners.notify(&event);
    }

    fn check_cell(&self, cell: usize) -> Result<usize, GameError> {
        let cells = self.cells.len();
        if cell < cells {
            Ok(cell)
        } else {
            Err(GameError::CellOutOfRange { cell, cells })
        }
    }

    fn check_value(&self, value: u8) -> Result<(), GameError> {
        let size = self.size().side();
        if value == 0 || usize::from(value) > size {
            return Err(GameError::ValueOutOfRange { value, size });
        }
        Ok(())
    }

    fn note_bit(&self, value: u8) -> Result<u16, GameError> {
        self.check_value(value)?;
        Ok(1 << (value - 1))
    }

    fn full_mask(&self) -> u16 {
        ((1u32 << self.size().side()) - 1) as u16
    }
}
