//! Commands exchanged between the two peers.
//!
//! Every command is one link payload.  The first byte is the discriminator;
//! fields follow in big-endian order:
//!
//! ```text
//! 0x01 SetCell      cell:u16 value:u8 timestamp:i64 creator:u8
//! 0x02 AddNote      cell:u16 value:u8
//! 0x03 RemoveNote   cell:u16 value:u8
//! 0x04 InvertNotes  cell:u16
//! 0x05 ClearNotes   cell:u16
//! 0x06 SetNotes     cell:u16 mask:u16
//! 0x10 GiveUp
//! 0x11 Pause
//! 0x12 Ready        ready:u8
//! 0x20 Settings     side:u8 difficulty:u8 new_game:u8
//! 0x21 Kick         mode:u8 (0 kick, 1 kick and ban)
//! 0x22 CreateGame   side:u8 givens:[u8; n*n] solution:[u8; n*n]
//! ```
//!
//! None of them collide with the link's control discriminators.  The outcome
//! of a `SetCell` is local bookkeeping and never travels.

use sudowars_link::{KickMode, Message};

use crate::error::{CommandError, GameError};
use crate::game::{AbortReason, MultiplayerGame, SetOutcome, Slot};
use crate::lobby::MatchSettings;
use crate::puzzle::{BoardSize, Difficulty, Puzzle};

pub const SET_CELL: u8 = 0x01;
pub const ADD_NOTE: u8 = 0x02;
pub const REMOVE_NOTE: u8 = 0x03;
pub const INVERT_NOTES: u8 = 0x04;
pub const CLEAR_NOTES: u8 = 0x05;
pub const SET_NOTES: u8 = 0x06;
pub const GIVE_UP: u8 = 0x10;
pub const PAUSE: u8 = 0x11;
pub const READY: u8 = 0x12;
pub const SETTINGS: u8 = 0x20;
pub const KICK: u8 = 0x21;
pub const CREATE_GAME: u8 = 0x22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetCell {
        cell: u16,
        value: u8,
        /// Corrected clock of the creating peer.
        timestamp: i64,
        creator: Slot,
        /// Filled in by [`Command::execute`].
        outcome: Option<SetOutcome>,
    },
    AddNote { cell: u16, value: u8 },
    RemoveNote { cell: u16, value: u8 },
    InvertNotes { cell: u16 },
    ClearNotes { cell: u16 },
    SetNotes { cell: u16, mask: u16 },
    GiveUp,
    Pause,
    Ready(bool),
    Settings(MatchSettings),
    Kick(KickMode),
    CreateGame(Puzzle),
}

impl Command {
    pub fn set_cell(cell: u16, value: u8, timestamp: i64, creator: Slot) -> Self {
        Command::SetCell {
            cell,
            value,
            timestamp,
            creator,
            outcome: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::SetCell { .. } => "SetCell",
            Command::AddNote { .. } => "AddNote",
            Command::RemoveNote { .. } => "RemoveNote",
            Command::InvertNotes { .. } => "InvertNotes",
            Command::ClearNotes { .. } => "ClearNotes",
            Command::SetNotes { .. } => "SetNotes",
            Command::GiveUp => "GiveUp",
            Command::Pause => "Pause",
            Command::Ready(_) => "Ready",
            Command::Settings(_) => "Settings",
            Command::Kick(_) => "Kick",
            Command::CreateGame(_) => "CreateGame",
        }
    }

    /// Note commands are private to the acting player and never sent.
    pub fn is_note(&self) -> bool {
        matches!(
            self,
            Command::AddNote { .. }
                | Command::RemoveNote { .. }
                | Command::InvertNotes { .. }
                | Command::ClearNotes { .. }
                | Command::SetNotes { .. }
        )
    }

    /// Commands that negotiate a match rather than change one.
    pub fn is_lobby(&self) -> bool {
        matches!(
            self,
            Command::Settings(_) | Command::Kick(_) | Command::CreateGame(_)
        )
    }

    /// `false` once a `SetCell` lost its cell to a competing claim.  Every
    /// other command counts as executed.
    pub fn was_executed(&self) -> bool {
        match self {
            Command::SetCell { outcome, .. } => outcome.map_or(true, SetOutcome::was_executed),
            _ => true,
        }
    }

    /// Apply to `game` on behalf of `acting`.  Returns whether the game
    /// changed in the way the command asked for.
    pub fn execute(&mut self, game: &mut MultiplayerGame, acting: Slot) -> Result<bool, GameError> {
        match self {
            Command::SetCell {
                cell,
                value,
                timestamp,
                creator,
                outcome,
            } => {
                let result = game.set_value(*creator, usize::from(*cell), *value, *timestamp)?;
                *outcome = Some(result);
                Ok(result.was_executed() && result != SetOutcome::Ignored)
            }
            Command::AddNote { cell, value } => game.add_note(acting, usize::from(*cell), *value),
            Command::RemoveNote { cell, value } => {
                game.remove_note(acting, usize::from(*cell), *value)
            }
            Command::InvertNotes { cell } => {
                game.invert_notes(acting, usize::from(*cell)).map(|_| true)
            }
            Command::ClearNotes { cell } => game
                .clear_notes(acting, usize::from(*cell))
                .map(|previous| previous != 0),
            Command::SetNotes { cell, mask } => game
                .set_notes(acting, usize::from(*cell), *mask)
                .map(|previous| previous != *mask),
            Command::GiveUp => Ok(game.abort(Some(acting), AbortReason::GaveUp)),
            Command::Pause => Ok(game.pause(acting)),
            Command::Ready(ready) => Ok(game.set_ready(acting, *ready)),
            Command::Settings(_) | Command::Kick(_) | Command::CreateGame(_) => {
                Err(GameError::NotAGameCommand(self.name()))
            }
        }
    }

    /// The command that undoes `self` for `slot` on the current `game`.
    /// Must be computed before `self` executes.  `None` for commands that
    /// cannot be taken back.
    pub fn inverted(&self, game: &MultiplayerGame, slot: Slot) -> Option<Command> {
        let notes = |cell: u16| game.notes(slot, usize::from(cell)).ok();
        match *self {
            Command::AddNote { cell, value } => Some(Command::RemoveNote { cell, value }),
            Command::RemoveNote { cell, value } => Some(Command::AddNote { cell, value }),
            Command::InvertNotes { cell } => Some(Command::InvertNotes { cell }),
            Command::ClearNotes { cell } | Command::SetNotes { cell, .. } => {
                notes(cell).map(|mask| Command::SetNotes { cell, mask })
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

fn expect_len(command: &'static str, payload: &[u8], expected: usize) -> Result<(), CommandError> {
    if payload.len() == expected {
        Ok(())
    } else {
        Err(CommandError::Length {
            command,
            expected,
            actual: payload.len(),
        })
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

impl Message for Command {
    type Error = CommandError;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Command::SetCell {
                cell,
                value,
                timestamp,
                creator,
                ..
            } => {
                out.push(SET_CELL);
                out.extend_from_slice(&cell.to_be_bytes());
                out.push(*value);
                out.extend_from_slice(&timestamp.to_be_bytes());
                out.push(creator.code());
            }
            Command::AddNote { cell, value } | Command::RemoveNote { cell, value } => {
                out.push(if matches!(self, Command::AddNote { .. }) {
                    ADD_NOTE
                } else {
                    REMOVE_NOTE
                });
                out.extend_from_slice(&cell.to_be_bytes());
                out.push(*value);
            }
            Command::InvertNotes { cell } => {
                out.push(INVERT_NOTES);
                out.extend_from_slice(&cell.to_be_bytes());
            }
            Command::ClearNotes { cell } => {
                out.push(CLEAR_NOTES);
                out.extend_from_slice(&cell.to_be_bytes());
            }
            Command::SetNotes { cell, mask } => {
                out.push(SET_NOTES);
                out.extend_from_slice(&cell.to_be_bytes());
                out.extend_from_slice(&mask.to_be_bytes());
            }
            Command::GiveUp => out.push(GIVE_UP),
            Command::Pause => out.push(PAUSE),
            Command::Ready(ready) => out.extend_from_slice(&[READY, u8::from(*ready)]),
            Command::Settings(settings) => out.extend_from_slice(&[
                SETTINGS,
                settings.size.side() as u8,
                settings.difficulty.code(),
                u8::from(settings.new_game),
            ]),
            Command::Kick(mode) => out.extend_from_slice(&[
                KICK,
                match mode {
                    KickMode::Kick => 0,
                    KickMode::KickBan => 1,
                },
            ]),
            Command::CreateGame(puzzle) => {
                out.push(CREATE_GAME);
                out.push(puzzle.size().side() as u8);
                out.extend_from_slice(puzzle.givens());
                out.extend_from_slice(puzzle.solution());
            }
        }
        out
    }

    fn decode(payload: &[u8]) -> Result<Self, CommandError> {
        let (&discriminator, _) = payload.split_first().ok_or(CommandError::Empty)?;
        let flag = |byte: u8, field: &'static str| match byte {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(CommandError::BadField(field)),
        };

        let command = match discriminator {
            SET_CELL => {
                expect_len("SetCell", payload, 13)?;
                let mut ts = [0u8; 8];
                ts.copy_from_slice(&payload[4..12]);
                Command::set_cell(
                    read_u16(payload, 1),
                    payload[3],
                    i64::from_be_bytes(ts),
                    Slot::from_code(payload[12]).ok_or(CommandError::BadField("creator"))?,
                )
            }
            ADD_NOTE | REMOVE_NOTE => {
                expect_len("note", payload, 4)?;
                let (cell, value) = (read_u16(payload, 1), payload[3]);
                if discriminator == ADD_NOTE {
                    Command::AddNote { cell, value }
                } else {
                    Command::RemoveNote { cell, value }
                }
            }
            INVERT_NOTES | CLEAR_NOTES => {
                expect_len("note", payload, 3)?;
                let cell = read_u16(payload, 1);
                if discriminator == INVERT_NOTES {
                    Command::InvertNotes { cell }
                } else {
                    Command::ClearNotes { cell }
                }
            }
            SET_NOTES => {
                expect_len("SetNotes", payload, 5)?;
                Command::SetNotes {
                    cell: read_u16(payload, 1),
                    mask: read_u16(payload, 3),
                }
            }
            GIVE_UP => {
                expect_len("GiveUp", payload, 1)?;
                Command::GiveUp
            }
            PAUSE => {
                expect_len("Pause", payload, 1)?;
                Command::Pause
            }
            READY => {
                expect_len("Ready", payload, 2)?;
                Command::Ready(flag(payload[1], "ready")?)
            }
            SETTINGS => {
                expect_len("Settings", payload, 4)?;
                Command::Settings(MatchSettings {
                    size: BoardSize::from_side(payload[1]).ok_or(CommandError::BadField("size"))?,
                    difficulty: Difficulty::from_code(payload[2])
                        .ok_or(CommandError::BadField("difficulty"))?,
                    new_game: flag(payload[3], "new_game")?,
                })
            }
            KICK => {
                expect_len("Kick", payload, 2)?;
                Command::Kick(match payload[1] {
                    0 => KickMode::Kick,
                    1 => KickMode::KickBan,
                    _ => return Err(CommandError::BadField("mode")),
                })
            }
            CREATE_GAME => {
                let side = *payload.get(1).ok_or(CommandError::Length {
                    command: "CreateGame",
                    expected: 2,
                    actual: payload.len(),
                })?;
                let size = BoardSize::from_side(side).ok_or(CommandError::BadField("size"))?;
                let cells = size.cells();
                expect_len("CreateGame", payload, 2 + 2 * cells)?;
                let (givens, solution) = payload[2..].split_at(cells);
                Command::CreateGame(Puzzle::new(size, givens.to_vec(), solution.to_vec())?)
            }
            other => return Err(CommandError::UnknownDiscriminator(other)),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Cell;

    fn game() -> MultiplayerGame {
        MultiplayerGame::new(Puzzle::patterned(BoardSize::Nine, Difficulty::Medium))
    }

    #[test]
    fn set_cell_layout_is_big_endian() {
        let bytes = Command::set_cell(0x0102, 7, 0x0A0B_0C0D, Slot::Guest).encode();
        assert_eq!(
            bytes,
            vec![0x01, 0x01, 0x02, 7, 0, 0, 0, 0, 0x0A, 0x0B, 0x0C, 0x0D, 1]
        );
    }

    #[test]
    fn decoded_set_cell_has_no_outcome() {
        let mut command = Command::set_cell(3, 4, -5, Slot::Host);
        if let Command::SetCell { outcome, .. } = &mut command {
            *outcome = Some(SetOutcome::Superseded);
        }
        let decoded = Command::decode(&command.encode()).unwrap();
        assert_eq!(decoded, Command::set_cell(3, 4, -5, Slot::Host));
        assert!(decoded.was_executed());
    }

    #[test]
    fn create_game_carries_the_whole_puzzle() {
        let puzzle = Puzzle::patterned(BoardSize::Sixteen, Difficulty::Hard);
        let bytes = Command::CreateGame(puzzle.clone()).encode();
        assert_eq!(bytes.len(), 2 + 2 * 256);
        assert_eq!(Command::decode(&bytes), Ok(Command::CreateGame(puzzle)));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert_eq!(Command::decode(&[]), Err(CommandError::Empty));
        assert_eq!(
            Command::decode(&[0x7E]),
            Err(CommandError::UnknownDiscriminator(0x7E))
        );
        assert!(matches!(
            Command::decode(&[SET_CELL, 0, 1]),
            Err(CommandError::Length { expected: 13, .. })
        ));
        assert_eq!(
            Command::decode(&[READY, 2]),
            Err(CommandError::BadField("ready"))
        );
        assert_eq!(
            Command::decode(&[SETTINGS, 12, 0, 0]),
            Err(CommandError::BadField("size"))
        );
        assert_eq!(Command::decode(&[KICK, 9]), Err(CommandError::BadField("mode")));
    }

    #[test]
    fn no_discriminator_is_a_control_byte() {
        let commands = [
            Command::set_cell(0, 1, 0, Slot::Host),
            Command::AddNote { cell: 0, value: 1 },
            Command::SetNotes { cell: 0, mask: 0 },
            Command::GiveUp,
            Command::Ready(true),
            Command::Kick(KickMode::KickBan),
        ];
        for c in commands {
            assert!(!sudowars_link::packet::control::is_reserved(c.encode()[0]), "{c:?}");
        }
    }

    #[test]
    fn execute_records_the_set_outcome() {
        let mut g = game();
        let cell = g.cells().iter().position(|c| *c == Cell::Empty).unwrap();
        let value = g.puzzle().solution()[cell];

        let mut first = Command::set_cell(cell as u16, value, 10, Slot::Host);
        let mut late = Command::set_cell(cell as u16, value, 20, Slot::Guest);
        assert_eq!(first.execute(&mut g, Slot::Host), Ok(true));
        assert_eq!(late.execute(&mut g, Slot::Guest), Ok(false));
        assert!(first.was_executed());
        assert!(!late.was_executed());
    }

    #[test]
    fn inverse_restores_notes() {
        let mut g = game();
        let cell = g.cells().iter().position(|c| *c == Cell::Empty).unwrap() as u16;
        let slot = Slot::Guest;

        let script = [
            Command::AddNote { cell, value: 2 },
            Command::AddNote { cell, value: 5 },
            Command::InvertNotes { cell },
            Command::ClearNotes { cell },
            Command::SetNotes { cell, mask: 0b1 },
            Command::RemoveNote { cell, value: 1 },
        ];
        for mut command in script {
            let before = g.notes(slot, cell.into()).unwrap();
            let mut inverse = command.inverted(&g, slot).expect("note commands invert");
            command.execute(&mut g, slot).unwrap();
            inverse.execute(&mut g, slot).unwrap();
            assert_eq!(g.notes(slot, cell.into()).unwrap(), before, "{command:?}");
            command.execute(&mut g, slot).unwrap();
        }
    }

    #[test]
    fn lobby_commands_do_not_touch_the_game() {
        let mut g = game();
        let mut kick = Command::Kick(KickMode::Kick);
        assert_eq!(
            kick.execute(&mut g, Slot::Host),
            Err(GameError::NotAGameCommand("Kick"))
        );
        assert!(kick.is_lobby());
        assert!(Command::GiveUp.inverted(&g, Slot::Host).is_none());
    }
}
