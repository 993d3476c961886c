//! `sudowars-game`: the two-player Sudoku duel on top of `sudowars-link`.
//!
//! ```text
//!   driver (CLI) ── LinkEvent ──▶ Session ──▶ Lobby      (before a match)
//!                                   │    └──▶ MultiplayerGame
//!                                   ▼
//!                          Connection<Command>
//! ```
//!
//! - [`puzzle`]  : board sizes, difficulty, validated puzzles
//! - [`game`]    : match state, scoring and race resolution
//! - [`events`]  : ordered game listeners
//! - [`command`] : commands and their wire format
//! - [`history`] : local undo/redo
//! - [`lobby`]   : settings, readiness and match creation
//! - [`session`] : glue between the link and the game

pub mod command;
pub mod error;
pub mod events;
pub mod game;
pub mod history;
pub mod lobby;
pub mod puzzle;
pub mod session;

pub use command::Command;
pub use error::{CommandError, GameError, LobbyError, SessionError};
pub use game::{AbortReason, Cell, MultiplayerGame, Outcome, Phase, SetOutcome, Slot};
pub use lobby::{Lobby, LobbyAction, MatchSettings};
pub use puzzle::{BoardSize, Difficulty, Puzzle};
pub use session::{Session, SessionUpdate};
