//! Error types for the game crate.

use thiserror::Error;

use sudowars_link::LinkError;

use crate::game::Phase;

/// A game operation was called with arguments that do not fit the board.
/// The operation is aborted and the game is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("cell {cell} is outside a board of {cells} cells")]
    CellOutOfRange { cell: usize, cells: usize },

    #[error("value {value} is not a symbol of a {size}x{size} board")]
    ValueOutOfRange { value: u8, size: usize },

    #[error("cell {0} is a given and cannot change")]
    GivenCell(usize),

    #[error("{0} is not valid while the match is {1}")]
    WrongPhase(&'static str, Phase),

    #[error("{0} commands are not executed against the game")]
    NotAGameCommand(&'static str),

    #[error("invalid puzzle: {0}")]
    InvalidPuzzle(String),
}

/// A command payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("payload is empty")]
    Empty,

    #[error("unknown command discriminator {0:#04x}")]
    UnknownDiscriminator(u8),

    #[error("{command} payload is {actual} bytes, expected {expected}")]
    Length {
        command: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("field {0} holds an invalid value")]
    BadField(&'static str),

    #[error(transparent)]
    Puzzle(#[from] GameError),
}

/// Negotiation misuse before a match starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LobbyError {
    #[error("only the host may {0}")]
    HostOnly(&'static str),

    #[error("{0} is not accepted from the peer")]
    UnexpectedFromPeer(&'static str),
}

/// Anything a [`crate::session::Session`] operation can fail with.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Game(#[from] GameError),

    #[error(transparent)]
    Lobby(#[from] LobbyError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("no match is running")]
    NoMatch,

    #[error("the match has not ended yet")]
    MatchRunning,

    #[error("nothing to {0}")]
    EmptyHistory(&'static str),
}
