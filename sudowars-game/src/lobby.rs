//! Match negotiation before play.
//!
//! The host owns the settings.  Both players toggle a ready flag; once both
//! are ready the host builds the puzzle and sends `CreateGame`.  The host
//! starts when the peer has acknowledged that command, the guest starts on
//! receipt, so neither side plays a board the other does not have.
//!
//! ```text
//!  host                                   guest
//!   │ ── Settings(size, difficulty) ──▶    │  (ready flags reset)
//!   │ ◀──────────── Ready(true) ────────   │
//!   │ ── Ready(true) ─────────────────▶    │
//!   │ ── CreateGame(puzzle) ──────────▶    │  StartGame
//!   │ ◀──────────── OK ─────────────────   │
//!   StartGame
//! ```

use sudowars_link::KickMode;

use crate::command::Command;
use crate::error::LobbyError;
use crate::game::Slot;
use crate::puzzle::{BoardSize, Difficulty, Puzzle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSettings {
    pub size: BoardSize,
    pub difficulty: Difficulty,
    /// `false` replays the previous board as a rematch.
    pub new_game: bool,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self::new(BoardSize::default(), Difficulty::default())
    }
}

impl MatchSettings {
    pub fn new(size: BoardSize, difficulty: Difficulty) -> Self {
        Self {
            size,
            difficulty,
            new_game: true,
        }
    }
}

/// What the session should do after a lobby step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyAction {
    /// Both players are ready: send this puzzle to the guest.
    CreateGame(Puzzle),
    /// Begin the match on this board.
    StartGame(Puzzle),
    Kicked(KickMode),
    SettingsChanged(MatchSettings),
    RemoteReady(bool),
}

#[derive(Debug)]
pub struct Lobby {
    local: Slot,
    settings: MatchSettings,
    local_ready: bool,
    remote_ready: bool,
    /// Board of the last match, kept for rematches.
    previous: Option<Puzzle>,
    /// Counts boards built so far; successive boards use different symbols.
    boards: usize,
}

impl Lobby {
    pub fn new(local: Slot, settings: MatchSettings) -> Self {
        Self {
            local,
            settings,
            local_ready: false,
            remote_ready: false,
            previous: None,
            boards: 0,
        }
    }

    pub fn is_host(&self) -> bool {
        self.local == Slot::Host
    }

    pub fn settings(&self) -> MatchSettings {
        self.settings
    }

    pub fn local_ready(&self) -> bool {
        self.local_ready
    }

    pub fn remote_ready(&self) -> bool {
        self.remote_ready
    }

    /// Clear both ready flags, e.g. after a match ended.
    pub fn reset(&mut self) {
        self.local_ready = false;
        self.remote_ready = false;
    }

    /// Host changes the match settings.  Returns the command to send.
    pub fn propose_settings(&mut self, settings: MatchSettings) -> Result<Command, LobbyError> {
        if !self.is_host() {
            return Err(LobbyError::HostOnly("change the settings"));
        }
        log::info!(
            "[lobby] settings {} {} new_game={}",
            settings.size,
            settings.difficulty,
            settings.new_game
        );
        self.settings = settings;
        self.reset();
        Ok(Command::Settings(settings))
    }

    /// Host asks the guest to leave.  Returns the command to send.
    pub fn kick(&self, mode: KickMode) -> Result<Command, LobbyError> {
        if !self.is_host() {
            return Err(LobbyError::HostOnly("kick"));
        }
        Ok(Command::Kick(mode))
    }

    /// Toggle the local ready flag.  Returns the commands to send, in order.
    pub fn set_ready(&mut self, ready: bool) -> Vec<Command> {
        self.local_ready = ready;
        let mut out = vec![Command::Ready(ready)];
        if let Some(puzzle) = self.puzzle_if_both_ready() {
            out.push(Command::CreateGame(puzzle));
        }
        out
    }

    /// Apply a command received from the peer while no match runs.
    pub fn handle_remote(&mut self, command: &Command) -> Result<LobbyAction, LobbyError> {
        let unexpected = || LobbyError::UnexpectedFromPeer(command.name());
        match command {
            Command::Ready(ready) => {
                self.remote_ready = *ready;
                log::debug!("[lobby] peer ready={ready}");
                Ok(match self.puzzle_if_both_ready() {
                    Some(puzzle) => LobbyAction::CreateGame(puzzle),
                    None => LobbyAction::RemoteReady(*ready),
                })
            }
            Command::Settings(settings) if !self.is_host() => {
                self.settings = *settings;
                self.reset();
                Ok(LobbyAction::SettingsChanged(*settings))
            }
            Command::Kick(mode) if !self.is_host() => {
                log::info!("[lobby] kicked by the host ({mode:?})");
                Ok(LobbyAction::Kicked(*mode))
            }
            Command::CreateGame(puzzle) if !self.is_host() => Ok(self.start(puzzle.clone())),
            _ => Err(unexpected()),
        }
    }

    /// The peer acknowledged one of our commands.  For the host a delivered
    /// `CreateGame` starts the match.
    pub fn on_delivered(&mut self, command: &Command) -> Option<LobbyAction> {
        match command {
            Command::CreateGame(puzzle) if self.is_host() => Some(self.start(puzzle.clone())),
            _ => None,
        }
    }

    fn start(&mut self, puzzle: Puzzle) -> LobbyAction {
        self.reset();
        self.previous = Some(puzzle.clone());
        LobbyAction::StartGame(puzzle)
    }

    /// The host decides once both flags are set.
    fn puzzle_if_both_ready(&mut self) -> Option<Puzzle> {
        if !(self.is_host() && self.local_ready && self.remote_ready) {
            return None;
        }
        let settings = self.settings;
        let rematch = self
            .previous
            .as_ref()
            .filter(|p| !settings.new_game && p.size() == settings.size)
            .cloned();
        let puzzle = rematch.unwrap_or_else(|| {
            self.boards += 1;
            Puzzle::patterned(settings.size, settings.difficulty).relabelled(self.boards)
        });
        log::info!("[lobby] both players ready, creating a {} board", settings.size);
        Some(puzzle)
    }
}
