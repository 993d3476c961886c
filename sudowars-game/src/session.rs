//! One player's view of a duel: the link to the peer, the lobby and the
//! running match.
//!
//! The session never blocks on the network.  Local actions execute against
//! the local game first and are queued on the link; the application feeds
//! every [`LinkEvent`] into [`Session::handle_event`] and gets back the
//! [`SessionUpdate`]s worth showing.
//!
//! # Remote commands
//!
//! | received while                              | handled by                      |
//! |---------------------------------------------|---------------------------------|
//! | a match exists, `SetCell`/`GiveUp`/`Pause`  | executed for the peer's slot    |
//! | match running, `Ready`                      | executed for the peer's slot    |
//! | otherwise, or lobby command                 | [`Lobby::handle_remote`]        |
//!
//! Moves keep reaching a match that already ended locally: the peer may
//! have sent them before it learned about the end, and both boards must
//! settle on the same result.  [`SessionUpdate::MatchOver`] is reported
//! again whenever such a move changes the result.
//!
//! A remote `SetCell` that lost its cell locally is sent back once so the
//! peer learns about the winning claim; claims created locally are never
//! echoed again.

use sudowars_link::{Connection, ConnectionState, KickMode, LinkEvent, Role};

use crate::command::Command;
use crate::error::{GameError, SessionError};
use crate::game::{AbortReason, MultiplayerGame, Outcome, Phase, SetOutcome, Slot};
use crate::history::UndoHistory;
use crate::lobby::{Lobby, LobbyAction, MatchSettings};
use crate::puzzle::Puzzle;

/// Shown for the peer when the transport reports no host name.
pub const REMOTE_FALLBACK_NAME: &str = "Remote";

/// Something the driver may want to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    StateChanged(ConnectionState),
    Lobby(LobbyAction),
    MatchStarted,
    /// A game command from the peer was executed.
    Applied(Command),
    /// A losing remote claim was sent back to the peer.
    Echoed(Command),
    MatchOver(Option<Outcome>),
    /// The peer disconnected.
    PlayerLeft,
    /// The peer acknowledged our kick; the hosting side should now close the
    /// connection (see `Server::kick`).
    KickDelivered(KickMode),
}

#[derive(Debug)]
pub struct Session {
    connection: Connection<Command>,
    local: Slot,
    nickname: String,
    lobby: Lobby,
    game: Option<MultiplayerGame>,
    history: UndoHistory,
    player_left: bool,
    kicked: Option<KickMode>,
}

impl Session {
    /// Wrap an established connection.  The server side of the link plays
    /// [`Slot::Host`].
    pub fn new(
        connection: Connection<Command>,
        nickname: impl Into<String>,
        settings: MatchSettings,
    ) -> Self {
        let local = match connection.role() {
            Role::Server => Slot::Host,
            Role::Client => Slot::Guest,
        };
        Self {
            connection,
            local,
            nickname: nickname.into(),
            lobby: Lobby::new(local, settings),
            game: None,
            history: UndoHistory::new(),
            player_left: false,
            kicked: None,
        }
    }

    pub fn connection(&self) -> &Connection<Command> {
        &self.connection
    }

    pub fn local_slot(&self) -> Slot {
        self.local
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn remote_nickname(&self) -> &str {
        match self.connection.remote_host() {
            "" => REMOTE_FALLBACK_NAME,
            host => host,
        }
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    /// The current match, or the last one if it has ended.
    pub fn game(&self) -> Option<&MultiplayerGame> {
        self.game.as_ref()
    }

    /// For registering game listeners.
    pub fn game_mut(&mut self) -> Option<&mut MultiplayerGame> {
        self.game.as_mut()
    }

    pub fn player_left(&self) -> bool {
        self.player_left
    }

    pub fn kicked(&self) -> Option<KickMode> {
        self.kicked
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.game.as_ref().and_then(|g| g.outcome(self.local))
    }

    fn running(&self) -> bool {
        self.game.as_ref().is_some_and(|g| !g.phase().is_over())
    }

    /// Whether a remote command belongs to the current (or just ended)
    /// match rather than to the lobby.
    fn for_match(&self, command: &Command) -> bool {
        if command.is_lobby() {
            return false;
        }
        match command {
            Command::SetCell { .. } | Command::GiveUp | Command::Pause => self.game.is_some(),
            Command::Ready(_) => self.running(),
            _ => false,
        }
    }

    fn running_game(&mut self) -> Result<&mut MultiplayerGame, SessionError> {
        match self.game.as_mut() {
            Some(game) if !game.phase().is_over() => Ok(game),
            _ => Err(SessionError::NoMatch),
        }
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        log::debug!("[session] → {}", command.name());
        self.connection.send_command_async(command)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Link events
    // -----------------------------------------------------------------------

    pub fn handle_event(&mut self, event: LinkEvent) -> Result<Vec<SessionUpdate>, SessionError> {
        let mut updates = Vec::new();
        match event {
            LinkEvent::StateChanged(state) => {
                updates.push(SessionUpdate::StateChanged(state));
                if state == ConnectionState::None {
                    self.on_disconnect(&mut updates);
                }
            }
            LinkEvent::NewData => {
                while self.connection.has_data() {
                    if let Some(command) = self.connection.poll_command() {
                        self.handle_remote(command, &mut updates)?;
                    }
                }
            }
            LinkEvent::PacketDelivered => {
                while let Some(command) = self.connection.poll_delivered() {
                    self.handle_delivered(command, &mut updates);
                }
            }
        }
        Ok(updates)
    }

    fn on_disconnect(&mut self, updates: &mut Vec<SessionUpdate>) {
        self.player_left = true;
        updates.push(SessionUpdate::PlayerLeft);
        if let Some(game) = self.game.as_mut() {
            if game.abort(None, AbortReason::Disconnected) {
                log::info!("[session] peer left during the match");
                updates.push(SessionUpdate::MatchOver(None));
            }
        }
    }

    fn handle_remote(
        &mut self,
        mut command: Command,
        updates: &mut Vec<SessionUpdate>,
    ) -> Result<(), SessionError> {
        log::debug!("[session] ← {}", command.name());
        let peer = self.local.other();

        if command.is_note() {
            log::warn!("[session] peer sent its private {}, dropped", command.name());
            return Ok(());
        }
        if self.for_match(&command) {
            let local = self.local;
            let Some(game) = self.game.as_mut() else {
                return Ok(());
            };
            let before = (game.phase(), game.scores());
            if let Err(e) = command.execute(game, peer) {
                // Already acknowledged on the link; nothing to report back.
                log::warn!("[session] remote {} rejected: {e}", command.name());
                return Ok(());
            }
            let after = (game.phase(), game.scores());
            let result_changed = after.0.is_over() && after != before;
            let outcome = game.outcome(local);

            if let Command::SetCell { creator, .. } = command {
                if !command.was_executed() && creator != self.local {
                    self.send(command.clone())?;
                    updates.push(SessionUpdate::Echoed(command.clone()));
                }
            }
            updates.push(SessionUpdate::Applied(command));
            if result_changed {
                updates.push(SessionUpdate::MatchOver(outcome));
            }
            return Ok(());
        }

        match self.lobby.handle_remote(&command) {
            Ok(LobbyAction::CreateGame(puzzle)) => {
                self.send(Command::CreateGame(puzzle.clone()))?;
                updates.push(SessionUpdate::Lobby(LobbyAction::CreateGame(puzzle)));
            }
            Ok(LobbyAction::StartGame(puzzle)) => self.start_match(puzzle, updates),
            Ok(LobbyAction::Kicked(mode)) => {
                self.kicked = Some(mode);
                updates.push(SessionUpdate::Lobby(LobbyAction::Kicked(mode)));
            }
            Ok(action) => updates.push(SessionUpdate::Lobby(action)),
            Err(e) => log::warn!("[session] {e}"),
        }
        Ok(())
    }

    fn handle_delivered(&mut self, command: Command, updates: &mut Vec<SessionUpdate>) {
        if let Command::Kick(mode) = command {
            updates.push(SessionUpdate::KickDelivered(mode));
            return;
        }
        if let Some(LobbyAction::StartGame(puzzle)) = self.lobby.on_delivered(&command) {
            self.start_match(puzzle, updates);
        }
    }

    fn start_match(&mut self, puzzle: Puzzle, updates: &mut Vec<SessionUpdate>) {
        log::info!(
            "[session] match starts: {} board, {} open cells",
            puzzle.size(),
            puzzle.open_cells()
        );
        self.game = Some(MultiplayerGame::new(puzzle));
        self.history.clear();
        updates.push(SessionUpdate::MatchStarted);
    }

    // -----------------------------------------------------------------------
    // Lobby actions
    // -----------------------------------------------------------------------

    /// Toggle readiness.  In the lobby this negotiates the next match; during
    /// a match it resumes (`true`) or pauses (`false`) play.
    pub fn set_ready(&mut self, ready: bool) -> Result<(), SessionError> {
        if self.running() {
            let local = self.local;
            self.running_game()?.set_ready(local, ready);
            return self.send(Command::Ready(ready));
        }
        for command in self.lobby.set_ready(ready) {
            self.send(command)?;
        }
        Ok(())
    }

    pub fn propose_settings(&mut self, settings: MatchSettings) -> Result<(), SessionError> {
        if self.running() {
            return Err(SessionError::MatchRunning);
        }
        let command = self.lobby.propose_settings(settings)?;
        self.send(command)
    }

    /// Ask the guest to leave.  Close the link once
    /// [`SessionUpdate::KickDelivered`] arrives.
    pub fn kick(&mut self, mode: KickMode) -> Result<(), SessionError> {
        let command = self.lobby.kick(mode)?;
        self.send(command)
    }

    /// Leave a finished match for the lobby.
    pub fn return_to_lobby(&mut self) -> Result<(), SessionError> {
        if self.running() {
            return Err(SessionError::MatchRunning);
        }
        self.lobby.reset();
        self.history.clear();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Match actions
    // -----------------------------------------------------------------------

    pub fn finish_countdown(&mut self) -> Result<(), SessionError> {
        self.running_game()?.finish_countdown()?;
        Ok(())
    }

    /// Claim `cell` with `value`, stamped with the synchronised clock.
    pub fn set_cell(&mut self, cell: u16, value: u8) -> Result<SetOutcome, SessionError> {
        let (local, timestamp) = (self.local, self.connection.corrected_timestamp());
        let game = self.running_game()?;
        if game.phase() != Phase::Active {
            return Err(GameError::WrongPhase("setting a cell", game.phase()).into());
        }

        let mut command = Command::set_cell(cell, value, timestamp, local);
        command.execute(game, local)?;
        let outcome = match command {
            Command::SetCell {
                outcome: Some(outcome),
                ..
            } => outcome,
            _ => SetOutcome::Ignored,
        };
        let over = game.phase().is_over();
        self.send(command)?;
        if over {
            log::info!("[session] board complete: {:?}", self.outcome());
        }
        Ok(outcome)
    }

    pub fn add_note(&mut self, cell: u16, value: u8) -> Result<bool, SessionError> {
        self.edit_notes(Command::AddNote { cell, value })
    }

    pub fn remove_note(&mut self, cell: u16, value: u8) -> Result<bool, SessionError> {
        self.edit_notes(Command::RemoveNote { cell, value })
    }

    pub fn invert_notes(&mut self, cell: u16) -> Result<bool, SessionError> {
        self.edit_notes(Command::InvertNotes { cell })
    }

    pub fn clear_notes(&mut self, cell: u16) -> Result<bool, SessionError> {
        self.edit_notes(Command::ClearNotes { cell })
    }

    /// Notes stay local; only the undo history learns about them.
    fn edit_notes(&mut self, mut command: Command) -> Result<bool, SessionError> {
        let local = self.local;
        let game = self.running_game()?;
        let inverse = command.inverted(game, local);
        let changed = command.execute(game, local)?;
        if let (true, Some(inverse)) = (changed, inverse) {
            self.history.record(command, inverse);
        }
        Ok(changed)
    }

    pub fn undo(&mut self) -> Result<(), SessionError> {
        let local = self.local;
        self.running_game()?;
        let mut command = self.history.undo().ok_or(SessionError::EmptyHistory("undo"))?;
        command.execute(self.running_game()?, local)?;
        Ok(())
    }

    pub fn redo(&mut self) -> Result<(), SessionError> {
        let local = self.local;
        self.running_game()?;
        let mut command = self.history.redo().ok_or(SessionError::EmptyHistory("redo"))?;
        command.execute(self.running_game()?, local)?;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        let local = self.local;
        self.running_game()?.pause(local);
        self.send(Command::Pause)
    }

    /// Concede.  The peer receives every open cell.
    pub fn give_up(&mut self) -> Result<(), SessionError> {
        let local = self.local;
        self.running_game()?.abort(Some(local), AbortReason::GaveUp);
        self.send(Command::GiveUp)
    }

    /// Close the link to the peer.
    pub async fn leave(&self) {
        self.connection.close().await;
    }
}
