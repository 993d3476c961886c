//! Two sessions playing against each other over in-memory links.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sudowars_game::error::{LobbyError, SessionError};
use sudowars_game::{
    AbortReason, BoardSize, Cell, Command, Difficulty, GameError, MatchSettings, Outcome, Phase,
    Session, SessionUpdate, SetOutcome, Slot,
};
use sudowars_link::events::{self, EventReceiver};
use sudowars_link::simulator::{self, SimulatorConfig};
use sudowars_link::socket::Transport;
use sudowars_link::{Clock, Connection, KickMode, LinkConfig, ManualClock, Role};

/// How long both event queues must stay empty before a step counts as done.
const QUIET: Duration = Duration::from_millis(150);

struct Peer {
    session: Session,
    events: EventReceiver,
    updates: Vec<SessionUpdate>,
}

impl Peer {
    fn new<T: Transport>(transport: T, role: Role, now_ms: i64) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_at(now_ms));
        // No scheduled sync during a test: both clocks stay as set.
        let config = LinkConfig::default().with_time_sync_interval(Duration::from_secs(3600));
        let (tx, events) = events::channel();
        let connection = Connection::establish(transport, role, config, clock, tx);
        let nickname = match role {
            Role::Server => "alice",
            Role::Client => "bob",
        };
        Self {
            session: Session::new(connection, nickname, MatchSettings::default()),
            events,
            updates: Vec::new(),
        }
    }

    fn absorb(&mut self, event: sudowars_link::LinkEvent) {
        let updates = self.session.handle_event(event).expect("event handling failed");
        self.updates.extend(updates);
    }

    fn phase(&self) -> Phase {
        self.session.game().expect("no match").phase()
    }

    fn saw(&self, wanted: impl Fn(&SessionUpdate) -> bool) -> bool {
        self.updates.iter().any(wanted)
    }
}

fn duel(host_ms: i64, guest_ms: i64) -> (Peer, Peer) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (
        Peer::new(a, Role::Server, host_ms),
        Peer::new(b, Role::Client, guest_ms),
    )
}

/// Feed events to both sessions until nothing happens for a while.
async fn settle(host: &mut Peer, guest: &mut Peer) {
    loop {
        tokio::select! {
            Some(event) = host.events.recv() => host.absorb(event),
            Some(event) = guest.events.recv() => guest.absorb(event),
            _ = tokio::time::sleep(QUIET) => return,
        }
    }
}

/// Negotiate a match and run both countdowns to the end.
async fn start_match(host: &mut Peer, guest: &mut Peer) {
    guest.session.set_ready(true).unwrap();
    settle(host, guest).await;
    host.session.set_ready(true).unwrap();
    settle(host, guest).await;

    let (h, g) = (host.session.game(), guest.session.game());
    assert!(h.is_some() && g.is_some(), "match did not start on both sides");
    assert_eq!(h.unwrap().puzzle(), g.unwrap().puzzle());
    host.session.finish_countdown().unwrap();
    guest.session.finish_countdown().unwrap();
}

fn first_open(peer: &Peer) -> (u16, u8) {
    let game = peer.session.game().unwrap();
    let cell = game.cells().iter().position(|c| *c == Cell::Empty).unwrap();
    (cell as u16, game.puzzle().solution()[cell])
}

/// Let the host fill every open cell except one, and return that one.
async fn leave_one_open(host: &mut Peer, guest: &mut Peer) -> (u16, u8) {
    let game = host.session.game().unwrap();
    let solution = game.puzzle().solution().to_vec();
    let open: Vec<u16> = (0..game.cells().len())
        .filter(|&i| game.cells()[i] == Cell::Empty)
        .map(|i| i as u16)
        .collect();
    let (&last, rest) = open.split_last().unwrap();
    for &cell in rest {
        host.session.set_cell(cell, solution[usize::from(cell)]).unwrap();
    }
    settle(host, guest).await;
    (last, solution[usize::from(last)])
}

fn cell_of(peer: &Peer, cell: u16) -> Cell {
    peer.session.game().unwrap().cell(cell.into()).unwrap()
}

fn scores(peer: &Peer) -> [i32; 2] {
    peer.session.game().unwrap().scores()
}

// ---------------------------------------------------------------------------
// Races
// ---------------------------------------------------------------------------

#[tokio::test]
async fn same_cell_race_goes_to_the_earlier_claim() {
    let (mut host, mut guest) = duel(100, 105);
    start_match(&mut host, &mut guest).await;
    let (cell, value) = first_open(&host);

    // Both claim before either hears from the other.
    assert_eq!(host.session.set_cell(cell, value).unwrap(), SetOutcome::Applied);
    assert_eq!(guest.session.set_cell(cell, value).unwrap(), SetOutcome::Applied);
    settle(&mut host, &mut guest).await;

    let winner = Cell::Owned {
        value,
        owner: Slot::Host,
        timestamp: 100,
    };
    assert_eq!(cell_of(&host, cell), winner);
    assert_eq!(cell_of(&guest, cell), winner);
    assert_eq!(scores(&host), [1, 0]);
    assert_eq!(scores(&guest), [1, 0]);
    assert!(host.saw(|u| matches!(u, SessionUpdate::Echoed(_))));
    assert!(!guest.saw(|u| matches!(u, SessionUpdate::Echoed(_))));
}

#[tokio::test]
async fn guest_wins_the_race_with_an_earlier_clock() {
    let (mut host, mut guest) = duel(200, 150);
    start_match(&mut host, &mut guest).await;
    let (cell, value) = first_open(&host);

    host.session.set_cell(cell, value).unwrap();
    guest.session.set_cell(cell, value).unwrap();
    settle(&mut host, &mut guest).await;

    for peer in [&host, &guest] {
        assert_eq!(cell_of(peer, cell).owner(), Some(Slot::Guest));
        assert_eq!(scores(peer), [0, 1]);
    }
}

#[tokio::test]
async fn duplicate_claim_scores_once() {
    let (mut host, mut guest) = duel(100, 100);
    start_match(&mut host, &mut guest).await;
    let (cell, value) = first_open(&host);

    host.session.set_cell(cell, value).unwrap();
    host.session
        .connection()
        .send_command_async(Command::set_cell(cell, value, 100, Slot::Host))
        .unwrap();
    settle(&mut host, &mut guest).await;

    assert_eq!(scores(&guest), [1, 0]);
    assert_eq!(scores(&host), [1, 0]);
}

#[tokio::test]
async fn wrong_value_penalises_on_both_sides() {
    let (mut host, mut guest) = duel(0, 0);
    start_match(&mut host, &mut guest).await;
    let (cell, value) = first_open(&guest);
    let side = guest.session.game().unwrap().size().side() as u8;

    let outcome = guest.session.set_cell(cell, value % side + 1).unwrap();
    assert_eq!(outcome, SetOutcome::Penalised);
    settle(&mut host, &mut guest).await;

    assert_eq!(scores(&host), [0, -2]);
    assert_eq!(cell_of(&host, cell), Cell::Empty);
}

#[tokio::test]
async fn last_cell_race_settles_on_both_boards() {
    let (mut host, mut guest) = duel(100, 105);
    start_match(&mut host, &mut guest).await;
    let (last, value) = leave_one_open(&mut host, &mut guest).await;

    host.session.set_cell(last, value).unwrap();
    guest.session.set_cell(last, value).unwrap();
    assert_eq!(host.phase(), Phase::Finished);
    assert_eq!(guest.phase(), Phase::Finished);
    settle(&mut host, &mut guest).await;

    let winner = Cell::Owned {
        value,
        owner: Slot::Host,
        timestamp: 100,
    };
    assert_eq!(cell_of(&host, last), winner);
    assert_eq!(cell_of(&guest, last), winner);
    assert_eq!(scores(&host), scores(&guest));
    assert_eq!(scores(&guest)[Slot::Guest.index()], 0);
    assert_eq!(host.session.outcome(), Some(Outcome::Win));
    assert_eq!(guest.session.outcome(), Some(Outcome::Defeat));
    assert!(guest.saw(|u| *u == SessionUpdate::MatchOver(Some(Outcome::Defeat))));
}

// ---------------------------------------------------------------------------
// A full match over a damaging link
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_match_converges_despite_corruption() {
    // The first command frames are the lobby handshake; damage one move in
    // each direction.
    let pipe = simulator::pipe(
        SimulatorConfig::corrupt_frames([4]),
        SimulatorConfig::corrupt_frames([3]),
    );
    let mut host = Peer::new(pipe.a, Role::Server, 1_000);
    let mut guest = Peer::new(pipe.b, Role::Client, 1_000);
    start_match(&mut host, &mut guest).await;

    let game = host.session.game().unwrap();
    let mut open: Vec<u16> = (0..game.cells().len())
        .filter(|&i| game.cells()[i] == Cell::Empty)
        .map(|i| i as u16)
        .collect();
    open.shuffle(&mut StdRng::seed_from_u64(0x5d0c));
    let solution = game.puzzle().solution().to_vec();

    for (n, &cell) in open.iter().enumerate() {
        let value = solution[usize::from(cell)];
        let player = if n % 4 == 0 { &mut guest } else { &mut host };
        player.session.set_cell(cell, value).unwrap();
    }
    settle(&mut host, &mut guest).await;

    assert_eq!(pipe.a_to_b.corrupted(), 1);
    assert_eq!(pipe.b_to_a.corrupted(), 1);
    assert_eq!(host.phase(), Phase::Finished);
    assert_eq!(guest.phase(), Phase::Finished);
    assert_eq!(host.session.game().unwrap().cells(), guest.session.game().unwrap().cells());
    assert_eq!(scores(&host), scores(&guest));
    assert_eq!(scores(&host).iter().sum::<i32>(), open.len() as i32);
    assert_eq!(host.session.outcome(), Some(Outcome::Win));
    assert_eq!(guest.session.outcome(), Some(Outcome::Defeat));
    assert!(guest.saw(|u| matches!(u, SessionUpdate::MatchOver(Some(Outcome::Defeat)))));
}

// ---------------------------------------------------------------------------
// Lobby, pause and abort
// ---------------------------------------------------------------------------

#[tokio::test]
async fn host_settings_reach_the_guest() {
    let (mut host, mut guest) = duel(0, 0);
    let settings = MatchSettings::new(BoardSize::Sixteen, Difficulty::Hard);
    host.session.propose_settings(settings).unwrap();
    assert!(matches!(
        guest.session.propose_settings(settings),
        Err(SessionError::Lobby(LobbyError::HostOnly(_)))
    ));
    settle(&mut host, &mut guest).await;
    assert_eq!(guest.session.lobby().settings(), settings);

    start_match(&mut host, &mut guest).await;
    assert_eq!(guest.session.game().unwrap().size(), BoardSize::Sixteen);
}

#[tokio::test]
async fn pause_blocks_moves_until_both_are_ready() {
    let (mut host, mut guest) = duel(0, 0);
    start_match(&mut host, &mut guest).await;

    host.session.pause().unwrap();
    settle(&mut host, &mut guest).await;
    assert_eq!(guest.phase(), Phase::Paused);
    let (cell, value) = first_open(&guest);
    assert!(matches!(
        guest.session.set_cell(cell, value),
        Err(SessionError::Game(GameError::WrongPhase(_, Phase::Paused)))
    ));

    host.session.set_ready(true).unwrap();
    settle(&mut host, &mut guest).await;
    assert_eq!(host.phase(), Phase::Countdown);
    assert_eq!(guest.phase(), Phase::Countdown);
}

#[tokio::test]
async fn giving_up_hands_the_win_to_the_peer() {
    let (mut host, mut guest) = duel(0, 0);
    start_match(&mut host, &mut guest).await;

    guest.session.give_up().unwrap();
    settle(&mut host, &mut guest).await;

    let aborted = Phase::Aborted {
        by: Some(Slot::Guest),
        reason: AbortReason::GaveUp,
    };
    assert_eq!(host.phase(), aborted);
    assert_eq!(guest.phase(), aborted);
    assert_eq!(host.session.outcome(), Some(Outcome::Win));
    assert_eq!(guest.session.outcome(), Some(Outcome::Defeat));
    assert!(host.session.game().unwrap().is_solved());
    assert_eq!(scores(&host), [0, 0]);

    assert!(host.session.return_to_lobby().is_ok());
    assert!(!host.session.lobby().local_ready());
}

#[tokio::test]
async fn crossing_concessions_agree_on_the_quitter() {
    let (mut host, mut guest) = duel(0, 0);
    start_match(&mut host, &mut guest).await;

    host.session.give_up().unwrap();
    guest.session.give_up().unwrap();
    settle(&mut host, &mut guest).await;

    let aborted = Phase::Aborted {
        by: Some(Slot::Guest),
        reason: AbortReason::GaveUp,
    };
    assert_eq!(host.phase(), aborted);
    assert_eq!(guest.phase(), aborted);
    assert_eq!(host.session.game().unwrap().cells(), guest.session.game().unwrap().cells());
    assert_eq!(host.session.outcome(), Some(Outcome::Win));
    assert_eq!(guest.session.outcome(), Some(Outcome::Defeat));
    assert!(host.saw(|u| *u == SessionUpdate::MatchOver(Some(Outcome::Win))));
}

#[tokio::test]
async fn concession_crossing_the_final_move_still_ends_the_match() {
    let (mut host, mut guest) = duel(0, 0);
    start_match(&mut host, &mut guest).await;
    let (last, value) = leave_one_open(&mut host, &mut guest).await;

    host.session.set_cell(last, value).unwrap();
    guest.session.give_up().unwrap();
    settle(&mut host, &mut guest).await;

    let aborted = Phase::Aborted {
        by: Some(Slot::Guest),
        reason: AbortReason::GaveUp,
    };
    assert_eq!(host.phase(), aborted);
    assert_eq!(guest.phase(), aborted);
    assert_eq!(cell_of(&guest, last).owner(), Some(Slot::Host));
    assert_eq!(host.session.game().unwrap().cells(), guest.session.game().unwrap().cells());
    assert_eq!(scores(&host), scores(&guest));
}

#[tokio::test]
async fn disconnect_aborts_without_a_winner() {
    let (mut host, mut guest) = duel(0, 0);
    start_match(&mut host, &mut guest).await;

    guest.session.leave().await;
    settle(&mut host, &mut guest).await;

    assert!(host.session.player_left());
    assert_eq!(
        host.phase(),
        Phase::Aborted {
            by: None,
            reason: AbortReason::Disconnected
        }
    );
    assert_eq!(host.session.outcome(), None);
    assert!(host.saw(|u| *u == SessionUpdate::MatchOver(None)));
}

#[tokio::test]
async fn kick_reaches_the_guest_and_reports_delivery() {
    let (mut host, mut guest) = duel(0, 0);
    assert!(guest.session.kick(KickMode::Kick).is_err());

    host.session.kick(KickMode::KickBan).unwrap();
    settle(&mut host, &mut guest).await;

    assert_eq!(guest.session.kicked(), Some(KickMode::KickBan));
    assert!(host.saw(|u| *u == SessionUpdate::KickDelivered(KickMode::KickBan)));
}

#[tokio::test]
async fn notes_stay_local_and_undo() {
    let (mut host, mut guest) = duel(0, 0);
    start_match(&mut host, &mut guest).await;
    let (cell, _) = first_open(&host);

    assert!(host.session.add_note(cell, 3).unwrap());
    assert!(host.session.invert_notes(cell).unwrap());
    host.session.undo().unwrap();
    settle(&mut host, &mut guest).await;

    let mask = |peer: &Peer, slot| peer.session.game().unwrap().notes(slot, cell.into()).unwrap();
    assert_eq!(mask(&host, Slot::Host), 1 << 2);
    assert_eq!(mask(&guest, Slot::Host), 0);

    host.session.undo().unwrap();
    assert_eq!(mask(&host, Slot::Host), 0);
    host.session.redo().unwrap();
    assert_eq!(mask(&host, Slot::Host), 1 << 2);
    host.session.undo().unwrap();
    assert!(matches!(host.session.undo(), Err(SessionError::EmptyHistory("undo"))));
}
