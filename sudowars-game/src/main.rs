//! Entry point for `sudowars`.
//!
//! Parses CLI arguments and either hosts a duel (listening for one peer at a
//! time) or joins one.  Moves are typed on stdin; `help` lists them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::time::{interval_at, sleep_until, Instant};

use sudowars_game::game::{COUNTDOWN, COUNTDOWN_TICK};
use sudowars_game::{
    BoardSize, Cell, Command, Difficulty, MatchSettings, MultiplayerGame, Phase, Session,
    SessionUpdate,
};
use sudowars_link::events::{self, EventReceiver};
use sudowars_link::{
    Clock, Connection, ConnectionState, KickMode, LinkConfig, MonotonicClock, Server,
};

/// Two-player competitive Sudoku over a reliable peer link.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    /// Name shown to the local player.
    #[arg(short, long, global = true, default_value = "Player")]
    nickname: String,

    /// Seconds between clock synchronisations (host only).
    #[arg(long, global = true, default_value_t = 5)]
    sync_interval: u64,

    /// Drop the peer after this many seconds without a frame.  Keep it above
    /// the sync interval, whose exchanges keep an idle link alive.
    #[arg(long, global = true)]
    read_timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Mode {
    /// Host a duel and wait for a peer.
    Host {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: String,

        #[arg(short, long, value_enum, default_value_t = SizeArg::Nine)]
        size: SizeArg,

        #[arg(short, long, value_enum, default_value_t = DifficultyArg::Easy)]
        difficulty: DifficultyArg,
    },
    /// Join a hosted duel.
    Join {
        /// Host address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        peer: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SizeArg {
    #[value(name = "9")]
    Nine,
    #[value(name = "16")]
    Sixteen,
}

impl From<SizeArg> for BoardSize {
    fn from(arg: SizeArg) -> Self {
        match arg {
            SizeArg::Nine => BoardSize::Nine,
            SizeArg::Sixteen => BoardSize::Sixteen,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DifficultyArg {
    Easy,
    Medium,
    Hard,
}

impl From<DifficultyArg> for Difficulty {
    fn from(arg: DifficultyArg) -> Self {
        match arg {
            DifficultyArg::Easy => Difficulty::Easy,
            DifficultyArg::Medium => Difficulty::Medium,
            DifficultyArg::Hard => Difficulty::Hard,
        }
    }
}

const HELP: &str = "\
lobby:  ready | unready | settings <9|16> <easy|medium|hard> [rematch] | kick | ban
match:  set <row> <col> <value> | note <row> <col> <value> | unnote <row> <col> <value>
        invert <row> <col> | clear <row> <col> | undo | redo | pause | giveup
always: board | lobby | help | quit";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let mut config =
        LinkConfig::default().with_time_sync_interval(Duration::from_secs(cli.sync_interval));
    if let Some(secs) = cli.read_timeout {
        config = config.with_read_timeout(Duration::from_secs(secs));
    }
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    match cli.mode {
        Mode::Host {
            bind,
            size,
            difficulty,
        } => {
            let (tx, mut rx) = events::channel();
            let server = Server::bind(&bind, config, clock, tx)
                .await
                .with_context(|| format!("cannot listen on {bind}"))?;
            println!("hosting on {}", server.local_addr());
            let settings = MatchSettings::new(size.into(), difficulty.into());

            loop {
                // Leftovers of the previous peer.
                while rx.try_recv().is_ok() {}
                let connection = server.accept().await.context("accept failed")?;
                // Align the clocks before the first claim instead of one
                // interval later.
                if let Err(e) = connection.sync_clock().await {
                    log::warn!("initial clock sync failed: {e}");
                }
                let mut session = Session::new(connection, &cli.nickname, settings);
                println!("{} joined", session.remote_nickname());
                if !run(&mut session, Some(&server), &mut rx, &mut input).await? {
                    break;
                }
                println!("waiting for the next peer");
            }
        }
        Mode::Join { peer } => {
            let (tx, mut rx) = events::channel();
            let connection = Connection::connect(&peer, config, clock, tx)
                .await
                .with_context(|| format!("cannot reach {peer}"))?;
            let mut session = Session::new(connection, &cli.nickname, MatchSettings::default());
            println!("connected to {}", session.remote_nickname());
            run(&mut session, None, &mut rx, &mut input).await?;
        }
    }
    Ok(())
}

/// Drive one session until the link closes.  Returns `false` if the user
/// asked to quit.
async fn run(
    session: &mut Session,
    server: Option<&Server>,
    rx: &mut EventReceiver,
    input: &mut Lines<BufReader<Stdin>>,
) -> Result<bool> {
    println!("{HELP}");
    let mut countdown: Option<Instant> = None;
    let mut ticker = interval_at(Instant::now() + COUNTDOWN_TICK, COUNTDOWN_TICK);

    loop {
        let counting = session.game().map(MultiplayerGame::phase) == Some(Phase::Countdown);
        match (counting, countdown) {
            (true, None) => {
                let deadline = Instant::now() + COUNTDOWN;
                countdown = Some(deadline);
                ticker = interval_at(Instant::now() + COUNTDOWN_TICK, COUNTDOWN_TICK);
                println!("starting in {}", COUNTDOWN.as_secs() + 1);
            }
            (false, Some(_)) => countdown = None,
            _ => {}
        }
        let deadline = countdown.unwrap_or_else(Instant::now);

        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { return Ok(false) };
                let mut open = true;
                for update in session.handle_event(event)? {
                    open &= report(session, server, update).await;
                }
                if !open {
                    return Ok(true);
                }
            }
            line = input.next_line() => {
                let Some(line) = line? else { return Ok(false) };
                match execute(session, line.trim()) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => {
                        session.leave().await;
                        return Ok(false);
                    }
                    Ok(Flow::Kick(mode)) => {
                        if server.is_none() {
                            println!("only the host can kick");
                        } else if let Err(e) = session.kick(mode) {
                            println!("error: {e}");
                        }
                    }
                    Err(e) => println!("error: {e}"),
                }
            }
            _ = ticker.tick(), if countdown.is_some() => {
                if let Some(deadline) = countdown {
                    let left = deadline.saturating_duration_since(Instant::now());
                    println!("{}", left.as_secs() + 1);
                }
            }
            _ = sleep_until(deadline), if countdown.is_some() => {
                countdown = None;
                match session.finish_countdown() {
                    Ok(()) => {
                        println!("go!");
                        print_board(session);
                    }
                    Err(e) => log::debug!("[session] countdown ended late: {e}"),
                }
            }
        }
    }
}

/// Show one update.  Returns `false` once the session is over.
async fn report(session: &Session, server: Option<&Server>, update: SessionUpdate) -> bool {
    match update {
        SessionUpdate::StateChanged(state) => {
            log::debug!("[session] link {state}");
            if state == ConnectionState::None {
                println!("connection closed");
                return false;
            }
        }
        SessionUpdate::Lobby(action) => println!("lobby: {action:?}"),
        SessionUpdate::MatchStarted => println!("match created"),
        SessionUpdate::Applied(command) => {
            log::debug!("[session] peer {}", command.name());
            if matches!(command, Command::SetCell { .. }) {
                print_board(session);
            }
        }
        SessionUpdate::Echoed(command) => log::debug!("[session] echoed {command:?}"),
        SessionUpdate::MatchOver(Some(outcome)) => {
            print_board(session);
            println!("match over: {outcome}");
        }
        SessionUpdate::MatchOver(None) => println!("match aborted"),
        SessionUpdate::PlayerLeft => println!("{} left", session.remote_nickname()),
        SessionUpdate::KickDelivered(mode) => {
            if let Some(server) = server {
                server.kick(session.connection(), mode).await;
            }
        }
    }
    true
}

enum Flow {
    Continue,
    Quit,
    Kick(KickMode),
}

/// Parse a 1-based `<row> <col>` pair into a cell index.
fn cell_arg(session: &Session, args: &[&str]) -> Result<u16> {
    let side = session
        .game()
        .map(|g| g.size().side())
        .unwrap_or(session.lobby().settings().size.side());
    let [row, col] = args else {
        bail!("expected <row> <col>");
    };
    let (row, col): (usize, usize) = (row.parse()?, col.parse()?);
    if row == 0 || col == 0 || row > side || col > side {
        bail!("row and column run from 1 to {side}");
    }
    Ok(((row - 1) * side + col - 1) as u16)
}

fn execute(session: &mut Session, line: &str) -> Result<Flow> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(Flow::Continue);
    };

    match (verb, args) {
        ("help", _) => println!("{HELP}"),
        ("quit", _) => return Ok(Flow::Quit),
        ("board", _) => print_board(session),
        ("ready", _) => session.set_ready(true)?,
        ("unready", _) => session.set_ready(false)?,
        ("kick", _) => return Ok(Flow::Kick(KickMode::Kick)),
        ("ban", _) => return Ok(Flow::Kick(KickMode::KickBan)),
        ("lobby", _) => session.return_to_lobby()?,
        ("settings", [size, difficulty, rest @ ..]) => {
            let size = match *size {
                "9" => BoardSize::Nine,
                "16" => BoardSize::Sixteen,
                other => bail!("unknown size {other}"),
            };
            let difficulty = match *difficulty {
                "easy" => Difficulty::Easy,
                "medium" => Difficulty::Medium,
                "hard" => Difficulty::Hard,
                other => bail!("unknown difficulty {other}"),
            };
            session.propose_settings(MatchSettings {
                size,
                difficulty,
                new_game: rest.first() != Some(&"rematch"),
            })?;
        }
        ("set", [row, col, value]) => {
            let cell = cell_arg(session, &[*row, *col])?;
            let outcome = session.set_cell(cell, value.parse()?)?;
            println!("{outcome:?}");
            print_board(session);
        }
        ("note" | "unnote", [row, col, value]) => {
            let cell = cell_arg(session, &[*row, *col])?;
            let value = value.parse()?;
            if verb == "note" {
                session.add_note(cell, value)?;
            } else {
                session.remove_note(cell, value)?;
            }
        }
        ("invert", [row, col]) => {
            let cell = cell_arg(session, &[*row, *col])?;
            session.invert_notes(cell)?;
        }
        ("clear", [row, col]) => {
            let cell = cell_arg(session, &[*row, *col])?;
            session.clear_notes(cell)?;
        }
        ("undo", _) => session.undo()?,
        ("redo", _) => session.redo()?,
        ("pause", _) => session.pause()?,
        ("giveup", _) => session.give_up()?,
        _ => bail!("unknown command, try `help`"),
    }
    Ok(Flow::Continue)
}

fn symbol(value: u8) -> char {
    char::from_digit(u32::from(value), 17).map_or('?', |c| c.to_ascii_uppercase())
}

/// Cells print as a symbol plus a marker: `+` ours, `-` the peer's.
fn print_board(session: &Session) {
    let Some(game) = session.game() else {
        println!("no match yet");
        return;
    };
    let local = session.local_slot();
    let (n, b) = (game.size().side(), game.size().box_side());
    for (i, cell) in game.cells().iter().enumerate() {
        let (shown, mark) = match *cell {
            Cell::Empty => ('.', ' '),
            Cell::Given(v) => (symbol(v), ' '),
            Cell::Owned { value, owner, .. } | Cell::Exposed { value, owner } => {
                (symbol(value), if owner == local { '+' } else { '-' })
            }
        };
        print!("{shown}{mark}");
        let col = i % n;
        if col == n - 1 {
            println!();
            if (i / n) % b == b - 1 && i + 1 < n * n {
                println!();
            }
        } else if col % b == b - 1 {
            print!("| ");
        }
    }
    println!(
        "{}: {}   {}: {}   ({})",
        session.nickname(),
        game.score(local),
        session.remote_nickname(),
        game.score(local.other()),
        game.phase()
    );
}
