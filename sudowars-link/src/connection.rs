//! Reliable command delivery over one transport.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ send_command / send_command_async        poll_command / poll_delivered
//!      ▼                                                       ▲
//!  Connection ── outbox (mpsc) ──▶ sender task ──┐             │
//!      │                                         ▼             │
//!      │                                  write half ◀── sync task (server role)
//!      │                                         │
//!      │   Ledger (ids in flight)                ▼  frames
//!      │                                     transport
//!      │                                         │
//!      └──────────────── reader task ◀───────────┘
//!                   OK / CORRUPT / TIME_SYNC / commands
//! ```
//!
//! Three tokio tasks per connection: the reader, the outbox drainer and, for
//! the server role only, the clock sync ticker.  All of them stop when the
//! shutdown watch flips to `true`.
//!
//! # Receive path
//!
//! | inbound                | action                                               |
//! |------------------------|------------------------------------------------------|
//! | OK(id)                 | drop ledger record, queue as delivered, notify       |
//! | CORRUPT(id), first     | resend the identical frame                           |
//! | CORRUPT(id), second    | close the connection                                 |
//! | TIME_SYNC / PONG       | clock synchroniser only                              |
//! | valid command          | enqueue, reply OK(id), notify new data               |
//! | anything damaged       | reply CORRUPT(id), discard                           |

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::ToSocketAddrs;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::events::{self, EventSender, LinkEvent};
use crate::ledger::{CorruptVerdict, Ledger};
use crate::packet::{self, control, Frame, Inbound, HEADER_LEN};
use crate::socket::{self, Transport};
use crate::state::ConnectionState;
use crate::time_sync::{Clock, TimeSyncer};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// An application command the link can carry.
///
/// The first encoded byte is the command discriminator and must not collide
/// with [`packet::control`].
pub trait Message: Clone + Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn encode(&self) -> Vec<u8>;
    fn decode(payload: &[u8]) -> Result<Self, Self::Error>;
}

/// Which side of the link this endpoint plays.  Only the server drives
/// clock synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolve once the shutdown flag is set or its sender is gone.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed || rx.changed().await.is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared<M> {
    role: Role,
    remote_host: String,
    config: LinkConfig,
    state: Mutex<ConnectionState>,
    ledger: Mutex<Ledger<M>>,
    inbound: Mutex<VecDeque<M>>,
    delivered: Mutex<VecDeque<M>>,
    writer: tokio::sync::Mutex<BoxedWriter>,
    syncer: TimeSyncer,
    events: EventSender,
    shutdown: watch::Sender<bool>,
}

impl<M: Message> Shared<M> {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    async fn send_command(&self, command: M) -> Result<u8, LinkError> {
        let payload = command.encode();
        match payload.first() {
            None => return Err(LinkError::EmptyCommand),
            Some(&d) if control::is_reserved(d) => {
                return Err(LinkError::ReservedDiscriminator(d))
            }
            Some(_) => {}
        }
        if payload.len() > self.config.max_payload_len {
            return Err(packet::FrameError::PayloadTooLong(payload.len()).into());
        }

        let len = payload.len();
        // Admit under the state lock so a concurrent close clears the record.
        let (packet_id, bytes) = {
            let guard = lock(&self.state);
            let state = *guard;
            if !state.is_connected() {
                return Err(LinkError::NotConnected(state));
            }
            lock(&self.ledger).admit(command, payload)?
        };
        log::debug!("[link:tx] → CMD id={packet_id} len={len}");
        self.write_frame(&bytes).await?;
        Ok(packet_id)
    }

    async fn send_control(&self, frame: Frame) -> Result<(), LinkError> {
        let bytes = frame.encode()?;
        self.write_frame(&bytes).await
    }

    /// Write one complete frame.  Frames never interleave: the writer lock is
    /// held for the whole frame.
    async fn write_frame(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut closed = self.shutdown.subscribe();
        if *closed.borrow() {
            return Err(LinkError::Closed);
        }
        log::trace!("[link:tx] {bytes:02x?}");

        let result = tokio::select! {
            result = async {
                let mut writer = self.writer.lock().await;
                writer.write_all(bytes).await?;
                writer.flush().await
            } => result,
            _ = shutdown_signalled(&mut closed) => return Err(LinkError::Closed),
        };

        if let Err(e) = result {
            log::warn!("[link:tx] write failed: {e}");
            self.close().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Handle one frame read by the reader task.
    async fn dispatch(&self, header: &[u8], payload: &[u8]) -> Result<(), LinkError> {
        log::trace!("[link:rx] {header:02x?} {payload:02x?}");
        match Inbound::parse(header, payload) {
            Inbound::Ack(id) => {
                let record = lock(&self.ledger).on_ok(id);
                match record {
                    None => log::debug!("[link:rx] ← OK id={id} not in flight, ignored"),
                    Some(packet) => {
                        log::debug!(
                            "[link:rx] ← OK id={id} after {:?}",
                            packet.sent_at.elapsed()
                        );
                        lock(&self.delivered).push_back(packet.command);
                        events::emit(&self.events, LinkEvent::PacketDelivered);
                    }
                }
            }
            Inbound::CorruptNotice(id) => {
                let verdict = lock(&self.ledger).on_corrupt(id);
                match verdict {
                    CorruptVerdict::Unknown => {
                        log::debug!("[link:rx] ← CORRUPT id={id} not in flight, ignored")
                    }
                    CorruptVerdict::Resend(bytes) => {
                        log::debug!("[link:rx] ← CORRUPT id={id}; → resend");
                        self.write_frame(&bytes).await?;
                    }
                    CorruptVerdict::Abandon => {
                        log::warn!("[link:rx] ← CORRUPT id={id} twice; closing");
                        self.close().await;
                    }
                }
            }
            Inbound::TimeSync(remote_ts) => {
                let pong = self.syncer.on_sync_request(remote_ts);
                self.send_control(pong).await?;
            }
            Inbound::TimeSyncPong => self.syncer.on_pong(),
            Inbound::Command { packet_id, payload } => match M::decode(&payload) {
                Ok(command) => {
                    log::debug!("[link:rx] ← CMD id={packet_id} len={}; → OK", payload.len());
                    lock(&self.inbound).push_back(command);
                    self.send_control(Frame::ok(packet_id)).await?;
                    events::emit(&self.events, LinkEvent::NewData);
                }
                Err(e) => {
                    log::warn!("[link:rx] ← CMD id={packet_id} undecodable ({e}); → CORRUPT");
                    self.send_control(Frame::corrupt(packet_id)).await?;
                }
            },
            Inbound::Corrupt { packet_id, error } => {
                log::warn!("[link:rx] ← damaged frame id={packet_id} ({error}); → CORRUPT");
                self.send_control(Frame::corrupt(packet_id)).await?;
            }
            Inbound::Ignored {
                packet_id,
                discriminator,
            } => {
                log::warn!(
                    "[link:rx] ← malformed control {discriminator:#04x} id={packet_id}, ignored"
                );
            }
        }
        Ok(())
    }

    /// Move to NONE and stop every task.  Idempotent.
    async fn close(&self) {
        let previous = std::mem::replace(&mut *lock(&self.state), ConnectionState::None);
        if previous == ConnectionState::None {
            return;
        }
        self.shutdown.send_replace(true);
        lock(&self.ledger).clear();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            log::debug!("[link] transport shutdown: {e}");
        }
        drop(writer);

        log::info!("[link] {} connection to {} closed", role_name(self.role), self.remote_host);
        events::emit(&self.events, LinkEvent::StateChanged(ConnectionState::None));
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Server => "server",
        Role::Client => "client",
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn read_frame<R: AsyncRead + Unpin>(
    rd: &mut R,
    header: &mut [u8; HEADER_LEN],
) -> std::io::Result<Vec<u8>> {
    rd.read_exact(header).await?;
    let mut payload = vec![0u8; packet::declared_len(&header[..])];
    rd.read_exact(&mut payload).await?;
    Ok(payload)
}

async fn reader_loop<M: Message, R: AsyncRead + Unpin>(shared: Arc<Shared<M>>, mut rd: R) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut header = [0u8; HEADER_LEN];

    loop {
        let read = async {
            match shared.config.read_timeout {
                None => read_frame(&mut rd, &mut header).await,
                Some(limit) => tokio::time::timeout(limit, read_frame(&mut rd, &mut header))
                    .await
                    .unwrap_or_else(|_| {
                        Err(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "no frame within read timeout",
                        ))
                    }),
            }
        };

        let payload = tokio::select! {
            result = read => result,
            _ = shutdown_signalled(&mut shutdown) => break,
        };

        match payload {
            Ok(payload) => {
                if shared.dispatch(&header, &payload).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                log::info!("[link:rx] transport ended: {e}");
                shared.close().await;
                break;
            }
        }
    }
    log::debug!("[link:rx] reader stopped");
}

async fn sender_loop<M: Message>(shared: Arc<Shared<M>>, mut outbox: mpsc::UnboundedReceiver<M>) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        let command = tokio::select! {
            command = outbox.recv() => command,
            _ = shutdown_signalled(&mut shutdown) => break,
        };
        let Some(command) = command else { break };
        match shared.send_command(command).await {
            Ok(_) => {}
            Err(LinkError::Closed | LinkError::NotConnected(_)) => break,
            Err(e) => log::warn!("[link:tx] queued command dropped: {e}"),
        }
    }
    log::debug!("[link:tx] sender stopped");
}

async fn sync_loop<M: Message>(shared: Arc<Shared<M>>) {
    let mut shutdown = shared.shutdown.subscribe();
    let period = shared.config.time_sync_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let request = shared.syncer.begin_sync();
                if shared.send_control(request).await.is_err() {
                    break;
                }
            }
            _ = shutdown_signalled(&mut shutdown) => break,
        }
    }
    log::debug!("[sync] scheduler stopped");
}

// ---------------------------------------------------------------------------
// Connection handle
// ---------------------------------------------------------------------------

/// Handle to one established link.
///
/// Dropping the handle stops the background tasks without emitting a state
/// change; call [`Connection::close`] for an orderly stop.
pub struct Connection<M: Message> {
    shared: Arc<Shared<M>>,
    outbox: mpsc::UnboundedSender<M>,
    tasks: Vec<JoinHandle<()>>,
}

impl<M: Message> Connection<M> {
    /// Wrap an already connected transport and start the link tasks.
    ///
    /// Publishes `StateChanged(Connected)`.  Must be called inside a tokio
    /// runtime.
    pub fn establish<T: Transport>(
        transport: T,
        role: Role,
        config: LinkConfig,
        clock: Arc<dyn Clock>,
        events: EventSender,
    ) -> Self {
        let remote_host = transport.remote_host();
        let (rd, wr) = tokio::io::split(transport);
        let (shutdown, _) = watch::channel(false);
        let (outbox, outbox_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            role,
            remote_host,
            config,
            state: Mutex::new(ConnectionState::Connected),
            ledger: Mutex::new(Ledger::new()),
            inbound: Mutex::new(VecDeque::new()),
            delivered: Mutex::new(VecDeque::new()),
            writer: tokio::sync::Mutex::new(Box::new(wr)),
            syncer: TimeSyncer::new(clock),
            events,
            shutdown,
        });

        let mut tasks = vec![
            tokio::spawn(reader_loop(Arc::clone(&shared), rd)),
            tokio::spawn(sender_loop(Arc::clone(&shared), outbox_rx)),
        ];
        if role == Role::Server {
            tasks.push(tokio::spawn(sync_loop(Arc::clone(&shared))));
        }

        log::info!(
            "[link] {} connected to {}",
            role_name(role),
            shared.remote_host
        );
        events::emit(
            &shared.events,
            LinkEvent::StateChanged(ConnectionState::Connected),
        );

        Self {
            shared,
            outbox,
            tasks,
        }
    }

    /// Active open over TCP: CONNECTING, then CONNECTED or back to NONE.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        config: LinkConfig,
        clock: Arc<dyn Clock>,
        events: EventSender,
    ) -> Result<Self, LinkError> {
        events::emit(&events, LinkEvent::StateChanged(ConnectionState::Connecting));
        match socket::connect(addr).await {
            Ok(stream) => Ok(Self::establish(stream, Role::Client, config, clock, events)),
            Err(e) => {
                log::warn!("[link] connect failed: {e}");
                events::emit(&events, LinkEvent::StateChanged(ConnectionState::None));
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Name of the peer as reported by the transport.
    pub fn remote_host(&self) -> &str {
        &self.shared.remote_host
    }

    /// Send `command` now.  Returns the packet id it travels under.
    ///
    /// The command is registered in the ledger before the frame is written.
    pub async fn send_command(&self, command: M) -> Result<u8, LinkError> {
        self.shared.send_command(command).await
    }

    /// Queue `command` for the sender task.  Queued commands reach the wire
    /// in queue order.
    pub fn send_command_async(&self, command: M) -> Result<(), LinkError> {
        self.outbox.send(command).map_err(|_| LinkError::Closed)
    }

    /// Next received command, oldest first.  Each command is returned once.
    pub fn poll_command(&self) -> Option<M> {
        let command = lock(&self.shared.inbound).pop_front();
        if command.is_none() {
            log::warn!("[link] poll_command on an empty inbound queue");
        }
        command
    }

    /// `true` while received commands are waiting.
    pub fn has_data(&self) -> bool {
        !lock(&self.shared.inbound).is_empty()
    }

    /// Next command the peer has acknowledged, oldest first.
    pub fn poll_delivered(&self) -> Option<M> {
        lock(&self.shared.delivered).pop_front()
    }

    /// Number of sent commands still waiting for an OK.
    pub fn in_flight(&self) -> usize {
        lock(&self.shared.ledger).in_flight()
    }

    /// `true` if packet `packet_id` is awaiting an acknowledgement.
    pub fn is_in_flight(&self, packet_id: u8) -> bool {
        lock(&self.shared.ledger).contains(packet_id)
    }

    /// Local clock plus the synchronised offset.
    pub fn corrected_timestamp(&self) -> i64 {
        self.shared.syncer.corrected_timestamp()
    }

    pub fn clock_offset(&self) -> i64 {
        self.shared.syncer.offset()
    }

    /// Start a clock sync exchange outside the regular schedule.
    pub async fn sync_clock(&self) -> Result<(), LinkError> {
        let request = self.shared.syncer.begin_sync();
        self.shared.send_control(request).await
    }

    /// Stop the link: state NONE, tasks told to exit, transport shut down.
    pub async fn close(&self) {
        self.shared.close().await;
    }

    /// Resolve once the connection has left CONNECTED for good.
    pub async fn closed(&self) {
        let mut shutdown = self.shared.shutdown.subscribe();
        shutdown_signalled(&mut shutdown).await;
    }

    /// Close and wait for every task to finish.
    pub async fn shutdown(mut self) {
        self.close().await;
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                log::warn!("[link] task ended abnormally: {e}");
            }
        }
    }
}

impl<M: Message> Drop for Connection<M> {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

impl<M: Message> std::fmt::Debug for Connection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.shared.role)
            .field("remote_host", &self.shared.remote_host)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_sync::ManualClock;

    #[derive(Debug, Clone, PartialEq)]
    struct Raw(Vec<u8>);

    #[derive(Debug, thiserror::Error)]
    #[error("empty")]
    struct Empty;

    impl Message for Raw {
        type Error = Empty;
        fn encode(&self) -> Vec<u8> {
            self.0.clone()
        }
        fn decode(payload: &[u8]) -> Result<Self, Empty> {
            Ok(Raw(payload.to_vec()))
        }
    }

    fn pair() -> (Connection<Raw>, Connection<Raw>) {
        let (a, b) = tokio::io::duplex(4096);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_at(0));
        let (tx_a, _) = events::channel();
        let (tx_b, _) = events::channel();
        (
            Connection::establish(a, Role::Client, LinkConfig::default(), Arc::clone(&clock), tx_a),
            Connection::establish(b, Role::Client, LinkConfig::default(), clock, tx_b),
        )
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let (a, _b) = pair();
        assert!(matches!(
            a.send_command(Raw(vec![])).await,
            Err(LinkError::EmptyCommand)
        ));
        assert_eq!(a.in_flight(), 0);
    }

    #[tokio::test]
    async fn reserved_discriminator_is_rejected() {
        let (a, _b) = pair();
        assert!(matches!(
            a.send_command(Raw(vec![control::OK, 1])).await,
            Err(LinkError::ReservedDiscriminator(0x1A))
        ));
    }

    #[tokio::test]
    async fn poll_on_empty_queue_returns_none() {
        let (a, _b) = pair();
        assert!(!a.has_data());
        assert!(a.poll_command().is_none());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (a, _b) = pair();
        a.close().await;
        assert_eq!(a.state(), ConnectionState::None);
        assert!(matches!(
            a.send_command(Raw(vec![0x01])).await,
            Err(LinkError::NotConnected(ConnectionState::None))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn close_racing_sends_leaves_no_record() {
        for _ in 0..50 {
            let (a, _b) = pair();
            let a = Arc::new(a);
            let senders: Vec<_> = (0..8u8)
                .map(|n| {
                    let a = Arc::clone(&a);
                    tokio::spawn(async move { a.send_command(Raw(vec![0x01, n])).await })
                })
                .collect();
            a.close().await;
            for sender in senders {
                let _ = sender.await.unwrap();
            }
            assert_eq!(a.in_flight(), 0);
        }
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (a, _b) = pair();
        a.close().await;
        a.close().await;
        a.closed().await;
        assert_eq!(a.state(), ConnectionState::None);
    }
}
