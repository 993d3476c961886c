//! Listening endpoint for the hosting peer.
//!
//! A [`Server`] hands out one [`Connection`] per accepted peer.  Every call to
//! [`Server::accept`] publishes LISTENING, so after a connection closes the
//! server re-enters LISTENING as soon as the application waits for the next
//! peer.  Kicked peers can additionally be banned by host name.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::ToSocketAddrs;

use crate::config::LinkConfig;
use crate::connection::{Connection, Message, Role};
use crate::error::LinkError;
use crate::events::{self, EventSender, LinkEvent};
use crate::socket::{Listener, Transport};
use crate::state::ConnectionState;
use crate::time_sync::Clock;

/// Whether a kicked peer may come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickMode {
    Kick,
    KickBan,
}

pub struct Server {
    listener: Listener,
    config: LinkConfig,
    clock: Arc<dyn Clock>,
    events: EventSender,
    banned: Mutex<HashSet<String>>,
}

impl Server {
    /// Bind the listening socket.  The state stays NONE until the first
    /// [`Server::accept`].
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        config: LinkConfig,
        clock: Arc<dyn Clock>,
        events: EventSender,
    ) -> Result<Self, LinkError> {
        let listener = Listener::bind(addr).await?;
        log::info!("[link] server bound to {}", listener.local_addr);
        Ok(Self {
            listener,
            config,
            clock,
            events,
            banned: Mutex::new(HashSet::new()),
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.listener.local_addr
    }

    /// Enter LISTENING and wait for a peer that is not banned.
    pub async fn accept<M: Message>(&self) -> Result<Connection<M>, LinkError> {
        events::emit(
            &self.events,
            LinkEvent::StateChanged(ConnectionState::Listening),
        );
        loop {
            let stream = match self.listener.accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    events::emit(&self.events, LinkEvent::StateChanged(ConnectionState::None));
                    return Err(e);
                }
            };
            if let Err(e) = self.check_host(&stream.remote_host()) {
                log::info!("[link] refused: {e}");
                continue;
            }
            return Ok(Connection::establish(
                stream,
                Role::Server,
                self.config.clone(),
                Arc::clone(&self.clock),
                self.events.clone(),
            ));
        }
    }

    /// Drop the current peer; with [`KickMode::KickBan`] it is refused from
    /// now on.
    pub async fn kick<M: Message>(&self, connection: &Connection<M>, mode: KickMode) {
        if mode == KickMode::KickBan {
            self.ban(connection.remote_host());
        }
        log::info!("[link] kicking {} ({mode:?})", connection.remote_host());
        connection.close().await;
    }

    pub fn ban(&self, host: &str) {
        self.banned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.to_owned());
    }

    pub fn unban(&self, host: &str) -> bool {
        self.banned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(host)
    }

    /// `Err(Banned)` if `host` may not connect.
    pub fn check_host(&self, host: &str) -> Result<(), LinkError> {
        if self.is_banned(host) {
            return Err(LinkError::Banned(host.to_owned()));
        }
        Ok(())
    }

    pub fn is_banned(&self, host: &str) -> bool {
        self.banned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(host)
    }
}
