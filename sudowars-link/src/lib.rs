//! `sudowars-link`: reliable, clock-synchronised command link between the
//! two peers of a Sudowars duel.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  Message::encode   ┌──────────────┐
//!  │  Application │───────────────────▶│  Connection  │◀── LinkEvent channel
//!  └──────────────┘◀───────────────────└──────┬───────┘
//!        poll_command / poll_delivered        │ frames
//!                          ┌──────────────────┼──────────────────┐
//!                     ┌────▼────┐       ┌─────▼─────┐      ┌─────▼──────┐
//!                     │ Ledger  │       │  packet   │      │ TimeSyncer │
//!                     └─────────┘       └─────┬─────┘      └────────────┘
//!                                             │ bytes
//!                                       ┌─────▼─────┐
//!                                       │ Transport │  (TCP, duplex, simulator)
//!                                       └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     : wire format, checksum, control/command classification
//! - [`ledger`]     : unacknowledged outbound packets, id allocation
//! - [`time_sync`]  : clock offset exchange and corrected timestamps
//! - [`connection`] : reader/sender/sync tasks and the public handle
//! - [`server`]     : listening endpoint, kick and ban
//! - [`state`]      : connection state machine types
//! - [`events`]     : notifications for the application
//! - [`config`]     : tunable parameters
//! - [`socket`]     : transport trait and TCP helpers
//! - [`simulator`]  : fault-injecting in-memory transport

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod ledger;
pub mod packet;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod time_sync;

pub use config::LinkConfig;
pub use connection::{Connection, Message, Role};
pub use error::LinkError;
pub use events::LinkEvent;
pub use server::{KickMode, Server};
pub use state::ConnectionState;
pub use time_sync::{Clock, ManualClock, MonotonicClock};
