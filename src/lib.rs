//! `microtcp`: a reliable, ordered byte stream over UDP.
//!
//! Two endpoints set up a connection with a three-way handshake, exchange
//! bytes under a sliding window with slow start, congestion avoidance, fast
//! retransmit and window probing, and close it with a four-step teardown.
//! Every segment carries a CRC-32 over header and payload.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//!  │ handshake  │   │ transfer │   │ transfer │   │ teardown │
//!  │  connect   │   │   send   │   │   recv   │   │ shutdown │
//!  │  accept    │   └────┬─────┘   └────┬─────┘   └────┬─────┘
//!  └─────┬──────┘        │ SendWindow   │ Receiver     │
//!        │               │ Congestion   │              │
//!  ┌─────▼───────────────▼──────────────▼──────────────▼──┐
//!  │                     Connection                       │
//!  │        (state machine, counters, shared I/O)         │
//!  └─────┬────────────────────────────────────────────────┘
//!        │ Packet (header + payload, CRC-sealed)
//!  ┌─────▼──────┐
//!  │  Socket<D> │  D = tokio UdpSocket | simulator::SimSocket
//!  └────────────┘
//! ```
//!
//! Module map:
//! - [`packet`]: wire format and flags
//! - [`checksum`]: CRC-32 sealing and verification
//! - [`state`]: lifecycle states and their guards
//! - [`config`]: protocol constants and per-connection tunables
//! - [`socket`]: datagram transport abstraction
//! - [`connection`]: the connection object, its errors and statistics
//! - [`handshake`], [`transfer`], [`teardown`]: the public operations
//! - [`sender`], [`receiver`]: window bookkeeping without I/O
//! - [`simulator`]: fault-injecting in-memory link for tests

pub mod checksum;
pub mod config;
pub mod connection;
pub mod handshake;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod teardown;
pub mod transfer;

pub use config::{Config, ConfigError, MSS};
pub use connection::{ConnError, Connection, Stats};
pub use socket::{Datagram, Socket, SocketError};
pub use state::{ConnectionState, Role};
