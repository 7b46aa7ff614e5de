//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::connection::Connection`] can
//! occupy and the guards the protocol modules consult before acting.  The
//! transitions themselves are performed by [`crate::handshake`],
//! [`crate::transfer`] and [`crate::teardown`].
//!
//! ```text
//!  Unready ──bind──▶ Bound ──accept──┐
//!     │                              ▼
//!     └──────────connect──────▶ Established
//!                                 │       │
//!                     local close │       │ peer FIN seen by recv
//!                                 ▼       ▼
//!               ClosingAsInitiator     ClosingAsResponder
//!                                 │       │
//!                                 ▼       ▼
//!                                  Closed
//!
//!  any state ──fatal error──▶ Invalid   (sticky)
//! ```

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Freshly created; neither bound for listening nor connected.
    #[default]
    Unready,
    /// Bound to a local address; ready to `accept`.
    Bound,
    /// Three-way handshake complete; data transfer in progress.
    Established,
    /// Local side sent FIN and had it acknowledged; waiting for the peer's FIN.
    ClosingAsInitiator,
    /// Peer's FIN received and acknowledged; local FIN still to be sent.
    ClosingAsResponder,
    /// Teardown finished; the transport has been released.
    Closed,
    /// Unrecoverable protocol or transport failure.  Every further operation
    /// is refused.
    Invalid,
}

impl ConnectionState {
    /// `accept` is only legal on a bound connection.
    pub fn can_accept(self) -> bool {
        self == Self::Bound
    }

    /// `connect` binds an ephemeral endpoint implicitly, so it works from
    /// either pre-handshake state.
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Unready | Self::Bound)
    }

    pub fn can_send(self) -> bool {
        self == Self::Established
    }

    /// Reads stay legal after the peer closed so the buffered tail can drain.
    pub fn can_recv(self) -> bool {
        matches!(self, Self::Established | Self::ClosingAsResponder)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Invalid)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Which side of the handshake this connection played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sent the SYN (`connect`).
    Initiator,
    /// Answered the SYN (`accept`).
    Responder,
}
