//! Ports: the traits the session engine depends on.
//!
//! The [`Session`](crate::application::session::Session) never touches a
//! socket, a clock, or a random number generator directly.  It talks to three
//! injected collaborators:
//!
//! - [`LineTransport`] – moves newline-delimited text lines to and from the
//!   peer and reports connection changes as [`TransportEvent`]s.
//! - [`StartScheduler`] – arms the one-shot delay before the starting-player
//!   decision.
//! - [`CoinFlip`] – picks the starting mark.
//!
//! # Why traits here? (for beginners)
//!
//! Production wires in the tokio TCP transport, a tokio sleep timer and a
//! `rand`-backed coin.  Tests wire in an in-memory loopback transport, a
//! manual timer that fires only when the test says so, and a coin with a
//! scripted sequence of results.  The session code is identical in both cases.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tictac_core::Mark;

/// Errors raised synchronously by a transport.
///
/// Asynchronous failures (a connect attempt that is refused, a read error on
/// an established stream) are reported as [`TransportEvent::Error`] instead.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listening socket could not be bound.
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// An outbound connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred on an established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection state as observed by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Listening {
        port: u16,
    },
    Connecting,
    Connected {
        peer: SocketAddr,
    },
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Listening { port } => write!(f, "listening on port {port}"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected { peer } => write!(f, "connected to {peer}"),
        }
    }
}

/// Events a transport delivers to the session, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The acceptor is bound and waiting for the peer.
    Listening { port: u16 },
    /// A raw connection to the peer is up.
    Connected { peer: SocketAddr },
    /// One complete, non-empty, trimmed line arrived from the peer.
    LineReceived(String),
    /// A human-readable network failure.
    Error(String),
    /// The connection ended without a local `disconnect_all`: the peer
    /// closed it, a read failed, or a connect attempt failed.
    Disconnected,
    /// Acknowledges one `disconnect_all`.
    ///
    /// Queued under the same lock that tears the link down, so every event
    /// ahead of it belongs to the torn-down link and every event behind it to
    /// the next one.
    Closed,
}

/// Moves text lines between this peer and the remote peer.
///
/// Implementations report progress through an event channel handed out at
/// construction; these methods only start work and never block on the network.
pub trait LineTransport: Send + Sync {
    /// Binds `addr` and waits for one inbound connection.
    ///
    /// Further inbound connections while one is active are accepted and
    /// immediately closed.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BindFailed`] if the address cannot be bound.
    fn start_listening(&self, addr: SocketAddr) -> Result<(), TransportError>;

    /// Starts an outbound connection attempt to `addr`.
    ///
    /// Completion is reported as [`TransportEvent::Connected`]; failure as
    /// [`TransportEvent::Error`] followed by [`TransportEvent::Disconnected`].
    fn start_connecting(&self, addr: SocketAddr);

    /// Queues `line` (without delimiter) for the peer.  No-op when not connected.
    fn send_line(&self, line: &str);

    /// Tears down the connection and the acceptor.
    ///
    /// Safe to call at any time.  Each call queues exactly one
    /// [`TransportEvent::Closed`]; no other event of the torn-down link is
    /// queued after it.
    fn disconnect_all(&self);

    fn is_connected(&self) -> bool;
}

/// Arms the one-shot delay before the starting-player decision.
///
/// When the delay elapses the implementation hands `epoch` back to the
/// session's owner, which calls
/// [`Session::on_start_timer`](crate::application::session::Session::on_start_timer).
/// The session ignores firings whose epoch is no longer current, so a timer
/// never needs to be cancelled explicitly.
#[cfg_attr(test, mockall::automock)]
pub trait StartScheduler: Send + Sync {
    fn schedule_start(&self, epoch: u64, delay: Duration);
}

/// Source of starting marks.
#[cfg_attr(test, mockall::automock)]
pub trait CoinFlip: Send + Sync {
    /// Returns `X` or `O`, each with probability one half in production.
    fn starting_mark(&self) -> Mark;
}
