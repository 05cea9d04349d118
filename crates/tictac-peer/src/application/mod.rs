//! Application layer of the peer.
//!
//! # What lives here? (for beginners)
//!
//! The application layer sits between the pure rules in `tictac-core` and
//! the OS-facing infrastructure (sockets, timers, config files).  It:
//!
//! - **Orchestrates** the board, roles and protocol messages to run one
//!   networked (or local) game session.
//! - **Depends on abstractions** ([`ports`]) rather than concrete sockets or
//!   clocks, so it can be driven entirely in memory by tests.
//! - **Performs no I/O itself.**
//!
//! # Sub-modules
//!
//! - **`session`** – The per-peer protocol state machine: handshake, role
//!   conflict, starting-player decision, move exchange, rematch.
//! - **`ports`**   – The transport, timer and coin traits the session uses.
//! - **`view`**    – Events and snapshots handed to the presentation layer.

pub mod ports;
pub mod session;
pub mod view;

pub use ports::{
    CoinFlip, ConnectionState, LineTransport, StartScheduler, TransportError, TransportEvent,
};
pub use session::{Session, SessionConfig, SessionError};
pub use view::{SessionEvent, SessionPhase, SessionView};
