//! What the presentation layer sees: session events and read-only snapshots.

use std::fmt;
use std::net::SocketAddr;

use tictac_core::{Board, Mark, Position, Role, RoundOutcome};

use super::ports::ConnectionState;

/// Coarse progress of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No role selected.
    #[default]
    Idle,
    /// Role selected, not connected.
    RoleSelected,
    /// Listening for, or connecting to, the peer.
    AwaitingPeer,
    /// Raw connection up, waiting for the peer's `ROLE`.
    Verifying,
    /// Roles verified, starting mark not yet decided.
    Starting,
    /// A round is in progress.
    Playing,
    /// The round ended in a win or a draw.
    RoundOver,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::RoleSelected => "role selected",
            SessionPhase::AwaitingPeer => "awaiting peer",
            SessionPhase::Verifying => "verifying",
            SessionPhase::Starting => "starting",
            SessionPhase::Playing => "playing",
            SessionPhase::RoundOver => "round over",
        };
        f.write_str(s)
    }
}

/// Notifications emitted by the session, in the order its state changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Human-readable status line.
    StatusChanged(String),
    /// A cell was filled.
    CellChanged { position: Position, mark: Mark },
    /// The board was cleared for a new round.
    BoardReset,
    /// The mark allowed to move next, or `None` while no one may move.
    TurnChanged(Option<Mark>),
    /// The round reached a win or a draw.
    RoundFinished(RoundOutcome),
    ConnectionChanged(ConnectionState),
    PhaseChanged(SessionPhase),
    /// Rematch flags after a local request or a peer's `REMATCH`.
    RematchChanged { local: bool, remote: bool },
    /// Both peers selected `mark`; the connection is being torn down.
    RoleConflict { mark: Mark },
    /// A user-facing error message.
    Error(String),
}

/// Read-only snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub role: Option<Role>,
    pub phase: SessionPhase,
    pub connection: ConnectionState,
    pub board: Board,
    pub outcome: RoundOutcome,
    /// The mark allowed to move next.
    pub whose_turn: Option<Mark>,
    /// `true` when a networked peer holds the turn, or in local play.
    pub my_turn: bool,
    pub starting_mark: Option<Mark>,
    pub start_decided: bool,
    pub rematch_requested_by_local: bool,
    pub rematch_requested_by_remote: bool,
    pub status: String,
    pub peer_addr: SocketAddr,
}

impl SessionView {
    /// Short game status for the footer line.
    pub fn game_status(&self) -> &'static str {
        if self.rematch_requested_by_local {
            "Rematch requested"
        } else if self.rematch_requested_by_remote {
            "Rematch pending"
        } else if self.outcome.is_terminal() {
            "Game finished"
        } else if self.connection.is_connected() && self.start_decided {
            "Playing"
        } else if self.connection.is_connected() {
            "Starting soon"
        } else {
            "Idle"
        }
    }

    /// One-line summary: `IP: 127.0.0.1 | Port: 5050 | Role: X | Game: Playing`.
    pub fn footer(&self) -> String {
        let role = self
            .role
            .map_or_else(|| "None".to_string(), |r| r.to_string());
        format!(
            "IP: {} | Port: {} | Role: {} | Game: {}",
            self.peer_addr.ip(),
            self.peer_addr.port(),
            role,
            self.game_status()
        )
    }
}
