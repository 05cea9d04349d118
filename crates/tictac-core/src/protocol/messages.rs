//! All peer-to-peer protocol message types.
//!
//! Every message is one line of UTF-8 text: a command word followed by
//! space-separated arguments.  Nothing on the wire carries a sequence number
//! or checksum; both peers rely on TCP delivering lines in order.
//!
//! | Line               | Sent by                | Meaning                                   |
//! |--------------------|------------------------|-------------------------------------------|
//! | `ROLE X`           | both, on connect       | announces the sender's role               |
//! | `ROLE_CONFLICT`    | either                 | both peers chose the same role            |
//! | `START O`          | `First` role only      | starting mark for this round              |
//! | `MOVE 1 2`         | the mover              | mark placed at row 1, column 2            |
//! | `WIN`              | the winner             | sender's last move completed a line       |
//! | `RESET`            | either                 | force an immediate board reset            |
//! | `REMATCH`          | either                 | sender wants another round                |
//!
//! The handshake-success signal (`HELLO`) is synthesized inside the session
//! engine and never crosses the wire, so it has no variant here.

use std::fmt;

use crate::domain::board::{Mark, Position};

/// Command words as they appear on the wire.
pub mod command {
    pub const ROLE: &str = "ROLE";
    pub const ROLE_CONFLICT: &str = "ROLE_CONFLICT";
    pub const START: &str = "START";
    pub const MOVE: &str = "MOVE";
    pub const WIN: &str = "WIN";
    pub const RESET: &str = "RESET";
    pub const REMATCH: &str = "REMATCH";
}

/// One decoded protocol line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMessage {
    /// `ROLE <X|O>`: the sender's role, expressed as the mark it plays.
    Role(Mark),
    /// `ROLE_CONFLICT`
    RoleConflict,
    /// `START <X|O>`: which mark moves first this round.
    Start(Mark),
    /// `MOVE <row> <col>`: the sender placed its mark at this position.
    Move(Position),
    /// `WIN`
    Win,
    /// `RESET`
    Reset,
    /// `REMATCH`
    Rematch,
}

impl PeerMessage {
    /// The command word for this message.
    pub fn command(&self) -> &'static str {
        match self {
            PeerMessage::Role(_) => command::ROLE,
            PeerMessage::RoleConflict => command::ROLE_CONFLICT,
            PeerMessage::Start(_) => command::START,
            PeerMessage::Move(_) => command::MOVE,
            PeerMessage::Win => command::WIN,
            PeerMessage::Reset => command::RESET,
            PeerMessage::Rematch => command::REMATCH,
        }
    }
}

impl fmt::Display for PeerMessage {
    /// Formats the message as its wire line, without the trailing newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerMessage::Role(mark) | PeerMessage::Start(mark) => {
                write!(f, "{} {mark}", self.command())
            }
            PeerMessage::Move(pos) => write!(f, "{} {} {}", self.command(), pos.row(), pos.col()),
            _ => f.write_str(self.command()),
        }
    }
}
