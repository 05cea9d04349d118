//! # tictac-core
//!
//! Shared library for peer-to-peer tic-tac-toe containing the board rules,
//! role and mark types, the newline-delimited text protocol codec, and the
//! stream framer that turns raw TCP bytes into protocol lines.
//!
//! It has zero dependencies on sockets, timers, or async runtimes, so the
//! session engine in `tictac-peer` can be tested entirely in memory.
//!
//! # Architecture overview (for beginners)
//!
//! Two peers play over one TCP connection without a server in between.  Each
//! peer runs the same session state machine and derives the same game state
//! from the same sequence of text lines.  This crate is the foundation both
//! peers agree on:
//!
//! - **`domain`** – The 3×3 board, the two marks (`X`, `O`), the two roles
//!   (`First` plays `X` and hosts, `Second` plays `O` and connects), and the
//!   round outcome evaluation (win line scan order, draw detection).
//!
//! - **`protocol`** – How lines travel over the wire.  Messages such as
//!   `MOVE 1 2` or `START X` are parsed into a typed [`PeerMessage`] and
//!   formatted back into text.  The [`LineFramer`] reassembles lines that
//!   arrive split across several reads.

pub mod domain;
pub mod protocol;

pub use domain::board::{Board, BoardError, Cell, Mark, Position, BOARD_SIZE};
pub use domain::outcome::{Round, RoundOutcome, WinLine};
pub use domain::role::Role;
pub use protocol::codec::{decode_line, encode_line, ProtocolError};
pub use protocol::framing::LineFramer;
pub use protocol::messages::PeerMessage;
