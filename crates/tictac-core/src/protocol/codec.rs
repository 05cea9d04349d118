//! Text codec for encoding and decoding protocol lines.
//!
//! Wire format:
//! ```text
//! <COMMAND>[ <arg>]*\n
//! ```
//! Tokens are separated by whitespace; runs of whitespace collapse.  The
//! command word is matched case-insensitively.  Argument counts must match
//! exactly.  The newline delimiter is handled by [`crate::LineFramer`] and the
//! transport, not by this codec.

use thiserror::Error;

use crate::domain::board::{Mark, Position};
use crate::protocol::messages::{command, PeerMessage};

/// Errors that can occur while decoding a protocol line.
///
/// The session engine drops every line that fails to decode; these variants
/// exist so the drop can be logged with a useful reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line contained no tokens.
    #[error("empty line")]
    Empty,

    /// The command word is not part of the protocol vocabulary.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The command has the wrong number of arguments.
    #[error("{command} expects {expected} argument(s), got {got}")]
    WrongArity {
        command: &'static str,
        expected: usize,
        got: usize,
    },

    /// A mark argument was not `X` or `O`.
    #[error("invalid mark: {0}")]
    InvalidMark(String),

    /// A coordinate argument was not an integer.
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// A coordinate was an integer outside `0..=2`.
    #[error("coordinate ({row}, {col}) is outside the board")]
    CoordinateOutOfRange { row: i64, col: i64 },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`PeerMessage`] as a wire line without the trailing newline.
///
/// # Examples
///
/// ```rust
/// use tictac_core::{encode_line, decode_line, Mark, PeerMessage};
///
/// let line = encode_line(&PeerMessage::Start(Mark::O));
/// assert_eq!(line, "START O");
/// assert_eq!(decode_line(&line).unwrap(), PeerMessage::Start(Mark::O));
/// ```
pub fn encode_line(msg: &PeerMessage) -> String {
    msg.to_string()
}

/// Decodes one protocol line.
///
/// Leading and trailing whitespace is ignored.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the line is empty, names an unknown command,
/// has the wrong number of arguments, or carries an invalid argument.
///
/// # Examples
///
/// ```rust
/// use tictac_core::{decode_line, PeerMessage, Position};
///
/// let msg = decode_line("move  2 0").unwrap();
/// assert_eq!(msg, PeerMessage::Move(Position::new(2, 0).unwrap()));
/// ```
pub fn decode_line(line: &str) -> Result<PeerMessage, ProtocolError> {
    let mut tokens = line.split_whitespace();
    let word = tokens.next().ok_or(ProtocolError::Empty)?;
    let args: Vec<&str> = tokens.collect();

    let cmd = word.to_ascii_uppercase();
    match cmd.as_str() {
        command::ROLE => {
            expect_arity(command::ROLE, &args, 1)?;
            Ok(PeerMessage::Role(parse_mark(args[0])?))
        }
        command::ROLE_CONFLICT => {
            expect_arity(command::ROLE_CONFLICT, &args, 0)?;
            Ok(PeerMessage::RoleConflict)
        }
        command::START => {
            expect_arity(command::START, &args, 1)?;
            Ok(PeerMessage::Start(parse_mark(args[0])?))
        }
        command::MOVE => {
            expect_arity(command::MOVE, &args, 2)?;
            let row = parse_coordinate(args[0])?;
            let col = parse_coordinate(args[1])?;
            Ok(PeerMessage::Move(to_position(row, col)?))
        }
        command::WIN => {
            expect_arity(command::WIN, &args, 0)?;
            Ok(PeerMessage::Win)
        }
        command::RESET => {
            expect_arity(command::RESET, &args, 0)?;
            Ok(PeerMessage::Reset)
        }
        command::REMATCH => {
            expect_arity(command::REMATCH, &args, 0)?;
            Ok(PeerMessage::Rematch)
        }
        _ => Err(ProtocolError::UnknownCommand(word.to_string())),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn expect_arity(
    command: &'static str,
    args: &[&str],
    expected: usize,
) -> Result<(), ProtocolError> {
    if args.len() != expected {
        return Err(ProtocolError::WrongArity {
            command,
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn parse_mark(token: &str) -> Result<Mark, ProtocolError> {
    token.parse().map_err(ProtocolError::InvalidMark)
}

fn parse_coordinate(token: &str) -> Result<i64, ProtocolError> {
    token
        .parse::<i64>()
        .map_err(|_| ProtocolError::InvalidCoordinate(token.to_string()))
}

fn to_position(row: i64, col: i64) -> Result<Position, ProtocolError> {
    let out_of_range = || ProtocolError::CoordinateOutOfRange { row, col };
    let r = usize::try_from(row).map_err(|_| out_of_range())?;
    let c = usize::try_from(col).map_err(|_| out_of_range())?;
    Position::new(r, c).map_err(|_| out_of_range())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
