//! Network roles.
//!
//! A peer picks its role before connecting.  The role fixes both the mark it
//! plays and its job in the connection: `First` plays `X`, listens for the
//! peer, and decides who starts each round; `Second` plays `O`, connects to
//! the listener, and applies the start decision it receives.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::board::Mark;

/// A peer's fixed side for a networked session.
///
/// "No role yet" is modelled as `Option<Role>::None` by the session engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Plays `X`, hosts the connection, decides the starting mark.
    #[serde(rename = "x", alias = "X", alias = "first", alias = "host")]
    First,
    /// Plays `O`, connects to the host, receives the starting mark.
    #[serde(rename = "o", alias = "O", alias = "second", alias = "client")]
    Second,
}

impl Role {
    /// The mark this role plays.
    pub fn mark(self) -> Mark {
        match self {
            Role::First => Mark::X,
            Role::Second => Mark::O,
        }
    }

    /// The role that plays `mark`.
    pub fn from_mark(mark: Mark) -> Role {
        match mark {
            Mark::X => Role::First,
            Mark::O => Role::Second,
        }
    }

    /// `true` for the role responsible for the starting-player decision.
    pub fn decides_start(self) -> bool {
        self == Role::First
    }
}

impl fmt::Display for Role {
    /// Displays the role by its mark, as the protocol does.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.mark(), f)
    }
}

impl FromStr for Role {
    type Err = String;

    /// Accepts a mark (`x`, `o`) or a role name (`first`, `second`, `host`, `client`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(mark) = s.parse::<Mark>() {
            return Ok(Role::from_mark(mark));
        }
        match s.to_ascii_lowercase().as_str() {
            "first" | "host" => Ok(Role::First),
            "second" | "client" => Ok(Role::Second),
            _ => Err(format!("unknown role '{s}' (expected x or o)")),
        }
    }
}
