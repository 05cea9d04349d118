//! Domain entities for peer-to-peer tic-tac-toe.
//!
//! This module contains pure game rules with no infrastructure dependencies.
//!
//! # What is "domain" here? (for beginners)
//!
//! The domain layer holds the rules that make the game what it is: which
//! cells exist, when a cell may be filled, and when a round is over.  It has
//! no idea whether a move came from the local keyboard or from the network
//! peer.  The session engine decides *who* may move; the domain only decides
//! *whether the board allows it* and *what the outcome is*.

/// The 3×3 grid, marks, and positions.
pub mod board;

/// Round outcome evaluation and the frozen-after-terminal round wrapper.
pub mod outcome;

/// Network roles and their fixed mapping to marks.
pub mod role;
