//! Round outcome evaluation.
//!
//! After every placement the eight possible lines are scanned in a fixed
//! order: the three rows (top to bottom), the three columns (left to right),
//! the main diagonal, then the anti-diagonal.  The first complete line wins.
//! That order is the tie-break when one placement completes two lines at once.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::board::{Board, BoardError, Cell, Mark, Position, BOARD_SIZE};

/// One of the eight lines that can win a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WinLine {
    /// Row index 0–2.
    Row(u8),
    /// Column index 0–2.
    Column(u8),
    /// Top-left to bottom-right.
    MainDiagonal,
    /// Top-right to bottom-left.
    AntiDiagonal,
}

impl WinLine {
    /// All lines in evaluation order.
    pub const ALL: [WinLine; 8] = [
        WinLine::Row(0),
        WinLine::Row(1),
        WinLine::Row(2),
        WinLine::Column(0),
        WinLine::Column(1),
        WinLine::Column(2),
        WinLine::MainDiagonal,
        WinLine::AntiDiagonal,
    ];

    /// The three cells that make up this line.
    pub fn positions(self) -> [Position; 3] {
        let cell = Position::from_indices;
        let last = BOARD_SIZE - 1;
        match self {
            WinLine::Row(r) => {
                let r = usize::from(r).min(last);
                [cell(r, 0), cell(r, 1), cell(r, 2)]
            }
            WinLine::Column(c) => {
                let c = usize::from(c).min(last);
                [cell(0, c), cell(1, c), cell(2, c)]
            }
            WinLine::MainDiagonal => [cell(0, 0), cell(1, 1), cell(2, 2)],
            WinLine::AntiDiagonal => [cell(0, last), cell(1, 1), cell(last, 0)],
        }
    }

    fn is_complete_for(self, board: &Board, mark: Mark) -> bool {
        self.positions()
            .iter()
            .all(|&p| board.get(p) == Cell::Marked(mark))
    }
}

/// Result of evaluating a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoundOutcome {
    #[default]
    InProgress,
    Win {
        mark: Mark,
        line: WinLine,
    },
    Draw,
}

impl RoundOutcome {
    /// `true` for a win or a draw.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RoundOutcome::InProgress)
    }

    /// The winning mark, if any.
    pub fn winner(self) -> Option<Mark> {
        match self {
            RoundOutcome::Win { mark, .. } => Some(mark),
            _ => None,
        }
    }
}

/// Returns the first complete line of `mark`, in evaluation order.
pub fn winning_line(board: &Board, mark: Mark) -> Option<WinLine> {
    WinLine::ALL
        .into_iter()
        .find(|line| line.is_complete_for(board, mark))
}

/// Evaluates the board from the perspective of `mark`, the mark just placed.
///
/// Only `mark` can have completed a line with the last placement, so only its
/// lines are scanned.  A full board with no line for `mark` is a draw.
pub fn evaluate_for(board: &Board, mark: Mark) -> RoundOutcome {
    if let Some(line) = winning_line(board, mark) {
        return RoundOutcome::Win { mark, line };
    }
    if board.is_full() {
        RoundOutcome::Draw
    } else {
        RoundOutcome::InProgress
    }
}

// ── Round ─────────────────────────────────────────────────────────────────────

/// A board plus its outcome.
///
/// Once the outcome is terminal the round is frozen: further placements are
/// rejected until [`Round::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Round {
    board: Board,
    outcome: RoundOutcome,
}

impl Round {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn outcome(&self) -> RoundOutcome {
        self.outcome
    }

    pub fn is_over(&self) -> bool {
        self.outcome.is_terminal()
    }

    /// Places `mark` at `pos` and evaluates the board for `mark`.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::RoundOver`] if the round is frozen, or
    /// [`BoardError::Occupied`] if the cell is taken.
    pub fn place(&mut self, pos: Position, mark: Mark) -> Result<RoundOutcome, BoardError> {
        if self.is_over() {
            return Err(BoardError::RoundOver);
        }
        self.board.place(pos, mark)?;
        self.outcome = evaluate_for(&self.board, mark);
        if self.outcome.is_terminal() {
            debug!(outcome = ?self.outcome, "round reached terminal outcome");
        }
        Ok(self.outcome)
    }

    /// Re-runs the win check for `mark` without placing anything.
    ///
    /// Used when the peer announces a win: the receiver already holds the
    /// winning mark on its board and replays the check locally.  A round that
    /// is already over keeps its outcome.
    pub fn recheck(&mut self, mark: Mark) -> RoundOutcome {
        if !self.is_over() {
            self.outcome = evaluate_for(&self.board, mark);
        }
        self.outcome
    }

    /// Clears the board and the outcome.
    pub fn reset(&mut self) {
        self.board.clear();
        self.outcome = RoundOutcome::InProgress;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(row: usize, col: usize) -> Position {
        Position::new(row, col).unwrap()
    }

    /// Builds a board from three strings such as `"XO."`.
    fn board_from(rows: [&str; 3]) -> Board {
        let mut board = Board::new();
        for (r, row) in rows.iter().enumerate() {
            for (c, ch) in row.chars().enumerate() {
                match ch {
                    'X' => board.place(pos(r, c), Mark::X).unwrap(),
                    'O' => board.place(pos(r, c), Mark::O).unwrap(),
                    _ => {}
                }
            }
        }
        board
    }

    #[test]
    fn test_win_line_positions_anti_diagonal() {
        assert_eq!(
            WinLine::AntiDiagonal.positions(),
            [pos(0, 2), pos(1, 1), pos(2, 0)]
        );
    }

    #[test]
    fn test_evaluate_for_detects_every_line() {
        let cases = [
            (["XXX", "...", "..."], WinLine::Row(0)),
            (["...", "XXX", "..."], WinLine::Row(1)),
            (["...", "...", "XXX"], WinLine::Row(2)),
            (["X..", "X..", "X.."], WinLine::Column(0)),
            ([".X.", ".X.", ".X."], WinLine::Column(1)),
            (["..X", "..X", "..X"], WinLine::Column(2)),
            (["X..", ".X.", "..X"], WinLine::MainDiagonal),
            (["..X", ".X.", "X.."], WinLine::AntiDiagonal),
        ];
        for (rows, expected) in cases {
            let board = board_from(rows);
            assert_eq!(
                evaluate_for(&board, Mark::X),
                RoundOutcome::Win {
                    mark: Mark::X,
                    line: expected
                },
                "board {rows:?}"
            );
        }
    }

    #[test]
    fn test_evaluate_for_ignores_other_mark() {
        let board = board_from(["OOO", "X.X", "..."]);
        assert_eq!(evaluate_for(&board, Mark::X), RoundOutcome::InProgress);
    }

    #[test]
    fn test_row_beats_column_when_both_complete() {
        // Arrange – X completes row 0 and column 0 with the same placement.
        let board = board_from(["XXX", "XO.", "XO."]);

        // Act / Assert
        assert_eq!(winning_line(&board, Mark::X), Some(WinLine::Row(0)));
    }

    #[test]
    fn test_column_beats_diagonal_when_both_complete() {
        let board = board_from(["O.X", "OXX", "X.X"]);
        assert_eq!(winning_line(&board, Mark::X), Some(WinLine::Column(2)));
    }

    #[test]
    fn test_main_diagonal_beats_anti_diagonal() {
        let board = board_from(["X.X", ".X.", "X.X"]);
        assert_eq!(winning_line(&board, Mark::X), Some(WinLine::MainDiagonal));
    }

    #[test]
    fn test_full_board_without_line_is_draw() {
        let board = board_from(["XOX", "XOO", "OXX"]);
        assert_eq!(evaluate_for(&board, Mark::X), RoundOutcome::Draw);
        assert_eq!(evaluate_for(&board, Mark::O), RoundOutcome::Draw);
    }

    #[test]
    fn test_round_freezes_after_win() {
        // Arrange
        let mut round = Round::new();
        round.place(pos(0, 0), Mark::X).unwrap();
        round.place(pos(0, 1), Mark::X).unwrap();
        let outcome = round.place(pos(0, 2), Mark::X).unwrap();
        assert!(outcome.is_terminal());

        // Act
        let result = round.place(pos(2, 2), Mark::O);

        // Assert
        assert_eq!(result, Err(BoardError::RoundOver));
        assert!(round.board().get(pos(2, 2)).is_empty());
    }

    #[test]
    fn test_round_recheck_keeps_existing_terminal_outcome() {
        let mut round = Round::new();
        for c in 0..3 {
            round.place(pos(1, c), Mark::O).unwrap();
        }
        let before = round.outcome();
        assert_eq!(round.recheck(Mark::X), before);
    }

    #[test]
    fn test_round_reset_clears_outcome_and_board() {
        let mut round = Round::new();
        for c in 0..3 {
            round.place(pos(0, c), Mark::X).unwrap();
        }
        round.reset();
        assert_eq!(round.outcome(), RoundOutcome::InProgress);
        assert_eq!(round.board().filled_count(), 0);
    }
}
