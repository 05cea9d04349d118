//! The 3×3 board and its cell, mark and position types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of rows (and columns) on the board.
pub const BOARD_SIZE: usize = 3;

/// Errors returned when a placement is rejected by the board.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BoardError {
    /// The coordinates fall outside the 3×3 grid.
    #[error("position ({row}, {col}) is outside the board")]
    OutOfRange { row: usize, col: usize },
    /// The target cell already holds a mark.
    #[error("cell ({row}, {col}) is already occupied")]
    Occupied { row: usize, col: usize },
    /// The round already reached a win or a draw.
    #[error("round is over; no further placements accepted")]
    RoundOver,
}

// ── Marks ─────────────────────────────────────────────────────────────────────

/// One of the two playable symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    /// Both marks, `X` first.
    pub const ALL: [Mark; 2] = [Mark::X, Mark::O];

    /// Returns the other mark.
    ///
    /// Only two marks exist, so "the mark that is not mine" is always the
    /// opponent's.  Remote moves rely on this to infer which mark to place.
    pub fn opponent(self) -> Mark {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }

    /// The single-character wire token for this mark.
    pub fn as_str(self) -> &'static str {
        match self {
            Mark::X => "X",
            Mark::O => "O",
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mark {
    type Err = String;

    /// Parses `X` or `O`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("x") {
            Ok(Mark::X)
        } else if s.eq_ignore_ascii_case("o") {
            Ok(Mark::O)
        } else {
            Err(s.to_string())
        }
    }
}

// ── Cells and positions ───────────────────────────────────────────────────────

/// Contents of a single board cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Cell {
    #[default]
    Empty,
    Marked(Mark),
}

impl Cell {
    /// Returns the mark in this cell, if any.
    pub fn mark(self) -> Option<Mark> {
        match self {
            Cell::Empty => None,
            Cell::Marked(m) => Some(m),
        }
    }

    pub fn is_empty(self) -> bool {
        self == Cell::Empty
    }
}

/// A validated 0-based (row, column) coordinate on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    row: usize,
    col: usize,
}

impl Position {
    /// Creates a position, rejecting coordinates outside the grid.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::OutOfRange`] if either coordinate is `>= 3`.
    pub fn new(row: usize, col: usize) -> Result<Self, BoardError> {
        if row >= BOARD_SIZE || col >= BOARD_SIZE {
            return Err(BoardError::OutOfRange { row, col });
        }
        Ok(Self { row, col })
    }

    /// Builds a position from indices already known to be in range.
    pub(crate) const fn from_indices(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    pub fn row(self) -> usize {
        self.row
    }

    pub fn col(self) -> usize {
        self.col
    }

    /// Iterates over all nine positions in row-major order.
    pub fn all() -> impl Iterator<Item = Position> {
        (0..BOARD_SIZE).flat_map(|row| (0..BOARD_SIZE).map(move |col| Position { row, col }))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

// ── Board ─────────────────────────────────────────────────────────────────────

/// The 3×3 grid.
///
/// The board only enforces "a filled cell never changes".  Turn order and the
/// frozen-after-terminal rule live in [`crate::Round`] and the session engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
}

impl Board {
    /// Creates an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the contents of the cell at `pos`.
    pub fn get(&self, pos: Position) -> Cell {
        self.cells[pos.row][pos.col]
    }

    /// Writes `mark` into an empty cell.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::Occupied`] if the cell already holds a mark.
    pub fn place(&mut self, pos: Position, mark: Mark) -> Result<(), BoardError> {
        let cell = &mut self.cells[pos.row][pos.col];
        if !cell.is_empty() {
            return Err(BoardError::Occupied {
                row: pos.row,
                col: pos.col,
            });
        }
        *cell = Cell::Marked(mark);
        Ok(())
    }

    /// Returns `true` when all nine cells hold a mark.
    pub fn is_full(&self) -> bool {
        self.cells.iter().flatten().all(|c| !c.is_empty())
    }

    /// Number of filled cells.
    pub fn filled_count(&self) -> usize {
        self.cells.iter().flatten().filter(|c| !c.is_empty()).count()
    }

    /// Empties every cell.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Row-major view of the raw cells.
    pub fn rows(&self) -> &[[Cell; BOARD_SIZE]; BOARD_SIZE] {
        &self.cells
    }
}

impl fmt::Display for Board {
    /// Renders the board as three lines such as `X.O`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.cells.iter().enumerate() {
            for cell in row {
                let ch = match cell {
                    Cell::Empty => ".",
                    Cell::Marked(m) => m.as_str(),
                };
                f.write_str(ch)?;
            }
            if i + 1 < BOARD_SIZE {
                f.write_str("\n")?;
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(row: usize, col: usize) -> Position {
        Position::new(row, col).unwrap()
    }

    #[test]
    fn test_mark_opponent_is_the_other_mark() {
        assert_eq!(Mark::X.opponent(), Mark::O);
        assert_eq!(Mark::O.opponent(), Mark::X);
    }

    #[test]
    fn test_mark_from_str_is_case_insensitive() {
        assert_eq!("x".parse::<Mark>(), Ok(Mark::X));
        assert_eq!("O".parse::<Mark>(), Ok(Mark::O));
        assert!("Z".parse::<Mark>().is_err());
    }

    #[test]
    fn test_position_new_rejects_out_of_range() {
        assert_eq!(
            Position::new(3, 0),
            Err(BoardError::OutOfRange { row: 3, col: 0 })
        );
        assert!(Position::new(2, 5).is_err());
        assert!(Position::new(2, 2).is_ok());
    }

    #[test]
    fn test_position_all_yields_nine_in_row_major_order() {
        let all: Vec<_> = Position::all().collect();
        assert_eq!(all.len(), 9);
        assert_eq!(all[0], pos(0, 0));
        assert_eq!(all[1], pos(0, 1));
        assert_eq!(all[3], pos(1, 0));
        assert_eq!(all[8], pos(2, 2));
    }

    #[test]
    fn test_place_fills_empty_cell() {
        // Arrange
        let mut board = Board::new();

        // Act
        board.place(pos(1, 1), Mark::X).unwrap();

        // Assert
        assert_eq!(board.get(pos(1, 1)), Cell::Marked(Mark::X));
        assert_eq!(board.filled_count(), 1);
    }

    #[test]
    fn test_place_rejects_occupied_cell_and_keeps_original_mark() {
        // Arrange
        let mut board = Board::new();
        board.place(pos(0, 2), Mark::O).unwrap();

        // Act
        let result = board.place(pos(0, 2), Mark::X);

        // Assert – a filled cell never changes
        assert_eq!(result, Err(BoardError::Occupied { row: 0, col: 2 }));
        assert_eq!(board.get(pos(0, 2)), Cell::Marked(Mark::O));
    }

    #[test]
    fn test_is_full_only_after_nine_placements() {
        let mut board = Board::new();
        for (i, p) in Position::all().enumerate() {
            assert!(!board.is_full());
            let mark = if i % 2 == 0 { Mark::X } else { Mark::O };
            board.place(p, mark).unwrap();
        }
        assert!(board.is_full());
    }

    #[test]
    fn test_clear_empties_all_cells() {
        let mut board = Board::new();
        board.place(pos(0, 0), Mark::X).unwrap();
        board.clear();
        assert_eq!(board, Board::new());
    }

    #[test]
    fn test_display_renders_three_rows() {
        let mut board = Board::new();
        board.place(pos(0, 0), Mark::X).unwrap();
        board.place(pos(2, 2), Mark::O).unwrap();
        assert_eq!(board.to_string(), "X..\n...\n..O");
    }
}
