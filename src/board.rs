//! 3x3 board, move application and win/draw evaluation.
//!
//! Cells are stored row-major (rows 0-2, 3-5, 6-8). Player 0 plays `X`,
//! player 1 plays `O`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Number of cells on the board.
pub const CELL_COUNT: usize = 9;

/// Winning lines in evaluation order: rows, then columns, then diagonals.
pub const WIN_LINES: [[usize; 3]; 8] = [
    // Rows
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    // Columns
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    // Diagonals
    [0, 4, 8],
    [2, 4, 6],
];

/// One of the two seats in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Player {
    /// Player 0, plays `X` and always moves first.
    First,
    /// Player 1, plays `O`.
    Second,
}

impl Player {
    /// Both players in slot order.
    pub const ALL: [Player; 2] = [Player::First, Player::Second];

    /// Zero-based index used for slots and in `GAME_STATE`.
    pub fn index(self) -> usize {
        match self {
            Player::First => 0,
            Player::Second => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Player::First),
            1 => Some(Player::Second),
            _ => None,
        }
    }

    /// One-based number announced in `PLAYER:<n>`.
    pub fn number(self) -> usize {
        self.index() + 1
    }

    pub fn opponent(self) -> Self {
        match self {
            Player::First => Player::Second,
            Player::Second => Player::First,
        }
    }

    pub fn mark(self) -> char {
        match self {
            Player::First => 'X',
            Player::Second => 'O',
        }
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Mark(Player),
}

impl Cell {
    fn to_char(self) -> char {
        match self {
            Cell::Empty => ' ',
            Cell::Mark(player) => player.mark(),
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            ' ' => Some(Cell::Empty),
            'X' => Some(Cell::Mark(Player::First)),
            'O' => Some(Cell::Mark(Player::Second)),
            _ => None,
        }
    }
}

/// Classification of a board. Always derived from the cells, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Win(Player),
    Draw,
}

/// Reason a move cannot be applied to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IllegalMove {
    #[error("cell {0} is outside the board")]
    OutOfRange(usize),
    #[error("cell {0} is already occupied")]
    Occupied(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Board {
    cells: [Cell; CELL_COUNT],
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `player`'s mark on `index`. The board is left untouched on error.
    pub fn apply_move(&mut self, index: usize, player: Player) -> Result<(), IllegalMove> {
        let cell = self
            .cells
            .get_mut(index)
            .ok_or(IllegalMove::OutOfRange(index))?;
        if *cell != Cell::Empty {
            return Err(IllegalMove::Occupied(index));
        }
        *cell = Cell::Mark(player);
        Ok(())
    }

    /// Returns the first completed line in [`WIN_LINES`] order, then `Draw`
    /// for a full board, otherwise `Continue`.
    pub fn evaluate(&self) -> Outcome {
        for [a, b, c] in WIN_LINES {
            if let Cell::Mark(player) = self.cells[a] {
                if self.cells[b] == self.cells[a] && self.cells[c] == self.cells[a] {
                    return Outcome::Win(player);
                }
            }
        }

        if self.is_full() {
            Outcome::Draw
        } else {
            Outcome::Continue
        }
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|cell| *cell != Cell::Empty)
    }

    pub fn reset(&mut self) {
        self.cells = [Cell::Empty; CELL_COUNT];
    }

    /// Nine characters in cell order: space, `X` or `O`.
    pub fn serialize(&self) -> String {
        self.cells.iter().map(|cell| cell.to_char()).collect()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

/// Error parsing the nine-character board encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardParseError {
    #[error("board must have 9 cells, got {0}")]
    Length(usize),
    #[error("invalid cell character {0:?}")]
    Cell(char),
}

impl FromStr for Board {
    type Err = BoardParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let len = s.chars().count();
        if len != CELL_COUNT {
            return Err(BoardParseError::Length(len));
        }

        let mut board = Board::new();
        for (slot, c) in board.cells.iter_mut().zip(s.chars()) {
            *slot = Cell::from_char(c).ok_or(BoardParseError::Cell(c))?;
        }
        Ok(board)
    }
}
