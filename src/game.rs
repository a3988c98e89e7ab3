use std::collections::HashSet;
use crate::board::{Board, Color, Piece, Position};
use crate::moves::{attacked_squares, piece_moves, Move};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("there is no piece on {0}")]
    NoPiece(Position),

    #[error("it is {turn}'s turn, not {mover}'s")]
    NotYourTurn { turn: Color, mover: Color },

    #[error("{0} is not a legal move")]
    IllegalMove(Move),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GameStatus {
    InProgress,
    Checkmate { winner: Color },
    Stalemate,
}

impl GameStatus {
    pub fn is_over(&self) -> bool {
        *self != GameStatus::InProgress
    }
}

/// Board plus side to move. Check, checkmate and stalemate are computed, never stored.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Game {
    board: Board,
    turn: Color,
}

impl Game {
    pub fn new() -> Self {
        Game { board: Board::standard(), turn: Color::White }
    }

    pub fn from_board(board: Board, turn: Color) -> Self {
        Game { board, turn }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn turn(&self) -> Color {
        self.turn
    }

    /// Legal moves of the piece on `position`, or `None` when the square is empty.
    pub fn valid_moves(&self, position: Position) -> Option<HashSet<Move>> {
        let piece = self.board.get(position)?;
        let moves = piece_moves(&self.board, position).into_iter()
            .filter(|m| {
                let mut board = self.board.deep_copy();
                apply(&mut board, piece, m);
                !king_attacked(&board, piece.color)
            })
            .collect();
        Some(moves)
    }

    pub fn make_move(&mut self, m: Move) -> Result<(), RuleError> {
        let piece = self.board.get(m.start).ok_or(RuleError::NoPiece(m.start))?;
        if piece.color != self.turn {
            return Err(RuleError::NotYourTurn { turn: self.turn, mover: piece.color });
        }
        let legal = self.valid_moves(m.start).is_some_and(|moves| moves.contains(&m));
        if !legal {
            return Err(RuleError::IllegalMove(m));
        }

        apply(&mut self.board, piece, &m);
        self.turn = self.turn.opposite();
        Ok(())
    }

    pub fn is_in_check(&self, color: Color) -> bool {
        king_attacked(&self.board, color)
    }

    pub fn is_in_checkmate(&self, color: Color) -> bool {
        self.is_in_check(color) && !self.has_legal_move(color)
    }

    pub fn is_in_stalemate(&self, color: Color) -> bool {
        !self.is_in_check(color) && !self.has_legal_move(color)
    }

    /// Result for the side to move.
    pub fn status(&self) -> GameStatus {
        if self.has_legal_move(self.turn) {
            GameStatus::InProgress
        }
        else if self.is_in_check(self.turn) {
            GameStatus::Checkmate { winner: self.turn.opposite() }
        }
        else {
            GameStatus::Stalemate
        }
    }

    fn has_legal_move(&self, color: Color) -> bool {
        self.board.pieces()
            .filter(|(_, piece)| piece.color == color)
            .any(|(position, _)| self.valid_moves(position).is_some_and(|moves| !moves.is_empty()))
    }
}

impl Default for Game {
    fn default() -> Self {
        Game::new()
    }
}

fn apply(board: &mut Board, piece: Piece, m: &Move) {
    let landed = match m.promotion {
        Some(kind) => Piece::new(piece.color, kind),
        None => piece,
    };
    board.set(m.start, None);
    board.set(m.end, Some(landed));
}

// A board without a king of that color counts as not in check.
fn king_attacked(board: &Board, color: Color) -> bool {
    match board.king_position(color) {
        None => false,
        Some(king) => attacked_squares(board, color.opposite()).contains(&king),
    }
}
