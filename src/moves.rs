use std::collections::HashSet;
use std::fmt;
use crate::board::{Board, Color, PieceType, Position};

const START_RANK_WHITE: u8 = 2;
const START_RANK_BLACK: u8 = 7;
const LAST_RANK_WHITE: u8 = 8;
const LAST_RANK_BLACK: u8 = 1;

const STRAIGHT: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const DIAGONAL: [(i8, i8); 4] = [(1, 1), (-1, 1), (-1, -1), (1, -1)];
const KNIGHT_JUMPS: [(i8, i8); 8] = [
    (2, 1), (1, 2), (-1, 2), (-2, 1),
    (-2, -1), (-1, -2), (1, -2), (2, -1)
];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Move {
    #[serde(rename = "startPosition")]
    pub start: Position,
    #[serde(rename = "endPosition")]
    pub end: Position,
    #[serde(rename = "promotionPiece", default)]
    pub promotion: Option<PieceType>,
}

impl Move {
    pub fn new(start: Position, end: Position) -> Self {
        Move { start, end, promotion: None }
    }

    pub fn promoting(start: Position, end: Position, promotion: PieceType) -> Self {
        Move { start, end, promotion: Some(promotion) }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.start, self.end)?;
        if let Some(promotion) = self.promotion {
            write!(f, " (promotes to {:?})", promotion)?;
        }
        Ok(())
    }
}

fn move_by_vector(board: &Board, vec: (i8, i8), from: Position, current_color: Color) -> Vec<Position> {
    let mut result = Vec::new();
    let mut next = from.offset(vec.0, vec.1);
    while let Some(square) = next {
        match board.get(square) {
            None => result.push(square),
            Some(piece) => {
                if piece.color != current_color {
                    result.push(square);
                }
                break
            }
        }
        next = square.offset(vec.0, vec.1);
    }
    result
}

fn move_straight(board: &Board, from: Position, color: Color) -> Vec<Position> {
    STRAIGHT.iter().flat_map(|&v| move_by_vector(board, v, from, color)).collect()
}

fn move_diagonally(board: &Board, from: Position, color: Color) -> Vec<Position> {
    DIAGONAL.iter().flat_map(|&v| move_by_vector(board, v, from, color)).collect()
}

fn step_to(board: &Board, from: Position, offsets: &[(i8, i8)], color: Color) -> Vec<Position> {
    offsets.iter()
        .filter_map(|&(r, c)| from.offset(r, c))
        .filter(|&square| board.get(square).map_or(true, |p| p.color != color))
        .collect()
}

fn pawn_moves(board: &Board, from: Position, color: Color) -> HashSet<Move> {
    let (forward, start_rank, last_rank) = match color {
        Color::White => (1, START_RANK_WHITE, LAST_RANK_WHITE),
        Color::Black => (-1, START_RANK_BLACK, LAST_RANK_BLACK),
    };

    let mut targets = Vec::new();
    if let Some(one) = from.offset(forward, 0).filter(|&s| board.get(s).is_none()) {
        targets.push(one);
        if from.row() == start_rank {
            if let Some(two) = one.offset(forward, 0).filter(|&s| board.get(s).is_none()) {
                targets.push(two);
            }
        }
    }
    targets.extend([-1, 1].iter()
        .filter_map(|&side| from.offset(forward, side))
        .filter(|&s| board.get(s).is_some_and(|p| p.color != color)));

    targets.into_iter()
        .flat_map(|to| {
            if to.row() == last_rank {
                PieceType::PROMOTIONS.iter().map(|&kind| Move::promoting(from, to, kind)).collect::<Vec<_>>()
            } else {
                vec![Move::new(from, to)]
            }
        })
        .collect()
}

/// Every move the piece's shape allows from `position`, without looking at the safety of its own king.
pub fn moves_for(kind: PieceType, color: Color, board: &Board, position: Position) -> HashSet<Move> {
    let targets = match kind {
        PieceType::King => step_to(board, position, &[STRAIGHT, DIAGONAL].concat(), color),
        PieceType::Queen => [move_straight(board, position, color), move_diagonally(board, position, color)].concat(),
        PieceType::Rook => move_straight(board, position, color),
        PieceType::Bishop => move_diagonally(board, position, color),
        PieceType::Knight => step_to(board, position, &KNIGHT_JUMPS, color),
        PieceType::Pawn => return pawn_moves(board, position, color),
    };
    targets.into_iter().map(|to| Move::new(position, to)).collect()
}

pub fn piece_moves(board: &Board, position: Position) -> HashSet<Move> {
    match board.get(position) {
        None => HashSet::new(),
        Some(piece) => moves_for(piece.kind, piece.color, board, position),
    }
}

/// Squares the pieces of `color` could move to or capture on.
pub fn attacked_squares(board: &Board, color: Color) -> HashSet<Position> {
    board.pieces()
        .filter(|(_, piece)| piece.color == color)
        .flat_map(|(position, piece)| moves_for(piece.kind, piece.color, board, position))
        .map(|m| m.end)
        .collect()
}
