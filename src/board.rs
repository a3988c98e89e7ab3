use std::fmt;
use serde::Serializer;

pub const WIDTH: usize = 8;
pub const HEIGHT: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PieceType {
    King,
    Queen,
    Bishop,
    Knight,
    Rook,
    Pawn,
}

impl PieceType {
    pub const PROMOTIONS: [PieceType; 4] = [PieceType::Queen, PieceType::Rook, PieceType::Bishop, PieceType::Knight];

    fn icon(&self) -> char {
        match self {
            PieceType::King => 'K',
            PieceType::Queen => 'Q',
            PieceType::Rook => 'R',
            PieceType::Bishop => 'B',
            PieceType::Knight => 'N',
            PieceType::Pawn => 'P',
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Color {
    White, Black
}

impl Color {
    pub fn opposite(&self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "WHITE"),
            Color::Black => write!(f, "BLACK"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Piece {
    pub color: Color,
    pub kind: PieceType
}

impl Piece {
    pub fn new(color: Color, kind: PieceType) -> Self {
        Piece { color, kind }
    }

    fn icon(&self) -> char {
        match self.color {
            Color::White => self.kind.icon(),
            Color::Black => self.kind.icon().to_ascii_lowercase(),
        }
    }
}

#[derive(serde::Deserialize)]
struct RawPosition {
    row: i32,
    col: i32,
}

/// A square on the board, 1-based: row 1 is White's back rank, column 1 is the a-file.
///
/// Positions can only be built in range, so board accessors never have to check them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawPosition")]
pub struct Position {
    row: u8,
    col: u8,
}

impl Position {
    pub fn new(row: u8, col: u8) -> Option<Position> {
        let in_range = |x: u8| x >= 1 && x as usize <= HEIGHT;
        (in_range(row) && in_range(col)).then_some(Position { row, col })
    }

    pub fn row(&self) -> u8 {
        self.row
    }

    pub fn col(&self) -> u8 {
        self.col
    }

    pub fn offset(&self, d_row: i8, d_col: i8) -> Option<Position> {
        let row = self.row as i8 + d_row;
        let col = self.col as i8 + d_col;
        if row < 1 || col < 1 {
            return None;
        }
        Position::new(row as u8, col as u8)
    }

    /// Every square, row by row starting from row 1.
    pub fn all() -> impl Iterator<Item = Position> {
        (1..=HEIGHT as u8).flat_map(|row| (1..=WIDTH as u8).map(move |col| Position { row, col }))
    }

    fn index(&self) -> (usize, usize) {
        (self.row as usize - 1, self.col as usize - 1)
    }
}

impl TryFrom<RawPosition> for Position {
    type Error = String;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        u8::try_from(raw.row).ok()
            .zip(u8::try_from(raw.col).ok())
            .and_then(|(row, col)| Position::new(row, col))
            .ok_or_else(|| format!("position ({}, {}) is off the board", raw.row, raw.col))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.col - 1) as char, self.row)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Board {
    squares: [[Option<Piece>; WIDTH]; HEIGHT],
}

impl Board {
    pub fn empty() -> Board {
        Board { squares: [new_empty(); HEIGHT] }
    }

    pub fn standard() -> Board {
        let mut board = Board::empty();
        board.reset_to_standard_start();
        board
    }

    pub fn get(&self, position: Position) -> Option<Piece> {
        let (row, col) = position.index();
        self.squares[row][col]
    }

    pub fn set(&mut self, position: Position, piece: Option<Piece>) {
        let (row, col) = position.index();
        self.squares[row][col] = piece;
    }

    /// Independent copy used for speculative moves; pieces are plain values so nothing is shared.
    pub fn deep_copy(&self) -> Board {
        Board { squares: self.squares }
    }

    pub fn reset_to_standard_start(&mut self) {
        self.squares = [
            new_pieces(Color::White),
            new_pawns(Color::White),
            new_empty(),
            new_empty(),
            new_empty(),
            new_empty(),
            new_pawns(Color::Black),
            new_pieces(Color::Black)
        ];
    }

    pub fn pieces(&self) -> impl Iterator<Item = (Position, Piece)> + '_ {
        Position::all().filter_map(move |p| self.get(p).map(|piece| (p, piece)))
    }

    pub fn king_position(&self, color: Color) -> Option<Position> {
        self.pieces()
            .find(|(_, piece)| piece.color == color && piece.kind == PieceType::King)
            .map(|(p, _)| p)
    }
}

impl Default for Board {
    fn default() -> Self {
        Board::standard()
    }
}

/// Eight lines, row 8 first, one char per square: upper case for White, lower case for Black.
impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.squares.iter().rev().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            for square in row {
                let icon = square.map_or(' ', |p| p.icon());
                write!(f, "{}", icon)?;
            }
        }
        Ok(())
    }
}

impl serde::Serialize for Board {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where S: Serializer {
        serializer.collect_str(self)
    }
}

fn new_pieces(color: Color) -> [Option<Piece>; WIDTH] {
    [
        Some(Piece::new(color, PieceType::Rook)),
        Some(Piece::new(color, PieceType::Knight)),
        Some(Piece::new(color, PieceType::Bishop)),
        Some(Piece::new(color, PieceType::Queen)),
        Some(Piece::new(color, PieceType::King)),
        Some(Piece::new(color, PieceType::Bishop)),
        Some(Piece::new(color, PieceType::Knight)),
        Some(Piece::new(color, PieceType::Rook))
    ]
}

fn new_pawns(color: Color) -> [Option<Piece>; WIDTH] {
    [Some(Piece::new(color, PieceType::Pawn)); WIDTH]
}

fn new_empty() -> [Option<Piece>; WIDTH] {
    [None; WIDTH]
}
