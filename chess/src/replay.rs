//! Replaying a recorded move list into per-ply positions and board features.

use cozy_chess::{Board, Color, File, GameStatus, Piece, Rank, Square};
use serde::{Deserialize, Serialize};

use crate::fen::{format_fen, parse_fen, START_FEN};
use crate::san::{format_san, parse_san};
use crate::uci::{format_uci_move, resolve_uci_move};

/// One played move together with the positions around it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayedPly {
    /// 1-based ply number.
    pub ply: u32,
    pub fen_before: String,
    pub fen_after: String,
    pub uci: String,
    pub san: String,
    pub white_moved: bool,
    pub is_check: bool,
    /// No legal replies exist after the move (checkmate or stalemate).
    pub is_terminal: bool,
    pub is_checkmate: bool,
    /// Combined non-pawn material of both sides after the move, in centipawns.
    pub non_pawn_material: u32,
    pub undeveloped_minors_white: u8,
    pub undeveloped_minors_black: u8,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("Invalid start position: {0}")]
    InvalidFen(String),
    #[error("Illegal or unparseable move '{token}' at ply {ply}")]
    IllegalMove { ply: u32, token: String },
}

/// Replay `moves` from `start_fen` (or the standard start position).
///
/// Each token is tried as UCI first and then as SAN.
pub fn replay_game(
    start_fen: Option<&str>,
    moves: &[String],
) -> Result<Vec<ReplayedPly>, ReplayError> {
    let fen = start_fen.unwrap_or(START_FEN);
    let mut board = parse_fen(fen).map_err(|e| ReplayError::InvalidFen(e.to_string()))?;

    let mut plies = Vec::with_capacity(moves.len());
    for (idx, token) in moves.iter().enumerate() {
        let ply = idx as u32 + 1;
        let token = token.trim();
        let illegal = || ReplayError::IllegalMove {
            ply,
            token: token.to_string(),
        };

        let mv = match resolve_uci_move(&board, token) {
            Some(mv) => mv,
            None => parse_san(&board, token).map_err(|_| illegal())?,
        };

        let fen_before = format_fen(&board);
        let white_moved = board.side_to_move() == Color::White;
        let uci = format_uci_move(&board, mv);
        let san = format_san(&board, mv);
        board.try_play(mv).map_err(|_| illegal())?;

        let status = board.status();
        plies.push(ReplayedPly {
            ply,
            fen_before,
            fen_after: format_fen(&board),
            uci,
            san,
            white_moved,
            is_check: !board.checkers().is_empty(),
            is_terminal: !has_legal_move(&board),
            is_checkmate: status == GameStatus::Won,
            non_pawn_material: non_pawn_material(&board),
            undeveloped_minors_white: undeveloped_minors(&board, Color::White),
            undeveloped_minors_black: undeveloped_minors(&board, Color::Black),
        });
    }

    Ok(plies)
}

fn has_legal_move(board: &Board) -> bool {
    board.generate_moves(|_| true)
}

/// Combined non-pawn material of both sides in centipawns (N=B=300, R=500, Q=900).
pub fn non_pawn_material(board: &Board) -> u32 {
    [
        (Piece::Knight, 300),
        (Piece::Bishop, 300),
        (Piece::Rook, 500),
        (Piece::Queen, 900),
    ]
    .iter()
    .map(|(piece, value)| board.pieces(*piece).len() * value)
    .sum()
}

/// Knights and bishops of `color` still standing on their original squares.
pub fn undeveloped_minors(board: &Board, color: Color) -> u8 {
    let rank = match color {
        Color::White => Rank::First,
        Color::Black => Rank::Eighth,
    };
    let own = board.colors(color);
    let knights = board.pieces(Piece::Knight) & own;
    let bishops = board.pieces(Piece::Bishop) & own;

    let knight_home = [File::B, File::G]
        .iter()
        .filter(|f| knights.has(Square::new(**f, rank)))
        .count();
    let bishop_home = [File::C, File::F]
        .iter()
        .filter(|f| bishops.has(Square::new(**f, rank)))
        .count();
    (knight_home + bishop_home) as u8
}
