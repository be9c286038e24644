//! Standard Algebraic Notation formatting and parsing.

use cozy_chess::{Board, GameStatus, Move, Piece};

use crate::uci::{file_char, format_square, piece_char, rank_char};

/// Collect every legal move in a position.
pub fn legal_moves(board: &Board) -> Vec<Move> {
    let mut moves = Vec::new();
    board.generate_moves(|piece_moves| {
        moves.extend(piece_moves);
        false
    });
    moves
}

/// Format a legal move as SAN, including the check (`+`) or mate (`#`) suffix.
pub fn format_san(board: &Board, mv: Move) -> String {
    let mut san = format_san_body(board, mv);

    let mut after = board.clone();
    if after.try_play(mv).is_ok() && !after.checkers().is_empty() {
        san.push(if after.status() == GameStatus::Won {
            '#'
        } else {
            '+'
        });
    }
    san
}

/// SAN without the check/mate suffix.
fn format_san_body(board: &Board, mv: Move) -> String {
    let stm = board.side_to_move();
    let Some(piece) = board.piece_on(mv.from) else {
        return format!("{}{}", format_square(mv.from), format_square(mv.to));
    };

    if piece == Piece::King && board.colors(stm).has(mv.to) {
        return if mv.to.file() as u8 > mv.from.file() as u8 {
            "O-O".to_string()
        } else {
            "O-O-O".to_string()
        };
    }

    let is_capture = board.colors(!stm).has(mv.to)
        || (piece == Piece::Pawn && mv.from.file() != mv.to.file());

    let mut san = String::new();
    if piece == Piece::Pawn {
        if is_capture {
            san.push(file_char(mv.from.file()));
        }
    } else {
        san.push(piece_char(piece));

        let rivals: Vec<Move> = legal_moves(board)
            .into_iter()
            .filter(|other| {
                other.to == mv.to
                    && other.from != mv.from
                    && board.piece_on(other.from) == Some(piece)
            })
            .collect();
        if !rivals.is_empty() {
            let shares_file = rivals.iter().any(|o| o.from.file() == mv.from.file());
            let shares_rank = rivals.iter().any(|o| o.from.rank() == mv.from.rank());
            if !shares_file {
                san.push(file_char(mv.from.file()));
            } else if !shares_rank {
                san.push(rank_char(mv.from.rank()));
            } else {
                san.push_str(&format_square(mv.from));
            }
        }
    }

    if is_capture {
        san.push('x');
    }
    san.push_str(&format_square(mv.to));

    if let Some(promo) = mv.promotion {
        san.push('=');
        san.push(piece_char(promo));
    }
    san
}

/// Parse a SAN token against a position.
///
/// Check/mate suffixes and annotation glyphs (`!`, `?`) are ignored, as is the
/// `e.p.` marker. Zero-style castling (`0-0`) is accepted.
pub fn parse_san(board: &Board, san: &str) -> Result<Move, SanError> {
    let cleaned = normalize_san(san);
    if cleaned.is_empty() {
        return Err(SanError::InvalidFormat(san.to_string()));
    }

    let mut matches = legal_moves(board)
        .into_iter()
        .filter(|mv| format_san_body(board, *mv) == cleaned);

    match (matches.next(), matches.next()) {
        (Some(mv), None) => Ok(mv),
        (Some(_), Some(_)) => Err(SanError::AmbiguousMove(san.to_string())),
        (None, _) => Err(SanError::NoLegalMove(san.to_string())),
    }
}

fn normalize_san(san: &str) -> String {
    let trimmed = san
        .trim()
        .trim_end_matches("e.p.")
        .trim_end_matches(|c| matches!(c, '+' | '#' | '!' | '?'));
    trimmed.replace('0', "O")
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SanError {
    #[error("No legal move found for: {0}")]
    NoLegalMove(String),
    #[error("Ambiguous move: {0}")]
    AmbiguousMove(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}
