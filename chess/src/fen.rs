use cozy_chess::Board;

/// FEN of the standard starting position.
pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Parse a FEN string into a Board
pub fn parse_fen(fen: &str) -> Result<Board, FenError> {
    if fen.split_whitespace().next().is_none() {
        return Err(FenError::Empty);
    }
    fen.parse()
        .map_err(|_| FenError::InvalidFormat(fen.to_string()))
}

/// Format a Board as a FEN string
pub fn format_fen(board: &Board) -> String {
    board.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum FenError {
    #[error("Empty FEN")]
    Empty,
    #[error("Invalid FEN: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_fen_roundtrip() {
        let board = parse_fen(START_FEN).unwrap();
        assert_eq!(format_fen(&board), START_FEN);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(parse_fen("   "), Err(FenError::Empty)));
        assert!(matches!(
            parse_fen("not a fen"),
            Err(FenError::InvalidFormat(_))
        ));
    }
}
