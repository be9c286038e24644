pub mod analysis;
pub mod fen;
pub mod replay;
pub mod san;
pub mod uci;

pub use analysis::{is_white_ply, AnalysisScore};
pub use fen::{format_fen, parse_fen, FenError, START_FEN};
pub use replay::{replay_game, ReplayError, ReplayedPly};
pub use san::{format_san, legal_moves, parse_san, SanError};
pub use uci::{format_uci_move, parse_uci_move, resolve_uci_move, UciMoveError};
