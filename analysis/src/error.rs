/// The move evaluations handed to the calculator cannot describe a whole game.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum InsufficientDataError {
    #[error("No move evaluations")]
    Empty,
    #[error("Ply {found} found where ply {expected} was expected")]
    NonContiguous { expected: u32, found: u32 },
    #[error("Game has {expected} plies but {actual} were evaluated")]
    PlyCountMismatch { expected: usize, actual: usize },
}
