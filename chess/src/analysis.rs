//! Engine score type shared by the engine adapter, the classifier and the server.

use serde::{Deserialize, Serialize};

/// Centipawn value used to rank mate scores above any material evaluation.
const MATE_CP: i32 = 30000;

/// Engine evaluation score.
///
/// Centipawns: positive = side-to-move is better.
/// Mate: positive N = side-to-move mates in N moves,
/// negative N = side-to-move gets mated in N moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum AnalysisScore {
    Centipawns(i32),
    Mate(i32),
}

impl AnalysisScore {
    pub fn display(&self) -> String {
        match self {
            Self::Centipawns(cp) => format!("{:+.2}", *cp as f64 / 100.0),
            Self::Mate(m) => {
                if *m > 0 {
                    format!("+M{}", m)
                } else {
                    format!("-M{}", m.abs())
                }
            }
        }
    }

    /// Convert to centipawns for comparison. Mate scores use large values,
    /// shorter mates ranking further from zero.
    pub fn to_cp(&self) -> i32 {
        match self {
            Self::Centipawns(cp) => *cp,
            Self::Mate(m) => {
                if *m > 0 {
                    MATE_CP - *m * 100
                } else {
                    -MATE_CP - *m * 100
                }
            }
        }
    }

    /// Negate the score (flip perspective).
    pub fn negate(&self) -> Self {
        match self {
            Self::Centipawns(cp) => Self::Centipawns(-cp),
            Self::Mate(m) => Self::Mate(-m),
        }
    }

    /// Re-express a side-to-move score from White's point of view.
    pub fn for_white(&self, white_to_move: bool) -> Self {
        if white_to_move {
            *self
        } else {
            self.negate()
        }
    }
}

/// Returns true if the given 1-indexed ply belongs to White.
/// Convention: odd plies (1, 3, 5, …) are White moves; even plies (2, 4, 6, …) are Black.
pub fn is_white_ply(ply: u32) -> bool {
    ply % 2 == 1
}

impl std::fmt::Display for AnalysisScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_to_cp() {
        assert_eq!(AnalysisScore::Centipawns(50).to_cp(), 50);
        assert_eq!(AnalysisScore::Centipawns(-100).to_cp(), -100);
        assert!(AnalysisScore::Mate(3).to_cp() > 10000);
        assert!(AnalysisScore::Mate(-3).to_cp() < -10000);
        assert!(AnalysisScore::Mate(1).to_cp() > AnalysisScore::Mate(5).to_cp());
    }

    #[test]
    fn test_mated_now_is_worst_score() {
        assert_eq!(AnalysisScore::Mate(0).to_cp(), -MATE_CP);
        assert!(AnalysisScore::Mate(0).to_cp() < AnalysisScore::Mate(-1).to_cp());
    }

    #[test]
    fn test_for_white_flips_black_scores() {
        let score = AnalysisScore::Centipawns(40);
        assert_eq!(score.for_white(true), AnalysisScore::Centipawns(40));
        assert_eq!(score.for_white(false), AnalysisScore::Centipawns(-40));
        assert_eq!(AnalysisScore::Mate(2).for_white(false), AnalysisScore::Mate(-2));
    }

    #[test]
    fn test_display() {
        assert_eq!(AnalysisScore::Centipawns(35).to_string(), "+0.35");
        assert_eq!(AnalysisScore::Centipawns(-120).to_string(), "-1.20");
        assert_eq!(AnalysisScore::Mate(3).to_string(), "+M3");
        assert_eq!(AnalysisScore::Mate(-2).to_string(), "-M2");
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&AnalysisScore::Mate(-2)).unwrap();
        assert_eq!(json, r#"{"kind":"mate","value":-2}"#);
    }

    #[test]
    fn test_ply_side() {
        assert!(is_white_ply(1));
        assert!(!is_white_ply(2));
        assert!(is_white_ply(41));
    }
}
