use chess::{AnalysisScore, ReplayedPly};

use crate::config::MetricsConfig;
use crate::types::{MoveClassification, MoveEvaluation, Side};

/// Engine output around one played move.
///
/// Both scores are side-to-move relative, as the engine reports them: `before`
/// is from the mover's point of view, `after` from the opponent's.
#[derive(Debug, Clone, PartialEq)]
pub struct PlyEvaluation {
    pub before: AnalysisScore,
    pub after: AnalysisScore,
    pub best_move: Option<String>,
    pub principal_variation: Vec<String>,
    pub depth: u8,
}

/// Which side, if any, is winning according to a White-relative score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalZone {
    WhiteWinning,
    Balanced,
    BlackWinning,
}

impl EvalZone {
    pub fn of(score: AnalysisScore, decisive_threshold: i32) -> Self {
        let cp = score.to_cp();
        if cp >= decisive_threshold {
            Self::WhiteWinning
        } else if cp <= -decisive_threshold {
            Self::BlackWinning
        } else {
            Self::Balanced
        }
    }
}

/// Mover-relative loss of the played move, capped at `config.cp_loss_cap`.
pub fn cp_loss(eval: &PlyEvaluation, config: &MetricsConfig) -> i32 {
    let best_for_mover = eval.before.to_cp();
    let played_for_mover = -eval.after.to_cp();
    (best_for_mover - played_for_mover).clamp(0, config.cp_loss_cap)
}

/// Turn a replayed move and its engine scores into a [`MoveEvaluation`].
pub fn classify_move(
    ply: &ReplayedPly,
    eval: PlyEvaluation,
    time_spent_ms: Option<u64>,
    config: &MetricsConfig,
) -> MoveEvaluation {
    let cp_loss = cp_loss(&eval, config);
    let classification = MoveClassification::from_cp_loss(cp_loss, config);

    let eval_before = eval.before.for_white(ply.white_moved);
    let eval_after = eval.after.for_white(!ply.white_moved);
    let is_critical = EvalZone::of(eval_before, config.decisive_threshold)
        != EvalZone::of(eval_after, config.decisive_threshold);
    let is_best_move = eval.best_move.as_deref() == Some(ply.uci.as_str()) || cp_loss == 0;

    MoveEvaluation {
        ply: ply.ply,
        side: if ply.white_moved {
            Side::White
        } else {
            Side::Black
        },
        san: ply.san.clone(),
        uci: ply.uci.clone(),
        eval_before,
        eval_after,
        best_move: eval.best_move,
        principal_variation: eval.principal_variation,
        cp_loss,
        classification,
        depth: eval.depth,
        time_spent_ms,
        is_critical,
        is_check: ply.is_check,
        is_best_move,
        non_pawn_material: ply.non_pawn_material,
        undeveloped_minors_white: ply.undeveloped_minors_white,
        undeveloped_minors_black: ply.undeveloped_minors_black,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::replay_game;

    fn first_ply(tokens: &[&str]) -> Vec<ReplayedPly> {
        let moves: Vec<String> = tokens.iter().map(|s| s.to_string()).collect();
        replay_game(None, &moves).unwrap()
    }

    fn eval(before: AnalysisScore, after: AnalysisScore, best: &str) -> PlyEvaluation {
        PlyEvaluation {
            before,
            after,
            best_move: Some(best.to_string()),
            principal_variation: vec![best.to_string()],
            depth: 12,
        }
    }

    #[test]
    fn test_white_blunder() {
        let plies = first_ply(&["e2e4"]);
        // White was +0.30; after e4 Black (to move) sees +3.50 for itself.
        let mv = classify_move(
            &plies[0],
            eval(
                AnalysisScore::Centipawns(30),
                AnalysisScore::Centipawns(350),
                "d2d4",
            ),
            None,
            &MetricsConfig::default(),
        );
        assert_eq!(mv.cp_loss, 380);
        assert_eq!(mv.classification, MoveClassification::Blunder);
        assert_eq!(mv.eval_before, AnalysisScore::Centipawns(30));
        assert_eq!(mv.eval_after, AnalysisScore::Centipawns(-350));
        assert!(mv.is_critical);
        assert!(!mv.is_best_move);
        assert_eq!(mv.side, Side::White);
    }

    #[test]
    fn test_black_move_is_normalized_to_white() {
        let plies = first_ply(&["e2e4", "e7e5"]);
        // Black to move thinks it is -0.40; after e5 White (to move) sees +0.45.
        let mv = classify_move(
            &plies[1],
            eval(
                AnalysisScore::Centipawns(-40),
                AnalysisScore::Centipawns(45),
                "c7c5",
            ),
            Some(3200),
            &MetricsConfig::default(),
        );
        assert_eq!(mv.cp_loss, 5);
        assert_eq!(mv.eval_before, AnalysisScore::Centipawns(40));
        assert_eq!(mv.eval_after, AnalysisScore::Centipawns(45));
        assert_eq!(mv.classification, MoveClassification::Good);
        assert_eq!(mv.side, Side::Black);
        assert_eq!(mv.time_spent_ms, Some(3200));
        assert!(!mv.is_critical);
    }

    #[test]
    fn test_best_move_match_and_zero_loss() {
        let plies = first_ply(&["e2e4"]);
        let config = MetricsConfig::default();
        let matched = classify_move(
            &plies[0],
            eval(
                AnalysisScore::Centipawns(30),
                AnalysisScore::Centipawns(-10),
                "e2e4",
            ),
            None,
            &config,
        );
        assert!(matched.is_best_move);

        // Engine preferred another move but the played one scored at least as well.
        let improved = classify_move(
            &plies[0],
            eval(
                AnalysisScore::Centipawns(30),
                AnalysisScore::Centipawns(-60),
                "d2d4",
            ),
            None,
            &config,
        );
        assert_eq!(improved.cp_loss, 0);
        assert!(improved.is_best_move);
    }

    #[test]
    fn test_delivering_mate_loses_nothing() {
        let plies = first_ply(&["f3", "e5", "g4", "Qh4#"]);
        let mv = classify_move(
            &plies[3],
            eval(AnalysisScore::Mate(1), AnalysisScore::Mate(0), "d8h4"),
            None,
            &MetricsConfig::default(),
        );
        assert_eq!(mv.cp_loss, 0);
        assert_eq!(mv.eval_after, AnalysisScore::Mate(0));
        assert!(mv.is_check);
    }

    #[test]
    fn test_missed_mate_is_capped() {
        let plies = first_ply(&["e2e4"]);
        let mv = classify_move(
            &plies[0],
            eval(
                AnalysisScore::Mate(2),
                AnalysisScore::Centipawns(0),
                "d1h5",
            ),
            None,
            &MetricsConfig::default(),
        );
        assert_eq!(mv.cp_loss, 1000);
        assert_eq!(mv.classification, MoveClassification::Blunder);
    }

    #[test]
    fn test_zones() {
        assert_eq!(
            EvalZone::of(AnalysisScore::Centipawns(300), 300),
            EvalZone::WhiteWinning
        );
        assert_eq!(
            EvalZone::of(AnalysisScore::Centipawns(-299), 300),
            EvalZone::Balanced
        );
        assert_eq!(
            EvalZone::of(AnalysisScore::Mate(-4), 300),
            EvalZone::BlackWinning
        );
    }
}
