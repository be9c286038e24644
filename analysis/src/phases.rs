use crate::config::MetricsConfig;
use crate::types::{GamePhase, MoveEvaluation};

/// Assign a phase to every move, in order.
///
/// The opening covers plies up to `opening_ply_limit` and closes after the
/// first ply at which both sides have developed all but
/// `developed_minor_threshold` minor pieces. The endgame starts at the first
/// ply whose combined non-pawn material is at or below
/// `endgame_material_threshold` and never ends; it takes precedence over the
/// opening.
pub fn assign_phases(moves: &[MoveEvaluation], config: &MetricsConfig) -> Vec<GamePhase> {
    let mut opening_open = true;
    let mut in_endgame = false;

    moves
        .iter()
        .map(|mv| {
            if mv.non_pawn_material <= config.endgame_material_threshold {
                in_endgame = true;
            }

            let phase = if in_endgame {
                GamePhase::Endgame
            } else if opening_open && mv.ply <= config.opening_ply_limit {
                GamePhase::Opening
            } else {
                GamePhase::Middlegame
            };

            let developed = mv.undeveloped_minors_white <= config.developed_minor_threshold
                && mv.undeveloped_minors_black <= config.developed_minor_threshold;
            if developed || mv.ply >= config.opening_ply_limit {
                opening_open = false;
            }
            phase
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{MoveClassification, Side};
    use chess::AnalysisScore;

    /// Bare move evaluation for metric tests.
    pub(crate) fn mv(ply: u32, cp_loss: i32) -> MoveEvaluation {
        MoveEvaluation {
            ply,
            side: if ply % 2 == 1 { Side::White } else { Side::Black },
            san: format!("m{}", ply),
            uci: "a2a3".to_string(),
            eval_before: AnalysisScore::Centipawns(0),
            eval_after: AnalysisScore::Centipawns(0),
            best_move: Some("a2a3".to_string()),
            principal_variation: Vec::new(),
            cp_loss,
            classification: MoveClassification::from_cp_loss(cp_loss, &MetricsConfig::default()),
            depth: 12,
            time_spent_ms: None,
            is_critical: false,
            is_check: false,
            is_best_move: cp_loss == 0,
            non_pawn_material: 6200,
            undeveloped_minors_white: 4,
            undeveloped_minors_black: 4,
        }
    }

    #[test]
    fn test_opening_ends_at_ply_limit() {
        let moves: Vec<MoveEvaluation> = (1..=30).map(|ply| mv(ply, 0)).collect();
        let phases = assign_phases(&moves, &MetricsConfig::default());
        assert!(phases[..20].iter().all(|p| *p == GamePhase::Opening));
        assert!(phases[20..].iter().all(|p| *p == GamePhase::Middlegame));
    }

    #[test]
    fn test_opening_ends_early_once_developed() {
        let mut moves: Vec<MoveEvaluation> = (1..=12).map(|ply| mv(ply, 0)).collect();
        for m in moves.iter_mut().skip(7) {
            m.undeveloped_minors_white = 1;
            m.undeveloped_minors_black = 0;
        }
        let phases = assign_phases(&moves, &MetricsConfig::default());
        assert_eq!(phases[7], GamePhase::Opening);
        assert_eq!(phases[8], GamePhase::Middlegame);
        assert_eq!(phases[11], GamePhase::Middlegame);
    }

    #[test]
    fn test_endgame_overrides_and_sticks() {
        let mut moves: Vec<MoveEvaluation> = (1..=10).map(|ply| mv(ply, 0)).collect();
        moves[4].non_pawn_material = 2600;
        // Material count rising again (promotion) does not leave the endgame.
        moves[6].non_pawn_material = 3500;
        let phases = assign_phases(&moves, &MetricsConfig::default());
        assert_eq!(phases[3], GamePhase::Opening);
        assert!(phases[4..].iter().all(|p| *p == GamePhase::Endgame));
    }
}
