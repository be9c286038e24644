use crate::config::MetricsConfig;
use crate::error::InsufficientDataError;
use crate::phases::assign_phases;
use crate::types::{
    CriticalMoment, GameMetrics, GamePhase, GameSummary, MoveClassification, MoveEvaluation,
    PhaseMetrics, Side, SideMetrics, TacticalMetrics, TimeManagement,
};

/// Accuracy percentage for a set of moves.
///
/// `accuracy = 100 - 100 * avg_cp_loss / accuracy_ceiling`, clamped to [0, 100].
/// Losses are capped at `cp_loss_cap` before averaging. An empty set scores 100.
/// A non-positive ceiling is treated as the smallest positive one.
pub fn compute_accuracy<'a, I>(moves: I, config: &MetricsConfig) -> f64
where
    I: IntoIterator<Item = &'a MoveEvaluation>,
{
    match average_cp_loss(moves, config) {
        None => 100.0,
        Some(avg) => {
            let ceiling = config.accuracy_ceiling.max(f64::EPSILON);
            (100.0 - 100.0 * avg / ceiling).clamp(0.0, 100.0)
        }
    }
}

fn average_cp_loss<'a, I>(moves: I, config: &MetricsConfig) -> Option<f64>
where
    I: IntoIterator<Item = &'a MoveEvaluation>,
{
    let (total, count) = moves.into_iter().fold((0.0, 0u32), |(total, count), mv| {
        (total + mv.cp_loss.min(config.cp_loss_cap) as f64, count + 1)
    });
    (count > 0).then(|| total / count as f64)
}

/// Check that `moves` covers plies `1..=expected_plies` in order.
fn validate(moves: &[MoveEvaluation], expected_plies: usize) -> Result<(), InsufficientDataError> {
    if moves.is_empty() {
        return Err(InsufficientDataError::Empty);
    }
    if moves.len() != expected_plies {
        return Err(InsufficientDataError::PlyCountMismatch {
            expected: expected_plies,
            actual: moves.len(),
        });
    }
    for (idx, mv) in moves.iter().enumerate() {
        let expected = idx as u32 + 1;
        if mv.ply != expected {
            return Err(InsufficientDataError::NonContiguous {
                expected,
                found: mv.ply,
            });
        }
    }
    Ok(())
}

/// Compute per-side, per-phase metrics for one fully evaluated game.
pub fn compute_game_metrics(
    game_id: &str,
    moves: &[MoveEvaluation],
    expected_plies: usize,
    subject: Side,
    config: &MetricsConfig,
) -> Result<GameMetrics, InsufficientDataError> {
    validate(moves, expected_plies)?;

    let phases = assign_phases(moves, config);
    let opportunities = tactical_opportunities(moves, config);

    let white = side_metrics(Side::White, moves, &phases, &opportunities, config);
    let black = side_metrics(Side::Black, moves, &phases, &opportunities, config);
    let critical_moments = critical_moments(moves);

    let subject_metrics = match subject {
        Side::White => &white,
        Side::Black => &black,
    };
    let summary = summarize(subject_metrics);

    Ok(GameMetrics {
        game_id: game_id.to_string(),
        total_plies: moves.len() as u32,
        subject,
        white,
        black,
        critical_moments,
        summary,
    })
}

/// For each move, whether the opponent's previous move handed over an opportunity.
fn tactical_opportunities(moves: &[MoveEvaluation], config: &MetricsConfig) -> Vec<bool> {
    let mut flags = Vec::with_capacity(moves.len());
    let mut previous: Option<&MoveEvaluation> = None;
    for mv in moves {
        flags.push(previous.is_some_and(|prev| {
            prev.side != mv.side && prev.cp_loss >= config.opportunity_threshold
        }));
        previous = Some(mv);
    }
    flags
}

fn count(moves: &[&MoveEvaluation], classification: MoveClassification) -> u32 {
    moves
        .iter()
        .filter(|mv| mv.classification == classification)
        .count() as u32
}

fn phase_metrics(
    phase: GamePhase,
    moves: &[&MoveEvaluation],
    opportunities: u32,
    config: &MetricsConfig,
) -> PhaseMetrics {
    PhaseMetrics {
        phase,
        accuracy: compute_accuracy(moves.iter().copied(), config),
        moves: moves.len() as u32,
        inaccuracies: count(moves, MoveClassification::Inaccuracy),
        mistakes: count(moves, MoveClassification::Mistake),
        blunders: count(moves, MoveClassification::Blunder),
        tactical_opportunities: opportunities,
        best_moves: moves.iter().filter(|mv| mv.is_best_move).count() as u32,
        average_cp_loss: average_cp_loss(moves.iter().copied(), config).unwrap_or(0.0),
    }
}

fn side_metrics(
    side: Side,
    moves: &[MoveEvaluation],
    phases: &[GamePhase],
    opportunities: &[bool],
    config: &MetricsConfig,
) -> SideMetrics {
    let indexed: Vec<usize> = (0..moves.len()).filter(|&i| moves[i].side == side).collect();
    let own: Vec<&MoveEvaluation> = indexed.iter().map(|&i| &moves[i]).collect();

    let phase_breakdown = GamePhase::ALL
        .iter()
        .map(|&phase| {
            let in_phase: Vec<usize> = indexed
                .iter()
                .copied()
                .filter(|&i| phases[i] == phase)
                .collect();
            let phase_moves: Vec<&MoveEvaluation> = in_phase.iter().map(|&i| &moves[i]).collect();
            let phase_opportunities = in_phase.iter().filter(|&&i| opportunities[i]).count() as u32;
            phase_metrics(phase, &phase_moves, phase_opportunities, config)
        })
        .collect();

    let opportunity_moves: Vec<&MoveEvaluation> = indexed
        .iter()
        .filter(|&&i| opportunities[i])
        .map(|&i| &moves[i])
        .collect();
    let successes = opportunity_moves
        .iter()
        .filter(|mv| mv.cp_loss < config.inaccuracy_threshold)
        .count() as u32;
    let tactics = TacticalMetrics {
        opportunities: opportunity_moves.len() as u32,
        successes,
        success_rate: (!opportunity_moves.is_empty())
            .then(|| successes as f64 / opportunity_moves.len() as f64),
    };

    SideMetrics {
        side,
        accuracy: compute_accuracy(own.iter().copied(), config),
        moves: own.len() as u32,
        average_cp_loss: average_cp_loss(own.iter().copied(), config).unwrap_or(0.0),
        inaccuracies: count(&own, MoveClassification::Inaccuracy),
        mistakes: count(&own, MoveClassification::Mistake),
        blunders: count(&own, MoveClassification::Blunder),
        best_moves: own.iter().filter(|mv| mv.is_best_move).count() as u32,
        phases: phase_breakdown,
        tactics,
        time_management: time_management(&own, config),
    }
}

/// Time statistics over the moves that carry clock data.
fn time_management(moves: &[&MoveEvaluation], config: &MetricsConfig) -> Option<TimeManagement> {
    let times: Vec<f64> = moves
        .iter()
        .filter_map(|mv| mv.time_spent_ms)
        .map(|ms| ms as f64)
        .collect();
    if times.is_empty() {
        return None;
    }

    let n = times.len() as f64;
    let mean = times.iter().sum::<f64>() / n;
    let variance = times.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;
    let cv = if mean > 0.0 {
        variance.sqrt() / mean
    } else {
        0.0
    };
    let low = times
        .iter()
        .filter(|&&t| t < config.low_time_threshold_ms as f64)
        .count() as f64;

    Some(TimeManagement {
        timed_moves: times.len() as u32,
        average_ms: mean,
        low_time_fraction: low / n,
        consistency: 100.0 / (1.0 + cv),
    })
}

fn critical_moments(moves: &[MoveEvaluation]) -> Vec<CriticalMoment> {
    moves
        .iter()
        .filter(|mv| mv.is_critical || mv.classification == MoveClassification::Blunder)
        .map(|mv| CriticalMoment {
            ply: mv.ply,
            side: mv.side,
            san: mv.san.clone(),
            best_move: mv.best_move.clone(),
            eval_before: mv.eval_before,
            eval_after: mv.eval_after,
            eval_swing: mv.eval_after.to_cp() - mv.eval_before.to_cp(),
            classification: mv.classification,
        })
        .collect()
}

fn summarize(metrics: &SideMetrics) -> GameSummary {
    let played: Vec<&PhaseMetrics> = metrics.phases.iter().filter(|p| p.moves > 0).collect();
    let by_accuracy = |a: &&&PhaseMetrics, b: &&&PhaseMetrics| a.accuracy.total_cmp(&b.accuracy);
    let strongest = played.iter().max_by(by_accuracy).map(|p| p.phase);
    let weakest = played.iter().min_by(by_accuracy).map(|p| p.phase);

    GameSummary {
        subject: metrics.side,
        accuracy: metrics.accuracy,
        average_cp_loss: metrics.average_cp_loss,
        moves: metrics.moves,
        blunders: metrics.blunders,
        mistakes: metrics.mistakes,
        inaccuracies: metrics.inaccuracies,
        strongest_phase: strongest,
        // A single played phase is both; only report a weakness when there is a contrast.
        weakest_phase: if played.len() > 1 { weakest } else { None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests::mv;

    fn game(losses: &[i32]) -> Vec<MoveEvaluation> {
        losses
            .iter()
            .enumerate()
            .map(|(i, &loss)| mv(i as u32 + 1, loss))
            .collect()
    }

    #[test]
    fn test_accuracy_formula() {
        let config = MetricsConfig::default();
        let moves = game(&[0, 150]);
        assert_eq!(compute_accuracy(&moves[..1], &config), 100.0);
        assert_eq!(compute_accuracy(&moves[1..], &config), 50.0);
        assert_eq!(compute_accuracy(&moves, &config), 75.0);
        assert_eq!(compute_accuracy(&Vec::new(), &config), 100.0);
        assert_eq!(compute_accuracy(&game(&[900]), &config), 0.0);
    }

    #[test]
    fn test_zero_ceiling_stays_in_range() {
        let config = MetricsConfig {
            accuracy_ceiling: 0.0,
            ..MetricsConfig::default()
        };
        assert_eq!(compute_accuracy(&game(&[0, 0]), &config), 100.0);
        assert_eq!(compute_accuracy(&game(&[0, 40]), &config), 0.0);
        let metrics = compute_game_metrics("g", &game(&[0, 0, 10]), 3, Side::White, &config).unwrap();
        assert!(!metrics.white.accuracy.is_nan());
        assert!(!metrics.black.accuracy.is_nan());
    }

    #[test]
    fn test_rejects_bad_input() {
        let config = MetricsConfig::default();
        assert_eq!(
            compute_game_metrics("g", &[], 0, Side::White, &config),
            Err(InsufficientDataError::Empty)
        );

        let moves = game(&[0, 0, 0]);
        assert_eq!(
            compute_game_metrics("g", &moves, 4, Side::White, &config),
            Err(InsufficientDataError::PlyCountMismatch {
                expected: 4,
                actual: 3
            })
        );

        let mut gap = game(&[0, 0, 0]);
        gap[2].ply = 5;
        assert_eq!(
            compute_game_metrics("g", &gap, 3, Side::White, &config),
            Err(InsufficientDataError::NonContiguous {
                expected: 3,
                found: 5
            })
        );
    }

    #[test]
    fn test_side_counts_and_phases() {
        let config = MetricsConfig::default();
        // White: 0, 60, 320   Black: 10, 150, 0
        let moves = game(&[0, 10, 60, 150, 320, 0]);
        let metrics = compute_game_metrics("g1", &moves, 6, Side::White, &config).unwrap();

        assert_eq!(metrics.white.moves, 3);
        assert_eq!(metrics.white.inaccuracies, 1);
        assert_eq!(metrics.white.blunders, 1);
        assert_eq!(metrics.black.mistakes, 1);
        assert_eq!(metrics.white.best_moves, 1);

        let opening = metrics.white.phase(GamePhase::Opening).unwrap();
        assert_eq!(opening.moves, 3);
        assert_eq!(metrics.white.phase(GamePhase::Endgame).unwrap().moves, 0);
        assert_eq!(metrics.white.phase(GamePhase::Endgame).unwrap().accuracy, 100.0);
        assert_eq!(metrics.summary.subject, Side::White);
        assert_eq!(metrics.summary.strongest_phase, Some(GamePhase::Opening));
        assert_eq!(metrics.summary.weakest_phase, None);
    }

    #[test]
    fn test_tactical_opportunities() {
        let config = MetricsConfig::default();
        // Ply 2 hands White a converted opportunity at ply 3; ply 4 hands one that ply 5 misses.
        let moves = game(&[0, 400, 0, 120, 80, 0]);
        let metrics = compute_game_metrics("g", &moves, 6, Side::White, &config).unwrap();

        assert_eq!(metrics.white.tactics.opportunities, 2);
        assert_eq!(metrics.white.tactics.successes, 1);
        assert_eq!(metrics.white.tactics.success_rate, Some(0.5));
        assert_eq!(metrics.black.tactics.opportunities, 0);
        assert_eq!(metrics.black.tactics.success_rate, None);
        assert_eq!(
            metrics.white.phase(GamePhase::Opening).unwrap().tactical_opportunities,
            2
        );
    }

    #[test]
    fn test_time_management() {
        let config = MetricsConfig::default();
        let mut moves = game(&[0, 0, 0, 0]);
        moves[0].time_spent_ms = Some(1000);
        moves[2].time_spent_ms = Some(3000);

        let metrics = compute_game_metrics("g", &moves, 4, Side::White, &config).unwrap();
        let time = metrics.white.time_management.clone().unwrap();
        assert_eq!(time.timed_moves, 2);
        assert_eq!(time.average_ms, 2000.0);
        assert_eq!(time.low_time_fraction, 0.5);
        // std dev 1000, mean 2000 -> cv 0.5
        assert!((time.consistency - 100.0 / 1.5).abs() < 1e-9);
        assert!(metrics.black.time_management.is_none());
    }

    #[test]
    fn test_critical_moments_include_blunders() {
        let config = MetricsConfig::default();
        let mut moves = game(&[0, 350, 0, 0]);
        moves[2].is_critical = true;
        let metrics = compute_game_metrics("g", &moves, 4, Side::Black, &config).unwrap();
        let plies: Vec<u32> = metrics.critical_moments.iter().map(|m| m.ply).collect();
        assert_eq!(plies, vec![2, 3]);
        assert_eq!(metrics.summary.subject, Side::Black);
        assert_eq!(metrics.summary.blunders, 1);
    }
}
