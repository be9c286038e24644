use serde::{Deserialize, Serialize};

use crate::types::{GameMetrics, GamePhase};

/// Move-weighted phase statistics across games.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseAggregate {
    pub phase: GamePhase,
    pub moves: u32,
    pub accuracy: f64,
    pub average_cp_loss: f64,
}

/// Aggregate over the subject side of several analyzed games.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAggregate {
    pub games: u32,
    pub moves: u32,
    pub accuracy: f64,
    pub average_cp_loss: f64,
    pub inaccuracies: u32,
    pub mistakes: u32,
    pub blunders: u32,
    pub best_moves: u32,
    pub phases: Vec<PhaseAggregate>,
    pub tactical_opportunities: u32,
    pub tactical_success_rate: Option<f64>,
}

fn weighted(pairs: impl Iterator<Item = (f64, u32)>) -> Option<f64> {
    let (sum, weight) = pairs.fold((0.0, 0u32), |(sum, weight), (value, moves)| {
        (sum + value * moves as f64, weight + moves)
    });
    (weight > 0).then(|| sum / weight as f64)
}

/// Combine per-game metrics, weighting each game by the number of moves the
/// subject played in it. Returns `None` for an empty slice.
pub fn aggregate_games(games: &[GameMetrics]) -> Option<BatchAggregate> {
    if games.is_empty() {
        return None;
    }
    let sides: Vec<_> = games.iter().map(|g| g.subject_metrics()).collect();

    let phases = GamePhase::ALL
        .iter()
        .map(|&phase| {
            let per_game: Vec<_> = sides.iter().filter_map(|s| s.phase(phase)).collect();
            PhaseAggregate {
                phase,
                moves: per_game.iter().map(|p| p.moves).sum(),
                accuracy: weighted(per_game.iter().map(|p| (p.accuracy, p.moves)))
                    .unwrap_or(100.0),
                average_cp_loss: weighted(per_game.iter().map(|p| (p.average_cp_loss, p.moves)))
                    .unwrap_or(0.0),
            }
        })
        .collect();

    let opportunities: u32 = sides.iter().map(|s| s.tactics.opportunities).sum();
    let successes: u32 = sides.iter().map(|s| s.tactics.successes).sum();

    Some(BatchAggregate {
        games: games.len() as u32,
        moves: sides.iter().map(|s| s.moves).sum(),
        accuracy: weighted(sides.iter().map(|s| (s.accuracy, s.moves))).unwrap_or(100.0),
        average_cp_loss: weighted(sides.iter().map(|s| (s.average_cp_loss, s.moves)))
            .unwrap_or(0.0),
        inaccuracies: sides.iter().map(|s| s.inaccuracies).sum(),
        mistakes: sides.iter().map(|s| s.mistakes).sum(),
        blunders: sides.iter().map(|s| s.blunders).sum(),
        best_moves: sides.iter().map(|s| s.best_moves).sum(),
        phases,
        tactical_opportunities: opportunities,
        tactical_success_rate: (opportunities > 0).then(|| successes as f64 / opportunities as f64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::metrics::compute_game_metrics;
    use crate::phases::tests::mv;
    use crate::types::{MoveEvaluation, Side};

    fn metrics(id: &str, losses: &[i32]) -> GameMetrics {
        let moves: Vec<MoveEvaluation> = losses
            .iter()
            .enumerate()
            .map(|(i, &loss)| mv(i as u32 + 1, loss))
            .collect();
        compute_game_metrics(id, &moves, moves.len(), Side::White, &MetricsConfig::default())
            .unwrap()
    }

    #[test]
    fn test_empty_is_none() {
        assert!(aggregate_games(&[]).is_none());
    }

    #[test]
    fn test_move_weighted_accuracy() {
        // Game a: white plays one move losing 150 (50%).
        // Game b: white plays three moves losing nothing (100%).
        let a = metrics("a", &[150, 0]);
        let b = metrics("b", &[0, 0, 0, 0, 0, 0]);
        let agg = aggregate_games(&[a, b]).unwrap();

        assert_eq!(agg.games, 2);
        assert_eq!(agg.moves, 4);
        assert_eq!(agg.accuracy, (50.0 + 3.0 * 100.0) / 4.0);
        assert_eq!(agg.mistakes, 1);
        let opening = agg.phases.iter().find(|p| p.phase == GamePhase::Opening).unwrap();
        assert_eq!(opening.moves, 4);
        let endgame = agg.phases.iter().find(|p| p.phase == GamePhase::Endgame).unwrap();
        assert_eq!(endgame.moves, 0);
        assert_eq!(endgame.accuracy, 100.0);
    }

    #[test]
    fn test_single_game_matches_its_metrics() {
        let game = metrics("solo", &[60, 0, 20, 0]);
        let agg = aggregate_games(std::slice::from_ref(&game)).unwrap();
        assert_eq!(agg.accuracy, game.white.accuracy);
        assert_eq!(agg.average_cp_loss, game.white.average_cp_loss);
    }
}
