use serde::{Deserialize, Serialize};

use crate::types::{GameMetrics, GamePhase, MoveClassification, PhaseMetrics, SideMetrics};

/// Narrative feedback for one phase of the game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseNarrative {
    pub phase: GamePhase,
    pub text: String,
}

/// Human-readable feedback for the player.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Narrative {
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub phases: Vec<PhaseNarrative>,
    pub critical_moments: Vec<String>,
}

/// Feedback attached to a finished analysis, tagged by how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum FeedbackPayload {
    AiAnalysis(Narrative),
    StatisticalAnalysis(Narrative),
    ErrorFallback { message: String },
}

impl FeedbackPayload {
    pub fn source(&self) -> &'static str {
        match self {
            Self::AiAnalysis(_) => "aiAnalysis",
            Self::StatisticalAnalysis(_) => "statisticalAnalysis",
            Self::ErrorFallback { .. } => "errorFallback",
        }
    }
}

const STRONG_ACCURACY: f64 = 85.0;
const WEAK_ACCURACY: f64 = 60.0;
const MAX_CRITICAL_MOMENTS: usize = 5;

/// Deterministic narrative built from the subject side's metrics.
///
/// Returns `None` when the subject made no moves.
pub fn statistical_narrative(metrics: &GameMetrics) -> Option<Narrative> {
    let side = metrics.subject_metrics();
    if side.moves == 0 {
        return None;
    }

    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();

    let played: Vec<&PhaseMetrics> = side.phases.iter().filter(|p| p.moves > 0).collect();
    for phase in &played {
        if phase.accuracy >= STRONG_ACCURACY {
            strengths.push(format!(
                "Accurate {} play ({:.0}% accuracy)",
                phase.phase.name(),
                phase.accuracy
            ));
        } else if phase.accuracy < WEAK_ACCURACY {
            weaknesses.push(format!(
                "Costly {} ({:.0}% accuracy, {:.0} cp average loss)",
                phase.phase.name(),
                phase.accuracy,
                phase.average_cp_loss
            ));
        }
    }

    if side.blunders == 0 && side.mistakes == 0 {
        strengths.push("No mistakes or blunders".to_string());
    } else if side.blunders > 0 {
        weaknesses.push(format!("{} blunder(s)", side.blunders));
    }

    if let Some(rate) = side.tactics.success_rate {
        let line = format!(
            "Punished {} of {} opponent errors",
            side.tactics.successes, side.tactics.opportunities
        );
        if rate >= 0.5 {
            strengths.push(line);
        } else {
            weaknesses.push(line);
        }
    }

    if let Some(time) = &side.time_management {
        if time.low_time_fraction > 0.5 {
            weaknesses.push(format!(
                "{:.0}% of moves played with little time spent (average {:.1}s)",
                time.low_time_fraction * 100.0,
                time.average_ms / 1000.0
            ));
        } else if time.consistency >= 60.0 {
            strengths.push("Steady use of the clock".to_string());
        }
    }

    let phases = played
        .iter()
        .map(|phase| PhaseNarrative {
            phase: phase.phase,
            text: describe_phase(phase),
        })
        .collect();

    let critical_moments = metrics
        .critical_moments
        .iter()
        .filter(|moment| moment.side == metrics.subject)
        .take(MAX_CRITICAL_MOMENTS)
        .map(|moment| {
            let label = match moment.classification {
                MoveClassification::Good => "turning point",
                MoveClassification::Inaccuracy => "inaccuracy",
                MoveClassification::Mistake => "mistake",
                MoveClassification::Blunder => "blunder",
            };
            match &moment.best_move {
                Some(best) => format!(
                    "Ply {}: {} was a {} (engine preferred {})",
                    moment.ply, moment.san, label, best
                ),
                None => format!("Ply {}: {} was a {}", moment.ply, moment.san, label),
            }
        })
        .collect();

    Some(Narrative {
        summary: summarize(side, metrics),
        strengths,
        weaknesses,
        phases,
        critical_moments,
    })
}

fn describe_phase(phase: &PhaseMetrics) -> String {
    let errors = phase.inaccuracies + phase.mistakes + phase.blunders;
    format!(
        "{} moves in the {} at {:.0}% accuracy with {} error(s) and {} best move(s)",
        phase.moves,
        phase.phase.name(),
        phase.accuracy,
        errors,
        phase.best_moves
    )
}

fn summarize(side: &SideMetrics, metrics: &GameMetrics) -> String {
    let mut summary = format!(
        "{} played {} moves at {:.0}% accuracy ({:.0} cp average loss).",
        side.side.name(),
        side.moves,
        side.accuracy,
        side.average_cp_loss
    );
    if let Some(weakest) = metrics.summary.weakest_phase {
        summary.push_str(&format!(" The {} needs the most work.", weakest.name()));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::metrics::compute_game_metrics;
    use crate::phases::tests::mv;
    use crate::types::Side;

    #[test]
    fn test_payload_is_tagged_by_source() {
        let json = serde_json::to_value(FeedbackPayload::StatisticalAnalysis(Narrative {
            summary: "ok".to_string(),
            ..Narrative::default()
        }))
        .unwrap();
        assert_eq!(json["source"], "statisticalAnalysis");
        assert_eq!(json["summary"], "ok");

        let json = serde_json::to_value(FeedbackPayload::ErrorFallback {
            message: "unavailable".to_string(),
        })
        .unwrap();
        assert_eq!(json["source"], "errorFallback");
        assert_eq!(
            FeedbackPayload::AiAnalysis(Narrative::default()).source(),
            "aiAnalysis"
        );
    }

    #[test]
    fn test_narrative_mentions_blunders_and_phases() {
        let config = MetricsConfig::default();
        let mut moves: Vec<_> = (1..=30).map(|ply| mv(ply, 0)).collect();
        moves[24].cp_loss = 400;
        moves[24].classification = MoveClassification::Blunder;
        moves[24].best_move = Some("d1d8".to_string());

        let metrics = compute_game_metrics("g", &moves, 30, Side::White, &config).unwrap();
        let narrative = statistical_narrative(&metrics).unwrap();

        assert!(narrative.weaknesses.iter().any(|w| w.contains("1 blunder")));
        assert!(narrative.strengths.iter().any(|s| s.contains("opening")));
        assert_eq!(narrative.phases.len(), 2);
        assert_eq!(narrative.critical_moments.len(), 1);
        assert!(narrative.critical_moments[0].contains("d1d8"));
        assert!(narrative.summary.starts_with("White played 15 moves"));
    }

    #[test]
    fn test_subject_without_moves_has_no_narrative() {
        let config = MetricsConfig::default();
        let moves = vec![mv(1, 0)];
        let metrics = compute_game_metrics("g", &moves, 1, Side::Black, &config).unwrap();
        assert!(statistical_narrative(&metrics).is_none());
    }
}
