use serde::{Deserialize, Serialize};

/// Thresholds used by the classifier and the metrics calculator.
///
/// All losses are in centipawns from the mover's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Loss at or above which a move is a blunder (default: 300).
    pub blunder_threshold: i32,
    /// Loss at or above which a move is a mistake (default: 100).
    pub mistake_threshold: i32,
    /// Loss at or above which a move is an inaccuracy (default: 50).
    pub inaccuracy_threshold: i32,
    /// Per-move loss cap applied before averaging (default: 1000).
    pub cp_loss_cap: i32,
    /// White-relative evaluation beyond which one side is winning (default: 300).
    pub decisive_threshold: i32,
    /// Last ply that can belong to the opening (default: 20).
    pub opening_ply_limit: u32,
    /// The opening ends once both sides have at most this many minors at home (default: 1).
    pub developed_minor_threshold: u8,
    /// Combined non-pawn material at or below which the endgame starts (default: 2600).
    pub endgame_material_threshold: u32,
    /// Average loss that maps to 0% accuracy (default: 300).
    pub accuracy_ceiling: f64,
    /// Opponent loss that makes the reply a tactical opportunity (default: 100).
    pub opportunity_threshold: i32,
    /// Moves played faster than this count as low-time moves (default: 2000).
    pub low_time_threshold_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            blunder_threshold: 300,
            mistake_threshold: 100,
            inaccuracy_threshold: 50,
            cp_loss_cap: 1000,
            decisive_threshold: 300,
            opening_ply_limit: 20,
            developed_minor_threshold: 1,
            endgame_material_threshold: 2600,
            accuracy_ceiling: 300.0,
            opportunity_threshold: 100,
            low_time_threshold_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: MetricsConfig =
            serde_json::from_str(r#"{"blunder_threshold": 250}"#).unwrap();
        assert_eq!(config.blunder_threshold, 250);
        assert_eq!(config.mistake_threshold, 100);
        assert_eq!(config.opening_ply_limit, 20);
    }
}
