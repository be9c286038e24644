use std::collections::HashMap;

use analysis::{GameMetrics, GamePhase, Narrative, PhaseNarrative};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{FeedbackConfig, FeedbackError, FeedbackService};

const SYSTEM_PROMPT: &str = "You are a chess coach. You receive engine-derived statistics \
about one game from the point of view of the player being coached. Reply with ONLY a JSON \
object with the keys \"summary\" (string), \"strengths\" (array of strings), \"weaknesses\" \
(array of strings), \"phases\" (object mapping \"opening\", \"middlegame\" and \"endgame\" to \
a short paragraph, omitting phases that were not played) and \"critical_moments\" (array of \
strings). No markdown fences, no extra text.";

const MAX_PROMPT_MOMENTS: usize = 8;

/// Chat-completions client for an OpenAI-compatible endpoint.
pub struct OpenAiFeedbackService {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiFeedbackService {
    /// Returns `None` when no API key is configured.
    pub fn new(config: &FeedbackConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelNarrative {
    summary: String,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
    #[serde(default)]
    phases: HashMap<String, String>,
    #[serde(default, alias = "criticalMoments")]
    critical_moments: Vec<String>,
}

/// Compact statistics sent to the model.
fn build_prompt(metrics: &GameMetrics) -> serde_json::Value {
    let side = metrics.subject_metrics();
    let phases: Vec<_> = side
        .phases
        .iter()
        .filter(|p| p.moves > 0)
        .map(|p| {
            json!({
                "phase": p.phase.name(),
                "moves": p.moves,
                "accuracy": (p.accuracy * 10.0).round() / 10.0,
                "average_cp_loss": p.average_cp_loss.round(),
                "inaccuracies": p.inaccuracies,
                "mistakes": p.mistakes,
                "blunders": p.blunders,
                "best_moves": p.best_moves,
            })
        })
        .collect();
    let moments: Vec<_> = metrics
        .critical_moments
        .iter()
        .filter(|m| m.side == metrics.subject)
        .take(MAX_PROMPT_MOMENTS)
        .map(|m| {
            json!({
                "ply": m.ply,
                "move": m.san,
                "engine_best": m.best_move,
                "eval_swing_cp": m.eval_swing,
                "classification": m.classification,
            })
        })
        .collect();

    json!({
        "player": side.side.name(),
        "moves": side.moves,
        "accuracy": (side.accuracy * 10.0).round() / 10.0,
        "average_cp_loss": side.average_cp_loss.round(),
        "inaccuracies": side.inaccuracies,
        "mistakes": side.mistakes,
        "blunders": side.blunders,
        "phases": phases,
        "tactics": {
            "opportunities": side.tactics.opportunities,
            "converted": side.tactics.successes,
        },
        "time_management": side.time_management,
        "critical_moments": moments,
    })
}

/// Extract the JSON object from a model reply, tolerating markdown fences.
fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start <= end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn parse_narrative(content: &str) -> Result<Narrative, FeedbackError> {
    let parsed: ModelNarrative = serde_json::from_str(extract_json(content)).map_err(|e| {
        FeedbackError::InvalidResponse(format!(
            "{} (reply starts with {:?})",
            e,
            content.chars().take(80).collect::<String>()
        ))
    })?;
    if parsed.summary.trim().is_empty() {
        return Err(FeedbackError::InvalidResponse("empty summary".to_string()));
    }

    let phases = GamePhase::ALL
        .iter()
        .filter_map(|&phase| {
            parsed
                .phases
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(phase.name()))
                .map(|(_, text)| PhaseNarrative {
                    phase,
                    text: text.clone(),
                })
        })
        .collect();

    Ok(Narrative {
        summary: parsed.summary,
        strengths: parsed.strengths,
        weaknesses: parsed.weaknesses,
        phases,
        critical_moments: parsed.critical_moments,
    })
}

impl FeedbackService for OpenAiFeedbackService {
    async fn generate_feedback(&self, metrics: &GameMetrics) -> Result<Narrative, FeedbackError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(metrics).to_string(),
                },
            ],
            temperature: 0.3,
            response_format: json!({ "type": "json_object" }),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| FeedbackError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body_text = response
            .text()
            .await
            .map_err(|e| FeedbackError::Network(e.to_string()))?;
        if status != 200 {
            return Err(FeedbackError::Status {
                status,
                body: body_text.chars().take(200).collect(),
            });
        }

        let chat: ChatResponse = serde_json::from_str(&body_text)
            .map_err(|e| FeedbackError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| FeedbackError::InvalidResponse("no message content".to_string()))?;

        tracing::debug!(game_id = %metrics.game_id, model = %self.model, "Received AI feedback");
        parse_narrative(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(key: Option<&str>) -> FeedbackConfig {
        FeedbackConfig {
            api_url: "http://localhost:1/v1/chat/completions".to_string(),
            api_key: key.map(str::to_string),
            model: "test-model".to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_missing_key_disables_service() {
        assert!(OpenAiFeedbackService::new(&config(None)).is_none());
        let service = OpenAiFeedbackService::new(&config(Some("sk-1"))).unwrap();
        assert_eq!(service.model(), "test-model");
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "```json\n{\"summary\":\"Solid game\",\"strengths\":[\"calm\"],\"weaknesses\":[],\
                     \"phases\":{\"Opening\":\"Good start\",\"endgame\":\"Careful\"},\
                     \"criticalMoments\":[\"Ply 12\"]}\n```";
        let narrative = parse_narrative(reply).unwrap();
        assert_eq!(narrative.summary, "Solid game");
        assert_eq!(narrative.strengths, vec!["calm".to_string()]);
        assert_eq!(narrative.phases.len(), 2);
        assert_eq!(narrative.phases[0].phase, GamePhase::Opening);
        assert_eq!(narrative.phases[1].phase, GamePhase::Endgame);
        assert_eq!(narrative.critical_moments.len(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_narrative("I cannot help with that"),
            Err(FeedbackError::InvalidResponse(_))
        ));
        assert!(parse_narrative("{\"summary\":\"  \"}").is_err());
    }

    #[test]
    fn test_prompt_is_compact() {
        let metrics = crate::tasks::tests::sample_result("g1").metrics;
        let prompt = build_prompt(&metrics);
        assert_eq!(prompt["player"], "White");
        assert_eq!(prompt["moves"], 2);
        assert!(prompt["phases"].as_array().unwrap().len() <= 3);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let service = OpenAiFeedbackService::new(&config(Some("sk-1"))).unwrap();
        let metrics = crate::tasks::tests::sample_result("g1").metrics;
        let err = service.generate_feedback(&metrics).await.unwrap_err();
        assert!(err.is_transient(), "{}", err);
    }
}
