use serde::{Deserialize, Serialize};

/// Emotion transition modes accepted by the recommendation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmotionMode {
    Maintain,
    Elevate,
    CalmDown,
    Reverse,
}

/// Body of `POST /v1/recommend`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendRequest {
    pub text: String,
    pub user_valence: f64,
    pub user_energy: f64,
    pub mode: EmotionMode,
}
