// Syllabus analysis payloads: inbound request bodies, the raw model output
// they are parsed from, and the shapes returned to clients

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /api/extract-topics` and `POST /api/generate-coding-topics`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyllabusContentRequest {
    #[serde(default)]
    pub content: String,
}

/// Body of `POST /api/generate-topic-answers`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicAnswersRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub topic: Option<TopicInput>,
}

/// Body of `POST /api/generate-coding-problems`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodingProblemsRequest {
    #[serde(default)]
    pub topic: Option<TopicInput>,
}

/// Topic as sent back by clients; every field is optional on the wire
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TopicInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_problems: Option<u32>,
}

/// Topic as extracted by the model, before ids are assigned
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawTopic {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub importance_score: f64,
    #[serde(default)]
    pub marks_value: f64,
    #[serde(default)]
    pub has_diagrams: bool,
    /// Kept loose: anything other than an array of strings reads as no key points
    #[serde(default)]
    pub key_points: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawConnection {
    #[serde(default)]
    pub topic_a_idx: Value,
    #[serde(default)]
    pub topic_b_idx: Value,
    #[serde(default)]
    pub relationship: String,
    #[serde(default)]
    pub strength: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawExtraction {
    #[serde(default)]
    pub topics: Vec<RawTopic>,
    #[serde(default)]
    pub connections: Option<Vec<RawConnection>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub description: String,
    pub importance_score: f64,
    pub marks_value: f64,
    pub has_diagrams: bool,
    pub key_points: Vec<String>,
    /// Key points one per line, or the description when there are none
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub topic_a_id: String,
    pub topic_b_id: String,
    pub relationship_type: String,
    pub relationship_strength: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicExtraction {
    pub success: bool,
    pub title: String,
    #[serde(rename = "topicsCount")]
    pub topics_count: usize,
    pub topics: Vec<Topic>,
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicAnswers {
    pub success: bool,
    /// Only present when the answers came from the on-disk cache
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
    pub questions_answers: Vec<QuestionAnswer>,
}
