pub mod prompts;
pub mod qa_cache;
pub mod types;

pub use qa_cache::QaCache;
pub use types::{
    CodingProblemsRequest, QuestionAnswer, Relationship, SyllabusContentRequest, Topic,
    TopicAnswers, TopicAnswersRequest, TopicExtraction, TopicInput,
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{GenerationError, GenerationResult};
use crate::core::types::GenerationRequest;
use crate::utils::Metrics;

use super::generation::GenerationService;
use types::{RawConnection, RawExtraction, RawTopic};

const DEFAULT_TITLE: &str = "Syllabus Analysis";
const TEMPERATURE: f32 = 0.7;

static TITLE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(#{1,6}\s+)?(.+?)(?:\n|$)").expect("title pattern is valid")
});

/// Syllabus analysis built on structured generation.
///
/// Each operation pairs a prompt with a response schema and runs it through
/// the shared [`GenerationService`], so they all rotate keys and retry the
/// same way.
pub struct SyllabusService {
    generation: Arc<GenerationService>,
    qa_cache: QaCache,
}

impl SyllabusService {
    pub fn new(generation: Arc<GenerationService>, qa_cache: QaCache) -> Self {
        Self {
            generation,
            qa_cache,
        }
    }

    pub fn from_config(config: &Config, generation: Arc<GenerationService>, metrics: Metrics) -> Self {
        let qa_cache = QaCache::new(
            config.cache.qas_dir(),
            Duration::from_secs(config.cache.qas_ttl_seconds),
            Some(metrics),
        );
        Self::new(generation, qa_cache)
    }

    pub fn qa_cache(&self) -> &QaCache {
        &self.qa_cache
    }

    /// Extract topics and their connections from syllabus text
    #[instrument(skip(self, content), fields(content_len = content.len()))]
    pub async fn extract_topics(&self, content: &str) -> GenerationResult<TopicExtraction> {
        let title = extract_title(content);

        let request = GenerationRequest::new(prompts::extract_topics_prompt(&title, content))
            .with_schema(prompts::topics_schema());
        let object = self.generation.generate(&request).await?;

        let extraction = build_extraction(title, object, chrono::Utc::now().timestamp_millis())?;
        info!(
            "Extracted {} topics, {} relationships",
            extraction.topics_count,
            extraction.relationships.len()
        );
        Ok(extraction)
    }

    /// Exam-style questions and answers for one topic, served from the cache when fresh
    #[instrument(skip(self, content, topic), fields(topic = %topic.title))]
    pub async fn generate_topic_answers(
        &self,
        content: &str,
        topic: &TopicInput,
    ) -> GenerationResult<TopicAnswers> {
        let key = QaCache::generate_key(content, &topic.title);

        if let Some(questions_answers) = self.qa_cache.get(&key).await {
            info!("Q&A cache hit for {}", key);
            return Ok(TopicAnswers {
                success: true,
                cached: true,
                questions_answers,
            });
        }

        let mut request = GenerationRequest::new(prompts::topic_answers_prompt(content, topic))
            .with_schema(prompts::answers_schema());
        request.temperature = Some(TEMPERATURE);
        let object = self.generation.generate(&request).await?;

        let questions_answers: Vec<QuestionAnswer> = match object.get("questions_answers") {
            Some(Value::Array(items)) => serde_json::from_value(Value::Array(items.clone()))
                .map_err(|e| GenerationError::InvalidResponse(format!("questions_answers: {e}")))?,
            _ => Vec::new(),
        };

        if let Err(e) = self.qa_cache.put(&key, &questions_answers).await {
            warn!("Failed to write Q&A cache: {:#}", e);
        }

        Ok(TopicAnswers {
            success: true,
            cached: false,
            questions_answers,
        })
    }

    /// Programming topics suited to C practice problems
    #[instrument(skip(self, content), fields(content_len = content.len()))]
    pub async fn generate_coding_topics(&self, content: &str) -> GenerationResult<Value> {
        let mut request = GenerationRequest::new(prompts::coding_topics_prompt(content))
            .with_schema(prompts::coding_topics_schema());
        request.temperature = Some(TEMPERATURE);
        self.generation.generate(&request).await
    }

    /// C coding problems with solutions for one topic
    #[instrument(skip(self, topic), fields(topic = %topic.title))]
    pub async fn generate_coding_problems(&self, topic: &TopicInput) -> GenerationResult<Value> {
        let mut request = GenerationRequest::new(prompts::coding_problems_prompt(topic))
            .with_schema(prompts::coding_problems_schema());
        request.temperature = Some(TEMPERATURE);
        self.generation.generate(&request).await
    }

    pub async fn clear_qa_cache(&self) -> anyhow::Result<usize> {
        let removed = self.qa_cache.clear().await?;
        info!("Cleared {} Q&A cache entries", removed);
        Ok(removed)
    }
}

/// First line of the syllabus, without a leading markdown heading marker
pub fn extract_title(content: &str) -> String {
    TITLE_LINE
        .captures(content)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str().trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

/// Assign ids to extracted topics and resolve connections to them.
///
/// Connections whose indices do not name an extracted topic are dropped.
fn build_extraction(title: String, object: Value, stamp_ms: i64) -> GenerationResult<TopicExtraction> {
    let raw: RawExtraction = serde_json::from_value(object)
        .map_err(|e| GenerationError::InvalidResponse(format!("topics: {e}")))?;

    let topics: Vec<Topic> = raw
        .topics
        .into_iter()
        .enumerate()
        .map(|(index, topic)| to_topic(index, topic, stamp_ms))
        .collect();

    let relationships = raw
        .connections
        .unwrap_or_default()
        .into_iter()
        .filter_map(|conn| to_relationship(&topics, conn))
        .collect();

    Ok(TopicExtraction {
        success: true,
        title,
        topics_count: topics.len(),
        topics,
        relationships,
    })
}

fn to_topic(index: usize, raw: RawTopic, stamp_ms: i64) -> Topic {
    let key_points: Option<Vec<String>> = match raw.key_points {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    };

    let content = match &key_points {
        Some(points) => points.join("\n"),
        None => raw.description.clone(),
    };

    Topic {
        id: format!("topic-{index}-{stamp_ms}"),
        title: raw.title,
        description: raw.description,
        importance_score: raw.importance_score,
        marks_value: raw.marks_value,
        has_diagrams: raw.has_diagrams,
        key_points: key_points.unwrap_or_default(),
        content,
    }
}

fn to_relationship(topics: &[Topic], conn: RawConnection) -> Option<Relationship> {
    let a = topic_at(topics, &conn.topic_a_idx)?;
    let b = topic_at(topics, &conn.topic_b_idx)?;
    Some(Relationship {
        topic_a_id: a.id.clone(),
        topic_b_id: b.id.clone(),
        relationship_type: conn.relationship,
        relationship_strength: conn.strength,
    })
}

fn topic_at<'a>(topics: &'a [Topic], idx: &Value) -> Option<&'a Topic> {
    let idx = idx.as_f64()?;
    if idx < 0.0 || idx.fract() != 0.0 {
        return None;
    }
    topics.get(idx as usize)
}
