//! The Extractor adapter: schema-driven structured extraction,
//! entity extraction, and sentiment analysis.

use async_trait::async_trait;
use serde_json::Value;

/// Result of a schema-driven extraction call.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub success: bool,
    /// Extracted payload; shape matches the `schema` passed to `extract`.
    /// Left untyped so each engine deserializes only the sub-schema it owns
    /// (mirrors the Python original's dict-shaped extraction payloads).
    pub data: Value,
    pub confidence: f32,
    pub billing: Option<Billing>,
}

impl ExtractionOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::String(reason.into()),
            confidence: 0.0,
            billing: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Billing {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A named entity found in text.
#[derive(Debug, Clone)]
pub struct Entity {
    pub text: String,
    pub entity_type: String,
    pub score: f32,
}

/// Granularity requested from `analyze_sentiment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentimentGranularity {
    Document,
    Sentence,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Copy)]
pub struct SentimentResult {
    pub label: SentimentLabel,
    /// Score in `[0, 1]`, magnitude of the sentiment regardless of label.
    pub score: f32,
}

/// Schema-driven structured extraction from dialog, plus entity/sentiment
/// helpers used by the Episodic and Session engines.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str, schema: &Value) -> ExtractionOutcome;
    async fn extract_entities(&self, text: &str, threshold: f32) -> Vec<Entity>;
    async fn analyze_sentiment(&self, text: &str, granularity: SentimentGranularity)
        -> SentimentResult;
}
