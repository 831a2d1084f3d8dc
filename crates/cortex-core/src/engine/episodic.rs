//! The Episodic engine: autobiographical events, with entity
//! and sentiment augmentation run alongside the primary extraction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::adapters::{
    Embedder, Extractor, SentimentGranularity, SentimentLabel, Store,
};
use crate::engine::base::{clamp, clamp01, f32_field, str_field, BaseEngine, EngineSchema, SearchHit};
use crate::model::{EpisodicData, KindData, MemoryKind, MemoryRecord, OpResult, UserId};

/// Aliases the assistant may be called; shared between participant
/// filtering and the entity-extraction union step so the two cannot drift
/// (original: a module-level constant set in `episodic_engine.py`).
pub const ASSISTANT_ALIASES: &[&str] = &["ai", "assistant", "claude", "chatbot", "bot"];

fn is_assistant_alias(name: &str) -> bool {
    ASSISTANT_ALIASES.contains(&name.trim().to_lowercase().as_str())
}

pub struct EpisodicSchema;

#[async_trait]
impl EngineSchema for EpisodicSchema {
    fn table_name(&self) -> &'static str {
        "episodic_memories"
    }

    fn kind(&self) -> MemoryKind {
        MemoryKind::Episodic
    }
}

fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "event_type": {"type": "string"},
            "clean_content": {"type": "string"},
            "location": {"type": "string"},
            "participants": {"type": "array", "items": {"type": "string"}},
            "emotional_valence": {"type": "number"},
            "vividness": {"type": "number"},
            "importance_score": {"type": "number"},
            "topics": {"type": "array", "items": {"type": "string"}},
            "outcomes": {"type": "array", "items": {"type": "string"}}
        }
    })
}

pub struct EpisodicEngine {
    base: BaseEngine,
    extractor: Arc<dyn Extractor>,
}

impl EpisodicEngine {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            base: BaseEngine::new(Box::new(EpisodicSchema), store, embedder),
            extractor,
        }
    }

    pub async fn get(&self, id: &str) -> Option<MemoryRecord> {
        self.base.get(id).await
    }

    pub async fn delete(&self, id: &str) -> OpResult {
        self.base.delete(id).await
    }

    pub async fn search(&self, query: &crate::engine::base::SearchQuery) -> Vec<SearchHit> {
        self.base.search(query).await
    }

    pub async fn related(&self, id: &str, n: usize) -> Vec<SearchHit> {
        self.base.related(id, n).await
    }

    pub async fn count(&self, user_id: &str) -> i64 {
        self.base.count(user_id).await
    }

    /// Store a fully-formed record directly (batch path).
    pub async fn store_record(&self, record: crate::model::MemoryRecord) -> crate::model::OpResult {
        self.base.store(record).await
    }

    /// Best-effort per-engine maintenance invoked by `MemoryService::consolidate`;
    /// failures are returned to the caller to log, never propagated further.
    pub async fn optimize_storage(&self, user_id: &str) -> Result<(), crate::error::EngineError> {
        self.base.schema.optimize_storage(self.base.store.as_ref(), user_id).await
    }

    pub async fn store_from_dialog(
        &self,
        user_id: UserId,
        dialog: &str,
        importance_hint: Option<f32>,
    ) -> OpResult {
        let raw = self.extractor.extract(dialog, &extraction_schema()).await;
        // Unlike Factual/Semantic, a failed extraction still writes a record:
        // fall back to the first 30 words of the dialog and field defaults
        // rather than reporting failure to the caller.
        let (event_type, clean_content, mut location, mut participants, mut emotional_valence, vividness, importance) =
            if raw.success {
                let event_type = str_field(&raw.data, "event_type").to_lowercase().replace(' ', "_");
                let clean_content = {
                    let c = str_field(&raw.data, "clean_content");
                    if c.is_empty() {
                        dialog.to_string()
                    } else {
                        c
                    }
                };
                let location = {
                    let l = str_field(&raw.data, "location");
                    (!l.is_empty()).then_some(l)
                };
                let participants: Vec<String> = raw
                    .data
                    .get("participants")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .filter(|p| !is_assistant_alias(p))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                let emotional_valence = clamp(f32_field(&raw.data, "emotional_valence", 0.0), -1.0, 1.0);
                let vividness = clamp01(f32_field(&raw.data, "vividness", 0.5));
                let importance =
                    importance_hint.unwrap_or_else(|| clamp01(f32_field(&raw.data, "importance_score", 0.5)));
                (event_type, clean_content, location, participants, emotional_valence, vividness, importance)
            } else {
                let fallback_content: String = dialog.split_whitespace().take(30).collect::<Vec<_>>().join(" ");
                (
                    "unclassified".to_string(),
                    fallback_content,
                    None,
                    Vec::new(),
                    0.0,
                    0.5,
                    importance_hint.unwrap_or(0.5),
                )
            };

        // Entity extraction and sentiment analysis run concurrently; both
        // read the same dialog text so there's no ordering dependency.
        let (entities, sentiment) = tokio::join!(
            self.extractor.extract_entities(dialog, 0.5),
            self.extractor.analyze_sentiment(dialog, SentimentGranularity::Document)
        );
        for entity in &entities {
            if entity.entity_type.eq_ignore_ascii_case("PERSON") && !is_assistant_alias(&entity.text) {
                if !participants.iter().any(|p| p.eq_ignore_ascii_case(&entity.text)) {
                    participants.push(entity.text.clone());
                }
            }
        }
        if location.is_none() {
            location = entities
                .iter()
                .find(|e| e.entity_type.eq_ignore_ascii_case("LOCATION"))
                .map(|e| e.text.clone());
        }
        emotional_valence = match sentiment.label {
            SentimentLabel::Positive => sentiment.score.min(0.8),
            SentimentLabel::Negative => (-sentiment.score).max(-0.8),
            SentimentLabel::Neutral => 0.0,
        };

        let data = EpisodicData {
            event_type,
            location,
            participants,
            emotional_valence,
            vividness,
            episode_date: Utc::now(),
        };
        let mut record = MemoryRecord::new(user_id, MemoryKind::Episodic, clean_content, KindData::Episodic(data));
        record.importance = importance;
        self.base.store(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_aliases_are_case_insensitive() {
        assert!(is_assistant_alias("Assistant"));
        assert!(is_assistant_alias("CLAUDE"));
        assert!(!is_assistant_alias("Alice"));
    }
}
