//! The Factual engine: subject–predicate–object triples with
//! structural dedup and top-5 semantic-similarity associations.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::adapters::{Embedder, Extractor, RowFilter, Store};
use crate::engine::base::{clamp01, f32_field, row_to_record, str_field, BaseEngine, EngineSchema, SearchHit};
use crate::model::{FactualData, KindData, MemoryKind, MemoryRecord, OpResult, UserId, VerificationStatus};

pub struct FactualSchema;

#[async_trait]
impl EngineSchema for FactualSchema {
    fn table_name(&self) -> &'static str {
        "factual_memories"
    }

    fn kind(&self) -> MemoryKind {
        MemoryKind::Factual
    }
}

fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "facts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "fact_type": {"type": "string"},
                        "subject": {"type": "string"},
                        "predicate": {"type": "string"},
                        "object_value": {"type": "string"},
                        "context": {"type": "string"},
                        "confidence": {"type": "number"}
                    }
                }
            },
            "source": {"type": "string"},
            "domain": {"type": "string"}
        }
    })
}

/// A single normalised triple, ready to be matched/merged/inserted.
struct RawFact {
    fact_type: String,
    subject: String,
    predicate: String,
    object_value: String,
    context: String,
    confidence: f32,
    source: Option<String>,
}

/// Verb-splitting fallback ("X is Y" / "X has Y"), capped at 2, used when the
/// model returns zero facts (the "0 facts extracted" edge case).
pub fn fallback_facts(dialog: &str) -> Vec<RawFact> {
    let mut out = Vec::new();
    'sentences: for sentence in dialog.split(['.', '\n']) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        for verb in [" is ", " has "] {
            if let Some(idx) = sentence.find(verb) {
                let subject = sentence[..idx].trim();
                let object = sentence[idx + verb.len()..].trim();
                if !subject.is_empty() && !object.is_empty() {
                    out.push(RawFact {
                        fact_type: "basic".to_string(),
                        subject: subject.to_string(),
                        predicate: verb.trim().to_string(),
                        object_value: object.to_string(),
                        context: String::new(),
                        confidence: 0.4,
                        source: None,
                    });
                    if out.len() >= 2 {
                        break 'sentences;
                    }
                    break;
                }
            }
        }
    }
    out
}

fn normalise(data: &Value) -> Vec<RawFact> {
    let source = data.get("source").and_then(Value::as_str).map(|s| s.to_lowercase());
    data.get("facts")
        .and_then(Value::as_array)
        .map(|facts| {
            facts
                .iter()
                .filter_map(|f| {
                    let fact_type = str_field(f, "fact_type").to_lowercase();
                    let subject = str_field(f, "subject");
                    let predicate = str_field(f, "predicate");
                    let object_value = str_field(f, "object_value");
                    if subject.is_empty() || predicate.is_empty() || object_value.is_empty() {
                        return None;
                    }
                    Some(RawFact {
                        fact_type,
                        subject,
                        predicate,
                        object_value,
                        context: str_field(f, "context"),
                        confidence: clamp01(f32_field(f, "confidence", 0.5)),
                        source: source.clone(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn content_for(fact: &RawFact) -> String {
    let base = format!("{} {} {}", fact.subject, fact.predicate, fact.object_value);
    if fact.context.is_empty() {
        base
    } else {
        format!("{base} ({})", fact.context)
    }
}

pub struct FactualEngine {
    base: BaseEngine,
    extractor: Arc<dyn Extractor>,
}

impl FactualEngine {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            base: BaseEngine::new(Box::new(FactualSchema), store, embedder),
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

    /// `existing` matched by `(user_id, fact_type, subject, predicate)`.
    async fn find_matching(&self, user_id: &str, fact: &RawFact) -> Option<MemoryRecord> {
        let rows = self
            .base
            .store
            .select(self.base.schema.table_name(), &RowFilter::for_user(user_id.to_string()))
            .await
            .ok()?;
        rows.iter().filter_map(|r| row_to_record(r).ok()).find(|record| {
            matches!(&record.data, KindData::Factual(fd)
                if fd.fact_type == fact.fact_type
                    && fd.subject == fact.subject
                    && fd.predicate == fact.predicate)
        })
    }

    /// Merge: update `object_value`, raise `confidence` by +0.1 (capped at
    /// 1.0), record a merge note.
    async fn merge(&self, existing: MemoryRecord, fact: &RawFact) -> OpResult {
        let id = existing.id.clone();
        self.base
            .update(&id, |record| {
                record.confidence = clamp01(record.confidence + 0.1);
                record.content = content_for(fact);
                if let KindData::Factual(fd) = &mut record.data {
                    fd.object_value = fact.object_value.clone();
                }
                record.append_note("merged duplicate fact");
            })
            .await
    }

    async fn insert(&self, user_id: &UserId, fact: &RawFact) -> OpResult {
        let data = FactualData {
            fact_type: fact.fact_type.clone(),
            subject: fact.subject.clone(),
            predicate: fact.predicate.clone(),
            object_value: fact.object_value.clone(),
            source: fact.source.clone(),
            verification_status: VerificationStatus::Unverified,
            related_facts: Vec::new(),
        };
        let mut record = MemoryRecord::new(
            user_id.clone(),
            MemoryKind::Factual,
            content_for(fact),
            KindData::Factual(data),
        );
        record.confidence = fact.confidence;
        let id = record.id.clone();
        let result = self.base.store(record).await;
        if result.success {
            self.link_associations(user_id, &id).await;
        }
        result
    }

    /// Top-5 semantically nearby facts, stored as directed
    /// `semantic_similarity` edges with `strength = similarity`.
    async fn link_associations(&self, user_id: &str, id: &str) {
        let mut hits = self.base.related(id, 5).await;
        hits.retain(|h| h.record.id != id);
        for hit in hits {
            self.base
                .store_edge(user_id, id, &hit.record.id, "semantic_similarity", hit.similarity)
                .await;
        }
    }

    pub async fn store_from_dialog(&self, user_id: UserId, dialog: &str) -> Vec<OpResult> {
        let raw = self.extractor.extract(dialog, &extraction_schema()).await;
        let mut facts = if raw.success {
            normalise(&raw.data)
        } else {
            Vec::new()
        };
        if facts.is_empty() {
            facts = fallback_facts(dialog);
        }
        if facts.is_empty() {
            return vec![OpResult::failed("store_from_dialog", "no facts extracted")];
        }

        let mut results = Vec::new();
        for fact in &facts {
            let outcome = match self.find_matching(&user_id, fact).await {
                Some(existing) => self.merge(existing, fact).await,
                None => self.insert(&user_id, fact).await,
            };
            if !outcome.success {
                warn!(operation = "store_from_dialog", kind = "factual", "fact write failed");
            }
            results.push(outcome);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_splits_is_and_has_sentences() {
        let facts = fallback_facts("Alice is an engineer. Bob has a dog.");
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].subject, "Alice");
        assert_eq!(facts[0].object_value, "an engineer");
        assert_eq!(facts[1].subject, "Bob");
    }

    #[test]
    fn fallback_caps_at_two() {
        let facts = fallback_facts("A is 1. B is 2. C is 3.");
        assert_eq!(facts.len(), 2);
    }

    #[test]
    fn normalise_drops_incomplete_triples() {
        let data = json!({"facts": [
            {"fact_type": "Pref", "subject": "user", "predicate": "likes", "object_value": "coffee"},
            {"fact_type": "Bad", "subject": "", "predicate": "likes", "object_value": "tea"}
        ]});
        let facts = normalise(&data);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].fact_type, "pref");
    }
}
