//! The Semantic engine: durable concept knowledge, deduplicated
//! by a configurable definition-prefix match.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::adapters::{Embedder, Extractor, RowFilter, Store};
use crate::engine::base::{clamp01, f32_field, row_to_record, str_field, BaseEngine, EngineSchema, SearchHit};
use crate::model::{AbstractionLevel, KindData, MemoryKind, MemoryRecord, OpResult, SemanticData, UserId};

pub struct SemanticSchema;

#[async_trait]
impl EngineSchema for SemanticSchema {
    fn table_name(&self) -> &'static str {
        "semantic_memories"
    }

    fn kind(&self) -> MemoryKind {
        MemoryKind::Semantic
    }
}

fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "concepts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "concept_type": {"type": "string"},
                        "definition": {"type": "string"},
                        "properties": {"type": "object"},
                        "abstraction_level": {"type": "string"},
                        "category": {"type": "string"},
                        "related_concepts": {"type": "array", "items": {"type": "string"}},
                        "importance_score": {"type": "number"}
                    }
                }
            }
        }
    })
}

struct RawConcept {
    concept_type: String,
    definition: String,
    properties: Map<String, Value>,
    abstraction_level: AbstractionLevel,
    category: String,
    related_concepts: Vec<String>,
    importance: f32,
}

fn normalise(data: &Value) -> Vec<RawConcept> {
    data.get("concepts")
        .and_then(Value::as_array)
        .map(|concepts| {
            concepts
                .iter()
                .filter_map(|c| {
                    let definition = str_field(c, "definition");
                    if definition.is_empty() {
                        return None;
                    }
                    Some(RawConcept {
                        concept_type: str_field(c, "concept_type"),
                        definition,
                        properties: c
                            .get("properties")
                            .and_then(Value::as_object)
                            .cloned()
                            .unwrap_or_default(),
                        abstraction_level: AbstractionLevel::parse_or_default(&str_field(c, "abstraction_level")),
                        category: str_field(c, "category"),
                        related_concepts: c
                            .get("related_concepts")
                            .and_then(Value::as_array)
                            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                            .unwrap_or_default(),
                        importance: clamp01(f32_field(c, "importance_score", 0.5)),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn content_for(concept: &RawConcept) -> String {
    let base = format!("{}: {}", concept.concept_type, concept.definition);
    if concept.properties.is_empty() {
        base
    } else {
        let props = concept
            .properties
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{base} ({props})")
    }
}

pub struct SemanticEngine {
    base: BaseEngine,
    extractor: Arc<dyn Extractor>,
    dedup_prefix_len: usize,
}

impl SemanticEngine {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
        dedup_prefix_len: usize,
    ) -> Self {
        Self {
            base: BaseEngine::new(Box::new(SemanticSchema), store, embedder),
            extractor,
            dedup_prefix_len: dedup_prefix_len.max(1),
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

    fn prefix<'a>(&self, s: &'a str) -> &'a str {
        let end = s.char_indices().nth(self.dedup_prefix_len).map(|(i, _)| i).unwrap_or(s.len());
        &s[..end]
    }

    async fn find_matching(&self, user_id: &str, concept: &RawConcept) -> Option<MemoryRecord> {
        let rows = self
            .base
            .store
            .select(self.base.schema.table_name(), &RowFilter::for_user(user_id.to_string()))
            .await
            .ok()?;
        let wanted_prefix = self.prefix(&concept.definition);
        rows.iter().filter_map(|r| row_to_record(r).ok()).find(|record| {
            matches!(&record.data, KindData::Semantic(sd)
                if sd.concept_type == concept.concept_type && self.prefix(&sd.definition) == wanted_prefix)
        })
    }

    async fn merge(&self, existing: MemoryRecord, concept: &RawConcept) -> OpResult {
        let id = existing.id.clone();
        self.base
            .update(&id, |record| {
                if let KindData::Semantic(sd) = &mut record.data {
                    crate::model::deep_merge(&mut sd.properties, &concept.properties);
                    for rc in &concept.related_concepts {
                        if !sd.related_concepts.contains(rc) {
                            sd.related_concepts.push(rc.clone());
                        }
                    }
                }
                record.importance = record.importance.max(concept.importance);
                if let KindData::Semantic(sd) = &record.data {
                    record.content = format!("{}: {}", sd.concept_type, sd.definition);
                }
                record.access_count += 1;
            })
            .await
    }

    async fn insert(&self, user_id: &UserId, concept: &RawConcept) -> OpResult {
        let data = SemanticData {
            concept_type: concept.concept_type.clone(),
            definition: concept.definition.clone(),
            properties: concept.properties.clone(),
            abstraction_level: concept.abstraction_level,
            category: concept.category.clone(),
            related_concepts: concept.related_concepts.clone(),
        };
        let mut record = MemoryRecord::new(
            user_id.clone(),
            MemoryKind::Semantic,
            content_for(concept),
            KindData::Semantic(data),
        );
        record.importance = concept.importance;
        self.base.store(record).await
    }

    pub async fn store_from_dialog(&self, user_id: UserId, dialog: &str) -> Vec<OpResult> {
        let raw = self.extractor.extract(dialog, &extraction_schema()).await;
        if !raw.success {
            return vec![OpResult::failed("store_from_dialog", "extraction failed")];
        }
        let concepts = normalise(&raw.data);
        if concepts.is_empty() {
            return vec![OpResult::failed("store_from_dialog", "no concepts extracted")];
        }
        let mut results = Vec::new();
        for concept in &concepts {
            let outcome = match self.find_matching(&user_id, concept).await {
                Some(existing) => self.merge(existing, concept).await,
                None => self.insert(&user_id, concept).await,
            };
            results.push(outcome);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abstraction_level_defaults_to_medium() {
        assert_eq!(AbstractionLevel::parse_or_default("nonsense"), AbstractionLevel::Medium);
        assert_eq!(AbstractionLevel::parse_or_default("CONCRETE"), AbstractionLevel::Concrete);
    }
}
