//! The Procedural engine: step-based skill knowledge with a
//! running-mean success rate.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::adapters::{Embedder, Extractor, Store};
use crate::engine::base::{clamp01, f32_field, str_field, BaseEngine, EngineSchema, SearchHit};
use crate::model::{
    DifficultyLevel, KindData, MemoryKind, MemoryRecord, OpResult, ProcedureStep, ProceduralData, UserId,
};

pub struct ProceduralSchema;

#[async_trait]
impl EngineSchema for ProceduralSchema {
    fn table_name(&self) -> &'static str {
        "procedural_memories"
    }

    fn kind(&self) -> MemoryKind {
        MemoryKind::Procedural
    }
}

fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "skill_type": {"type": "string"},
            "steps": {},
            "prerequisites": {"type": "array", "items": {"type": "string"}},
            "difficulty_level": {"type": "string"},
            "domain": {"type": "string"},
            "importance_score": {"type": "number"},
            "tools": {"type": "array", "items": {"type": "string"}},
            "success_indicators": {"type": "array", "items": {"type": "string"}},
            "common_mistakes": {"type": "array", "items": {"type": "string"}}
        }
    })
}

/// Accepts either a structured array of step objects or a newline-delimited
/// string (if steps come back as a string, split on newlines, take up
/// to 10, synthesise step numbers).
fn normalise_steps(value: &Value) -> Vec<ProcedureStep> {
    if let Some(array) = value.as_array() {
        return array
            .iter()
            .enumerate()
            .take(10)
            .map(|(i, s)| ProcedureStep {
                number: (i + 1) as u32,
                description: s
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| s.as_str().unwrap_or_default().to_string()),
                importance: f32_field(s, "importance", 0.5),
                tools_needed: s
                    .get("tools_needed")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default(),
                estimated_time: s
                    .get("estimated_time")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
            .collect();
    }
    if let Some(text) = value.as_str() {
        return text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(10)
            .enumerate()
            .map(|(i, line)| ProcedureStep {
                number: (i + 1) as u32,
                description: line.to_string(),
                importance: 0.5,
                tools_needed: Vec::new(),
                estimated_time: None,
            })
            .collect();
    }
    Vec::new()
}

pub struct ProceduralEngine {
    base: BaseEngine,
    extractor: Arc<dyn Extractor>,
}

impl ProceduralEngine {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            base: BaseEngine::new(Box::new(ProceduralSchema), store, embedder),
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

    pub async fn store_from_dialog(&self, user_id: UserId, dialog: &str) -> OpResult {
        let raw = self.extractor.extract(dialog, &extraction_schema()).await;
        if !raw.success {
            return OpResult::failed("store_from_dialog", "extraction failed");
        }
        let skill_type = str_field(&raw.data, "skill_type");
        if skill_type.is_empty() {
            return OpResult::failed("store_from_dialog", "no skill_type extracted");
        }
        let steps = raw.data.get("steps").map(normalise_steps).unwrap_or_default();
        let difficulty_level = DifficultyLevel::parse_or_default(&str_field(&raw.data, "difficulty_level"));
        let prerequisites = raw
            .data
            .get("prerequisites")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let importance = clamp01(f32_field(&raw.data, "importance_score", 0.5));

        let data = ProceduralData {
            skill_type,
            steps,
            prerequisites,
            difficulty_level,
            success_rate: 0.0,
            success_reps: 0,
            domain: str_field(&raw.data, "domain"),
        };
        let content = format!(
            "{}: {} steps",
            data.skill_type,
            data.steps.len()
        );
        let mut record = MemoryRecord::new(user_id, MemoryKind::Procedural, content, KindData::Procedural(data));
        record.importance = importance;
        self.base.store(record).await
    }

    /// `r' = (r·n + [ok]) / (n + 1)`, also increments `access_count`.
    pub async fn update_success_rate(&self, id: &str, ok: bool) -> OpResult {
        self.base
            .update(id, |record| {
                if let KindData::Procedural(pd) = &mut record.data {
                    let n = pd.success_reps as f32;
                    let outcome = if ok { 1.0 } else { 0.0 };
                    pd.success_rate = (pd.success_rate * n + outcome) / (n + 1.0);
                    pd.success_reps += 1;
                }
                record.access_count += 1;
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_steps_split_on_newlines_and_cap_at_ten() {
        let lines: Vec<String> = (1..=15).map(|i| format!("step {i}")).collect();
        let steps = normalise_steps(&Value::String(lines.join("\n")));
        assert_eq!(steps.len(), 10);
        assert_eq!(steps[0].number, 1);
        assert_eq!(steps[0].description, "step 1");
    }

    #[test]
    fn structured_steps_pass_through() {
        let input = json!([{"description": "mix", "importance": 0.9}]);
        let steps = normalise_steps(&input);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].description, "mix");
    }
}
