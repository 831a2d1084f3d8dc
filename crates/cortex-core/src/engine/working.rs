//! The Working engine: short-lived task-scoped scratch memory
//! with TTL expiry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

use crate::adapters::{Embedder, Extractor, RowFilter, Store};
use crate::engine::base::{clamp, str_field, BaseEngine, EngineSchema, SearchHit};
use crate::model::{KindData, MemoryKind, MemoryRecord, OpResult, UserId, WorkingData};

pub struct WorkingSchema;

#[async_trait]
impl EngineSchema for WorkingSchema {
    fn table_name(&self) -> &'static str {
        "working_memories"
    }

    fn kind(&self) -> MemoryKind {
        MemoryKind::Working
    }
}

fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "task_id": {"type": "string"},
            "priority": {"type": "number"},
            "current_step": {"type": "string"},
            "next_actions": {"type": "array", "items": {"type": "string"}},
            "interim_results": {},
            "blocking_issues": {"type": "array", "items": {"type": "string"}},
            "time_sensitivity": {"type": "string"}
        }
    })
}

/// First three alphanumeric words, used to derive `task_id` when the model
/// doesn't supply one.
fn derive_task_id(dialog: &str) -> String {
    dialog
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .take(3)
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

pub struct WorkingEngine {
    base: BaseEngine,
    extractor: Arc<dyn Extractor>,
}

impl WorkingEngine {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            base: BaseEngine::new(Box::new(WorkingSchema), store, embedder),
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

    pub async fn store_from_dialog(&self, user_id: UserId, dialog: &str, ttl_seconds: i64) -> OpResult {
        let raw = self.extractor.extract(dialog, &extraction_schema()).await;
        let (task_id, mut task_context, priority) = if raw.success {
            let task_id = {
                let t = str_field(&raw.data, "task_id");
                if t.is_empty() {
                    derive_task_id(dialog)
                } else {
                    t
                }
            };
            let priority = raw
                .data
                .get("priority")
                .and_then(Value::as_f64)
                .map(|p| clamp(p as f32, 1.0, 5.0) as u8)
                .unwrap_or(3);
            let mut ctx = Map::new();
            for key in ["current_step", "next_actions", "interim_results", "blocking_issues", "time_sensitivity"] {
                if let Some(v) = raw.data.get(key) {
                    ctx.insert(key.to_string(), v.clone());
                }
            }
            (task_id, ctx, priority)
        } else {
            (derive_task_id(dialog), Map::new(), 3u8)
        };
        task_context.entry("progress_percentage").or_insert(json!(0));

        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds.max(1));
        let data = WorkingData {
            task_id,
            task_context: std::mem::take(&mut task_context),
            ttl_seconds,
            priority,
            expires_at,
        };
        let record = MemoryRecord::new(user_id, MemoryKind::Working, dialog.to_string(), KindData::Working(data));
        self.base.store(record).await
    }

    pub async fn extend_ttl(&self, id: &str, additional_seconds: i64) -> OpResult {
        self.base
            .update(id, |record| {
                if let KindData::Working(wd) = &mut record.data {
                    wd.expires_at += Duration::seconds(additional_seconds);
                    wd.ttl_seconds += additional_seconds;
                }
            })
            .await
    }

    pub async fn update_task_context(&self, id: &str, patch: &Map<String, Value>) -> OpResult {
        let patch = patch.clone();
        self.base
            .update(id, |record| {
                if let KindData::Working(wd) = &mut record.data {
                    crate::model::deep_merge(&mut wd.task_context, &patch);
                }
            })
            .await
    }

    pub async fn update_task_progress(
        &self,
        id: &str,
        current_step: Option<String>,
        progress_percentage: f32,
        next_actions: Option<Vec<String>>,
    ) -> OpResult {
        let progress_percentage = clamp(progress_percentage, 0.0, 100.0);
        self.base
            .update(id, |record| {
                if let KindData::Working(wd) = &mut record.data {
                    if let Some(step) = current_step {
                        wd.task_context.insert("current_step".to_string(), json!(step));
                    }
                    wd.task_context
                        .insert("progress_percentage".to_string(), json!(progress_percentage));
                    if let Some(actions) = next_actions {
                        wd.task_context.insert("next_actions".to_string(), json!(actions));
                    }
                }
            })
            .await
    }

    /// Bulk delete `expires_at < now`; returns the affected count.
    pub async fn cleanup_expired(&self, user_id: &str) -> u64 {
        let filter = RowFilter::for_user(user_id.to_string()).with(
            "expires_at",
            crate::adapters::FilterOp::Lt,
            crate::adapters::StoreValue::Text(Utc::now().to_rfc3339()),
        );
        self.base
            .store
            .delete_where(self.base.schema.table_name(), &filter)
            .await
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_derived_from_first_three_words() {
        assert_eq!(derive_task_id("Deploy the new service please"), "deploy_the_new");
    }
}
