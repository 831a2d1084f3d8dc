//! The shared engine template: storage protocol, search
//! protocol, and access tracking, generic over whichever `EngineSchema`
//! a typed engine supplies.
//!
//! `BaseEngine` never knows about `FactualData`/`EpisodicData`/etc — it
//! moves `MemoryRecord`s to and from `Row`s and leaves per-kind extraction,
//! normalisation, and merge logic to the six typed engines in this module.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::adapters::{Embedder, RowFilter, Store, StoreValue};
use crate::error::{EngineError, ValidationError};
use crate::model::{KindData, MemoryId, MemoryKind, MemoryRecord, OpResult, UserId};

/// Per-kind facts a typed engine supplies to `BaseEngine`: its table name,
/// the kind tag, and (best-effort, default no-op) storage maintenance.
#[async_trait]
pub trait EngineSchema: Send + Sync {
    fn table_name(&self) -> &'static str;
    fn kind(&self) -> MemoryKind;

    /// Best-effort per-engine maintenance invoked by `MemoryService::consolidate`.
    /// Failures are logged, never propagated.
    async fn optimize_storage(&self, _store: &dyn Store, _user_id: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A parameterised retrieval request.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub user_id: UserId,
    pub top_k: usize,
    pub threshold: f32,
    pub importance_floor: Option<f32>,
    pub confidence_floor: Option<f32>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub active_only: bool,
}

impl SearchQuery {
    pub fn new(user_id: impl Into<UserId>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_id: user_id.into(),
            top_k: 10,
            threshold: 0.0,
            importance_floor: None,
            confidence_floor: None,
            created_after: None,
            created_before: None,
            active_only: false,
        }
    }

    fn row_filter(&self) -> RowFilter {
        let mut filter = RowFilter::for_user(self.user_id.clone());
        if let Some(floor) = self.importance_floor {
            filter = filter.importance_floor(floor);
        }
        if let Some(floor) = self.confidence_floor {
            filter = filter.confidence_floor(floor);
        }
        if let Some(after) = self.created_after {
            filter = filter.created_after(after);
        }
        if let Some(before) = self.created_before {
            filter = filter.created_before(before);
        }
        if self.active_only {
            filter = filter.active_only(Utc::now());
        }
        filter
    }
}

/// One ranked hit: the matched record, its similarity to the query, and its
/// 1-based rank within the result set it was produced in.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub record: MemoryRecord,
    pub similarity: f32,
    pub rank: usize,
}

/// Serialise a record to the boundary row shape (the storage protocol:
/// complex fields string-encoded, datetimes to a stable text form).
pub fn record_to_row(record: &MemoryRecord) -> crate::adapters::Row {
    let mut row = crate::adapters::Row::new();
    row.insert("id".into(), StoreValue::Text(record.id.clone()));
    row.insert("user_id".into(), StoreValue::Text(record.user_id.clone()));
    row.insert("kind".into(), StoreValue::Text(record.kind.as_str().to_string()));
    row.insert("content".into(), StoreValue::Text(record.content.clone()));
    row.insert(
        "embedding".into(),
        match &record.embedding {
            Some(v) => StoreValue::Text(serde_json::to_string(v).unwrap_or_default()),
            None => StoreValue::Null,
        },
    );
    row.insert("importance".into(), StoreValue::Real(record.importance as f64));
    row.insert("confidence".into(), StoreValue::Real(record.confidence as f64));
    row.insert("access_count".into(), StoreValue::Int(record.access_count as i64));
    row.insert("created_at".into(), StoreValue::Text(record.created_at.to_rfc3339()));
    row.insert("updated_at".into(), StoreValue::Text(record.updated_at.to_rfc3339()));
    row.insert(
        "last_accessed_at".into(),
        match record.last_accessed_at {
            Some(ts) => StoreValue::Text(ts.to_rfc3339()),
            None => StoreValue::Null,
        },
    );
    row.insert(
        "context".into(),
        StoreValue::Text(serde_json::to_string(&record.context).unwrap_or_default()),
    );
    row.insert(
        "tags".into(),
        StoreValue::Text(serde_json::to_string(&record.tags).unwrap_or_default()),
    );
    row.insert(
        "data".into(),
        StoreValue::Text(serde_json::to_string(&record.data).unwrap_or_default()),
    );
    if let KindData::Working(ref data) = record.data {
        row.insert("expires_at".into(), StoreValue::Text(data.expires_at.to_rfc3339()));
    }
    row
}

fn required_text<'a>(row: &'a crate::adapters::Row, field: &'static str) -> Result<&'a str, EngineError> {
    row.get(field)
        .and_then(StoreValue::as_text)
        .ok_or_else(|| ValidationError::MissingField(field).into())
}

fn parse_datetime(row: &crate::adapters::Row, field: &'static str) -> Result<DateTime<Utc>, EngineError> {
    let text = required_text(row, field)?;
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ValidationError::Invalid {
                field,
                reason: e.to_string(),
            }
            .into()
        })
}

/// Deserialise a boundary row back into a `MemoryRecord`.
pub fn row_to_record(row: &crate::adapters::Row) -> Result<MemoryRecord, EngineError> {
    let kind_str = required_text(row, "kind")?;
    let kind = MemoryKind::ALL
        .into_iter()
        .find(|k| k.as_str() == kind_str)
        .ok_or_else(|| ValidationError::Invalid {
            field: "kind",
            reason: format!("unrecognised kind {kind_str}"),
        })?;

    let embedding = match row.get("embedding") {
        Some(StoreValue::Text(text)) => serde_json::from_str(text).map_err(|e| {
            ValidationError::Invalid {
                field: "embedding",
                reason: e.to_string(),
            }
        })?,
        _ => None,
    };

    let context = match row.get("context") {
        Some(StoreValue::Text(text)) => serde_json::from_str(text).unwrap_or_default(),
        _ => Default::default(),
    };
    let tags = match row.get("tags") {
        Some(StoreValue::Text(text)) => serde_json::from_str(text).unwrap_or_default(),
        _ => Vec::new(),
    };
    let data_text = required_text(row, "data")?;
    let data: KindData = serde_json::from_str(data_text).map_err(|e| ValidationError::Invalid {
        field: "data",
        reason: e.to_string(),
    })?;

    Ok(MemoryRecord {
        id: required_text(row, "id")?.to_string(),
        user_id: required_text(row, "user_id")?.to_string(),
        kind,
        content: required_text(row, "content")?.to_string(),
        embedding,
        importance: row
            .get("importance")
            .and_then(StoreValue::as_real)
            .unwrap_or(0.5) as f32,
        confidence: row
            .get("confidence")
            .and_then(StoreValue::as_real)
            .unwrap_or(0.5) as f32,
        access_count: row.get("access_count").and_then(StoreValue::as_int).unwrap_or(0) as u64,
        created_at: parse_datetime(row, "created_at")?,
        updated_at: parse_datetime(row, "updated_at")?,
        last_accessed_at: match row.get("last_accessed_at") {
            Some(StoreValue::Text(_)) => Some(parse_datetime(row, "last_accessed_at")?),
            _ => None,
        },
        context,
        tags,
        data,
    })
}

/// Generic store/get/search/update/delete/related machinery, held by each
/// typed engine alongside its own extraction/normalisation/merge logic.
pub struct BaseEngine {
    pub schema: Box<dyn EngineSchema>,
    pub store: Arc<dyn Store>,
    pub embedder: Arc<dyn Embedder>,
}

impl BaseEngine {
    pub fn new(schema: Box<dyn EngineSchema>, store: Arc<dyn Store>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            schema,
            store,
            embedder,
        }
    }

    fn table(&self) -> &'static str {
        self.schema.table_name()
    }

    /// Compute and attach an embedding if the record arrived without one.
    async fn ensure_embedding(&self, record: &mut MemoryRecord) -> Result<(), EngineError> {
        if record.embedding.is_none() {
            let vector = self
                .embedder
                .embed(&record.content)
                .await
                .map_err(EngineError::Adapter)?;
            record.embedding = Some(vector);
        }
        Ok(())
    }

    pub async fn store(&self, mut record: MemoryRecord) -> OpResult {
        match self.ensure_embedding(&mut record).await {
            Ok(()) => {}
            Err(e) => return OpResult::failed("store", e.to_string()),
        }
        let id = record.id.clone();
        let row = record_to_row(&record);
        match self.store.insert(self.table(), row).await {
            Ok(()) => OpResult::ok("store", id),
            Err(e) => OpResult::failed("store", e.to_string()),
        }
    }

    pub async fn get(&self, id: &str) -> Option<MemoryRecord> {
        let row = match self.store.get(self.table(), id).await {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(e) => {
                warn!(operation = "get", error = %e, "store read failed");
                return None;
            }
        };
        match row_to_record(&row) {
            Ok(record) => {
                self.track_access(&record).await;
                Some(record)
            }
            Err(e) => {
                warn!(operation = "get", error = %e, "row deserialisation failed");
                None
            }
        }
    }

    /// Bump `access_count`/`last_accessed_at` in place on the record's own
    /// table; failures are logged and swallowed, never surfaced.
    async fn track_access(&self, record: &MemoryRecord) {
        let mut changes = crate::adapters::Row::new();
        changes.insert(
            "access_count".into(),
            StoreValue::Int(record.access_count as i64 + 1),
        );
        changes.insert(
            "last_accessed_at".into(),
            StoreValue::Text(Utc::now().to_rfc3339()),
        );
        let result = self.store.update(self.table(), &record.id, changes).await;
        match result {
            Ok(true) => {}
            Ok(false) => warn!(operation = "track_access", id = %record.id, "record vanished before access update"),
            Err(e) => warn!(operation = "track_access", error = %e, "access tracking failed"),
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> Vec<SearchHit> {
        let q_vec = match self.embedder.embed(&query.text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(operation = "search", error = %e, "embedder unavailable");
                return Vec::new();
            }
        };
        let rows = match self.store.select(self.table(), &query.row_filter()).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(operation = "search", error = %e, "store read failed");
                return Vec::new();
            }
        };
        let mut hits: Vec<SearchHit> = rows
            .iter()
            .filter_map(|row| row_to_record(row).ok())
            .filter_map(|record| {
                let embedding = record.embedding.as_ref()?;
                let similarity = self.embedder.similarity(&q_vec, embedding);
                (similarity >= query.threshold).then_some((record, similarity))
            })
            .map(|(record, similarity)| SearchHit {
                record,
                similarity,
                rank: 0,
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(query.top_k);
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.rank = i + 1;
        }
        hits
    }

    pub async fn update(&self, id: &str, apply: impl FnOnce(&mut MemoryRecord)) -> OpResult {
        let Some(mut record) = self.get(id).await else {
            return OpResult::failed("update", "record not found");
        };
        let previous_content = record.content.clone();
        apply(&mut record);
        record.updated_at = Utc::now();
        if record.content != previous_content {
            record.embedding = None;
            if let Err(e) = self.ensure_embedding(&mut record).await {
                return OpResult::failed("update", e.to_string());
            }
        }
        let row = record_to_row(&record);
        match self.store.update(self.table(), id, row).await {
            Ok(true) => OpResult::ok("update", id.to_string()),
            Ok(false) => OpResult::failed("update", "record not found"),
            Err(e) => OpResult::failed("update", e.to_string()),
        }
    }

    pub async fn delete(&self, id: &str) -> OpResult {
        match self.store.delete(self.table(), id).await {
            Ok(true) => OpResult::ok("delete", id.to_string()),
            Ok(false) => OpResult::failed("delete", "record not found"),
            Err(e) => OpResult::failed("delete", e.to_string()),
        }
    }

    pub async fn related(&self, id: &str, n: usize) -> Vec<SearchHit> {
        let Some(record) = self.get(id).await else {
            return Vec::new();
        };
        let mut query = SearchQuery::new(record.user_id.clone(), record.content.clone());
        query.top_k = n + 1;
        let mut hits = self.search(&query).await;
        hits.retain(|hit| hit.record.id != id);
        hits.truncate(n);
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.rank = i + 1;
        }
        hits
    }

    pub async fn count(&self, user_id: &str) -> i64 {
        self.store.count(self.table(), user_id).await.unwrap_or(0)
    }

    /// Directed, typed edges between records ("Relationship
    /// symmetry is not required"). Stored in a shared `memory_edges` table
    /// with columns `id, user_id, from_id, to_id, edge_type, strength`.
    pub async fn store_edge(
        &self,
        user_id: &str,
        from_id: &str,
        to_id: &str,
        edge_type: &str,
        strength: f32,
    ) {
        let mut row = crate::adapters::Row::new();
        row.insert("id".into(), StoreValue::Text(crate::model::new_id()));
        row.insert("user_id".into(), StoreValue::Text(user_id.to_string()));
        row.insert("from_id".into(), StoreValue::Text(from_id.to_string()));
        row.insert("to_id".into(), StoreValue::Text(to_id.to_string()));
        row.insert("edge_type".into(), StoreValue::Text(edge_type.to_string()));
        row.insert("strength".into(), StoreValue::Real(strength as f64));
        if let Err(e) = self.store.insert("memory_edges", row).await {
            warn!(operation = "store_edge", error = %e, "edge write failed");
        }
    }
}

/// Clamp helper shared by every engine's normalisation step.
pub fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

pub fn clamp(v: f32, lo: f32, hi: f32) -> f32 {
    v.clamp(lo, hi)
}

/// Read a JSON object field as a string, defaulting to an empty string.
pub fn str_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub fn f32_field(value: &Value, field: &str, default: f32) -> f32 {
    value
        .get(field)
        .and_then(Value::as_f64)
        .map(|v| v as f32)
        .unwrap_or(default)
}
