//! In-memory stub adapters, gated behind the `testkit` feature.
//!
//! These back `cortex-cli`'s demo harness and the `tests/e2e` suite. They are
//! deliberately naive — deterministic hashing instead of a real embedding
//! model, keyword heuristics instead of a real LLM — but they honour every
//! contract the traits promise, so engine logic exercised against them
//! exercises the same code paths a production deployment would hit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::AdapterError;

use super::embedder::{cosine_similarity, Embedder};
use super::extractor::{
    Entity, ExtractionOutcome, Extractor, SentimentGranularity, SentimentLabel, SentimentResult,
};
use super::llm::Llm;
use super::store::{Row, RowFilter, Store, StoreValue};
use super::summariser::{SummariseOptions, SummaryLength, SummaryOutcome, Summariser};

/// Deterministic bag-of-words hashing embedder. No two distinct strings with
/// disjoint vocabularies are guaranteed orthogonal, but shared words pull
/// vectors together, which is enough to exercise similarity-ranked search
/// in tests without shipping a real model.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AdapterError> {
        let mut v = vec![0.0f32; self.dims];
        for word in text.to_lowercase().split_whitespace() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            std::hash::Hash::hash(&word, &mut hasher);
            let bucket = (std::hash::Hasher::finish(&hasher) as usize) % self.dims;
            v[bucket] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }
}

/// Schema-blind extractor: classifies sentiment by a small keyword table and
/// entities by capitalised-word runs. `extract` itself always reports
/// `success: false`, mirroring how the original degrades to each engine's
/// own fallback synthesis when no LLM extraction service is configured.
#[derive(Default)]
pub struct StubExtractor;

const POSITIVE_WORDS: &[&str] = &["good", "great", "happy", "love", "excellent", "glad"];
const NEGATIVE_WORDS: &[&str] = &["bad", "sad", "hate", "terrible", "angry", "frustrated"];

#[async_trait]
impl Extractor for StubExtractor {
    async fn extract(&self, _text: &str, _schema: &Value) -> ExtractionOutcome {
        ExtractionOutcome::failure("no extraction service configured")
    }

    async fn extract_entities(&self, text: &str, threshold: f32) -> Vec<Entity> {
        let mut entities = Vec::new();
        for word in text.split_whitespace() {
            let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
            if cleaned.len() > 1 && cleaned.chars().next().unwrap().is_uppercase() {
                let score = 0.6f32;
                if score >= threshold {
                    entities.push(Entity {
                        text: cleaned,
                        entity_type: "unknown".to_string(),
                        score,
                    });
                }
            }
        }
        entities
    }

    async fn analyze_sentiment(
        &self,
        text: &str,
        _granularity: SentimentGranularity,
    ) -> SentimentResult {
        let lower = text.to_lowercase();
        let pos = POSITIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
        let neg = NEGATIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
        match pos.cmp(&neg) {
            std::cmp::Ordering::Greater => SentimentResult {
                label: SentimentLabel::Positive,
                score: (pos as f32 / (pos + neg).max(1) as f32).clamp(0.0, 1.0),
            },
            std::cmp::Ordering::Less => SentimentResult {
                label: SentimentLabel::Negative,
                score: (neg as f32 / (pos + neg).max(1) as f32).clamp(0.0, 1.0),
            },
            std::cmp::Ordering::Equal => SentimentResult {
                label: SentimentLabel::Neutral,
                score: 0.0,
            },
        }
    }
}

/// Truncating summariser: takes the leading N sentences depending on
/// requested length, no real compression model involved.
#[derive(Default)]
pub struct TruncatingSummariser;

impl TruncatingSummariser {
    fn sentence_budget(length: SummaryLength) -> usize {
        match length {
            SummaryLength::Brief => 1,
            SummaryLength::Medium => 3,
            SummaryLength::Detailed => 6,
        }
    }
}

#[async_trait]
impl Summariser for TruncatingSummariser {
    async fn summarise(&self, text: &str, options: SummariseOptions) -> SummaryOutcome {
        let sentences: Vec<&str> = text
            .split(|c| c == '.' || c == '!' || c == '?')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let budget = Self::sentence_budget(options.length).min(sentences.len().max(1));
        let summary = if sentences.is_empty() {
            String::new()
        } else {
            sentences[..budget].join(". ") + "."
        };
        let word_count = summary.split_whitespace().count() as u32;
        let character_count = summary.chars().count() as u32;
        let compression_ratio = if text.is_empty() {
            1.0
        } else {
            character_count as f32 / text.chars().count() as f32
        };
        SummaryOutcome {
            success: !summary.is_empty(),
            summary,
            word_count,
            character_count,
            quality_score: 0.5,
            compression_ratio,
            billing: None,
        }
    }

    async fn extract_key_points(&self, text: &str, max_points: usize) -> Vec<String> {
        text.split(|c| c == '.' || c == '!' || c == '?')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(max_points)
            .map(str::to_string)
            .collect()
    }
}

/// Table-of-rows in-memory store. Rows are keyed by their own `id` cell;
/// `select`/`delete_where` do a linear scan through `RowFilter::matches`,
/// which is all the in-process demo/test workload needs.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<HashMap<String, HashMap<String, Row>>>,
    next_rowid: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn row_id(row: &Row) -> Option<String> {
        row.get("id").and_then(StoreValue::as_text).map(str::to_string)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert(&self, table: &str, row: Row) -> Result<(), AdapterError> {
        let id = Self::row_id(&row)
            .ok_or_else(|| AdapterError::Store("row missing id column".to_string()))?;
        self.next_rowid.fetch_add(1, Ordering::Relaxed);
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
        Ok(())
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Row>, AdapterError> {
        Ok(self
            .tables
            .lock()
            .await
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned())
    }

    async fn select(&self, table: &str, filter: &RowFilter) -> Result<Vec<Row>, AdapterError> {
        Ok(self
            .tables
            .lock()
            .await
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(&self, table: &str, id: &str, changes: Row) -> Result<bool, AdapterError> {
        let mut tables = self.tables.lock().await;
        if let Some(row) = tables.get_mut(table).and_then(|rows| rows.get_mut(id)) {
            for (k, v) in changes {
                row.insert(k, v);
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool, AdapterError> {
        Ok(self
            .tables
            .lock()
            .await
            .get_mut(table)
            .map(|rows| rows.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn delete_where(&self, table: &str, filter: &RowFilter) -> Result<u64, AdapterError> {
        let mut tables = self.tables.lock().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let doomed: Vec<String> = rows
            .values()
            .filter(|row| filter.matches(row))
            .filter_map(Self::row_id)
            .collect();
        for id in &doomed {
            rows.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn count(&self, table: &str, user_id: &str) -> Result<i64, AdapterError> {
        let filter = RowFilter::for_user(user_id.to_string());
        Ok(self
            .tables
            .lock()
            .await
            .get(table)
            .map(|rows| rows.values().filter(|row| filter.matches(row)).count() as i64)
            .unwrap_or(0))
    }
}

/// Convenience bundle: one of each stub adapter, wired together the way
/// `cortex-cli`'s demo harness constructs its `MemoryService`.
pub fn stub_bundle() -> (HashingEmbedder, StubExtractor, TruncatingSummariser, InMemoryStore) {
    (
        HashingEmbedder::default(),
        StubExtractor,
        TruncatingSummariser,
        InMemoryStore::new(),
    )
}

/// Template-based LLM stub: always returns a `SELECT * FROM <first table>
/// LIMIT 100` style skeleton rather than calling a real model. Exercises the
/// generator's JSON/fence/regex extraction ladder on a deliberately plain
/// response (a bare `SELECT` statement, no fencing, no JSON wrapper).
#[derive(Default)]
pub struct TemplateLlm;

#[async_trait]
impl Llm for TemplateLlm {
    async fn complete(&self, prompt: &str) -> Result<String, AdapterError> {
        let table = prompt
            .lines()
            .find(|l| l.trim_start().starts_with("- "))
            .and_then(|l| l.trim_start().strip_prefix("- "))
            .and_then(|l| l.split_whitespace().next())
            .unwrap_or("unknown_table");
        Ok(format!("SELECT * FROM {table} LIMIT 100"))
    }
}

/// In-memory SQL connector: answers `SELECT ... FROM <table> ...` against a
/// fixed set of pre-loaded tables, ignoring `WHERE`/`JOIN`/`ORDER BY` beyond
/// picking the table out of the statement. Enough to exercise the executor's
/// fallback ladder end to end without a real database.
#[derive(Default)]
pub struct StubSqlConnector {
    tables: HashMap<String, Vec<HashMap<String, Value>>>,
}

impl StubSqlConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<HashMap<String, Value>>) -> Self {
        self.tables.insert(name.into(), rows);
        self
    }

    fn table_from_sql(sql: &str) -> Option<String> {
        let upper = sql.to_uppercase();
        let from_pos = upper.find("FROM ")? + 5;
        sql[from_pos..]
            .split_whitespace()
            .next()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '_').to_string())
    }
}

#[async_trait]
impl crate::sql::executor::SqlConnector for StubSqlConnector {
    async fn execute(&self, sql: &str) -> Result<crate::sql::executor::RawQueryResult, AdapterError> {
        let table = Self::table_from_sql(sql)
            .ok_or_else(|| AdapterError::Store("could not determine table from SQL".to_string()))?;
        let rows = self
            .tables
            .get(&table)
            .ok_or_else(|| AdapterError::Store(format!("unknown table: {table}")))?;
        let columns = rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        Ok(crate::sql::executor::RawQueryResult {
            columns,
            rows: rows.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_sql_connector_finds_table_from_select() {
        let mut row = HashMap::new();
        row.insert("id".to_string(), Value::from(1));
        let connector = StubSqlConnector::new().with_table("orders", vec![row]);
        let result = crate::sql::executor::SqlConnector::execute(&connector, "SELECT * FROM orders LIMIT 10")
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
    }

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let e = HashingEmbedder::default();
        let a = e.embed("hello world").await.unwrap();
        let b = e.embed("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryStore::new();
        let mut row = Row::new();
        row.insert("id".into(), StoreValue::Text("m1".into()));
        row.insert("user_id".into(), StoreValue::Text("u1".into()));
        store.insert("facts", row).await.unwrap();
        let fetched = store.get("facts", "m1").await.unwrap();
        assert!(fetched.is_some());
        assert_eq!(store.count("facts", "u1").await.unwrap(), 1);
        let deleted = store.delete("facts", "m1").await.unwrap();
        assert!(deleted);
        assert_eq!(store.count("facts", "u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stub_extractor_flags_sentiment_keywords() {
        let extractor = StubExtractor;
        let result = extractor
            .analyze_sentiment("I had a great and happy day", SentimentGranularity::Document)
            .await;
        assert_eq!(result.label, SentimentLabel::Positive);
    }

    #[tokio::test]
    async fn truncating_summariser_respects_brief_budget() {
        let summariser = TruncatingSummariser;
        let outcome = summariser
            .summarise(
                "First sentence. Second sentence. Third sentence.",
                SummariseOptions {
                    style: super::super::summariser::SummaryStyle::Narrative,
                    length: SummaryLength::Brief,
                    custom_focus: vec![],
                },
            )
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.summary, "First sentence.");
    }
}
