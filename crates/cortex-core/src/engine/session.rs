//! The Session controller: message ingestion with
//! role-conditioned extraction, summarisation triggers, and a per-session
//! critical section serialising summary writes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::adapters::{Embedder, Extractor, RowFilter, SentimentGranularity, Store, Summariser};
use crate::config::Config;
use crate::engine::base::{record_to_row, row_to_record, EngineSchema};
use crate::model::{
    new_id, KindData, MemoryKind, MemoryRecord, OpResult, SessionMessageData, SessionSummaryData, UserId,
};

use crate::adapters::summariser::{SummariseOptions, SummaryLength, SummaryStyle};

pub struct SessionSchema;

#[async_trait]
impl EngineSchema for SessionSchema {
    fn table_name(&self) -> &'static str {
        "session_messages"
    }

    fn kind(&self) -> MemoryKind {
        MemoryKind::Session
    }
}

const SUMMARIES_TABLE: &str = "session_summaries";

fn user_extraction_schema() -> Value {
    json!({"type": "object", "properties": {
        "topics": {"type": "array"}, "questions": {"type": "array"},
        "requests": {"type": "array"}, "entities": {"type": "array"}, "tone": {"type": "string"}
    }})
}

fn assistant_extraction_schema() -> Value {
    json!({"type": "object", "properties": {
        "topics": {"type": "array"}, "information": {"type": "array"},
        "suggestions": {"type": "array"}, "questions_answered": {"type": "array"},
        "follow_up_needed": {"type": "boolean"}
    }})
}

fn normalise_role(role: &str) -> &'static str {
    match role.to_lowercase().as_str() {
        "user" | "human" => "User",
        "assistant" | "ai" => "Assistant",
        _ => "Other",
    }
}

/// Everything `get_session_context` returns.
pub struct SessionContext {
    pub success: bool,
    pub session_id: String,
    pub total_messages: u64,
    pub active_messages: u64,
    pub summary_available: bool,
    pub summary: Option<SessionSummaryData>,
    pub recent_messages: Vec<MemoryRecord>,
}

pub struct SessionEngine {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extractor>,
    summariser: Arc<dyn Summariser>,
    trigger_count: usize,
    max_length: usize,
    messages_since_summary_trigger: usize,
    locks: RwLock<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionEngine {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
        summariser: Arc<dyn Summariser>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor,
            summariser,
            trigger_count: config.summary_trigger_count,
            max_length: config.max_session_length,
            messages_since_summary_trigger: config.messages_since_summary_trigger,
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Search across all messages for a user (Session is treated as
    /// one of the six kinds participating in cross-kind fan-out).
    pub async fn search(
        &self,
        query: &crate::engine::base::SearchQuery,
    ) -> Vec<crate::engine::base::SearchHit> {
        let q_vec = match self.embedder.embed(&query.text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(operation = "search", error = %e, "embedder unavailable");
                return Vec::new();
            }
        };
        let rows = match self
            .store
            .select(SessionSchema.table_name(), &RowFilter::for_user(query.user_id.clone()))
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(operation = "search", error = %e, "store read failed");
                return Vec::new();
            }
        };
        let mut hits: Vec<crate::engine::base::SearchHit> = rows
            .iter()
            .filter_map(|r| row_to_record(r).ok())
            .filter_map(|record| {
                let embedding = record.embedding.clone()?;
                let similarity = self.embedder.similarity(&q_vec, &embedding);
                (similarity >= query.threshold).then_some(crate::engine::base::SearchHit {
                    record,
                    similarity,
                    rank: 0,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(query.top_k);
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.rank = i + 1;
        }
        hits
    }

    pub async fn count(&self, user_id: &str) -> i64 {
        self.store.count("session_messages", user_id).await.unwrap_or(0)
    }

    fn session_lock(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        if let Some(lock) = self.locks.read().unwrap().get(session_id) {
            return lock.clone();
        }
        let mut write = self.locks.write().unwrap();
        write
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn all_messages(&self, user_id: &str, session_id: &str) -> Vec<MemoryRecord> {
        let rows = match self.store.select(SessionSchema.table_name(), &RowFilter::for_user(user_id.to_string())).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(operation = "all_messages", error = %e, "store read failed");
                return Vec::new();
            }
        };
        let mut messages: Vec<MemoryRecord> = rows
            .iter()
            .filter_map(|r| row_to_record(r).ok())
            .filter(|record| matches!(&record.data, KindData::SessionMessage(m) if m.session_id == session_id))
            .collect();
        messages.sort_by_key(|m| m.created_at);
        messages
    }

    async fn find_summary(&self, user_id: &str, session_id: &str) -> Option<MemoryRecord> {
        let rows = self
            .store
            .select(SUMMARIES_TABLE, &RowFilter::for_user(user_id.to_string()))
            .await
            .ok()?;
        rows.iter()
            .filter_map(|r| row_to_record(r).ok())
            .find(|record| matches!(&record.data, KindData::SessionSummary(s) if s.session_id == session_id))
    }

    fn triggers_met(&self, candidates: &[&MemoryRecord], messages_since_last_summary: Option<u64>) -> bool {
        if candidates.len() >= self.trigger_count {
            return true;
        }
        let total_len: usize = candidates.iter().map(|m| m.content.len()).sum();
        if total_len >= self.max_length {
            return true;
        }
        if let Some(since) = messages_since_last_summary {
            if since as usize >= self.messages_since_summary_trigger {
                return true;
            }
        }
        false
    }

    pub async fn store_message(
        &self,
        user_id: UserId,
        session_id: String,
        content: String,
        role: String,
        message_type: String,
    ) -> OpResult {
        let schema = if role.eq_ignore_ascii_case("assistant") || role.eq_ignore_ascii_case("ai") {
            assistant_extraction_schema()
        } else {
            user_extraction_schema()
        };
        let extraction = self.extractor.extract(&content, &schema).await;
        let sentiment = self
            .extractor
            .analyze_sentiment(&content, SentimentGranularity::Document)
            .await;

        // Messages are never dropped on extraction failure.
        let message_metadata = json!({
            "extracted": extraction.success,
            "data": extraction.data,
            "sentiment_label": format!("{:?}", sentiment.label),
            "sentiment_score": sentiment.score,
        });

        let data = SessionMessageData {
            session_id: session_id.clone(),
            role: role.clone(),
            message_type,
            message_metadata,
            is_summary_candidate: true,
        };
        let mut record = MemoryRecord::new(
            user_id.clone(),
            MemoryKind::Session,
            content,
            KindData::SessionMessage(data),
        );
        let embedding = match self.embedder.embed(&record.content).await {
            Ok(v) => v,
            Err(e) => return OpResult::failed("store_message", e.to_string()),
        };
        record.embedding = Some(embedding);
        let id = record.id.clone();
        if let Err(e) = self.store.insert(SessionSchema.table_name(), record_to_row(&record)).await {
            return OpResult::failed("store_message", e.to_string());
        }

        let candidates = self.all_messages(&user_id, &session_id).await;
        let candidate_refs: Vec<&MemoryRecord> = candidates
            .iter()
            .filter(|m| matches!(&m.data, KindData::SessionMessage(d) if d.is_summary_candidate))
            .collect();
        let existing_summary = self.find_summary(&user_id, &session_id).await;
        let since_last = existing_summary.as_ref().and_then(|s| match &s.data {
            KindData::SessionSummary(sd) => Some(sd.messages_since_last_summary),
            _ => None,
        });
        if self.triggers_met(&candidate_refs, since_last) {
            let outcome = self
                .summarise_session(user_id, session_id, true, SummaryLength::Medium)
                .await;
            if !outcome.success {
                warn!(operation = "store_message", "auto-triggered summarisation failed");
            }
        }

        OpResult::ok("store_message", id)
    }

    pub async fn summarise_session(
        &self,
        user_id: UserId,
        session_id: String,
        force: bool,
        level: SummaryLength,
    ) -> OpResult {
        let lock = self.session_lock(&session_id);
        let _guard = lock.lock().await;

        let messages = self.all_messages(&user_id, &session_id).await;
        let candidates: Vec<&MemoryRecord> = messages
            .iter()
            .filter(|m| matches!(&m.data, KindData::SessionMessage(d) if d.is_summary_candidate))
            .collect();
        let existing_summary = self.find_summary(&user_id, &session_id).await;
        let since_last = existing_summary.as_ref().and_then(|s| match &s.data {
            KindData::SessionSummary(sd) => Some(sd.messages_since_last_summary),
            _ => None,
        });
        if !force && !self.triggers_met(&candidates, since_last) {
            return OpResult::ok_noop("summarise_session", "triggers not met");
        }
        if messages.is_empty() {
            return OpResult::ok_noop("summarise_session", "no messages to summarise");
        }

        let transcript = messages
            .iter()
            .map(|m| {
                let role = match &m.data {
                    KindData::SessionMessage(d) => normalise_role(&d.role).to_string(),
                    _ => "Other".to_string(),
                };
                format!("{role}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let options = SummariseOptions {
            style: SummaryStyle::Narrative,
            length: level,
            custom_focus: vec![
                "main topics".to_string(),
                "key decisions".to_string(),
                "action items".to_string(),
                "important information".to_string(),
            ],
        };
        let outcome = self.summariser.summarise(&transcript, options).await;
        if !outcome.success {
            return OpResult::failed("summarise_session", "summariser declined");
        }
        let key_points = self.summariser.extract_key_points(&transcript, 8).await;

        let total_messages = messages.len() as u64;
        let candidate_ids: Vec<String> = candidates.iter().map(|m| m.id.clone()).collect();
        let now = Utc::now();
        let session_metadata = json!({
            "summary_generated_at": now.to_rfc3339(),
            "compression_ratio": outcome.compression_ratio,
            "quality_score": outcome.quality_score,
            "summary_length": format!("{level:?}"),
            "summary_style": "narrative",
            "original_length": transcript.len(),
            "compression_level": format!("{level:?}"),
        });

        let summary_result = match existing_summary {
            Some(mut existing) => {
                if let KindData::SessionSummary(sd) = &mut existing.data {
                    sd.conversation_summary = outcome.summary.clone();
                    sd.key_decisions = key_points.clone();
                    sd.total_messages = total_messages;
                    sd.messages_since_last_summary = 0;
                    sd.last_summary_at = now;
                    sd.session_metadata = session_metadata.clone();
                }
                existing.updated_at = now;
                let row = record_to_row(&existing);
                self.store.update(SUMMARIES_TABLE, &existing.id, row).await.map(|_| ())
            }
            None => {
                let data = SessionSummaryData {
                    session_id: session_id.clone(),
                    conversation_summary: outcome.summary.clone(),
                    key_decisions: key_points.clone(),
                    total_messages,
                    messages_since_last_summary: 0,
                    last_summary_at: now,
                    session_metadata: session_metadata.clone(),
                };
                let mut record = MemoryRecord::new(
                    user_id.clone(),
                    MemoryKind::Session,
                    outcome.summary.clone(),
                    KindData::SessionSummary(data),
                );
                record.id = new_id();
                let embedding = self.embedder.embed(&record.content).await.ok();
                record.embedding = embedding;
                self.store.insert(SUMMARIES_TABLE, record_to_row(&record)).await
            }
        };
        if let Err(e) = summary_result {
            return OpResult::failed("summarise_session", e.to_string());
        }

        // Atomically (under the per-session lock) flip every candidate seen
        // at the start of this call — a message arriving mid-summarisation
        // is excluded and covered by the next summary interval.
        for id in candidate_ids {
            if let Some(mut message) = messages.iter().find(|m| m.id == id).cloned() {
                if let KindData::SessionMessage(d) = &mut message.data {
                    d.is_summary_candidate = false;
                }
                let row = record_to_row(&message);
                if let Err(e) = self.store.update(SessionSchema.table_name(), &id, row).await {
                    warn!(operation = "summarise_session", error = %e, "candidate flag flip failed");
                }
            }
        }

        OpResult::ok("summarise_session", session_id)
    }

    pub async fn get_session_context(
        &self,
        user_id: UserId,
        session_id: String,
        include_summaries: bool,
        max_recent: usize,
    ) -> SessionContext {
        let messages = self.all_messages(&user_id, &session_id).await;
        let active_messages = messages
            .iter()
            .filter(|m| matches!(&m.data, KindData::SessionMessage(d) if d.is_summary_candidate))
            .count() as u64;
        let summary_record = self.find_summary(&user_id, &session_id).await;
        let summary = if include_summaries {
            summary_record.as_ref().and_then(|r| match &r.data {
                KindData::SessionSummary(sd) => Some(sd.clone()),
                _ => None,
            })
        } else {
            None
        };
        let recent_messages: Vec<MemoryRecord> = messages
            .iter()
            .rev()
            .take(max_recent)
            .rev()
            .cloned()
            .collect();

        SessionContext {
            success: true,
            session_id,
            total_messages: messages.len() as u64,
            active_messages,
            summary_available: summary_record.is_some(),
            summary,
            recent_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_normalisation_covers_aliases() {
        assert_eq!(normalise_role("user"), "User");
        assert_eq!(normalise_role("Human"), "User");
        assert_eq!(normalise_role("AI"), "Assistant");
        assert_eq!(normalise_role("system"), "Other");
    }
}
