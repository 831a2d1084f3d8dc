//! `MemoryService`: cross-kind dispatch, fan-out search, batch store,
//! statistics, and consolidation.
//!
//! Fan-out uses `tokio::task::JoinSet` so cross-kind search, parallel
//! counts, and parallel batch store never serialise on one slow engine.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::warn;

use crate::engine::base::{SearchHit, SearchQuery};
use crate::engine::{EpisodicEngine, FactualEngine, ProceduralEngine, SemanticEngine, SessionEngine, WorkingEngine};
use crate::model::{KindData, MemoryKind, MemoryRecord, OpResult, UserId};

pub struct MemoryService {
    pub factual: Arc<FactualEngine>,
    pub episodic: Arc<EpisodicEngine>,
    pub semantic: Arc<SemanticEngine>,
    pub procedural: Arc<ProceduralEngine>,
    pub working: Arc<WorkingEngine>,
    pub session: Arc<SessionEngine>,
}

/// Per-kind counts plus a diversity metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStatistics {
    pub total: i64,
    pub per_kind: HashMap<String, i64>,
    pub diversity: usize,
}

/// `Working.cleanup_expired` count plus refreshed statistics.
#[derive(Debug, Clone)]
pub struct ConsolidationResult {
    pub expired_working_removed: u64,
    pub statistics: MemoryStatistics,
    pub optimize_errors: Vec<String>,
}

impl MemoryService {
    pub fn new(
        factual: Arc<FactualEngine>,
        episodic: Arc<EpisodicEngine>,
        semantic: Arc<SemanticEngine>,
        procedural: Arc<ProceduralEngine>,
        working: Arc<WorkingEngine>,
        session: Arc<SessionEngine>,
    ) -> Self {
        Self {
            factual,
            episodic,
            semantic,
            procedural,
            working,
            session,
        }
    }

    /// Dispatch a fully-formed record to its engine by `kind` (batch path).
    pub async fn store(&self, record: MemoryRecord) -> OpResult {
        match record.kind {
            MemoryKind::Factual => self.factual.store_record(record).await,
            MemoryKind::Episodic => self.episodic.store_record(record).await,
            MemoryKind::Semantic => self.semantic.store_record(record).await,
            MemoryKind::Procedural => self.procedural.store_record(record).await,
            MemoryKind::Working => self.working.store_record(record).await,
            MemoryKind::Session => match record.data {
                KindData::SessionMessage(_) => OpResult::failed("store", "use store_message for session kind"),
                _ => OpResult::failed("store", "unsupported session payload for batch store"),
            },
        }
    }

    /// Groups records by kind, dispatches each group to its engine in
    /// parallel; returns per-record results preserving no particular order.
    pub async fn batch_store(&self, records: Vec<MemoryRecord>) -> Vec<OpResult> {
        let mut join_set = JoinSet::new();
        for record in records {
            let service = self.clone_handles();
            join_set.spawn(async move { service.store(record).await });
        }
        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => results.push(OpResult::failed("batch_store", e.to_string())),
            }
        }
        results
    }

    /// `search(query)`: all six kinds if `kinds` is empty, else the
    /// specified subset; fan-out is parallel, merged by similarity, and
    /// re-ranked 1..N.
    pub async fn search(&self, query: SearchQuery, kinds: &[MemoryKind], top_k: usize) -> Vec<SearchHit> {
        let targets: Vec<MemoryKind> = if kinds.is_empty() {
            MemoryKind::ALL.to_vec()
        } else {
            kinds.to_vec()
        };

        let mut join_set = JoinSet::new();
        for kind in targets {
            let service = self.clone_handles();
            let query = query.clone();
            join_set.spawn(async move { service.search_one(kind, &query).await });
        }

        let mut merged = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(mut hits) => merged.append(&mut hits),
                Err(e) => warn!(operation = "search", error = %e, "engine search task panicked"),
            }
        }
        merged.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(top_k);
        for (i, hit) in merged.iter_mut().enumerate() {
            hit.rank = i + 1;
        }
        merged
    }

    async fn search_one(&self, kind: MemoryKind, query: &SearchQuery) -> Vec<SearchHit> {
        match kind {
            MemoryKind::Factual => self.factual.search(query).await,
            MemoryKind::Episodic => self.episodic.search(query).await,
            MemoryKind::Semantic => self.semantic.search(query).await,
            MemoryKind::Procedural => self.procedural.search(query).await,
            MemoryKind::Working => self.working.search(query).await,
            MemoryKind::Session => self.session.search(query).await,
        }
    }

    /// Parallel `COUNT` across the six engine tables.
    pub async fn statistics(&self, user_id: &UserId) -> MemoryStatistics {
        let mut join_set: JoinSet<(MemoryKind, i64)> = JoinSet::new();
        for kind in MemoryKind::ALL {
            let service = self.clone_handles();
            let user_id = user_id.clone();
            join_set.spawn(async move {
                let count = match kind {
                    MemoryKind::Factual => service.factual.count(&user_id).await,
                    MemoryKind::Episodic => service.episodic.count(&user_id).await,
                    MemoryKind::Semantic => service.semantic.count(&user_id).await,
                    MemoryKind::Procedural => service.procedural.count(&user_id).await,
                    MemoryKind::Working => service.working.count(&user_id).await,
                    MemoryKind::Session => service.session.count(&user_id).await,
                };
                (kind, count)
            });
        }
        let mut per_kind = HashMap::new();
        let mut total = 0i64;
        while let Some(joined) = join_set.join_next().await {
            if let Ok((kind, count)) = joined {
                total += count;
                per_kind.insert(kind.as_str().to_string(), count);
            }
        }
        let diversity = per_kind.values().filter(|c| **c > 0).count();
        MemoryStatistics {
            total,
            per_kind,
            diversity,
        }
    }

    /// Expires Working records, refreshes statistics, and best-effort
    /// invites each engine's `optimize_storage` (non-fatal per engine).
    pub async fn consolidate(&self, user_id: &UserId) -> ConsolidationResult {
        let expired_working_removed = self.working.cleanup_expired(user_id).await;
        let statistics = self.statistics(user_id).await;

        let mut optimize_errors = Vec::new();
        if let Err(e) = self.factual.optimize_storage(user_id).await {
            optimize_errors.push(format!("factual: {e}"));
        }
        if let Err(e) = self.episodic.optimize_storage(user_id).await {
            optimize_errors.push(format!("episodic: {e}"));
        }
        if let Err(e) = self.semantic.optimize_storage(user_id).await {
            optimize_errors.push(format!("semantic: {e}"));
        }
        if let Err(e) = self.procedural.optimize_storage(user_id).await {
            optimize_errors.push(format!("procedural: {e}"));
        }
        if let Err(e) = self.working.optimize_storage(user_id).await {
            optimize_errors.push(format!("working: {e}"));
        }
        for err in &optimize_errors {
            warn!(operation = "consolidate", error = %err, "engine optimize_storage failed");
        }

        ConsolidationResult {
            expired_working_removed,
            statistics,
            optimize_errors,
        }
    }

    fn clone_handles(&self) -> Self {
        Self {
            factual: self.factual.clone(),
            episodic: self.episodic.clone(),
            semantic: self.semantic.clone(),
            procedural: self.procedural.clone(),
            working: self.working.clone(),
            session: self.session.clone(),
        }
    }
}
