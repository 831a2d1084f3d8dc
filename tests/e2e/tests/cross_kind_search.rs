//! `MemoryService::search` fans out across engines in parallel, merges hits
//! by similarity, and re-ranks the merged set — exercised here against
//! Factual and Episodic records sharing vocabulary.

use std::sync::Arc;

use cortex_core::adapters::testkit::stub_bundle;
use cortex_core::adapters::{Embedder, Extractor, Store, Summariser};
use cortex_core::config::Config;
use cortex_core::engine::base::SearchQuery;
use cortex_core::engine::{EpisodicEngine, FactualEngine, ProceduralEngine, SemanticEngine, SessionEngine, WorkingEngine};
use cortex_core::service::MemoryService;
use cortex_core::MemoryKind;

fn service() -> MemoryService {
    let (embedder, extractor, summariser, store) = stub_bundle();
    let embedder: Arc<dyn Embedder> = Arc::new(embedder);
    let extractor: Arc<dyn Extractor> = Arc::new(extractor);
    let summariser: Arc<dyn Summariser> = Arc::new(summariser);
    let store: Arc<dyn Store> = Arc::new(store);
    let config = Config::default();

    let factual = Arc::new(FactualEngine::new(store.clone(), embedder.clone(), extractor.clone()));
    let episodic = Arc::new(EpisodicEngine::new(store.clone(), embedder.clone(), extractor.clone()));
    let semantic = Arc::new(SemanticEngine::new(
        store.clone(),
        embedder.clone(),
        extractor.clone(),
        config.semantic_dedup_prefix_len,
    ));
    let procedural = Arc::new(ProceduralEngine::new(store.clone(), embedder.clone(), extractor.clone()));
    let working = Arc::new(WorkingEngine::new(store.clone(), embedder.clone(), extractor.clone()));
    let session = Arc::new(SessionEngine::new(store, embedder, extractor, summariser, &config));

    MemoryService::new(factual, episodic, semantic, procedural, working, session)
}

#[tokio::test]
async fn search_merges_hits_across_kinds_by_similarity() {
    let service = service();

    let factual_results = service
        .factual
        .store_from_dialog("user-1".to_string(), "Rust is a memory-safe systems language.")
        .await;
    assert!(factual_results.iter().any(|r| r.success));

    let episodic_result = service
        .episodic
        .store_from_dialog("user-1".to_string(), "Yesterday I read about memory-safe systems languages.", None)
        .await;
    assert!(episodic_result.success, "{}", episodic_result.message);

    let query = SearchQuery::new("user-1".to_string(), "memory-safe systems language");
    let hits = service.search(query, &[], 10).await;

    assert!(!hits.is_empty());
    assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    for (i, hit) in hits.iter().enumerate() {
        assert_eq!(hit.rank, i + 1);
    }

    let kinds_seen: std::collections::HashSet<_> = hits.iter().map(|h| h.record.kind).collect();
    assert!(kinds_seen.contains(&MemoryKind::Factual) || kinds_seen.contains(&MemoryKind::Episodic));
}

#[tokio::test]
async fn search_restricted_to_a_single_kind_only_returns_that_kind() {
    let service = service();

    service
        .factual
        .store_from_dialog("user-2".to_string(), "Coffee is a beverage.")
        .await;
    service
        .episodic
        .store_from_dialog("user-2".to_string(), "We drank coffee at the cafe yesterday.", None)
        .await;

    let query = SearchQuery::new("user-2".to_string(), "coffee");
    let hits = service.search(query, &[MemoryKind::Factual], 10).await;

    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.record.kind == MemoryKind::Factual));
}

#[tokio::test]
async fn statistics_and_consolidate_report_per_kind_counts() {
    let service = service();
    service
        .factual
        .store_from_dialog("user-3".to_string(), "Paris is the capital of France.")
        .await;
    service
        .working
        .store_from_dialog("user-3".to_string(), "Currently investigating the outage.", 300)
        .await;

    let stats = service.statistics(&"user-3".to_string()).await;
    assert_eq!(stats.total, 2);
    assert!(stats.diversity >= 2);

    let consolidation = service.consolidate(&"user-3".to_string()).await;
    assert_eq!(consolidation.expired_working_removed, 0);
    assert_eq!(consolidation.statistics.total, 2);
    assert!(consolidation.optimize_errors.is_empty());
}
