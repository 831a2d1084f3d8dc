//! Session message ingestion with forced summarisation, and Working memory's
//! task-context updates, TTL extension, and expiry cleanup.

use std::sync::Arc;

use cortex_core::adapters::testkit::stub_bundle;
use cortex_core::adapters::{Embedder, Extractor, Store, Summariser};
use cortex_core::config::Config;
use cortex_core::engine::{SessionEngine, WorkingEngine};
use cortex_core::model::KindData;
use serde_json::{json, Map};

fn handles() -> (Arc<dyn Store>, Arc<dyn Embedder>, Arc<dyn Extractor>, Arc<dyn Summariser>) {
    let (embedder, extractor, summariser, store) = stub_bundle();
    (Arc::new(store), Arc::new(embedder), Arc::new(extractor), Arc::new(summariser))
}

#[tokio::test]
async fn session_message_ingestion_and_forced_summary() {
    let (store, embedder, extractor, summariser) = handles();
    let config = Config::default();
    let engine = SessionEngine::new(store, embedder, extractor, summariser, &config);

    let user_id = "user-1".to_string();
    let session_id = "session-a".to_string();

    let first = engine
        .store_message(user_id.clone(), session_id.clone(), "Hello, I need help deploying the service.".to_string(), "user".to_string(), "query".to_string())
        .await;
    assert!(first.success, "{}", first.message);

    let second = engine
        .store_message(
            user_id.clone(),
            session_id.clone(),
            "Sure, run the tests and then push the release tag.".to_string(),
            "assistant".to_string(),
            "response".to_string(),
        )
        .await;
    assert!(second.success, "{}", second.message);

    let summarised = engine.summarise_session(user_id.clone(), session_id.clone(), true, cortex_core::adapters::summariser::SummaryLength::Brief).await;
    assert!(summarised.success, "{}", summarised.message);

    let context = engine.get_session_context(user_id, session_id, true, 10).await;
    assert!(context.success);
    assert_eq!(context.total_messages, 2);
    assert!(context.summary_available);
    assert!(context.summary.is_some());
    assert_eq!(context.active_messages, 0, "forced summary should flip both candidates");
}

#[tokio::test]
async fn session_context_limits_recent_messages_to_max_recent() {
    let (store, embedder, extractor, summariser) = handles();
    let config = Config::default();
    let engine = SessionEngine::new(store, embedder, extractor, summariser, &config);

    let user_id = "user-2".to_string();
    let session_id = "session-b".to_string();
    for i in 0..5 {
        let result = engine
            .store_message(user_id.clone(), session_id.clone(), format!("message number {i}"), "user".to_string(), "query".to_string())
            .await;
        assert!(result.success, "{}", result.message);
    }

    let context = engine.get_session_context(user_id, session_id, false, 2).await;
    assert_eq!(context.total_messages, 5);
    assert_eq!(context.recent_messages.len(), 2);
    assert!(context.summary.is_none(), "include_summaries=false should suppress the summary");
}

#[tokio::test]
async fn working_engine_updates_task_context_and_extends_ttl() {
    let (store, embedder, extractor, _summariser) = handles();
    let engine = WorkingEngine::new(store, embedder, extractor);

    let stored = engine
        .store_from_dialog("user-3".to_string(), "Debugging the flaky retry logic in the ingest pipeline.", 3600)
        .await;
    assert!(stored.success, "{}", stored.message);
    let id = stored.data.expect("stored record has an id");

    let mut patch = Map::new();
    patch.insert("blocking_issues".to_string(), json!(["waiting on a reviewer"]));
    let patched = engine.update_task_context(&id, &patch).await;
    assert!(patched.success, "{}", patched.message);

    let progressed = engine
        .update_task_progress(&id, Some("writing the regression test".to_string()), 42.0, Some(vec!["open a PR".to_string()]))
        .await;
    assert!(progressed.success, "{}", progressed.message);

    let extended = engine.extend_ttl(&id, 1800).await;
    assert!(extended.success, "{}", extended.message);

    let record = engine.get(&id).await.expect("record exists");
    match record.data {
        KindData::Working(data) => {
            assert_eq!(data.ttl_seconds, 3600 + 1800);
            assert_eq!(
                data.task_context.get("current_step").and_then(|v| v.as_str()),
                Some("writing the regression test")
            );
            assert_eq!(data.task_context.get("progress_percentage").and_then(|v| v.as_f64()), Some(42.0));
            assert!(data.task_context.get("blocking_issues").is_some());
        }
        other => panic!("expected working data, got {other:?}"),
    }
}

#[tokio::test]
async fn working_engine_cleanup_only_removes_expired_records_for_the_given_user() {
    let (store, embedder, extractor, _summariser) = handles();
    let engine = WorkingEngine::new(store, embedder, extractor);

    let expiring = engine.store_from_dialog("user-4".to_string(), "short-lived scratch note".to_string().as_str(), 1).await;
    assert!(expiring.success, "{}", expiring.message);

    let long_lived = engine.store_from_dialog("user-4".to_string(), "long-lived scratch note", 3600).await;
    assert!(long_lived.success, "{}", long_lived.message);

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let removed = engine.cleanup_expired("user-4").await;
    assert_eq!(removed, 1);
    assert_eq!(engine.count("user-4").await, 1);
}
