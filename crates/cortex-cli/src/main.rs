//! `cortex` — command-line demo harness for `cortex-core`.
//!
//! Wired entirely against the `testkit` stub adapters: a hashing embedder,
//! a keyword-based extractor/summariser, an in-memory row store, and a
//! template LLM. There is no server loop here (this is a one-shot CLI, not
//! a persistent daemon) — each subcommand builds a fresh in-memory service,
//! performs one operation, and prints its result as JSON.

mod sql_demo;

use std::io;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use cortex_core::adapters::testkit::stub_bundle;
use cortex_core::adapters::{Embedder, Extractor, Store, Summariser};
use cortex_core::config::Config;
use cortex_core::engine::base::SearchQuery;
use cortex_core::engine::{EpisodicEngine, FactualEngine, ProceduralEngine, SemanticEngine, SessionEngine, WorkingEngine};
use cortex_core::service::MemoryService;
use cortex_core::MemoryKind;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cortex", version, about = "Demo harness for the cortex-core memory engines")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, ValueEnum)]
enum StoreKind {
    Factual,
    Episodic,
    Semantic,
    Procedural,
    Working,
}

#[derive(Subcommand)]
enum Command {
    /// Extract and store a memory of the given kind from free text.
    Store {
        kind: StoreKind,
        user_id: String,
        dialog: String,
        #[arg(long)]
        importance: Option<f32>,
    },
    /// Search across memory kinds by semantic similarity.
    Search {
        user_id: String,
        query: String,
        #[arg(long, value_delimiter = ',')]
        kinds: Option<Vec<String>>,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
    /// Append a message to a session, running summarisation triggers.
    SessionMessage {
        user_id: String,
        session_id: String,
        role: String,
        content: String,
    },
    /// Print the running context for a session.
    SessionContext { user_id: String, session_id: String },
    /// Per-kind counts and a diversity metric for a user.
    Stats { user_id: String },
    /// Expire stale Working memories and refresh statistics.
    Consolidate { user_id: String },
    /// Run the natural-language-to-SQL demo pipeline against a built-in
    /// orders/customers schema.
    Sql { question: String },
}

fn build_service(config: &Config) -> (MemoryService, Arc<dyn Store>) {
    let (embedder, extractor, summariser, store) = stub_bundle();
    let embedder: Arc<dyn Embedder> = Arc::new(embedder);
    let extractor: Arc<dyn Extractor> = Arc::new(extractor);
    let summariser: Arc<dyn Summariser> = Arc::new(summariser);
    let store: Arc<dyn Store> = Arc::new(store);

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
    let session = Arc::new(SessionEngine::new(
        store.clone(),
        embedder.clone(),
        extractor.clone(),
        summariser.clone(),
        config,
    ));

    (
        MemoryService::new(factual, episodic, semantic, procedural, working, session),
        store,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::default();
    let (service, _store) = build_service(&config);

    match cli.command {
        Command::Store { kind, user_id, dialog, importance } => {
            let result = match kind {
                StoreKind::Factual => {
                    let results = service.factual.store_from_dialog(user_id, &dialog).await;
                    serde_json::to_value(results)?
                }
                StoreKind::Episodic => {
                    let result = service.episodic.store_from_dialog(user_id, &dialog, importance).await;
                    serde_json::to_value(result)?
                }
                StoreKind::Semantic => {
                    let results = service.semantic.store_from_dialog(user_id, &dialog).await;
                    serde_json::to_value(results)?
                }
                StoreKind::Procedural => {
                    let result = service.procedural.store_from_dialog(user_id, &dialog).await;
                    serde_json::to_value(result)?
                }
                StoreKind::Working => {
                    let result = service
                        .working
                        .store_from_dialog(user_id, &dialog, config.working_default_ttl_seconds)
                        .await;
                    serde_json::to_value(result)?
                }
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Search { user_id, query, kinds, top_k } => {
            let selected: Vec<MemoryKind> = match kinds {
                Some(names) => names.iter().filter_map(|n| parse_kind(n)).collect(),
                None => MemoryKind::ALL.to_vec(),
            };
            let search_query = SearchQuery::new(user_id, query);
            let hits = service.search(search_query, &selected, top_k).await;
            let printable: Vec<_> = hits
                .iter()
                .map(|h| serde_json::json!({"id": h.record.id, "similarity": h.similarity, "content": h.record.content}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&printable)?);
        }
        Command::SessionMessage { user_id, session_id, role, content } => {
            let message_type = if role.eq_ignore_ascii_case("assistant") { "response" } else { "query" };
            let result = service
                .session
                .store_message(user_id, session_id, content, role, message_type.to_string())
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::SessionContext { user_id, session_id } => {
            let context = service.session.get_session_context(user_id, session_id, true, 10).await;
            let printable = serde_json::json!({
                "success": context.success,
                "session_id": context.session_id,
                "total_messages": context.total_messages,
                "active_messages": context.active_messages,
                "summary_available": context.summary_available,
                "recent_message_count": context.recent_messages.len(),
            });
            println!("{}", serde_json::to_string_pretty(&printable)?);
        }
        Command::Stats { user_id } => {
            let stats = service.statistics(&user_id).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Consolidate { user_id } => {
            let result = service.consolidate(&user_id).await;
            info!(removed = result.expired_working_removed, "consolidation complete");
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "expired_working_removed": result.expired_working_removed,
                    "statistics": result.statistics,
                    "optimize_errors": result.optimize_errors,
                }))?
            );
        }
        Command::Sql { question } => {
            let outcome = sql_demo::run(&question).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}

fn parse_kind(name: &str) -> Option<MemoryKind> {
    MemoryKind::ALL.into_iter().find(|k| k.as_str().eq_ignore_ascii_case(name.trim()))
}
