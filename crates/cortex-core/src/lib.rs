//! `cortex-core`: typed memory engines (Factual, Episodic, Semantic,
//! Procedural, Working, Session), cross-kind semantic retrieval, and a
//! natural-language-to-SQL analytics pipeline.
//!
//! Engines hold `Arc<dyn Trait>` adapters (`adapters`) injected at
//! construction; they never own an embedding model, LLM, or store directly.
//! `service::MemoryService` is the cross-kind entry point most callers want;
//! the individual `engine::*Engine` types are available for kind-specific
//! access.

pub mod adapters;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod service;
pub mod sql;

pub use config::Config;
pub use error::{AdapterError, EngineError, SqlError, ValidationError};
pub use model::{KindData, MemoryId, MemoryKind, MemoryRecord, OpResult, UserId};
pub use service::{ConsolidationResult, MemoryService, MemoryStatistics};
