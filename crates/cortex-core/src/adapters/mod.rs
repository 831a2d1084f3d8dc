//! Adapter traits: the seams between `cortex-core` and everything external
//! (embedding models, extraction/LLM services, summarisation services, and
//! the tabular store), each a constructor-injected collaborator — engines
//! hold `Arc<dyn Trait>` and never know
//! which concrete implementation they're talking to.

pub mod embedder;
pub mod extractor;
pub mod llm;
pub mod store;
pub mod summariser;

#[cfg(feature = "testkit")]
pub mod testkit;

pub use embedder::{cosine_similarity, CachedEmbedder, Embedder};
pub use extractor::{
    Billing, Entity, ExtractionOutcome, Extractor, SentimentGranularity, SentimentLabel,
    SentimentResult,
};
pub use llm::Llm;
pub use store::{FilterOp, Row, RowFilter, Store, StoreValue};
pub use summariser::{SummaryLength, SummaryOutcome, SummariseOptions, SummaryStyle, Summariser};
