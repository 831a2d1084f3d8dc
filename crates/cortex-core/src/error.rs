//! Error types shared across the memory engine and the NL→SQL pipeline.
//!
//! Per the error handling design: adapter failures never cross an engine
//! boundary as a `panic` or a bubbled `Result::Err` on the read path — they
//! become an absent value plus a log line. On the write path they become a
//! structured `OpResult { success: false, .. }`. These enums exist so that
//! the *logging* and *internal* plumbing has a typed shape to match on, even
//! though callers mostly see `OpResult`/`OpOutcome` rather than `Result<_, E>`.

use thiserror::Error;

/// Failure of an external collaborator (Embedder, Extractor, Summariser, Store, LLM).
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("embedder unavailable: {0}")]
    Embedder(String),
    #[error("extractor unavailable: {0}")]
    Extractor(String),
    #[error("summariser unavailable: {0}")]
    Summariser(String),
    #[error("store unavailable: {0}")]
    Store(String),
    #[error("llm unavailable: {0}")]
    Llm(String),
}

/// Failure raised by engine-level validation before any adapter is touched.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("empty content")]
    EmptyContent,
    #[error("value {value} out of range [{lo}, {hi}] for field {field}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        lo: f64,
        hi: f64,
    },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors surfaced by an `Engine::store_from_dialog` / typed-search call.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("extraction produced no usable structured data: {0}")]
    ExtractionFailure(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Errors from the NL→SQL pipeline's metadata/semantic/matching/generation stages.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum SqlError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("unknown table referenced in generated SQL: {0}")]
    UnknownTable(String),
    #[error("generated SQL failed schema validation: {0}")]
    SchemaValidation(String),
    #[error("execution failed: {0}")]
    Execution(String),
}
