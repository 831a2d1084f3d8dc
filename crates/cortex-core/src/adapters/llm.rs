//! The LLM adapter: free-form prompt completion backing the SQL
//! generator. Kept separate from `Extractor` because its contract is a bare
//! prompt-in/text-out call, not a schema-constrained structured extraction.

use async_trait::async_trait;

use crate::error::AdapterError;

/// A single free-form prompt/completion call, supplied by a deployment.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AdapterError>;
}
