//! The natural-language-to-SQL pipeline: metadata discovery, semantic
//! enrichment, query matching, SQL generation, and bounded execution with
//! a fallback ladder and feedback loop.

pub mod enrichment;
pub mod executor;
pub mod generator;
pub mod matcher;
pub mod metadata;

pub use enrichment::{enrich, EnrichedSchema};
pub use executor::{ExecutionResult, FallbackAttempt, Insights, RawQueryResult, SqlConnector, SqlExecutor};
pub use generator::{Language, SqlGenerationResult, SqlGenerator};
pub use matcher::{analyse_query, match_metadata, plan_query, MetadataMatch, QueryContext, QueryPlan};
pub use metadata::{
    ColumnMetadata, MetadataDiscovery, RelationshipMetadata, RelationshipType, SchemaMetadata, SourceInfo,
    SqlDialect, TableMetadata,
};
