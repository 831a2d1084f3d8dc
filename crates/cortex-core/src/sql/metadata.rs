//! Metadata discovery: the shape a data source hands the rest
//! of the NL→SQL pipeline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table_name: String,
    pub record_count: u64,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_percentage: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_percentage: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    ForeignKey,
    Inferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipMetadata {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source_type: String,
    pub dialect: SqlDialect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    Postgres,
    MySql,
    SqlServer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub source_info: SourceInfo,
    pub tables: Vec<TableMetadata>,
    pub columns: Vec<ColumnMetadata>,
    pub relationships: Vec<RelationshipMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_data: Option<serde_json::Value>,
}

impl SchemaMetadata {
    pub fn columns_for(&self, table: &str) -> Vec<&ColumnMetadata> {
        self.columns.iter().filter(|c| c.table_name == table).collect()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.table_name == table)
    }

    pub fn foreign_keys_from(&self, table: &str) -> Vec<&RelationshipMetadata> {
        self.relationships.iter().filter(|r| r.from_table == table).collect()
    }
}

/// Discovers metadata for a data source. Concrete discovery (introspecting
/// an actual Postgres/MySQL/SQL Server catalogue) is a deployment concern;
/// this trait is the seam `sql::enrichment` and `sql::generator` build on.
#[async_trait::async_trait]
pub trait MetadataDiscovery: Send + Sync {
    async fn discover(&self) -> Result<SchemaMetadata, crate::error::SqlError>;
}
