//! Wires a small built-in orders/customers schema through the full
//! metadata → enrichment → matcher → generator → executor pipeline so the
//! `cortex sql` subcommand has something concrete to demonstrate without a
//! real database connection.

use std::collections::HashMap;
use std::sync::Arc;

use cortex_core::adapters::testkit::{StubSqlConnector, TemplateLlm};
use cortex_core::sql::{
    self, enrich, ColumnMetadata, QueryPlan, RelationshipMetadata, RelationshipType, SchemaMetadata, SourceInfo,
    SqlDialect, SqlExecutor, SqlGenerator, TableMetadata,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct SqlDemoOutcome {
    pub matched_tables: Vec<String>,
    pub generated_sql: String,
    pub confidence_score: f32,
    pub execution_success: bool,
    pub row_count: usize,
    pub fallback_attempts: usize,
}

fn demo_schema() -> SchemaMetadata {
    SchemaMetadata {
        source_info: SourceInfo { source_type: "demo".to_string(), dialect: SqlDialect::Postgres },
        tables: vec![
            TableMetadata { table_name: "orders".to_string(), record_count: 2, comment: "customer orders".to_string() },
            TableMetadata { table_name: "customers".to_string(), record_count: 2, comment: "customer master data".to_string() },
        ],
        columns: vec![
            ColumnMetadata {
                table_name: "orders".to_string(),
                column_name: "id".to_string(),
                data_type: "integer".to_string(),
                is_nullable: false,
                comment: String::new(),
                unique_percentage: Some(1.0),
                null_percentage: Some(0.0),
            },
            ColumnMetadata {
                table_name: "orders".to_string(),
                column_name: "customer_id".to_string(),
                data_type: "integer".to_string(),
                is_nullable: false,
                comment: String::new(),
                unique_percentage: None,
                null_percentage: Some(0.0),
            },
            ColumnMetadata {
                table_name: "orders".to_string(),
                column_name: "total".to_string(),
                data_type: "numeric".to_string(),
                is_nullable: false,
                comment: String::new(),
                unique_percentage: None,
                null_percentage: Some(0.0),
            },
            ColumnMetadata {
                table_name: "orders".to_string(),
                column_name: "created_at".to_string(),
                data_type: "timestamp".to_string(),
                is_nullable: false,
                comment: String::new(),
                unique_percentage: None,
                null_percentage: Some(0.0),
            },
            ColumnMetadata {
                table_name: "customers".to_string(),
                column_name: "id".to_string(),
                data_type: "integer".to_string(),
                is_nullable: false,
                comment: String::new(),
                unique_percentage: Some(1.0),
                null_percentage: Some(0.0),
            },
            ColumnMetadata {
                table_name: "customers".to_string(),
                column_name: "name".to_string(),
                data_type: "text".to_string(),
                is_nullable: false,
                comment: String::new(),
                unique_percentage: None,
                null_percentage: Some(0.0),
            },
        ],
        relationships: vec![RelationshipMetadata {
            from_table: "orders".to_string(),
            from_column: "customer_id".to_string(),
            to_table: "customers".to_string(),
            to_column: "id".to_string(),
            relationship_type: RelationshipType::ForeignKey,
        }],
        sample_data: None,
    }
}

fn demo_rows() -> (Vec<HashMap<String, Value>>, Vec<HashMap<String, Value>>) {
    let mut order1 = HashMap::new();
    order1.insert("id".to_string(), Value::from(1));
    order1.insert("customer_id".to_string(), Value::from(1));
    order1.insert("total".to_string(), Value::from(42.5));
    let mut order2 = HashMap::new();
    order2.insert("id".to_string(), Value::from(2));
    order2.insert("customer_id".to_string(), Value::from(2));
    order2.insert("total".to_string(), Value::from(17.0));

    let mut customer1 = HashMap::new();
    customer1.insert("id".to_string(), Value::from(1));
    customer1.insert("name".to_string(), Value::from("Ada"));
    let mut customer2 = HashMap::new();
    customer2.insert("id".to_string(), Value::from(2));
    customer2.insert("name".to_string(), Value::from("Grace"));

    (vec![order1, order2], vec![customer1, customer2])
}

pub async fn run(question: &str) -> SqlDemoOutcome {
    let schema = demo_schema();
    let enriched = enrich(&schema);

    let context = sql::analyse_query(question, &schema);
    let matches = sql::match_metadata(&context, &schema, &enriched);
    let plan = sql::plan_query(&context, &matches, &schema);

    let generator = SqlGenerator::new(Arc::new(TemplateLlm), 1000);
    let generation = generator.generate(question, &context, &matches, &schema, &enriched).await;

    let (orders, customers) = demo_rows();
    let connector = Arc::new(StubSqlConnector::new().with_table("orders", orders).with_table("customers", customers));
    let executor = SqlExecutor::new(connector, SqlDialect::Postgres, 30, 1000, 1000);

    let plan_ref: Option<&QueryPlan> = Some(&plan);
    let (result, attempts) = executor.execute_with_fallbacks(&generation, Some(question), plan_ref, &schema).await;

    SqlDemoOutcome {
        matched_tables: matches.iter().map(|m| m.entity_name.clone()).collect(),
        generated_sql: generation.sql,
        confidence_score: generation.confidence_score,
        execution_success: result.success,
        row_count: result.row_count,
        fallback_attempts: attempts.len(),
    }
}
