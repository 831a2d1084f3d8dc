//! The full natural-language-to-SQL pipeline, end to end: metadata →
//! enrichment → matcher → generator → executor, plus the fallback ladder
//! and feedback/insights loop.

use std::collections::HashMap;
use std::sync::Arc;

use cortex_core::adapters::testkit::{StubSqlConnector, TemplateLlm};
use cortex_core::sql::{
    self, enrich, ColumnMetadata, QueryPlan, RelationshipMetadata, RelationshipType, SchemaMetadata, SourceInfo,
    SqlDialect, SqlExecutor, SqlGenerationResult, SqlGenerator,
};
use serde_json::Value;

fn demo_schema() -> SchemaMetadata {
    SchemaMetadata {
        source_info: SourceInfo { source_type: "demo".to_string(), dialect: SqlDialect::Postgres },
        tables: vec![
            cortex_core::sql::TableMetadata { table_name: "orders".to_string(), record_count: 2, comment: "customer orders".to_string() },
            cortex_core::sql::TableMetadata { table_name: "customers".to_string(), record_count: 2, comment: "customer master data".to_string() },
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
    let mut order2 = HashMap::new();
    order2.insert("id".to_string(), Value::from(2));
    order2.insert("customer_id".to_string(), Value::from(2));

    let mut customer1 = HashMap::new();
    customer1.insert("id".to_string(), Value::from(1));
    customer1.insert("name".to_string(), Value::from("Ada"));
    let mut customer2 = HashMap::new();
    customer2.insert("id".to_string(), Value::from(2));
    customer2.insert("name".to_string(), Value::from("Grace"));

    (vec![order1, order2], vec![customer1, customer2])
}

#[tokio::test]
async fn full_pipeline_matches_tables_and_executes_on_the_primary_attempt() {
    let schema = demo_schema();
    let enriched = enrich(&schema);

    let question = "show all orders for customers";
    let context = sql::analyse_query(question, &schema);
    let matches = sql::match_metadata(&context, &schema, &enriched);
    assert!(!matches.is_empty());
    let plan = sql::plan_query(&context, &matches, &schema);
    assert!(plan.primary_tables.contains(&"orders".to_string()));

    let generator = SqlGenerator::new(Arc::new(TemplateLlm), 1000);
    let generation = generator.generate(question, &context, &matches, &schema, &enriched).await;
    assert!(generation.sql.to_uppercase().contains("SELECT"));
    assert!(generator.validate(&generation.sql, &schema).is_ok());

    let (orders, customers) = demo_rows();
    let connector = Arc::new(StubSqlConnector::new().with_table("orders", orders).with_table("customers", customers));
    let executor = SqlExecutor::new(connector, SqlDialect::Postgres, 30, 1000, 1000);

    let (result, attempts) = executor.execute_with_fallbacks(&generation, Some(question), Some(&plan), &schema).await;
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(attempts.len(), 1, "primary attempt should succeed without falling back");
    assert_eq!(attempts[0].strategy, "primary");
    assert!(result.row_count > 0);

    let insights = executor.insights().await;
    assert_eq!(insights.total_executions, 1);
    assert_eq!(insights.success_rate, 1.0);
}

#[tokio::test]
async fn unknown_table_falls_back_to_a_known_table_via_the_ladder() {
    let schema = demo_schema();
    let (orders, customers) = demo_rows();
    let connector = Arc::new(StubSqlConnector::new().with_table("orders", orders).with_table("customers", customers));
    let executor = SqlExecutor::new(connector, SqlDialect::Postgres, 30, 1000, 1000);

    let generation = SqlGenerationResult {
        sql: "SELECT * FROM nonexistent_table LIMIT 10;".to_string(),
        explanation: "deliberately broken for the fallback ladder".to_string(),
        confidence_score: 0.9,
        complexity_level: "simple".to_string(),
        estimated_rows: None,
        alternative_sqls: Vec::new(),
    };

    let empty_plan = QueryPlan::default();
    let (result, attempts) = executor
        .execute_with_fallbacks(&generation, Some("bogus question"), Some(&empty_plan), &schema)
        .await;
    assert!(result.success, "table_fallback should have recovered: {:?}", result.error_message);
    assert!(attempts.len() > 1, "a failing primary attempt should trigger the fallback ladder");
    assert!(attempts.iter().any(|a| a.strategy == "table_fallback" && a.success));

    let insights = executor.insights().await;
    assert_eq!(insights.total_executions, 1);
    assert_eq!(insights.success_rate, 1.0);
}

#[tokio::test]
async fn insights_report_mixed_success_and_failure() {
    let (orders, _customers) = demo_rows();
    let connector = Arc::new(StubSqlConnector::new().with_table("orders", orders));
    let executor = SqlExecutor::new(connector, SqlDialect::Postgres, 30, 1000, 1000);

    let ok = SqlGenerationResult {
        sql: "SELECT * FROM orders LIMIT 10;".to_string(),
        explanation: String::new(),
        confidence_score: 0.9,
        complexity_level: "simple".to_string(),
        estimated_rows: None,
        alternative_sqls: Vec::new(),
    };
    let bad = SqlGenerationResult {
        sql: "SELECT * FROM ghost_table LIMIT 10;".to_string(),
        explanation: String::new(),
        confidence_score: 0.2,
        complexity_level: "simple".to_string(),
        estimated_rows: None,
        alternative_sqls: Vec::new(),
    };

    let schema = demo_schema();
    executor.execute_with_fallbacks(&ok, None, None, &schema).await;
    executor.execute_with_fallbacks(&bad, None, None, &schema).await;

    let insights = executor.insights().await;
    assert_eq!(insights.total_executions, 2);
    assert_eq!(insights.success_rate, 0.5);
    assert!(!insights.common_failures.is_empty());
    assert_eq!(insights.recent_trend, "insufficient_data");
}
