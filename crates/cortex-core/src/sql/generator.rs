//! Turns a matched query context into SQL: assemble a prompt, call the LLM,
//! extract a statement from whatever comes back, then clean up, guard, and
//! validate it against the known schema before handing it to the executor.
//!
//! Closely grounded on the upstream LLM SQL generator: the JSON→fenced-
//! block→bare-`SELECT` extraction ladder, the cleanup/safety/validate/auto-
//! repair pipeline, and the ×0.8 confidence penalty on repair are all carried
//! over from there; only the LLM transport and the surrounding types are
//! native to this crate.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::Llm;
use crate::error::SqlError;
use crate::sql::enrichment::EnrichedSchema;
use crate::sql::matcher::{MetadataMatch, QueryContext};
use crate::sql::metadata::SchemaMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Chinese,
    English,
}

/// Chinese iff at least 30% of characters fall in the CJK Unified
/// Ideographs block.
fn detect_language(query: &str) -> Language {
    let total = query.chars().count().max(1);
    let ideographic = query.chars().filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c)).count();
    if ideographic as f32 / total as f32 > 0.3 {
        Language::Chinese
    } else {
        Language::English
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlGenerationResult {
    pub sql: String,
    pub explanation: String,
    pub confidence_score: f32,
    pub complexity_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_rows: Option<String>,
    #[serde(default)]
    pub alternative_sqls: Vec<String>,
}

const DOMAIN_EXAMPLES: &[(&str, &[&str])] = &[
    (
        "ecommerce",
        &[
            "SELECT COUNT(*) FROM orders WHERE created_at >= now() - interval '30 days'",
            "SELECT customer_id, SUM(total) FROM orders GROUP BY customer_id ORDER BY 2 DESC LIMIT 10",
            "SELECT * FROM products WHERE inventory < 10",
        ],
    ),
    (
        "hr",
        &[
            "SELECT department, COUNT(*) FROM employees GROUP BY department",
            "SELECT * FROM employees WHERE salary > 100000",
        ],
    ),
    (
        "finance",
        &[
            "SELECT account_id, SUM(amount) FROM transactions GROUP BY account_id",
            "SELECT * FROM invoices WHERE payment_status = 'overdue'",
        ],
    ),
    (
        "crm",
        &[
            "SELECT * FROM leads WHERE stage = 'qualified'",
            "SELECT customer_id, COUNT(*) FROM tickets GROUP BY customer_id",
        ],
    ),
];

fn relevant_examples(domain: &str) -> Vec<&'static str> {
    DOMAIN_EXAMPLES
        .iter()
        .find(|(d, _)| *d == domain)
        .map(|(_, examples)| examples.iter().take(3).copied().collect())
        .unwrap_or_default()
}

fn format_schema_information(matches: &[MetadataMatch], schema: &SchemaMetadata) -> String {
    let mut out = String::new();
    let tables: Vec<&str> = if matches.is_empty() {
        schema.tables.iter().map(|t| t.table_name.as_str()).collect()
    } else {
        matches.iter().map(|m| m.entity_name.as_str()).collect()
    };
    for table_name in tables {
        let Some(table) = schema.tables.iter().find(|t| t.table_name == table_name) else {
            continue;
        };
        out.push_str(&format!("- {} ({})\n", table.table_name, table.comment));
        for column in schema.columns_for(&table.table_name).into_iter().take(10) {
            out.push_str(&format!("    {} {}\n", column.column_name, column.data_type));
        }
    }
    out
}

fn build_prompt(
    original_query: &str,
    domain: &str,
    context: &QueryContext,
    matches: &[MetadataMatch],
    schema: &SchemaMetadata,
) -> String {
    let language = detect_language(original_query);
    let schema_info = format_schema_information(matches, schema);
    let examples = relevant_examples(domain).join("\n");
    let foreign_keys: Vec<String> = matches
        .iter()
        .flat_map(|m| m.suggested_joins.iter().cloned())
        .collect();

    format!(
        "Generate a SQL query for a {domain} database.\n\
         Query: {original_query}\n\
         Language: {language:?}\n\n\
         Intent: {intent}\n\
         Entities: {entities}\n\
         Attributes: {attributes}\n\
         Aggregations: {aggs}\n\
         Filters: {filters}\n\
         Temporal references: {temporal}\n\n\
         Schema:\n{schema_info}\n\
         Foreign keys: {fks}\n\n\
         Similar examples:\n{examples}\n\n\
         Respond as JSON: {{\"sql\": ..., \"explanation\": ..., \"confidence\": 0.0-1.0, \"complexity\": \"simple|medium|complex\"}}",
        domain = domain,
        original_query = original_query,
        language = language,
        intent = context.business_intent,
        entities = context.entities_mentioned.join(", "),
        attributes = context.attributes_mentioned.join(", "),
        aggs = context.aggregations.join(", "),
        filters = context.filters.len(),
        temporal = context.temporal_references.join(", "),
        schema_info = schema_info,
        fks = foreign_keys.join("; "),
        examples = examples,
    )
}

/// JSON, then a fenced ```sql block, then a bare `SELECT ...` substring,
/// else the whole response trimmed.
fn extract_sql_from_text(text: &str) -> String {
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(text) {
        if let Some(sql) = obj.get("sql").and_then(Value::as_str) {
            return sql.to_string();
        }
    }
    let fence = Regex::new(r"(?is)```(?:sql)?\s*(.*?)```").expect("static fence pattern compiles");
    if let Some(cap) = fence.captures(text) {
        return cap[1].trim().to_string();
    }
    let bare = Regex::new(r"(?is)(SELECT\b.*)").expect("static select pattern compiles");
    if let Some(cap) = bare.captures(text) {
        return cap[1].trim().to_string();
    }
    text.trim().to_string()
}

fn cleanup_sql(sql: &str) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches(';').trim();
    format!("{trimmed};")
}

fn add_safety_measures(sql: String, max_rows: usize) -> String {
    let upper = sql.to_uppercase();
    if upper.contains("LIMIT") || upper.contains("TOP ") {
        return sql;
    }
    let body = sql.trim_end_matches(';');
    format!("{body} LIMIT {};", max_rows.min(1000))
}

fn table_pattern() -> Regex {
    Regex::new(r"(?i)\bFROM\s+(\w+)|\bJOIN\s+(\w+)").expect("static table pattern compiles")
}

/// Unknown table names referenced by `FROM`/`JOIN` clauses.
fn validate_against_schema(sql: &str, schema: &SchemaMetadata) -> Vec<String> {
    table_pattern()
        .captures_iter(sql)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).map(|m| m.as_str().to_string()))
        .filter(|name| !schema.has_table(name))
        .collect()
}

/// Replaces each unknown table with the lexically closest known table:
/// either name is a substring of the other, wins ties by shorter edit in
/// length difference.
fn closest_known_table<'a>(unknown: &str, schema: &'a SchemaMetadata) -> Option<&'a str> {
    let unknown_lower = unknown.to_lowercase();
    schema
        .tables
        .iter()
        .map(|t| t.table_name.as_str())
        .filter(|known| {
            let known_lower = known.to_lowercase();
            known_lower.contains(&unknown_lower) || unknown_lower.contains(&known_lower)
        })
        .min_by_key(|known| (known.len() as i64 - unknown.len() as i64).abs())
}

fn auto_fix_sql_errors(sql: &str, unknown_tables: &[String], schema: &SchemaMetadata) -> String {
    let mut fixed = sql.to_string();
    for unknown in unknown_tables {
        if let Some(replacement) = closest_known_table(unknown, schema) {
            let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(unknown))).expect("escaped pattern compiles");
            fixed = pattern.replace_all(&fixed, replacement).into_owned();
        }
    }
    fixed
}

fn create_fallback_sql(matches: &[MetadataMatch]) -> SqlGenerationResult {
    let sql = match matches.first() {
        Some(m) => format!("SELECT * FROM {} LIMIT 10;", m.entity_name),
        None => "SELECT 1 as result;".to_string(),
    };
    SqlGenerationResult {
        sql,
        explanation: "generation failed; returning a minimal fallback query".to_string(),
        confidence_score: 0.1,
        complexity_level: "simple".to_string(),
        estimated_rows: None,
        alternative_sqls: Vec::new(),
    }
}

fn domain_mapping(enriched: &EnrichedSchema) -> &str {
    enriched.domain_classification.primary.as_str()
}

pub struct SqlGenerator {
    llm: Arc<dyn Llm>,
    max_rows: usize,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn Llm>, max_rows: usize) -> Self {
        Self { llm, max_rows }
    }

    pub async fn generate(
        &self,
        original_query: &str,
        context: &QueryContext,
        matches: &[MetadataMatch],
        schema: &SchemaMetadata,
        enriched: &EnrichedSchema,
    ) -> SqlGenerationResult {
        let domain = domain_mapping(enriched);
        let prompt = build_prompt(original_query, domain, context, matches, schema);

        let raw_response = match self.llm.complete(&prompt).await {
            Ok(text) => text,
            Err(_) => return create_fallback_sql(matches),
        };

        let (sql, explanation, confidence, complexity) = match serde_json::from_str::<Value>(&raw_response) {
            Ok(Value::Object(obj)) => (
                obj.get("sql").and_then(Value::as_str).unwrap_or_default().to_string(),
                obj.get("explanation").and_then(Value::as_str).unwrap_or_default().to_string(),
                obj.get("confidence").and_then(Value::as_f64).unwrap_or(0.8) as f32,
                obj.get("complexity").and_then(Value::as_str).unwrap_or("medium").to_string(),
            ),
            _ => (
                extract_sql_from_text(&raw_response),
                "generated from a plain-text LLM response".to_string(),
                0.8,
                "medium".to_string(),
            ),
        };

        if sql.trim().is_empty() {
            return create_fallback_sql(matches);
        }

        self.post_process(
            SqlGenerationResult {
                sql,
                explanation,
                confidence_score: confidence,
                complexity_level: complexity,
                estimated_rows: None,
                alternative_sqls: Vec::new(),
            },
            schema,
        )
    }

    fn post_process(&self, result: SqlGenerationResult, schema: &SchemaMetadata) -> SqlGenerationResult {
        let cleaned = cleanup_sql(&result.sql);
        let guarded = add_safety_measures(cleaned, self.max_rows);

        let unknown_tables = validate_against_schema(&guarded, schema);
        let (sql, confidence) = if unknown_tables.is_empty() {
            (guarded, result.confidence_score)
        } else {
            (
                auto_fix_sql_errors(&guarded, &unknown_tables, schema),
                result.confidence_score * 0.8,
            )
        };

        SqlGenerationResult {
            sql,
            confidence_score: confidence,
            ..result
        }
    }

    /// Stand-alone validation entry point (used by `cortex-cli` and tests
    /// without a full generation round-trip).
    pub fn validate(&self, sql: &str, schema: &SchemaMetadata) -> Result<(), SqlError> {
        let unknown = validate_against_schema(sql, schema);
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(SqlError::UnknownTable(unknown.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::metadata::{ColumnMetadata, SourceInfo, SqlDialect, TableMetadata};

    fn sample_schema() -> SchemaMetadata {
        SchemaMetadata {
            source_info: SourceInfo {
                source_type: "postgres".into(),
                dialect: SqlDialect::Postgres,
            },
            tables: vec![TableMetadata { table_name: "orders".into(), record_count: 10, comment: String::new() }],
            columns: vec![ColumnMetadata {
                table_name: "orders".into(),
                column_name: "id".into(),
                data_type: "integer".into(),
                is_nullable: false,
                comment: String::new(),
                unique_percentage: None,
                null_percentage: None,
            }],
            relationships: vec![],
            sample_data: None,
        }
    }

    #[test]
    fn detects_chinese_above_threshold() {
        assert_eq!(detect_language("显示所有订单"), Language::Chinese);
        assert_eq!(detect_language("show all orders"), Language::English);
    }

    #[test]
    fn extracts_sql_from_fenced_block() {
        let text = "Here you go:\n```sql\nSELECT * FROM orders\n```\nThanks";
        assert_eq!(extract_sql_from_text(text), "SELECT * FROM orders");
    }

    #[test]
    fn extracts_bare_select_when_unfenced() {
        let text = "I think the query is SELECT * FROM orders LIMIT 10";
        assert_eq!(extract_sql_from_text(text), "SELECT * FROM orders LIMIT 10");
    }

    #[test]
    fn safety_measures_add_limit_when_missing() {
        let sql = add_safety_measures("SELECT * FROM orders;".to_string(), 500);
        assert!(sql.to_uppercase().contains("LIMIT 500"));
    }

    #[test]
    fn auto_fix_replaces_unknown_table_with_closest_match() {
        let schema = sample_schema();
        let unknown = validate_against_schema("SELECT * FROM order LIMIT 10;", &schema);
        assert_eq!(unknown, vec!["order".to_string()]);
        let fixed = auto_fix_sql_errors("SELECT * FROM order LIMIT 10;", &unknown, &schema);
        assert!(fixed.contains("orders"));
    }
}
