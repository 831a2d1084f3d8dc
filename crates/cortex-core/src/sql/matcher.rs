//! Maps a natural-language query to a structured intent (`QueryContext`),
//! then to candidate schema entities (`MetadataMatch`), then to a concrete
//! `QueryPlan` the generator turns into SQL.
//!
//! There's no dedicated "query matcher" module upstream to port line for
//! line — this is built from the type shapes the generator expects plus
//! the same keyword-bag heuristics the enricher uses for its own
//! classification, extended to the moment a user's words arrive instead of
//! a schema's column names.

use serde::{Deserialize, Serialize};

use crate::sql::enrichment::EnrichedSchema;
use crate::sql::metadata::SchemaMetadata;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueryContext {
    pub business_intent: String,
    pub entities_mentioned: Vec<String>,
    pub attributes_mentioned: Vec<String>,
    pub operations: Vec<String>,
    pub aggregations: Vec<String>,
    pub filters: Vec<String>,
    pub temporal_references: Vec<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataMatch {
    pub entity_name: String,
    pub entity_type: String,
    pub match_type: MatchType,
    pub similarity_score: f32,
    pub relevant_attributes: Vec<String>,
    pub suggested_joins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JoinSpec {
    pub join_type: String,
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueryPlan {
    pub primary_tables: Vec<String>,
    pub required_joins: Vec<JoinSpec>,
    pub select_columns: Vec<String>,
    pub where_conditions: Vec<String>,
    pub aggregations: Vec<String>,
    pub order_by: Vec<String>,
    pub confidence: f32,
}

const RETRIEVAL_WORDS: &[&str] = &["show", "list", "display", "get", "find", "which"];
const COUNT_WORDS: &[&str] = &["how many", "count", "number of"];
const SUM_WORDS: &[&str] = &["total", "sum of"];
const AVG_WORDS: &[&str] = &["average", "avg", "mean"];
const MINMAX_WORDS: &[&str] = &["highest", "maximum", "max ", "lowest", "minimum", "min "];
const COMPARISON_WORDS: &[&str] = &["compare", "versus", "vs "];
const TEMPORAL_WORDS: &[&str] = &[
    "today",
    "yesterday",
    "this week",
    "last week",
    "this month",
    "last month",
    "this year",
    "last year",
    "recent",
    "recently",
];

fn contains_any(lower: &str, words: &[&str]) -> bool {
    words.iter().any(|w| lower.contains(w))
}

fn classify_intent(lower: &str) -> &'static str {
    if contains_any(lower, COUNT_WORDS) {
        "count"
    } else if contains_any(lower, SUM_WORDS) {
        "sum"
    } else if contains_any(lower, AVG_WORDS) {
        "average"
    } else if contains_any(lower, MINMAX_WORDS) {
        "extremum"
    } else if contains_any(lower, COMPARISON_WORDS) {
        "comparison"
    } else if contains_any(lower, RETRIEVAL_WORDS) {
        "retrieval"
    } else {
        "retrieval"
    }
}

fn detect_aggregations(lower: &str) -> Vec<String> {
    let mut aggs = Vec::new();
    if contains_any(lower, COUNT_WORDS) {
        aggs.push("COUNT".to_string());
    }
    if contains_any(lower, SUM_WORDS) {
        aggs.push("SUM".to_string());
    }
    if contains_any(lower, AVG_WORDS) {
        aggs.push("AVG".to_string());
    }
    if lower.contains("highest") || lower.contains("maximum") || lower.contains("max ") {
        aggs.push("MAX".to_string());
    }
    if lower.contains("lowest") || lower.contains("minimum") || lower.contains("min ") {
        aggs.push("MIN".to_string());
    }
    aggs
}

fn detect_temporal(lower: &str) -> Vec<String> {
    TEMPORAL_WORDS
        .iter()
        .filter(|w| lower.contains(*w))
        .map(|w| w.to_string())
        .collect()
}

/// Comparator phrases pulled out with a plain regex rather than a parser —
/// good enough to carry into a `WHERE` clause candidate, not to validate.
fn detect_filters(query: &str) -> Vec<String> {
    let pattern = regex::Regex::new(
        r"(?i)\b(\w+)\s+(greater than|less than|more than|at least|at most|equal to|before|after)\s+([\w.'\-]+)",
    )
    .expect("static filter pattern compiles");
    pattern
        .captures_iter(query)
        .map(|c| format!("{} {} {}", &c[1], &c[2], &c[3]))
        .collect()
}

fn singularize(word: &str) -> String {
    word.strip_suffix('s').unwrap_or(word).to_string()
}

/// Extracts `QueryContext` from a raw user query using keyword heuristics,
/// the same register as `sql::enrichment`'s bag-of-words classification.
pub fn analyse_query(query: &str, schema: &SchemaMetadata) -> QueryContext {
    let lower = query.to_lowercase();
    let business_intent = classify_intent(&lower).to_string();
    let operations = {
        let mut ops = vec![business_intent.clone()];
        ops.dedup();
        ops
    };
    let aggregations = detect_aggregations(&lower);
    let temporal_references = detect_temporal(&lower);
    let filters = detect_filters(query);

    let words: Vec<String> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();

    let mut entities_mentioned = Vec::new();
    for table in &schema.tables {
        let name = table.table_name.to_lowercase();
        let singular = singularize(&name);
        if words.iter().any(|w| *w == name || *w == singular) {
            entities_mentioned.push(table.table_name.clone());
        }
    }

    let mut attributes_mentioned = Vec::new();
    for column in &schema.columns {
        let name = column.column_name.to_lowercase();
        if words.iter().any(|w| *w == name) && !attributes_mentioned.contains(&column.column_name) {
            attributes_mentioned.push(column.column_name.clone());
        }
    }

    let confidence = if entities_mentioned.is_empty() { 0.3 } else { 0.7 };

    QueryContext {
        business_intent,
        entities_mentioned,
        attributes_mentioned,
        operations,
        aggregations,
        filters,
        temporal_references,
        confidence,
    }
}

/// Scores every table in the schema against the entities/attributes the
/// query mentioned; tables with no overlap at all are dropped.
pub fn match_metadata(context: &QueryContext, schema: &SchemaMetadata, enriched: &EnrichedSchema) -> Vec<MetadataMatch> {
    let mut matches = Vec::new();
    for table in &schema.tables {
        let exact = context
            .entities_mentioned
            .iter()
            .any(|e| e.eq_ignore_ascii_case(&table.table_name));
        let columns = schema.columns_for(&table.table_name);
        let relevant_attributes: Vec<String> = columns
            .iter()
            .filter(|c| context.attributes_mentioned.iter().any(|a| a.eq_ignore_ascii_case(&c.column_name)))
            .map(|c| c.column_name.clone())
            .collect();
        let partial = !relevant_attributes.is_empty()
            || enriched
                .semantic_tags
                .get(&table.table_name)
                .map(|tags| tags.iter().any(|t| context.business_intent.contains(t.as_str())))
                .unwrap_or(false);

        if !exact && !partial {
            continue;
        }

        let entity_type = enriched
            .business_entities
            .iter()
            .find(|e| e.table_name == table.table_name)
            .map(|e| format!("{:?}", e.entity_type).to_lowercase())
            .unwrap_or_else(|| "entity".to_string());

        let suggested_joins: Vec<String> = schema
            .relationships
            .iter()
            .filter(|r| r.from_table == table.table_name || r.to_table == table.table_name)
            .map(|r| format!("{}.{} = {}.{}", r.from_table, r.from_column, r.to_table, r.to_column))
            .collect();

        matches.push(MetadataMatch {
            entity_name: table.table_name.clone(),
            entity_type,
            match_type: if exact { MatchType::Exact } else { MatchType::Partial },
            similarity_score: if exact { 1.0 } else { 0.6 },
            relevant_attributes,
            suggested_joins,
        });
    }
    matches.sort_by(|a, b| b.similarity_score.partial_cmp(&a.similarity_score).unwrap_or(std::cmp::Ordering::Equal));
    matches
}

/// Builds a `QueryPlan` from the matched entities: primary tables are the
/// highest-scoring matches, joins come from relationships directly linking
/// two primary tables, and `select_columns`/`aggregations` follow the
/// detected operation.
pub fn plan_query(context: &QueryContext, matches: &[MetadataMatch], schema: &SchemaMetadata) -> QueryPlan {
    let primary_tables: Vec<String> = matches
        .iter()
        .filter(|m| m.match_type == MatchType::Exact)
        .map(|m| m.entity_name.clone())
        .chain(matches.iter().map(|m| m.entity_name.clone()))
        .collect::<Vec<_>>()
        .into_iter()
        .fold(Vec::new(), |mut acc, name| {
            if !acc.contains(&name) {
                acc.push(name);
            }
            acc
        });
    let primary_tables: Vec<String> = primary_tables.into_iter().take(3).collect();

    let mut required_joins = Vec::new();
    for rel in &schema.relationships {
        if primary_tables.contains(&rel.from_table) && primary_tables.contains(&rel.to_table) {
            required_joins.push(JoinSpec {
                join_type: "INNER".to_string(),
                left_table: rel.from_table.clone(),
                left_column: rel.from_column.clone(),
                right_table: rel.to_table.clone(),
                right_column: rel.to_column.clone(),
            });
        }
    }

    let select_columns: Vec<String> = if !context.aggregations.is_empty() {
        Vec::new()
    } else if !context.attributes_mentioned.is_empty() {
        context.attributes_mentioned.clone()
    } else {
        Vec::new()
    };

    let aggregations: Vec<String> = if context.aggregations.contains(&"COUNT".to_string()) {
        vec!["COUNT(*)".to_string()]
    } else {
        context
            .aggregations
            .iter()
            .filter(|a| *a != "COUNT")
            .flat_map(|agg| {
                matches
                    .first()
                    .map(|m| format!("{agg}({}.{})", m.entity_name, m.relevant_attributes.first().cloned().unwrap_or_else(|| "id".to_string())))
            })
            .collect()
    };

    let order_by = if context.temporal_references.iter().any(|t| t == "recent" || t == "recently") {
        primary_tables.first().map(|t| format!("{t}.created_at DESC")).into_iter().collect()
    } else {
        Vec::new()
    };

    let top_score = matches.first().map(|m| m.similarity_score).unwrap_or(0.2);
    let confidence = ((context.confidence + top_score) / 2.0).clamp(0.0, 1.0);

    QueryPlan {
        primary_tables,
        required_joins,
        select_columns,
        where_conditions: context.filters.clone(),
        aggregations,
        order_by,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::enrichment::enrich;
    use crate::sql::metadata::{ColumnMetadata, RelationshipMetadata, RelationshipType, SourceInfo, SqlDialect, TableMetadata};

    fn sample_schema() -> SchemaMetadata {
        SchemaMetadata {
            source_info: SourceInfo {
                source_type: "postgres".into(),
                dialect: SqlDialect::Postgres,
            },
            tables: vec![
                TableMetadata { table_name: "orders".into(), record_count: 100, comment: String::new() },
                TableMetadata { table_name: "customers".into(), record_count: 50, comment: String::new() },
            ],
            columns: vec![ColumnMetadata {
                table_name: "orders".into(),
                column_name: "customer_id".into(),
                data_type: "integer".into(),
                is_nullable: false,
                comment: String::new(),
                unique_percentage: None,
                null_percentage: None,
            }],
            relationships: vec![RelationshipMetadata {
                from_table: "orders".into(),
                from_column: "customer_id".into(),
                to_table: "customers".into(),
                to_column: "id".into(),
                relationship_type: RelationshipType::ForeignKey,
            }],
            sample_data: None,
        }
    }

    #[test]
    fn count_intent_is_detected() {
        let schema = sample_schema();
        let ctx = analyse_query("How many orders were placed last month?", &schema);
        assert_eq!(ctx.business_intent, "count");
        assert!(ctx.aggregations.contains(&"COUNT".to_string()));
        assert!(ctx.temporal_references.contains(&"last month".to_string()));
        assert!(ctx.entities_mentioned.contains(&"orders".to_string()));
    }

    #[test]
    fn plan_links_matched_tables_with_their_relationship() {
        let schema = sample_schema();
        let enriched = enrich(&schema);
        let ctx = analyse_query("show orders and customers", &schema);
        let matches = match_metadata(&ctx, &schema, &enriched);
        let plan = plan_query(&ctx, &matches, &schema);
        assert!(plan.primary_tables.contains(&"orders".to_string()));
        assert!(plan.primary_tables.contains(&"customers".to_string()));
        assert_eq!(plan.required_joins.len(), 1);
    }
}
