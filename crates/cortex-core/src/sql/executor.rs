//! Bounded SQL execution with a nine-step fallback ladder and a feedback
//! ring buffer, grounded on the upstream executor's `_execute_sql_with_timeout`,
//! `_initialize_fallback_strategies`, and `get_execution_insights`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::AdapterError;
use crate::sql::generator::SqlGenerationResult;
use crate::sql::matcher::QueryPlan;
use crate::sql::metadata::{SchemaMetadata, SqlDialect};

/// Raw rows straight from a data source: the executor's only external
/// collaborator. Kept separate from `adapters::Store`, which is the memory
/// engines' tabular CRUD seam, not a general SQL connector.
pub struct RawQueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, Value>>,
}

#[async_trait::async_trait]
pub trait SqlConnector: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<RawQueryResult, AdapterError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Vec<HashMap<String, Value>>,
    pub column_names: Vec<String>,
    pub row_count: usize,
    pub execution_time_ms: f64,
    pub sql_executed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackAttempt {
    pub attempt_number: u32,
    pub strategy: String,
    pub sql_attempted: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FeedbackRecord {
    timestamp: DateTime<Utc>,
    original_query: Option<String>,
    generated_sql: String,
    llm_confidence: f32,
    success: bool,
    execution_time_ms: f64,
    row_count: usize,
    error_message: Option<String>,
    feedback_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insights {
    pub total_executions: usize,
    pub success_rate: f32,
    pub common_failures: Vec<(String, usize)>,
    pub confidence_success_correlation: f32,
    pub avg_execution_time_ms: f64,
    pub recent_trend: String,
}

/// Strategies in the exact order they're attempted, first success wins.
const FALLBACK_STRATEGIES: &[&str] = &[
    "extended_timeout",
    "add_limit",
    "retry",
    "simplify_query",
    "remove_joins",
    "column_fallback",
    "table_fallback",
    "syntax_correction",
    "basic_select",
];

fn add_limit_clause(sql: &str, max_rows: usize) -> Option<String> {
    let upper = sql.to_uppercase();
    if upper.contains("LIMIT") || upper.contains("TOP ") {
        return None;
    }
    let body = sql.trim_end_matches(';').trim();
    Some(format!("{body} LIMIT {};", max_rows.min(1000)))
}

fn simplify_query(sql: &str) -> Option<String> {
    let subqueries = Regex::new(r"(?is)\([^)]*SELECT[^)]*\)").expect("static pattern compiles");
    let mut out = subqueries.replace_all(sql, "simplified_subquery").into_owned();

    let case_expr = Regex::new(r"(?is)CASE\s+WHEN.*?END").expect("static pattern compiles");
    out = case_expr.replace_all(&out, "simple_value").into_owned();
    let coalesce = Regex::new(r"(?i)\b(COALESCE|NULLIF)\b").expect("static pattern compiles");
    out = coalesce.replace_all(&out, "simple_value").into_owned();

    out = strip_clause_until(&out, "group by", &["having", "order", "limit"]);
    out = strip_clause_until(&out, "having", &["order", "limit"]);
    let trimmed = out.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn strip_clause_until(sql: &str, start_kw: &str, stop_kws: &[&str]) -> String {
    let lower = sql.to_lowercase();
    let Some(start_pos) = lower.find(start_kw) else {
        return sql.to_string();
    };
    let rest = &lower[start_pos..];
    let mut stop_pos = rest.len();
    for kw in stop_kws {
        if let Some(p) = rest.find(kw) {
            stop_pos = stop_pos.min(p);
        }
    }
    let mut result = String::with_capacity(sql.len());
    result.push_str(&sql[..start_pos]);
    result.push_str(&sql[start_pos + stop_pos..]);
    result
}

fn strip_clause_before_select(sql: &str, keyword: &str) -> String {
    let lower = sql.to_lowercase();
    let Some(kw_pos) = lower.find(keyword) else {
        return sql.to_string();
    };
    let Some(select_rel) = lower[kw_pos..].find("select") else {
        return sql.to_string();
    };
    let select_pos = kw_pos + select_rel;
    if select_pos <= kw_pos {
        return sql.to_string();
    }
    let mut result = String::with_capacity(sql.len());
    result.push_str(&sql[..kw_pos]);
    result.push_str(&sql[select_pos..]);
    result
}

fn remove_complex_joins(plan: &QueryPlan, max_rows: usize) -> Option<String> {
    let main_table = plan.primary_tables.first()?;
    let main_table_columns: Vec<String> = plan
        .select_columns
        .iter()
        .filter(|c| c.starts_with(&format!("{main_table}.")))
        .cloned()
        .collect();
    let columns = if main_table_columns.is_empty() {
        format!("{main_table}.*")
    } else {
        main_table_columns.join(", ")
    };
    let mut sql = format!("SELECT {columns} FROM {main_table}");
    let main_table_conditions: Vec<&String> = plan
        .where_conditions
        .iter()
        .filter(|c| c.contains(main_table.as_str()) || !c.contains('.'))
        .collect();
    if !main_table_conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&main_table_conditions.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(" AND "));
    }
    sql.push_str(&format!(" LIMIT {max_rows}"));
    Some(sql)
}

fn column_fallback(plan: &QueryPlan, schema: &SchemaMetadata, max_rows: usize) -> Option<String> {
    let main_table = plan.primary_tables.first()?;
    let columns: Vec<String> = schema
        .columns_for(main_table)
        .into_iter()
        .take(5)
        .map(|c| format!("{main_table}.{}", c.column_name))
        .collect();
    if columns.is_empty() {
        Some(format!("SELECT * FROM {main_table} LIMIT {max_rows}"))
    } else {
        Some(format!("SELECT {} FROM {main_table} LIMIT {max_rows}", columns.join(", ")))
    }
}

fn table_fallback(plan: &QueryPlan, schema: &SchemaMetadata) -> Option<String> {
    schema
        .tables
        .iter()
        .map(|t| t.table_name.as_str())
        .find(|name| !plan.primary_tables.iter().any(|p| p == name))
        .map(|table| format!("SELECT * FROM {table} LIMIT 100"))
}

fn syntax_correction(sql: &str, error_message: &str) -> Option<String> {
    let lower_err = error_message.to_lowercase();
    let mut out = sql.to_string();
    if lower_err.contains("column") && lower_err.contains("does not exist") {
        let column_ref = Regex::new(r"\b\w+\.\w+\b").expect("static pattern compiles");
        out = column_ref.replace_all(&out, "*").into_owned();
    }
    if lower_err.contains("syntax error") {
        out = strip_clause_before_select(&out, "with ");
        out = strip_clause_before_select(&out, "window ");
    }
    if out == sql {
        None
    } else {
        Some(out)
    }
}

fn basic_select(plan: &QueryPlan) -> String {
    match plan.primary_tables.first() {
        Some(table) => format!("SELECT * FROM {table} LIMIT 10"),
        None => "SELECT 1 AS test_query".to_string(),
    }
}

pub struct SqlExecutor {
    connector: Arc<dyn SqlConnector>,
    dialect: SqlDialect,
    max_execution_time_secs: u64,
    max_rows: usize,
    feedback: Mutex<VecDeque<FeedbackRecord>>,
    feedback_capacity: usize,
}

impl SqlExecutor {
    pub fn new(
        connector: Arc<dyn SqlConnector>,
        dialect: SqlDialect,
        max_execution_time_secs: u64,
        max_rows: usize,
        feedback_capacity: usize,
    ) -> Self {
        Self {
            connector,
            dialect,
            max_execution_time_secs,
            max_rows,
            feedback: Mutex::new(VecDeque::with_capacity(feedback_capacity)),
            feedback_capacity,
        }
    }

    async fn run_with_timeout(&self, sql: &str, timeout_secs: u64) -> ExecutionResult {
        let start = Instant::now();
        let outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), self.connector.execute(sql)).await;
        let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        match outcome {
            Ok(Ok(raw)) => {
                let mut data = raw.rows;
                let mut warnings = Vec::new();
                if data.len() > self.max_rows {
                    data.truncate(self.max_rows);
                    warnings.push(format!("Result truncated to {} rows", self.max_rows));
                }
                ExecutionResult {
                    success: true,
                    row_count: data.len(),
                    data,
                    column_names: raw.columns,
                    execution_time_ms,
                    sql_executed: sql.to_string(),
                    error_message: None,
                    warnings,
                }
            }
            Ok(Err(e)) => ExecutionResult {
                success: false,
                data: Vec::new(),
                column_names: Vec::new(),
                row_count: 0,
                execution_time_ms,
                sql_executed: sql.to_string(),
                error_message: Some(e.to_string()),
                warnings: Vec::new(),
            },
            Err(_) => ExecutionResult {
                success: false,
                data: Vec::new(),
                column_names: Vec::new(),
                row_count: 0,
                execution_time_ms,
                sql_executed: sql.to_string(),
                error_message: Some(format!("execution exceeded {timeout_secs}s")),
                warnings: Vec::new(),
            },
        }
    }

    fn candidate_sql(
        &self,
        strategy: &str,
        original_sql: &str,
        plan: Option<&QueryPlan>,
        schema: &SchemaMetadata,
        last_error: &str,
    ) -> Option<String> {
        match strategy {
            "extended_timeout" | "retry" => Some(original_sql.to_string()),
            "add_limit" => add_limit_clause(original_sql, self.max_rows),
            "simplify_query" => simplify_query(original_sql),
            "remove_joins" => plan.and_then(|p| remove_complex_joins(p, self.max_rows)),
            "column_fallback" => plan.and_then(|p| column_fallback(p, schema, self.max_rows)),
            "table_fallback" => plan.and_then(|p| table_fallback(p, schema)),
            "syntax_correction" => syntax_correction(original_sql, last_error),
            "basic_select" => plan.map(basic_select).or_else(|| Some("SELECT 1 AS test_query".to_string())),
            _ => None,
        }
    }

    /// Runs `generation.sql`, falling back through the nine-step ladder on
    /// failure; `plan` supplies the primary-table context some strategies
    /// need and may be absent when SQL was generated without a query plan.
    pub async fn execute_with_fallbacks(
        &self,
        generation: &SqlGenerationResult,
        original_query: Option<&str>,
        plan: Option<&QueryPlan>,
        schema: &SchemaMetadata,
    ) -> (ExecutionResult, Vec<FallbackAttempt>) {
        let mut attempts = Vec::new();

        let primary = self.run_with_timeout(&generation.sql, self.max_execution_time_secs).await;
        attempts.push(FallbackAttempt {
            attempt_number: 0,
            strategy: "primary".to_string(),
            sql_attempted: generation.sql.clone(),
            success: primary.success,
            error_message: primary.error_message.clone(),
            execution_time_ms: Some(primary.execution_time_ms),
        });
        if primary.success {
            self.record_feedback(original_query, generation, &primary, "success").await;
            return (primary, attempts);
        }

        let last_error = primary.error_message.clone().unwrap_or_default();
        for (i, strategy) in FALLBACK_STRATEGIES.iter().enumerate() {
            let Some(candidate) = self.candidate_sql(strategy, &generation.sql, plan, schema, &last_error) else {
                continue;
            };
            if candidate == generation.sql && *strategy != "extended_timeout" && *strategy != "retry" {
                continue;
            }
            let timeout_secs = if *strategy == "extended_timeout" {
                self.max_execution_time_secs * 2
            } else {
                self.max_execution_time_secs
            };
            let result = self.run_with_timeout(&candidate, timeout_secs).await;
            attempts.push(FallbackAttempt {
                attempt_number: (i + 1) as u32,
                strategy: strategy.to_string(),
                sql_attempted: candidate,
                success: result.success,
                error_message: result.error_message.clone(),
                execution_time_ms: Some(result.execution_time_ms),
            });
            if result.success {
                self.record_feedback(original_query, generation, &result, "success").await;
                return (result, attempts);
            }
        }

        self.record_feedback(original_query, generation, &primary, "failure").await;
        (primary, attempts)
    }

    /// Executes SQL directly with no fallback ladder (used by `cortex-cli`'s
    /// `sql --raw` path and tests that want a bare execution).
    pub async fn execute_directly(&self, sql: &str) -> ExecutionResult {
        self.run_with_timeout(sql, self.max_execution_time_secs).await
    }

    /// Dialect-dispatched `EXPLAIN`, issued through the same connector.
    pub async fn explain(&self, sql: &str) -> Result<RawQueryResult, AdapterError> {
        let explain_sql = match self.dialect {
            SqlDialect::Postgres => format!("EXPLAIN (ANALYZE, BUFFERS, FORMAT JSON) {sql}"),
            SqlDialect::MySql => format!("EXPLAIN FORMAT=JSON {sql}"),
            SqlDialect::SqlServer => format!("EXPLAIN {sql}"),
        };
        self.connector.execute(&explain_sql).await
    }

    async fn record_feedback(
        &self,
        original_query: Option<&str>,
        generation: &SqlGenerationResult,
        result: &ExecutionResult,
        feedback_type: &str,
    ) {
        let record = FeedbackRecord {
            timestamp: Utc::now(),
            original_query: original_query.map(str::to_string),
            generated_sql: generation.sql.clone(),
            llm_confidence: generation.confidence_score,
            success: result.success,
            execution_time_ms: result.execution_time_ms,
            row_count: result.row_count,
            error_message: result.error_message.clone(),
            feedback_type: feedback_type.to_string(),
        };
        let mut buffer = self.feedback.lock().await;
        buffer.push_back(record);
        while buffer.len() > self.feedback_capacity {
            buffer.pop_front();
        }
    }

    /// Success rate, top-5 failure patterns, confidence/success correlation,
    /// average latency, and a recency trend over the feedback ring buffer.
    pub async fn insights(&self) -> Insights {
        let buffer = self.feedback.lock().await;
        let total = buffer.len();
        if total == 0 {
            return Insights {
                total_executions: 0,
                success_rate: 0.0,
                common_failures: Vec::new(),
                confidence_success_correlation: 0.0,
                avg_execution_time_ms: 0.0,
                recent_trend: "insufficient_data".to_string(),
            };
        }

        let successes = buffer.iter().filter(|r| r.success).count();
        let success_rate = successes as f32 / total as f32;

        let mut failure_counts: HashMap<String, usize> = HashMap::new();
        for record in buffer.iter().filter(|r| !r.success) {
            let key = record.error_message.clone().unwrap_or_else(|| "unknown error".to_string());
            *failure_counts.entry(key).or_insert(0) += 1;
        }
        let mut common_failures: Vec<(String, usize)> = failure_counts.into_iter().collect();
        common_failures.sort_by(|a, b| b.1.cmp(&a.1));
        common_failures.truncate(5);

        let successful_conf: Vec<f32> = buffer.iter().filter(|r| r.success).map(|r| r.llm_confidence).collect();
        let failed_conf: Vec<f32> = buffer.iter().filter(|r| !r.success).map(|r| r.llm_confidence).collect();
        let confidence_success_correlation = match (successful_conf.is_empty(), failed_conf.is_empty()) {
            (false, false) => {
                let avg_ok = successful_conf.iter().sum::<f32>() / successful_conf.len() as f32;
                let avg_bad = failed_conf.iter().sum::<f32>() / failed_conf.len() as f32;
                avg_ok - avg_bad
            }
            _ => 0.0,
        };

        let avg_execution_time_ms = buffer.iter().map(|r| r.execution_time_ms).sum::<f64>() / total as f64;
        let recent_trend = recent_trend(&buffer);

        Insights {
            total_executions: total,
            success_rate,
            common_failures,
            confidence_success_correlation,
            avg_execution_time_ms,
            recent_trend,
        }
    }
}

fn recent_trend(buffer: &VecDeque<FeedbackRecord>) -> String {
    if buffer.len() < 10 {
        return "insufficient_data".to_string();
    }
    let records: Vec<&FeedbackRecord> = buffer.iter().collect();
    let recent = &records[records.len() - 10..];
    let recent_rate = recent.iter().filter(|r| r.success).count() as f32 / 10.0;

    if records.len() < 20 {
        return if recent_rate > 0.7 { "improving".to_string() } else { "declining".to_string() };
    }
    let previous = &records[records.len() - 20..records.len() - 10];
    let previous_rate = previous.iter().filter(|r| r.success).count() as f32 / 10.0;

    if recent_rate > previous_rate + 0.1 {
        "improving".to_string()
    } else if recent_rate < previous_rate - 0.1 {
        "declining".to_string()
    } else {
        "stable".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_limit_skips_when_already_present() {
        assert!(add_limit_clause("SELECT * FROM t LIMIT 5", 100).is_none());
        assert_eq!(add_limit_clause("SELECT * FROM t", 100).unwrap(), "SELECT * FROM t LIMIT 100;");
    }

    #[test]
    fn simplify_query_strips_group_by_and_having() {
        let sql = "SELECT a FROM t GROUP BY a HAVING COUNT(*) > 1 ORDER BY a";
        let simplified = simplify_query(sql).unwrap();
        assert!(!simplified.to_uppercase().contains("GROUP BY"));
        assert!(!simplified.to_uppercase().contains("HAVING"));
        assert!(simplified.to_uppercase().contains("ORDER BY"));
    }

    #[test]
    fn basic_select_falls_back_to_test_query_without_a_table() {
        let plan = QueryPlan::default();
        assert_eq!(basic_select(&plan), "SELECT 1 AS test_query");
    }

    #[test]
    fn syntax_correction_strips_with_clause_before_select() {
        let sql = "WITH cte AS (SELECT 1) SELECT * FROM t";
        let fixed = syntax_correction(sql, "syntax error near WITH").unwrap();
        assert!(fixed.trim_start().to_uppercase().starts_with("SELECT"));
    }
}
