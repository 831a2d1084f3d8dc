//! The semantic enricher: turns raw schema metadata into
//! business-level tags, patterns, rules, and a domain classification.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::sql::metadata::{ColumnMetadata, SchemaMetadata};

/// Business-domain keyword dictionaries, carried over from the original's
/// table-name bag-of-words domain scorer.
pub mod keywords {
    pub const ECOMMERCE: &[&str] = &["product", "order", "cart", "checkout", "sku", "inventory", "shipment"];
    pub const HR: &[&str] = &["employee", "payroll", "department", "salary", "timesheet", "leave"];
    pub const FINANCE: &[&str] = &["invoice", "payment", "ledger", "account", "transaction", "budget"];
    pub const CRM: &[&str] = &["customer", "lead", "contact", "opportunity", "campaign", "ticket"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Reference,
    Transaction,
    Event,
    Configuration,
    Bridge,
    Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessEntity {
    pub table_name: String,
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPattern {
    pub pattern_type: String,
    pub table_name: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessRule {
    pub rule_type: String,
    pub table_name: String,
    pub column_name: Option<String>,
    pub description: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainClassification {
    pub primary: String,
    pub scores: HashMap<String, f32>,
    pub is_multi_domain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedSchema {
    pub business_entities: Vec<BusinessEntity>,
    pub semantic_tags: HashMap<String, Vec<String>>,
    pub data_patterns: Vec<DataPattern>,
    pub business_rules: Vec<BusinessRule>,
    pub domain_classification: DomainClassification,
    pub confidence_scores: HashMap<String, f32>,
}

fn name_has_any(name: &str, keywords: &[&str]) -> bool {
    let lower = name.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

fn classify_entity(table: &str, columns: &[&ColumnMetadata]) -> EntityType {
    if name_has_any(table, &["master", "dim", "ref", "lookup"]) {
        return EntityType::Reference;
    }
    if name_has_any(table, &["transaction", "order", "payment", "invoice"]) {
        return EntityType::Transaction;
    }
    if name_has_any(table, &["log", "audit", "history", "event"]) {
        return EntityType::Event;
    }
    if name_has_any(table, &["config", "setting", "parameter"]) {
        return EntityType::Configuration;
    }
    let id_columns = columns.iter().filter(|c| c.column_name.to_lowercase().ends_with("_id")).count();
    if id_columns >= 2 {
        return EntityType::Bridge;
    }
    EntityType::Entity
}

fn table_tags(table: &str) -> Vec<String> {
    let mut tags = Vec::new();
    if name_has_any(table, &["log", "audit"]) {
        tags.push("temporal".to_string());
    }
    if name_has_any(table, &["ref", "lookup"]) {
        tags.push("reference".to_string());
    }
    if name_has_any(table, &["master", "dim"]) {
        tags.push("dimension".to_string());
    }
    if name_has_any(table, &["fact", "transaction"]) {
        tags.push("fact".to_string());
    }
    tags
}

fn column_tags(column: &ColumnMetadata) -> Vec<String> {
    let mut tags = Vec::new();
    let lower_type = column.data_type.to_lowercase();
    if lower_type.contains("date") || lower_type.contains("time") {
        tags.push("temporal".to_string());
    }
    if column.column_name.to_lowercase().contains("id") {
        tags.push("identifier".to_string());
    }
    if name_has_any(&column.column_name, &["lat", "lng", "lon", "geo"]) {
        tags.push("geospatial".to_string());
    }
    if name_has_any(&column.column_name, &["price", "amount", "cost", "total", "salary"]) {
        tags.push("monetary".to_string());
    }
    for (domain, words) in [
        ("ecommerce", keywords::ECOMMERCE),
        ("hr", keywords::HR),
        ("finance", keywords::FINANCE),
        ("crm", keywords::CRM),
    ] {
        if name_has_any(&column.column_name, words) {
            tags.push(domain.to_string());
        }
    }
    tags
}

fn detect_patterns(schema: &SchemaMetadata) -> Vec<DataPattern> {
    let mut patterns = Vec::new();
    for table in &schema.tables {
        if name_has_any(&table.table_name, &["log", "audit", "history", "event", "time"]) {
            patterns.push(DataPattern {
                pattern_type: "temporal".to_string(),
                table_name: table.table_name.clone(),
                detail: "table name suggests time-series data".to_string(),
            });
        }
        let columns = schema.columns_for(&table.table_name);
        if columns
            .iter()
            .any(|c| name_has_any(&c.column_name, &["parent_id", "parent", "level", "path"]))
        {
            patterns.push(DataPattern {
                pattern_type: "hierarchical".to_string(),
                table_name: table.table_name.clone(),
                detail: "self-referential parent/level/path column".to_string(),
            });
        }
    }
    for table in &schema.tables {
        let referenced_by = schema
            .relationships
            .iter()
            .filter(|r| r.to_table == table.table_name)
            .count();
        if referenced_by >= 2 {
            patterns.push(DataPattern {
                pattern_type: "master_detail".to_string(),
                table_name: table.table_name.clone(),
                detail: format!("referenced by {referenced_by} other tables"),
            });
        }
    }
    patterns
}

fn detect_rules(schema: &SchemaMetadata) -> Vec<BusinessRule> {
    let mut rules = Vec::new();
    for rel in &schema.relationships {
        rules.push(BusinessRule {
            rule_type: "referential_integrity".to_string(),
            table_name: rel.from_table.clone(),
            column_name: Some(rel.from_column.clone()),
            description: format!("{}.{} references {}.{}", rel.from_table, rel.from_column, rel.to_table, rel.to_column),
            confidence: 0.95,
        });
    }
    for column in &schema.columns {
        let near_unique = column.unique_percentage.map(|p| p >= 0.95).unwrap_or(false);
        if near_unique && !column.is_nullable && column.column_name.to_lowercase().contains("id") {
            rules.push(BusinessRule {
                rule_type: "uniqueness".to_string(),
                table_name: column.table_name.clone(),
                column_name: Some(column.column_name.clone()),
                description: format!("{}.{} is effectively unique", column.table_name, column.column_name),
                confidence: 0.85,
            });
        }
        if name_has_any(&column.column_name, &["email"]) {
            rules.push(BusinessRule {
                rule_type: "data_validation".to_string(),
                table_name: column.table_name.clone(),
                column_name: Some(column.column_name.clone()),
                description: r"matches ^[^@\s]+@[^@\s]+\.[^@\s]+$".to_string(),
                confidence: 0.8,
            });
        }
        if name_has_any(&column.column_name, &["phone"]) {
            rules.push(BusinessRule {
                rule_type: "data_validation".to_string(),
                table_name: column.table_name.clone(),
                column_name: Some(column.column_name.clone()),
                description: r"matches ^\+?[0-9()\-\s]{7,}$".to_string(),
                confidence: 0.75,
            });
        }
    }
    rules
}

fn classify_domain(schema: &SchemaMetadata) -> DomainClassification {
    let bag: Vec<String> = schema.tables.iter().map(|t| t.table_name.to_lowercase()).collect();
    let total = bag.len().max(1) as f32;
    let mut scores = HashMap::new();
    for (domain, words) in [
        ("ecommerce", keywords::ECOMMERCE),
        ("hr", keywords::HR),
        ("finance", keywords::FINANCE),
        ("crm", keywords::CRM),
    ] {
        let matched = bag.iter().filter(|name| words.iter().any(|w| name.contains(w))).count();
        scores.insert(domain.to_string(), matched as f32 / total);
    }
    let primary = scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(k, _)| k.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let is_multi_domain = scores.values().filter(|s| **s > 0.3).count() > 1;
    DomainClassification {
        primary,
        scores,
        is_multi_domain,
    }
}

pub fn enrich(schema: &SchemaMetadata) -> EnrichedSchema {
    let mut business_entities = Vec::new();
    let mut semantic_tags = HashMap::new();
    let mut confidence_scores = HashMap::new();

    for table in &schema.tables {
        let columns = schema.columns_for(&table.table_name);
        let entity_type = classify_entity(&table.table_name, &columns);
        business_entities.push(BusinessEntity {
            table_name: table.table_name.clone(),
            entity_type,
        });

        let mut tags = table_tags(&table.table_name);
        for column in &columns {
            tags.extend(column_tags(column));
        }
        tags.sort();
        tags.dedup();
        confidence_scores.insert(table.table_name.clone(), if tags.is_empty() { 0.3 } else { 0.7 });
        semantic_tags.insert(table.table_name.clone(), tags);
    }

    EnrichedSchema {
        business_entities,
        semantic_tags,
        data_patterns: detect_patterns(schema),
        business_rules: detect_rules(schema),
        domain_classification: classify_domain(schema),
        confidence_scores,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::metadata::{RelationshipMetadata, RelationshipType, SourceInfo, SqlDialect, TableMetadata};

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
            columns: vec![
                ColumnMetadata {
                    table_name: "orders".into(),
                    column_name: "customer_id".into(),
                    data_type: "integer".into(),
                    is_nullable: false,
                    comment: String::new(),
                    unique_percentage: None,
                    null_percentage: None,
                },
                ColumnMetadata {
                    table_name: "customers".into(),
                    column_name: "email".into(),
                    data_type: "text".into(),
                    is_nullable: false,
                    comment: String::new(),
                    unique_percentage: Some(0.99),
                    null_percentage: Some(0.0),
                },
            ],
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
    fn entity_classification_recognises_transaction_table() {
        let schema = sample_schema();
        let enriched = enrich(&schema);
        let orders = enriched.business_entities.iter().find(|e| e.table_name == "orders").unwrap();
        assert_eq!(orders.entity_type, EntityType::Transaction);
    }

    #[test]
    fn email_column_produces_validation_rule() {
        let schema = sample_schema();
        let enriched = enrich(&schema);
        assert!(enriched
            .business_rules
            .iter()
            .any(|r| r.rule_type == "data_validation" && r.column_name.as_deref() == Some("email")));
    }

    #[test]
    fn domain_classification_favours_ecommerce() {
        let schema = sample_schema();
        let enriched = enrich(&schema);
        assert_eq!(enriched.domain_classification.primary, "ecommerce");
    }
}
