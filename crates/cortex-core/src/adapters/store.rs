//! The Store adapter: tabular row CRUD keyed by opaque ids.
//!
//! The core treats the vector column as an opaque serialised blob on the way
//! in and a reconstructable sequence on the way out — `Store` never knows
//! about `Vec<f32>`, only about the bytes `BaseEngine` hands it. Filters are
//! expressed as a small `RowFilter` builder rather than raw SQL, since the
//! relational store itself is an out-of-scope external collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::AdapterError;

/// A single cell value. Complex fields (`context`, `tags`, `embedding`,
/// kind-specific collections) are serialised to `Text` (JSON) at this
/// boundary; datetimes to `Text` in RFC3339 for a stable, sortable form.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Text(String),
    Int(i64),
    Real(f64),
    Bool(bool),
    Null,
}

impl StoreValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StoreValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StoreValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            StoreValue::Real(r) => Some(*r),
            StoreValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StoreValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// A row: column name to cell value.
pub type Row = HashMap<String, StoreValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone)]
pub struct FilterClause {
    pub column: String,
    pub op: FilterOp,
    pub value: StoreValue,
}

/// Row-level filters a `Store` implementation must honour for `select`
/// (importance floor, confidence floor, created-after/before, active-only,
/// plus arbitrary equality/range clauses for kind-specific columns).
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    pub user_id: Option<String>,
    pub clauses: Vec<FilterClause>,
}

impl RowFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            clauses: Vec::new(),
        }
    }

    pub fn with(mut self, column: impl Into<String>, op: FilterOp, value: StoreValue) -> Self {
        self.clauses.push(FilterClause {
            column: column.into(),
            op,
            value,
        });
        self
    }

    pub fn importance_floor(self, floor: f32) -> Self {
        self.with("importance", FilterOp::Gte, StoreValue::Real(floor as f64))
    }

    pub fn confidence_floor(self, floor: f32) -> Self {
        self.with("confidence", FilterOp::Gte, StoreValue::Real(floor as f64))
    }

    pub fn created_after(self, ts: DateTime<Utc>) -> Self {
        self.with(
            "created_at",
            FilterOp::Gte,
            StoreValue::Text(ts.to_rfc3339()),
        )
    }

    pub fn created_before(self, ts: DateTime<Utc>) -> Self {
        self.with(
            "created_at",
            FilterOp::Lte,
            StoreValue::Text(ts.to_rfc3339()),
        )
    }

    pub fn active_only(self, now: DateTime<Utc>) -> Self {
        self.with("expires_at", FilterOp::Gt, StoreValue::Text(now.to_rfc3339()))
    }

    /// Evaluate this filter against a candidate row (used by the in-memory
    /// `testkit` store, and a reference for any concrete implementation).
    pub fn matches(&self, row: &Row) -> bool {
        if let Some(uid) = &self.user_id {
            match row.get("user_id") {
                Some(StoreValue::Text(v)) if v == uid => {}
                _ => return false,
            }
        }
        self.clauses.iter().all(|clause| match row.get(&clause.column) {
            Some(cell) => compare(cell, clause.op, &clause.value),
            None => false,
        })
    }
}

fn compare(cell: &StoreValue, op: FilterOp, value: &StoreValue) -> bool {
    use std::cmp::Ordering;
    let ord = match (cell, value) {
        (StoreValue::Text(a), StoreValue::Text(b)) => a.partial_cmp(b),
        (StoreValue::Bool(a), StoreValue::Bool(b)) => a.partial_cmp(b),
        _ => cell.as_real().and_then(|a| value.as_real().map(|b| (a, b))).and_then(
            |(a, b)| a.partial_cmp(&b),
        ),
    };
    match (ord, op) {
        (Some(Ordering::Equal), FilterOp::Eq | FilterOp::Gte | FilterOp::Lte) => true,
        (Some(Ordering::Greater), FilterOp::Gt | FilterOp::Gte) => true,
        (Some(Ordering::Less), FilterOp::Lt | FilterOp::Lte) => true,
        _ => false,
    }
}

/// Tabular upsert / select / update / delete, keyed by opaque id columns.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert(&self, table: &str, row: Row) -> Result<(), AdapterError>;
    async fn get(&self, table: &str, id: &str) -> Result<Option<Row>, AdapterError>;
    async fn select(&self, table: &str, filter: &RowFilter) -> Result<Vec<Row>, AdapterError>;
    async fn update(&self, table: &str, id: &str, changes: Row) -> Result<bool, AdapterError>;
    async fn delete(&self, table: &str, id: &str) -> Result<bool, AdapterError>;
    async fn delete_where(&self, table: &str, filter: &RowFilter) -> Result<u64, AdapterError>;
    async fn count(&self, table: &str, user_id: &str) -> Result<i64, AdapterError>;
}
