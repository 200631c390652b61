//! The validator's output

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::policy::{QueryClass, StatementKind};

/// A query that passed every policy check.
///
/// Only [`crate::validate`] constructs these; downstream components trust them
/// as-is and never re-validate.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    sql: String,
    kind: StatementKind,
    tables: BTreeSet<String>,
    row_limit: u64,
    class: QueryClass,
    cache_key: Option<String>,
    created_at: DateTime<Utc>,
}

impl ValidatedQuery {
    pub(crate) fn new(
        sql: String,
        kind: StatementKind,
        tables: BTreeSet<String>,
        row_limit: u64,
        class: QueryClass,
        cache_key: Option<String>,
    ) -> Self {
        Self {
            sql,
            kind,
            tables,
            row_limit,
            class,
            cache_key,
            created_at: Utc::now(),
        }
    }

    /// Normalized SQL text, always ending in a capped LIMIT clause
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Allowlisted tables the query reads from
    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    /// LIMIT applied to the outermost statement
    pub fn row_limit(&self) -> u64 {
        self.row_limit
    }

    pub fn class(&self) -> QueryClass {
        self.class
    }

    /// Present only when the result may be cached
    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    pub fn is_cacheable(&self) -> bool {
        self.cache_key.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
