//! Error types for policy construction and query validation

use crate::identifier::IdentifierError;
use thiserror::Error;

/// Reasons a query is rejected before it can reach the database.
///
/// Every variant is terminal: a rejected query never touches the pool.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Query could not be parsed: {message}")]
    SyntaxError { message: String },

    #[error("Only a single statement is accepted, found {count}")]
    MultiStatementRejected { count: usize },

    #[error("Statement kind '{kind}' is not allowed; only read queries are accepted")]
    DisallowedStatement { kind: String },

    #[error("Table '{table}' is not available")]
    DisallowedTable { table: String, allowed: Vec<String> },

    #[error("Function or keyword '{function}' is not allowed")]
    DisallowedFunction { function: String },
}

impl ValidationError {
    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        Self::SyntaxError {
            message: message.into(),
        }
    }

    pub(crate) fn statement(kind: impl Into<String>) -> Self {
        Self::DisallowedStatement { kind: kind.into() }
    }

    /// Stable error kind reported to the tool-call layer
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyntaxError { .. } => "SyntaxError",
            Self::MultiStatementRejected { .. } => "MultiStatementRejected",
            Self::DisallowedStatement { .. } => "DisallowedStatement",
            Self::DisallowedTable { .. } => "DisallowedTable",
            Self::DisallowedFunction { .. } => "DisallowedFunction",
        }
    }

    /// Hints that help the query generator produce an acceptable query
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::SyntaxError { .. } => vec![
                "Write a single DuckDB SELECT statement".to_string(),
                "Use an integer literal in LIMIT clauses".to_string(),
            ],
            Self::MultiStatementRejected { .. } => {
                vec!["Send exactly one statement without ';' chaining".to_string()]
            }
            Self::DisallowedStatement { .. } => {
                vec!["Only SELECT queries are permitted".to_string()]
            }
            Self::DisallowedTable { allowed, .. } => {
                vec![format!("Available tables: {}", allowed.join(", "))]
            }
            Self::DisallowedFunction { .. } => vec![
                "File access, extension and system functions are not available".to_string(),
            ],
        }
    }
}

/// Startup-fatal problems with the configured policy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("Policy must allow at least one table")]
    EmptyAllowlist,

    #[error("Invalid table name '{name}' in policy: {source}")]
    InvalidTableName {
        name: String,
        #[source]
        source: IdentifierError,
    },

    #[error("Volatile table '{0}' is not in the allowlist")]
    VolatileTableNotAllowed(String),

    #[error("Policy must allow at least one statement kind")]
    NoStatementKinds,

    #[error("Statement kind '{0}' is not read-only and cannot be allowed")]
    StatementNotReadOnly(String),

    #[error("Unknown statement kind '{0}' in policy")]
    UnknownStatementKind(String),

    #[error("Unknown query class '{0}' in policy")]
    UnknownQueryClass(String),

    #[error("Policy token lists cannot contain empty entries")]
    EmptyToken,

    #[error("Invalid row caps: default {default} must be between 1 and max {max}")]
    InvalidRowCaps { default: u64, max: u64 },
}
