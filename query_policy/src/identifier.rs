//! Identifier validation
//!
//! Table names in the policy allowlist are checked here once at startup so that
//! a typo or an injected fragment in the configuration refuses to start the
//! gateway instead of silently matching nothing.

use std::fmt;

/// Validation errors for database identifiers
#[derive(Debug, Clone, PartialEq)]
pub enum IdentifierError {
    /// Name contains invalid characters (only alphanumeric and underscore allowed)
    InvalidCharacters(String),
    /// Name is too long
    TooLong {
        name: String,
        length: usize,
        max_length: usize,
    },
    /// Name (or one of its dotted parts) is empty
    Empty,
    /// Name starts with invalid character (must start with letter or underscore)
    InvalidStartCharacter(String),
    /// Name is a reserved SQL keyword
    ReservedKeyword(String),
}

impl fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierError::InvalidCharacters(name) => {
                write!(f, "Invalid characters in name '{}': only alphanumeric characters and underscores are allowed", name)
            }
            IdentifierError::TooLong {
                name,
                length,
                max_length,
            } => {
                write!(
                    f,
                    "Name '{}' is too long: {} characters (max {})",
                    name, length, max_length
                )
            }
            IdentifierError::Empty => {
                write!(f, "Name cannot be empty")
            }
            IdentifierError::InvalidStartCharacter(name) => {
                write!(f, "Name '{}' must start with a letter or underscore", name)
            }
            IdentifierError::ReservedKeyword(name) => {
                write!(f, "Name '{}' is a reserved SQL keyword", name)
            }
        }
    }
}

impl std::error::Error for IdentifierError {}

/// A validated, lower-cased table name, optionally schema-qualified (`schema.table`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValidatedTableName(String);

impl ValidatedTableName {
    const MAX_LENGTH: usize = 128;

    /// Create a new validated table name
    pub fn new(name: &str) -> Result<Self, IdentifierError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }
        for part in trimmed.split('.') {
            Self::validate_identifier(part)?;
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Get the validated name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the validated name as a String
    pub fn into_string(self) -> String {
        self.0
    }

    fn validate_identifier(name: &str) -> Result<(), IdentifierError> {
        if name.is_empty() {
            return Err(IdentifierError::Empty);
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(IdentifierError::TooLong {
                name: name.to_string(),
                length: name.len(),
                max_length: Self::MAX_LENGTH,
            });
        }

        let first_char = name.chars().next().ok_or(IdentifierError::Empty)?;
        if !first_char.is_ascii_alphabetic() && first_char != '_' {
            return Err(IdentifierError::InvalidStartCharacter(name.to_string()));
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(IdentifierError::InvalidCharacters(name.to_string()));
        }

        if Self::is_reserved_keyword(name) {
            return Err(IdentifierError::ReservedKeyword(name.to_string()));
        }

        Ok(())
    }

    /// Check if a name is a reserved SQL keyword
    fn is_reserved_keyword(name: &str) -> bool {
        const RESERVED_KEYWORDS: &[&str] = &[
            "SELECT", "INSERT", "UPDATE", "DELETE", "FROM", "WHERE", "JOIN", "INNER", "LEFT",
            "RIGHT", "FULL", "OUTER", "ON", "AS", "AND", "OR", "NOT", "NULL", "TRUE", "FALSE",
            "CASE", "WHEN", "THEN", "ELSE", "END", "EXISTS", "IN", "LIKE", "BETWEEN", "ORDER",
            "BY", "GROUP", "HAVING", "LIMIT", "OFFSET", "UNION", "ALL", "DISTINCT", "CREATE",
            "DROP", "ALTER", "TABLE", "INDEX", "VIEW", "DATABASE", "SCHEMA", "PRIMARY", "KEY",
            "FOREIGN", "REFERENCES", "UNIQUE", "CHECK", "DEFAULT", "CONSTRAINT", "COLUMN",
            "WITH", "RECURSIVE", "INTO", "VALUES", "SET", "GRANT", "REVOKE",
            // DuckDB statements that must never be spelled as a table
            "ATTACH", "DETACH", "INSTALL", "LOAD", "PRAGMA", "COPY", "EXPORT", "IMPORT", "USE",
            "CALL", "CHECKPOINT", "VACUUM", "PIVOT", "UNPIVOT", "SUMMARIZE", "DESCRIBE",
        ];

        RESERVED_KEYWORDS.contains(&name.to_ascii_uppercase().as_str())
    }
}

impl fmt::Display for ValidatedTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
