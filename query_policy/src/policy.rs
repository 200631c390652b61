//! The immutable query policy
//!
//! Built once at startup from `config::PolicyConfig` and shared read-only by
//! every validation afterwards.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use config::PolicyConfig;
use serde::{Deserialize, Serialize};

use crate::errors::PolicyError;
use crate::identifier::ValidatedTableName;

/// Statement kinds a policy may allow. Only read queries exist here on purpose:
/// write kinds are refused when the policy is built, not when a query arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Select,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "select",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatementKind {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const WRITE_KINDS: &[&str] = &[
            "insert", "update", "delete", "merge", "create", "drop", "alter", "truncate",
            "attach", "detach", "install", "load", "pragma", "copy", "export", "import", "set",
            "reset", "call", "checkpoint", "vacuum", "grant", "revoke", "use",
        ];

        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "select" | "query" => Ok(StatementKind::Select),
            kind if WRITE_KINDS.contains(&kind) => Err(PolicyError::StatementNotReadOnly(kind.to_string())),
            _ => Err(PolicyError::UnknownStatementKind(s.to_string())),
        }
    }
}

/// Coarse query shape, used to pick cacheability and cache lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryClass {
    /// Uses GROUP BY or aggregate functions
    Aggregate,
    /// Returns row-level records
    Detail,
}

impl QueryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryClass::Aggregate => "aggregate",
            QueryClass::Detail => "detail",
        }
    }
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryClass {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggregate" => Ok(QueryClass::Aggregate),
            "detail" => Ok(QueryClass::Detail),
            _ => Err(PolicyError::UnknownQueryClass(s.to_string())),
        }
    }
}

/// Validated, immutable security policy
#[derive(Debug, Clone)]
pub struct Policy {
    allowed_tables: BTreeSet<String>,
    volatile_tables: BTreeSet<String>,
    statement_kinds: BTreeSet<StatementKind>,
    disallowed_functions: HashSet<String>,
    time_relative_functions: HashSet<String>,
    default_row_cap: u64,
    max_row_cap: u64,
    cacheable_classes: BTreeSet<QueryClass>,
}

impl Policy {
    /// Build the policy, refusing anything malformed or incomplete
    pub fn from_config(config: &PolicyConfig) -> Result<Self, PolicyError> {
        if config.allowed_tables.is_empty() {
            return Err(PolicyError::EmptyAllowlist);
        }

        let allowed_tables = config
            .allowed_tables
            .iter()
            .map(|name| validated_table(name))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let volatile_tables = config
            .volatile_tables
            .iter()
            .map(|name| validated_table(name))
            .collect::<Result<BTreeSet<_>, _>>()?;
        if let Some(stray) = volatile_tables.difference(&allowed_tables).next() {
            return Err(PolicyError::VolatileTableNotAllowed(stray.clone()));
        }

        if config.allowed_statements.is_empty() {
            return Err(PolicyError::NoStatementKinds);
        }
        let statement_kinds = config
            .allowed_statements
            .iter()
            .map(|kind| kind.parse::<StatementKind>())
            .collect::<Result<BTreeSet<_>, _>>()?;

        let disallowed_functions = normalized_tokens(&config.disallowed_functions)?;
        let time_relative_functions = normalized_tokens(&config.time_relative_functions)?;

        if config.default_row_cap == 0 || config.default_row_cap > config.max_row_cap {
            return Err(PolicyError::InvalidRowCaps {
                default: config.default_row_cap,
                max: config.max_row_cap,
            });
        }

        let cacheable_classes = config
            .cacheable_query_classes
            .iter()
            .map(|class| class.parse::<QueryClass>())
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self {
            allowed_tables,
            volatile_tables,
            statement_kinds,
            disallowed_functions,
            time_relative_functions,
            default_row_cap: config.default_row_cap,
            max_row_cap: config.max_row_cap,
            cacheable_classes,
        })
    }

    pub fn is_table_allowed(&self, table: &str) -> bool {
        self.allowed_tables.contains(table)
    }

    pub fn is_table_volatile(&self, table: &str) -> bool {
        self.volatile_tables.contains(table)
    }

    pub fn allows_statement(&self, kind: StatementKind) -> bool {
        self.statement_kinds.contains(&kind)
    }

    pub fn is_function_disallowed(&self, token: &str) -> bool {
        self.disallowed_functions.contains(token)
    }

    pub fn is_time_relative(&self, token: &str) -> bool {
        self.time_relative_functions.contains(token)
    }

    pub fn is_cacheable_class(&self, class: QueryClass) -> bool {
        self.cacheable_classes.contains(&class)
    }

    pub fn allowed_tables(&self) -> impl Iterator<Item = &str> {
        self.allowed_tables.iter().map(String::as_str)
    }

    pub fn default_row_cap(&self) -> u64 {
        self.default_row_cap
    }

    pub fn max_row_cap(&self) -> u64 {
        self.max_row_cap
    }
}

fn validated_table(name: &str) -> Result<String, PolicyError> {
    ValidatedTableName::new(name)
        .map(ValidatedTableName::into_string)
        .map_err(|source| PolicyError::InvalidTableName {
            name: name.to_string(),
            source,
        })
}

fn normalized_tokens(tokens: &[String]) -> Result<HashSet<String>, PolicyError> {
    tokens
        .iter()
        .map(|token| {
            let token = token.trim().to_ascii_lowercase();
            if token.is_empty() {
                Err(PolicyError::EmptyToken)
            } else {
                Ok(token)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> PolicyConfig {
        PolicyConfig::new(&["county_data", "State_Data"], 1000, 5000)
    }

    #[test]
    fn test_policy_from_config() {
        let policy = Policy::from_config(&base_config()).unwrap();

        assert!(policy.is_table_allowed("county_data"));
        assert!(policy.is_table_allowed("state_data"));
        assert!(!policy.is_table_allowed("secret_table"));
        assert!(policy.allows_statement(StatementKind::Select));
        assert!(policy.is_function_disallowed("read_csv"));
        assert!(policy.is_time_relative("now"));
        assert!(policy.is_cacheable_class(QueryClass::Aggregate));
        assert_eq!(policy.default_row_cap(), 1000);
        assert_eq!(policy.max_row_cap(), 5000);
    }

    #[test]
    fn test_write_statement_kind_is_fatal() {
        let mut config = base_config();
        config.allowed_statements.push("DELETE".to_string());

        assert_eq!(
            Policy::from_config(&config).unwrap_err(),
            PolicyError::StatementNotReadOnly("delete".to_string())
        );
    }

    #[test]
    fn test_unknown_statement_kind_is_fatal() {
        let mut config = base_config();
        config.allowed_statements = vec!["selekt".to_string()];

        assert!(matches!(
            Policy::from_config(&config),
            Err(PolicyError::UnknownStatementKind(_))
        ));
    }

    #[test]
    fn test_row_caps_must_be_ordered() {
        let mut config = base_config();
        config.default_row_cap = 6000;

        assert_eq!(
            Policy::from_config(&config).unwrap_err(),
            PolicyError::InvalidRowCaps {
                default: 6000,
                max: 5000
            }
        );
    }

    #[test]
    fn test_malformed_tables_are_fatal() {
        let mut config = base_config();
        config.allowed_tables.push("county_data; DROP TABLE x".to_string());
        assert!(matches!(
            Policy::from_config(&config),
            Err(PolicyError::InvalidTableName { .. })
        ));

        let empty = PolicyConfig::new(&[], 10, 10);
        assert_eq!(
            Policy::from_config(&empty).unwrap_err(),
            PolicyError::EmptyAllowlist
        );
    }

    #[test]
    fn test_volatile_tables_must_be_allowed() {
        let config = base_config().with_volatile_tables(&["live_feed"]);
        assert_eq!(
            Policy::from_config(&config).unwrap_err(),
            PolicyError::VolatileTableNotAllowed("live_feed".to_string())
        );
    }

    #[test]
    fn test_unknown_query_class_is_fatal() {
        let config = base_config().with_cacheable_classes(&["aggregate", "everything"]);
        assert_eq!(
            Policy::from_config(&config).unwrap_err(),
            PolicyError::UnknownQueryClass("everything".to_string())
        );
    }

    #[test]
    fn test_empty_tokens_are_fatal() {
        let mut config = base_config();
        config.disallowed_functions.push("  ".to_string());
        assert_eq!(
            Policy::from_config(&config).unwrap_err(),
            PolicyError::EmptyToken
        );
    }
}
