//! Convenience re-exports for common query-policy usage

// Policy
pub use crate::policy::{Policy, QueryClass, StatementKind};

// Validation
pub use crate::validated::ValidatedQuery;
pub use crate::validator::validate;

// Error types
pub use crate::errors::{PolicyError, ValidationError};
