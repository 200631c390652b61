//! Query Policy - validation layer for the query gateway
//!
//! This crate turns untrusted query text into a [`ValidatedQuery`] or a
//! [`ValidationError`]. It holds the immutable [`Policy`] built from
//! configuration, the SQL walker that enforces it, and identifier checks for
//! the table allowlist.

pub mod errors;
pub mod identifier;
pub mod policy;
pub mod prelude;
pub mod validated;
pub mod validator;

pub use errors::{PolicyError, ValidationError};
pub use identifier::{IdentifierError, ValidatedTableName};
pub use policy::{Policy, QueryClass, StatementKind};
pub use validated::ValidatedQuery;
pub use validator::{cache_key_for, validate};
