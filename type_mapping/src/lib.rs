//! Unified type mapping between DuckDB results and JSON
//! This crate provides the conversions used to materialize query results

pub mod sql;
pub mod value;

pub use sql::duckdb_type_name;
pub use value::{duckdb_value_to_json, ColumnInfo};
