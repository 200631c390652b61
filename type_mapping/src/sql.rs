//! SQL type naming
//!
//! DuckDB reports result column types as Arrow data types; this module maps
//! them back to the DuckDB type names users write in SQL.

use duckdb::arrow::datatypes::DataType;

/// DuckDB type name for a result column type
pub fn duckdb_type_name(data_type: &DataType) -> String {
    match data_type {
        DataType::Null => "NULL".to_string(),
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Int8 => "TINYINT".to_string(),
        DataType::Int16 => "SMALLINT".to_string(),
        DataType::Int32 => "INTEGER".to_string(),
        DataType::Int64 => "BIGINT".to_string(),
        DataType::UInt8 => "UTINYINT".to_string(),
        DataType::UInt16 => "USMALLINT".to_string(),
        DataType::UInt32 => "UINTEGER".to_string(),
        DataType::UInt64 => "UBIGINT".to_string(),
        DataType::Float16 | DataType::Float32 => "FLOAT".to_string(),
        DataType::Float64 => "DOUBLE".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => "VARCHAR".to_string(),
        DataType::Binary
        | DataType::LargeBinary
        | DataType::BinaryView
        | DataType::FixedSizeBinary(_) => "BLOB".to_string(),
        DataType::Date32 | DataType::Date64 => "DATE".to_string(),
        DataType::Time32(_) | DataType::Time64(_) => "TIME".to_string(),
        DataType::Timestamp(_, Some(_)) => "TIMESTAMP WITH TIME ZONE".to_string(),
        DataType::Timestamp(_, None) => "TIMESTAMP".to_string(),
        DataType::Interval(_) | DataType::Duration(_) => "INTERVAL".to_string(),
        DataType::Decimal128(precision, scale) | DataType::Decimal256(precision, scale) => {
            format!("DECIMAL({},{})", precision, scale)
        }
        DataType::List(field) | DataType::LargeList(field) => {
            format!("{}[]", duckdb_type_name(field.data_type()))
        }
        DataType::FixedSizeList(field, size) => {
            format!("{}[{}]", duckdb_type_name(field.data_type()), size)
        }
        DataType::Struct(_) => "STRUCT".to_string(),
        DataType::Map(_, _) => "MAP".to_string(),
        DataType::Union(_, _) => "UNION".to_string(),
        DataType::Dictionary(_, _) => "ENUM".to_string(),
        other => format!("{:?}", other).to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckdb::arrow::datatypes::{Field, TimeUnit};
    use std::sync::Arc;

    #[test]
    fn test_scalar_type_names() {
        let cases = [
            (DataType::Int64, "BIGINT"),
            (DataType::Int32, "INTEGER"),
            (DataType::Float64, "DOUBLE"),
            (DataType::Utf8, "VARCHAR"),
            (DataType::Boolean, "BOOLEAN"),
            (DataType::Date32, "DATE"),
            (DataType::Timestamp(TimeUnit::Microsecond, None), "TIMESTAMP"),
            (DataType::Decimal128(18, 3), "DECIMAL(18,3)"),
        ];

        for (data_type, expected) in cases {
            assert_eq!(duckdb_type_name(&data_type), expected);
        }
    }

    #[test]
    fn test_list_type_names() {
        let list = DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)));
        assert_eq!(duckdb_type_name(&list), "VARCHAR[]");
    }
}
