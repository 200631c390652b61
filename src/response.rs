//! Tool-call response shapes
//!
//! Success: `{ success, rows, metadata: { rowCount, truncated, executionTimeMs, columns } }`.
//! Failure: `{ success, errorKind, message, suggestions? }`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use type_mapping::ColumnInfo;

use crate::errors::GatewayError;
use crate::executor::{ExecutionResult, QueryProfile};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub row_count: usize,
    pub truncated: bool,
    pub execution_time_ms: u64,
    pub columns: Vec<ColumnInfo>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<QueryProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub rows: Vec<Map<String, JsonValue>>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureResponse {
    pub success: bool,
    pub error_kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Success(SuccessResponse),
    Failure(FailureResponse),
}

impl ToolResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolResponse::Success(_))
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "success": false,
                "errorKind": "RuntimeError",
                "message": "The response could not be serialized",
            })
        })
    }
}

impl From<ExecutionResult> for ToolResponse {
    fn from(result: ExecutionResult) -> Self {
        ToolResponse::Success(SuccessResponse {
            success: true,
            metadata: ResultMetadata {
                row_count: result.row_count,
                truncated: result.truncated,
                execution_time_ms: result.execution_time_ms,
                columns: result.columns,
                cache_hit: result.cache_hit,
                profile: result.profile,
            },
            rows: result.rows,
        })
    }
}

impl From<&GatewayError> for ToolResponse {
    fn from(error: &GatewayError) -> Self {
        ToolResponse::Failure(FailureResponse {
            success: false,
            error_kind: error.error_kind().to_string(),
            message: error.sanitized_message(),
            suggestions: error.suggestions(),
        })
    }
}

impl From<Result<ExecutionResult, GatewayError>> for ToolResponse {
    fn from(outcome: Result<ExecutionResult, GatewayError>) -> Self {
        match outcome {
            Ok(result) => result.into(),
            Err(error) => (&error).into(),
        }
    }
}
