use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a `VerificationStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("malformed row: {0}")]
    Malformed(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unreachable(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => StoreError::Malformed(err.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum VerificationError {
    /// A store call failed; the whole driver call is aborted.
    #[error("data source error during {operation}{}: {source}", chunk_suffix(.chunk))]
    DataSource {
        operation: &'static str,
        chunk: Option<usize>,
        #[source]
        source: StoreError,
    },
    #[error("query exceeded its deadline of {}ms", .deadline.as_millis())]
    Timeout { deadline: Duration },
    #[error("invalid query: {0}")]
    Validation(String),
    /// An internal invariant was broken. Indicates a defect, never bad input.
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("query canceled")]
    Canceled,
}

fn chunk_suffix(chunk: &Option<usize>) -> String {
    match chunk {
        Some(index) => format!(" (chunk {index})"),
        None => String::new(),
    }
}

pub type VerificationResult<T> = Result<T, VerificationError>;

/// Error body handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct PublicError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl VerificationError {
    pub fn data_source(operation: &'static str, chunk: Option<usize>, source: StoreError) -> Self {
        Self::DataSource {
            operation,
            chunk,
            source,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::DataSource { .. } => "data_source_error",
            Self::Timeout { .. } => "timeout",
            Self::Validation(_) => "invalid_query",
            Self::Invariant(_) => "internal_invariant",
            Self::Canceled => "canceled",
        }
    }

    /// Whether the caller may retry the same query unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DataSource { .. } | Self::Timeout { .. })
    }

    pub fn to_public(&self) -> PublicError {
        let details = match self {
            Self::DataSource {
                operation, chunk, ..
            } => Some(serde_json::json!({
                "operation": operation,
                "chunk": chunk,
            })),
            Self::Timeout { deadline } => Some(serde_json::json!({
                "deadline_ms": deadline.as_millis() as u64,
            })),
            _ => None,
        };
        PublicError {
            code: self.code().to_string(),
            message: self.to_string(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_source_error_names_operation_and_chunk() {
        let err = VerificationError::data_source(
            "fetch_model_slice",
            Some(2),
            StoreError::Query("connection reset".to_string()),
        );
        let message = err.to_string();
        assert!(message.contains("fetch_model_slice"));
        assert!(message.contains("chunk 2"));
        assert!(message.contains("connection reset"));

        let public = err.to_public();
        assert_eq!(public.code, "data_source_error");
        assert_eq!(
            public.details,
            Some(serde_json::json!({"operation": "fetch_model_slice", "chunk": 2}))
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_error_is_not_retryable() {
        let err = VerificationError::validation("station list is empty");
        assert_eq!(err.code(), "invalid_query");
        assert!(!err.is_retryable());
        assert!(err.to_public().details.is_none());
    }

    #[test]
    fn timeout_reports_deadline() {
        let err = VerificationError::Timeout {
            deadline: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "query exceeded its deadline of 250ms");
    }
}
