use thiserror::Error;

use super::schema::{SchemaName, SchemaRejection};

/// Errors from schema resolution, context propagation and pooled execution
#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("Missing schema-name in request metadata")]
    MissingSchema,

    #[error("Invalid schema name '{schema}': {reason}")]
    InvalidSchema {
        schema: String,
        reason: SchemaRejection,
    },

    #[error("No schema context found; the call did not pass through the schema resolver")]
    NoContext,

    #[error("Timed out after {waited_ms}ms acquiring a connection for schema '{schema}'")]
    AcquireTimeout { schema: SchemaName, waited_ms: u64 },

    #[error("Connection pool for schema '{0}' is closed")]
    PoolClosed(SchemaName),

    #[error("Failed to open connection for schema '{schema}': {message}")]
    Connect { schema: SchemaName, message: String },

    #[error("Operation on schema '{schema}' exceeded its {timeout_ms}ms deadline")]
    DeadlineExceeded { schema: SchemaName, timeout_ms: u64 },

    #[error("Invalid pool configuration: {0}")]
    Config(String),

    /// Failure raised by the caller's own operation; never retried
    #[error("{0}")]
    Operation(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl TenancyError {
    pub fn invalid_schema(schema: impl Into<String>, reason: SchemaRejection) -> Self {
        TenancyError::InvalidSchema {
            schema: schema.into(),
            reason,
        }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        TenancyError::Operation(message.into())
    }

    /// Whether the executor may retry after this error
    pub fn is_transient(&self) -> bool {
        match self {
            TenancyError::AcquireTimeout { .. }
            | TenancyError::PoolClosed(_)
            | TenancyError::Connect { .. } => true,
            TenancyError::Sqlx(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }

    /// Whether the connection that produced this error must not be reused
    pub fn is_connection_loss(&self) -> bool {
        match self {
            TenancyError::Connect { .. } => true,
            TenancyError::Sqlx(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}
