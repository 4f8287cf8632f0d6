use thiserror::Error;

use super::orchestrator::MigrationSummary;
use crate::tenancy::TenancyError;

/// Errors from a migration run
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Another run holds the advisory lock
    #[error("Another migration process is already running; could not acquire lock '{0}'")]
    Lock(String),

    #[error("Database access failed: {message}")]
    DatabaseAccess { message: String, code: Option<String> },

    #[error("Migration failed for tenant {tenant_id} (schema '{schema}'): {message}")]
    Tenant {
        tenant_id: String,
        schema: String,
        message: String,
    },

    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: &'static str, seconds: u64 },

    /// Carries the outcome of the batches that did run
    #[error("Migration run deadline exceeded: {processed} tenants processed, {remaining} not started")]
    DeadlineExceeded {
        processed: usize,
        remaining: usize,
        summary: Box<MigrationSummary>,
    },
}

impl MigrationError {
    pub fn database(message: impl Into<String>) -> Self {
        MigrationError::DatabaseAccess {
            message: message.into(),
            code: None,
        }
    }

    /// Attribute this error to one tenant. Already attributed errors pass through.
    pub fn for_tenant(self, tenant_id: &str, schema: &str) -> Self {
        match self {
            MigrationError::Tenant { .. } => self,
            MigrationError::DatabaseAccess { message, .. } => MigrationError::Tenant {
                tenant_id: tenant_id.to_string(),
                schema: schema.to_string(),
                message,
            },
            other => MigrationError::Tenant {
                tenant_id: tenant_id.to_string(),
                schema: schema.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Message recorded in the run summary
    pub fn detail(&self) -> String {
        match self {
            MigrationError::Tenant { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(e: sqlx::Error) -> Self {
        let code = e
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned());
        MigrationError::DatabaseAccess {
            message: e.to_string(),
            code,
        }
    }
}

impl From<TenancyError> for MigrationError {
    fn from(e: TenancyError) -> Self {
        match e {
            TenancyError::Sqlx(source) => source.into(),
            other => MigrationError::database(other.to_string()),
        }
    }
}
