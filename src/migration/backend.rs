use async_trait::async_trait;
use serde::Serialize;

use super::definitions::Migration;
use super::error::MigrationError;
use crate::tenancy::SchemaName;

/// Row of `public.tenants` as seen by the migrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TenantRecord {
    pub id: String,
    pub schema_name: String,
}

impl TenantRecord {
    pub fn new(id: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            schema_name: schema_name.into(),
        }
    }
}

/// Read access to the tenant list
#[async_trait]
pub trait TenantRegistry: Send {
    /// Every tenant, ordered by id
    async fn list_tenants(&mut self) -> Result<Vec<TenantRecord>, MigrationError>;

    async fn find_tenant(&mut self, id: &str) -> Result<Option<TenantRecord>, MigrationError>;
}

/// Session on the public schema that holds the run's advisory lock.
///
/// The lock belongs to the session, so unlock must go through the same session.
#[async_trait]
pub trait ControlSession: TenantRegistry {
    async fn try_advisory_lock(&mut self, name: &str) -> Result<bool, MigrationError>;

    async fn advisory_unlock(&mut self, name: &str) -> Result<bool, MigrationError>;

    async fn close(self: Box<Self>) -> Result<(), MigrationError>;
}

/// Dedicated connection applying migrations to one schema
#[async_trait]
pub trait SchemaMigrator: Send {
    /// Create the schema itself if it does not exist yet
    async fn ensure_schema(&mut self) -> Result<(), MigrationError>;

    /// Create the tracking table if it does not exist yet
    async fn ensure_tracking_table(&mut self) -> Result<(), MigrationError>;

    async fn executed_migrations(&mut self) -> Result<Vec<String>, MigrationError>;

    /// Apply one migration atomically and record it
    async fn apply(&mut self, migration: &Migration) -> Result<(), MigrationError>;

    async fn close(self: Box<Self>) -> Result<(), MigrationError>;
}

/// Opens the sessions a migration run needs
#[async_trait]
pub trait MigrationBackend: Send + Sync {
    async fn open_control(&self) -> Result<Box<dyn ControlSession>, MigrationError>;

    async fn open_schema(&self, schema: &SchemaName) -> Result<Box<dyn SchemaMigrator>, MigrationError>;
}
