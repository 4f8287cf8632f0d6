pub mod backend;
pub mod definitions;
pub mod error;
pub mod orchestrator;
pub mod postgres;

pub use backend::{ControlSession, MigrationBackend, SchemaMigrator, TenantRecord, TenantRegistry};
pub use definitions::{Migration, LEGACY_TRACKING_TABLE, PUBLIC_MIGRATIONS, TENANT_MIGRATIONS};
pub use error::MigrationError;
pub use orchestrator::{
    FailedTenant, MigrationOptions, MigrationOrchestrator, MigrationPhase, MigrationSummary, MIGRATION_LOCK_NAME,
};
pub use postgres::{PgMigrationBackend, TRACKING_TABLE};
