use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use super::backend::{ControlSession, MigrationBackend, SchemaMigrator, TenantRecord};
use super::definitions::{self, Migration, PUBLIC_MIGRATIONS, TENANT_MIGRATIONS};
use super::error::MigrationError;
use crate::tenancy::SchemaName;

/// Advisory lock serialising migration runs across processes
pub const MIGRATION_LOCK_NAME: &str = "tenant_migration_lock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Tenants migrated concurrently; 0 is treated as 1
    pub batch_size: usize,
    /// Bound on opening the control session and taking the lock
    pub lock_timeout: Duration,
    /// Suppress progress logs. Errors are always logged.
    pub silent: bool,
    pub specific_tenant_id: Option<String>,
    /// Apply public schema migrations before the tenants
    pub include_public: bool,
    /// Stop starting new batches once this much time has passed
    pub deadline: Option<Duration>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: 5,
            lock_timeout: Duration::from_secs(300),
            silent: false,
            specific_tenant_id: None,
            include_public: false,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTenant {
    pub id: String,
    pub schema: String,
    pub error: String,
}

/// Outcome of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub total_tenants: usize,
    /// Tenants with at least one migration applied
    pub successful: usize,
    /// Tenants that were already up to date
    pub skipped: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
    pub failed_tenants: Vec<FailedTenant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationPhase {
    Idle,
    LockAcquired,
    Enumerating,
    BatchProcessing,
    Completed,
    Failed,
}

/// Applies pending migrations to every tenant schema in bounded batches,
/// holding an advisory lock for the whole run
pub struct MigrationOrchestrator<B: MigrationBackend> {
    backend: B,
    options: MigrationOptions,
    phase: Mutex<MigrationPhase>,
}

impl<B: MigrationBackend> MigrationOrchestrator<B> {
    pub fn new(backend: B, options: MigrationOptions) -> Self {
        Self {
            backend,
            options,
            phase: Mutex::new(MigrationPhase::Idle),
        }
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn phase(&self) -> MigrationPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: MigrationPhase) {
        *self.phase.lock() = phase;
    }

    fn progress(&self, message: fmt::Arguments<'_>) {
        if !self.options.silent {
            tracing::info!("{}", message);
        }
    }

    /// Run the migration across all tenants (or the one selected tenant).
    ///
    /// Individual tenant failures are recorded in the summary and never abort
    /// the run. Failing to lock or enumerate aborts it.
    pub async fn run(&self) -> Result<MigrationSummary, MigrationError> {
        let started = Instant::now();
        self.set_phase(MigrationPhase::Idle);
        self.progress(format_args!(
            "=== Tenant migration started (batch size {}, tenant {}) ===",
            self.options.batch_size.max(1),
            self.options.specific_tenant_id.as_deref().unwrap_or("all")
        ));

        let result = self.run_with_control(started).await;
        match &result {
            Ok(summary) => {
                self.set_phase(MigrationPhase::Completed);
                self.progress(format_args!(
                    "=== Tenant migration completed in {}ms: {} successful, {} skipped, {} failed ===",
                    summary.total_duration_ms, summary.successful, summary.skipped, summary.failed
                ));
                if summary.failed > 0 {
                    tracing::warn!("{} tenant migrations failed", summary.failed);
                }
            }
            Err(e) => {
                self.set_phase(MigrationPhase::Failed);
                tracing::error!("Fatal error during migration process: {}", e);
            }
        }
        result
    }

    async fn run_with_control(&self, started: Instant) -> Result<MigrationSummary, MigrationError> {
        let mut session = self
            .bounded("Opening control session", self.backend.open_control())
            .await?;

        let acquired = self
            .bounded("Acquiring migration lock", session.try_advisory_lock(MIGRATION_LOCK_NAME))
            .await;
        let locked = matches!(acquired, Ok(true));

        let result = match acquired {
            Ok(true) => {
                self.set_phase(MigrationPhase::LockAcquired);
                self.progress(format_args!("Acquired migration lock"));
                self.run_locked(session.as_mut(), started).await
            }
            Ok(false) => Err(MigrationError::Lock(MIGRATION_LOCK_NAME.to_string())),
            Err(MigrationError::DatabaseAccess { message, code }) => Err(MigrationError::DatabaseAccess {
                message: format!("Failed to acquire migration lock: {}", message),
                code,
            }),
            Err(e) => Err(e),
        };

        if locked {
            match session.advisory_unlock(MIGRATION_LOCK_NAME).await {
                Ok(true) => self.progress(format_args!("Released migration lock")),
                Ok(false) => tracing::warn!("Migration lock was not held at release"),
                Err(e) => tracing::error!("Failed to release migration lock: {}", e),
            }
        }
        if let Err(e) = session.close().await {
            tracing::error!("Failed to close control session: {}", e);
        }

        result
    }

    async fn bounded<T, F>(&self, stage: &'static str, fut: F) -> Result<T, MigrationError>
    where
        F: Future<Output = Result<T, MigrationError>>,
    {
        let limit = self.options.lock_timeout;
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| MigrationError::Timeout {
                stage,
                seconds: limit.as_secs(),
            })?
    }

    async fn run_locked(
        &self,
        session: &mut dyn ControlSession,
        started: Instant,
    ) -> Result<MigrationSummary, MigrationError> {
        if self.options.include_public {
            self.progress(format_args!("Migrating public schema"));
            self.apply_pending(&SchemaName::public(), PUBLIC_MIGRATIONS, false).await?;
        }

        self.set_phase(MigrationPhase::Enumerating);
        let tenants: Vec<TenantRecord> = match &self.options.specific_tenant_id {
            Some(id) => session.find_tenant(id).await?.into_iter().collect(),
            None => session.list_tenants().await?,
        };
        self.progress(format_args!("Found {} tenants in public.tenants", tenants.len()));

        let mut summary = MigrationSummary {
            total_tenants: tenants.len(),
            ..MigrationSummary::default()
        };
        if tenants.is_empty() {
            self.progress(format_args!("No tenant schemas found"));
            summary.total_duration_ms = started.elapsed().as_millis() as u64;
            return Ok(summary);
        }

        self.set_phase(MigrationPhase::BatchProcessing);
        let batch_size = self.options.batch_size.max(1);
        let total_batches = tenants.len().div_ceil(batch_size);

        for (index, batch) in tenants.chunks(batch_size).enumerate() {
            if let Some(deadline) = self.options.deadline {
                if started.elapsed() >= deadline {
                    let processed = index * batch_size;
                    summary.total_duration_ms = started.elapsed().as_millis() as u64;
                    tracing::warn!(
                        "Deadline of {}ms reached after {} tenants ({} failed)",
                        deadline.as_millis(),
                        processed,
                        summary.failed
                    );
                    return Err(MigrationError::DeadlineExceeded {
                        processed,
                        remaining: tenants.len() - processed,
                        summary: Box::new(summary),
                    });
                }
            }

            self.progress(format_args!(
                "Processing batch {}/{} ({} tenant schemas)",
                index + 1,
                total_batches,
                batch.len()
            ));

            let results = join_all(batch.iter().map(|tenant| self.migrate_tenant(tenant))).await;

            for (tenant, result) in batch.iter().zip(results) {
                match result {
                    Ok(applied) if !applied.is_empty() => {
                        summary.successful += 1;
                        self.progress(format_args!(
                            "Applied {} migrations to {}: {}",
                            applied.len(),
                            tenant.schema_name,
                            applied.join(", ")
                        ));
                    }
                    Ok(_) => {
                        summary.skipped += 1;
                        self.progress(format_args!("{} was already up to date", tenant.schema_name));
                    }
                    Err(e) => {
                        summary.failed += 1;
                        tracing::error!(
                            "Failed to migrate {} (tenant {}): {}",
                            tenant.schema_name,
                            tenant.id,
                            e
                        );
                        summary.failed_tenants.push(FailedTenant {
                            id: tenant.id.clone(),
                            schema: tenant.schema_name.clone(),
                            error: e.detail(),
                        });
                    }
                }
            }
        }

        summary.total_duration_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }

    async fn migrate_tenant(&self, tenant: &TenantRecord) -> Result<Vec<&'static str>, MigrationError> {
        let schema = SchemaName::parse(&tenant.schema_name).map_err(|reason| MigrationError::Tenant {
            tenant_id: tenant.id.clone(),
            schema: tenant.schema_name.clone(),
            message: format!("Invalid schema name: {}", reason),
        })?;

        self.apply_pending(&schema, TENANT_MIGRATIONS, false)
            .await
            .map_err(|e| e.for_tenant(&tenant.id, &tenant.schema_name))
    }

    /// Bring one schema up to date, outside of any batch run.
    ///
    /// Used when provisioning a new tenant: the schema is created if missing,
    /// then migrated. The public schema gets the public migrations, every
    /// other schema the tenant migrations.
    pub async fn migrate_schema(&self, schema: &SchemaName) -> Result<Vec<&'static str>, MigrationError> {
        let defined = if schema.is_public() {
            PUBLIC_MIGRATIONS
        } else {
            TENANT_MIGRATIONS
        };

        match self.apply_pending(schema, defined, true).await {
            Ok(applied) => {
                if applied.is_empty() {
                    tracing::info!("No pending migrations for {}", schema);
                } else {
                    tracing::info!("Applied {} migrations to {}", applied.len(), schema);
                }
                Ok(applied)
            }
            Err(e) => {
                tracing::error!("Failed to apply migrations to {}: {}", schema, e);
                Err(e)
            }
        }
    }

    async fn apply_pending(
        &self,
        schema: &SchemaName,
        defined: &'static [Migration],
        create_schema: bool,
    ) -> Result<Vec<&'static str>, MigrationError> {
        let mut migrator = self.backend.open_schema(schema).await?;
        let result = self.apply_with(migrator.as_mut(), schema, defined, create_schema).await;
        if let Err(e) = migrator.close().await {
            tracing::warn!("Failed to close migration connection for {}: {}", schema, e);
        }
        result
    }

    async fn apply_with(
        &self,
        migrator: &mut dyn SchemaMigrator,
        schema: &SchemaName,
        defined: &'static [Migration],
        create_schema: bool,
    ) -> Result<Vec<&'static str>, MigrationError> {
        if create_schema {
            migrator.ensure_schema().await?;
        }
        migrator.ensure_tracking_table().await?;
        let executed = migrator.executed_migrations().await?;
        let pending = definitions::pending(defined, &executed);

        if !self.options.silent {
            tracing::debug!(
                "Schema {}: {} executed, {} pending migrations",
                schema,
                executed.len(),
                pending.len()
            );
        }

        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            migrator.apply(migration).await?;
            applied.push(migration.name);
        }
        Ok(applied)
    }
}
