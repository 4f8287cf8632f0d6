use async_trait::async_trait;
use sqlx::{Connection, Executor, PgConnection};

use super::backend::{ControlSession, MigrationBackend, SchemaMigrator, TenantRecord, TenantRegistry};
use super::definitions::{normalize_legacy_name, Migration, LEGACY_TRACKING_TABLE};
use super::error::MigrationError;
use crate::database::PgSchemaConnector;
use crate::tenancy::SchemaName;

/// Table recording applied migrations, one per schema
pub const TRACKING_TABLE: &str = "schema_migrations";

/// PostgreSQL backend. Every session is a dedicated connection, never a pooled one.
#[derive(Debug, Clone)]
pub struct PgMigrationBackend {
    connector: PgSchemaConnector,
}

impl PgMigrationBackend {
    pub fn new(connector: PgSchemaConnector) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl MigrationBackend for PgMigrationBackend {
    async fn open_control(&self) -> Result<Box<dyn ControlSession>, MigrationError> {
        let conn = self.connector.connect(&SchemaName::public()).await?;
        Ok(Box::new(PgControlSession { conn }))
    }

    async fn open_schema(&self, schema: &SchemaName) -> Result<Box<dyn SchemaMigrator>, MigrationError> {
        let conn = self.connector.connect(schema).await?;
        Ok(Box::new(PgSchemaMigrator {
            conn,
            schema: schema.clone(),
        }))
    }
}

struct PgControlSession {
    conn: PgConnection,
}

#[async_trait]
impl TenantRegistry for PgControlSession {
    async fn list_tenants(&mut self) -> Result<Vec<TenantRecord>, MigrationError> {
        let tenants = sqlx::query_as::<_, TenantRecord>(
            r#"SELECT "id"::text AS id, "schema_name" FROM "public"."tenants" ORDER BY "id""#,
        )
        .fetch_all(&mut self.conn)
        .await?;
        Ok(tenants)
    }

    async fn find_tenant(&mut self, id: &str) -> Result<Option<TenantRecord>, MigrationError> {
        let tenant = sqlx::query_as::<_, TenantRecord>(
            r#"SELECT "id"::text AS id, "schema_name" FROM "public"."tenants" WHERE "id"::text = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut self.conn)
        .await?;
        Ok(tenant)
    }
}

#[async_trait]
impl ControlSession for PgControlSession {
    async fn try_advisory_lock(&mut self, name: &str) -> Result<bool, MigrationError> {
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock(hashtext($1))")
            .bind(name)
            .fetch_one(&mut self.conn)
            .await?;
        Ok(acquired)
    }

    async fn advisory_unlock(&mut self, name: &str) -> Result<bool, MigrationError> {
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(name)
            .fetch_one(&mut self.conn)
            .await?;
        Ok(released)
    }

    async fn close(self: Box<Self>) -> Result<(), MigrationError> {
        self.conn.close().await?;
        Ok(())
    }
}

struct PgSchemaMigrator {
    conn: PgConnection,
    schema: SchemaName,
}

#[async_trait]
impl SchemaMigrator for PgSchemaMigrator {
    async fn ensure_schema(&mut self) -> Result<(), MigrationError> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema.quoted());
        self.conn.execute(sql.as_str()).await.map_err(|e| {
            tracing::error!("Failed to create schema {}: {}", self.schema, e);
            MigrationError::from(e)
        })?;
        tracing::info!("Schema created: {}", self.schema);
        Ok(())
    }

    async fn ensure_tracking_table(&mut self) -> Result<(), MigrationError> {
        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS {}."{}" (
                "id" SERIAL PRIMARY KEY,
                "name" VARCHAR(255) NOT NULL UNIQUE,
                "executed_at" TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"#,
            self.schema.quoted(),
            TRACKING_TABLE
        );
        self.conn.execute(sql.as_str()).await.map_err(|e| {
            tracing::error!("Failed to create migrations table in {}: {}", self.schema, e);
            MigrationError::from(e)
        })?;
        Ok(())
    }

    async fn executed_migrations(&mut self) -> Result<Vec<String>, MigrationError> {
        let sql = format!(
            r#"SELECT "name" FROM {}."{}" ORDER BY "name""#,
            self.schema.quoted(),
            TRACKING_TABLE
        );
        let mut names = sqlx::query_scalar::<_, String>(&sql).fetch_all(&mut self.conn).await?;

        // Rows recorded under the legacy table still count as applied
        let legacy = format!(r#"{}."{}""#, self.schema.quoted(), LEGACY_TRACKING_TABLE);
        let has_legacy = sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(&legacy)
            .fetch_one(&mut self.conn)
            .await?;
        if has_legacy {
            let sql = format!(r#"SELECT "name" FROM {} WHERE "name" IS NOT NULL"#, legacy);
            let recorded = sqlx::query_scalar::<_, String>(&sql).fetch_all(&mut self.conn).await?;
            tracing::debug!("Read {} legacy migration rows in {}", recorded.len(), self.schema);
            names.extend(recorded.iter().map(|name| normalize_legacy_name(name).to_string()));
            names.sort();
            names.dedup();
        }
        Ok(names)
    }

    async fn apply(&mut self, migration: &Migration) -> Result<(), MigrationError> {
        let record = format!(
            r#"INSERT INTO {}."{}" ("name") VALUES ($1)"#,
            self.schema.quoted(),
            TRACKING_TABLE
        );

        let mut tx = self.conn.begin().await?;
        for statement in migration.statements {
            (&mut *tx).execute(*statement).await?;
        }
        sqlx::query(&record).bind(migration.name).execute(&mut *tx).await?;
        tx.commit().await?;

        tracing::debug!("Applied migration {} to {}", migration.name, self.schema);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), MigrationError> {
        self.conn.close().await?;
        Ok(())
    }
}
