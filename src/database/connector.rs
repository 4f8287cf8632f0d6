use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{ConnectOptions, Connection, Executor, PgConnection, Postgres};
use std::ops::DerefMut;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

use super::pool::PoolConfig;
use crate::tenancy::{SchemaName, TenancyError};

/// Physical pool of connections whose sessions are pinned to one schema
#[async_trait]
pub trait PoolHandle: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Borrowed connection; dropping it hands the connection back
    type Lease: DerefMut<Target = Self::Connection> + Send + 'static;

    /// Borrow a validated connection, waiting at most the configured acquire timeout.
    /// Must be cancel-safe: a dropped acquire never leaks a connection.
    async fn acquire(&self) -> Result<Self::Lease, TenancyError>;

    /// Close `lease` instead of returning it for reuse
    fn discard(&self, lease: Self::Lease);

    /// Open connections, idle or borrowed
    fn size(&self) -> usize;

    fn num_idle(&self) -> usize;

    /// Refuse new borrowers and close every connection once it is idle
    async fn close(&self);
}

/// Builds the per-schema pools behind the registry
pub trait SchemaConnector: Send + Sync + 'static {
    type Pool: PoolHandle;

    /// Create the pool for `schema`. Opens nothing yet.
    fn create_pool(&self, schema: &SchemaName, config: &PoolConfig) -> Self::Pool;
}

/// Connection type operations run against for connector `C`
pub type ConnectionOf<C> = <<C as SchemaConnector>::Pool as PoolHandle>::Connection;

pub(crate) type LeaseOf<C> = <<C as SchemaConnector>::Pool as PoolHandle>::Lease;

/// PostgreSQL connector: sqlx pools with `search_path` pinned on every new session
#[derive(Debug, Clone)]
pub struct PgSchemaConnector {
    options: PgConnectOptions,
    connect_timeout: Duration,
}

impl PgSchemaConnector {
    pub fn new(options: PgConnectOptions, connect_timeout: Duration) -> Self {
        Self {
            options,
            connect_timeout,
        }
    }

    pub fn from_url(database_url: &str, connect_timeout: Duration) -> Result<Self, TenancyError> {
        let options = PgConnectOptions::from_str(database_url)?;
        Ok(Self::new(options, connect_timeout))
    }

    /// Open a dedicated connection pinned to `schema`, outside of any pool
    pub async fn connect(&self, schema: &SchemaName) -> Result<PgConnection, TenancyError> {
        match self.open(schema).await {
            Ok(conn) => {
                tracing::debug!("Opened dedicated connection for schema: {}", schema);
                Ok(conn)
            }
            Err(e) => {
                tracing::error!("Failed to create connection for schema {}: {}", schema, e);
                Err(match e {
                    TenancyError::Sqlx(source) => TenancyError::Connect {
                        schema: schema.clone(),
                        message: source.to_string(),
                    },
                    other => other,
                })
            }
        }
    }

    async fn open(&self, schema: &SchemaName) -> Result<PgConnection, TenancyError> {
        let mut conn = tokio::time::timeout(self.connect_timeout, self.options.connect())
            .await
            .map_err(|_| TenancyError::Connect {
                schema: schema.clone(),
                message: format!("connect timed out after {}ms", self.connect_timeout.as_millis()),
            })??;

        pin_search_path(&mut conn, &search_path_statement(schema)).await?;
        Ok(conn)
    }
}

fn search_path_statement(schema: &SchemaName) -> String {
    format!("SET search_path TO {}", schema.quoted())
}

// Session-scoped: the connection can never address another tenant's tables
async fn pin_search_path(conn: &mut PgConnection, statement: &str) -> Result<(), sqlx::Error> {
    (&mut *conn).execute(statement).await?;
    sqlx::query("SELECT 1").execute(&mut *conn).await?;
    Ok(())
}

impl SchemaConnector for PgSchemaConnector {
    type Pool = PgSchemaPool;

    fn create_pool(&self, schema: &SchemaName, config: &PoolConfig) -> PgSchemaPool {
        let statement = search_path_statement(schema);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_size as u32)
            .min_connections(config.min_size as u32)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                let statement = statement.clone();
                Box::pin(async move { pin_search_path(conn, &statement).await })
            })
            .connect_lazy_with(self.options.clone());

        tracing::debug!(
            "Configured pool for schema {} (max {}, min {})",
            schema,
            config.max_size,
            config.min_size
        );
        PgSchemaPool {
            schema: schema.clone(),
            pool,
        }
    }
}

/// sqlx pool for one schema
#[derive(Debug, Clone)]
pub struct PgSchemaPool {
    schema: SchemaName,
    pool: PgPool,
}

impl PgSchemaPool {
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PoolHandle for PgSchemaPool {
    type Connection = PgConnection;
    type Lease = PoolConnection<Postgres>;

    async fn acquire(&self) -> Result<PoolConnection<Postgres>, TenancyError> {
        let started = Instant::now();
        self.pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => TenancyError::AcquireTimeout {
                schema: self.schema.clone(),
                waited_ms: started.elapsed().as_millis() as u64,
            },
            sqlx::Error::PoolClosed => TenancyError::PoolClosed(self.schema.clone()),
            other => {
                tracing::error!("Failed to create connection for schema {}: {}", self.schema, other);
                TenancyError::Connect {
                    schema: self.schema.clone(),
                    message: other.to_string(),
                }
            }
        })
    }

    fn discard(&self, lease: PoolConnection<Postgres>) {
        let conn = lease.detach();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let schema = self.schema.clone();
                drop(handle.spawn(async move {
                    if let Err(e) = conn.close().await {
                        tracing::warn!("Error closing connection for schema {}: {}", schema, e);
                    }
                }));
            }
            Err(_) => drop(conn),
        }
    }

    fn size(&self) -> usize {
        self.pool.size() as usize
    }

    fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Database URL with the password masked, for logs
pub fn redact_database_url(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => "<invalid database url>".to_string(),
    }
}
