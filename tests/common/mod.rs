#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tenant_schema_router::database::{PoolConfig, PoolHandle, SchemaConnector};
use tenant_schema_router::migration::{
    ControlSession, Migration, MigrationBackend, MigrationError, SchemaMigrator, TenantRecord, TenantRegistry,
};
use tenant_schema_router::tenancy::{SchemaName, TenancyError};

/// `count` tenants with ids 1..=count and schemas `tenant_00001`..
pub fn tenants(count: usize) -> Vec<TenantRecord> {
    (1..=count)
        .map(|i| TenantRecord::new(i.to_string(), format!("tenant_{:05}", i)))
        .collect()
}

/// Everything the in-memory backend saw during a run
#[derive(Debug, Default)]
pub struct BackendState {
    pub tenants: Vec<TenantRecord>,
    /// Applied migration names per schema
    pub executed: HashMap<String, Vec<String>>,
    pub failing_schemas: HashSet<String>,
    pub lock_held_elsewhere: bool,
    pub fail_enumeration: bool,
    /// Schemas created through the provisioning path
    pub ensured_schemas: Vec<String>,
    pub lock_calls: usize,
    pub unlock_calls: usize,
    pub control_closed: usize,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
    /// (schema, sessions closed when it was opened)
    pub open_order: Vec<(String, usize)>,
}

#[derive(Clone)]
pub struct MockBackend {
    pub state: Arc<Mutex<BackendState>>,
    /// Simulated DDL latency per schema session
    pub work_delay: Duration,
    pub lock_delay: Duration,
}

impl MockBackend {
    pub fn new(tenants: Vec<TenantRecord>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                tenants,
                ..BackendState::default()
            })),
            work_delay: Duration::from_millis(10),
            lock_delay: Duration::ZERO,
        }
    }

    pub fn fail_schema(&self, schema: &str) {
        self.state.lock().failing_schemas.insert(schema.to_string());
    }

    pub fn mark_executed(&self, schema: &str, migrations: &[Migration]) {
        self.state
            .lock()
            .executed
            .entry(schema.to_string())
            .or_default()
            .extend(migrations.iter().map(|m| m.name.to_string()));
    }

    pub fn executed(&self, schema: &str) -> Vec<String> {
        self.state.lock().executed.get(schema).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl MigrationBackend for MockBackend {
    async fn open_control(&self) -> Result<Box<dyn ControlSession>, MigrationError> {
        Ok(Box::new(MockControl {
            state: Arc::clone(&self.state),
            lock_delay: self.lock_delay,
        }))
    }

    async fn open_schema(&self, schema: &SchemaName) -> Result<Box<dyn SchemaMigrator>, MigrationError> {
        let mut state = self.state.lock();
        state.sessions_opened += 1;
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        let closed = state.sessions_closed;
        state.open_order.push((schema.to_string(), closed));

        Ok(Box::new(MockMigrator {
            schema: schema.to_string(),
            state: Arc::clone(&self.state),
            work_delay: self.work_delay,
        }))
    }
}

struct MockControl {
    state: Arc<Mutex<BackendState>>,
    lock_delay: Duration,
}

#[async_trait]
impl TenantRegistry for MockControl {
    async fn list_tenants(&mut self) -> Result<Vec<TenantRecord>, MigrationError> {
        let state = self.state.lock();
        if state.fail_enumeration {
            return Err(MigrationError::database("relation \"tenants\" does not exist"));
        }
        Ok(state.tenants.clone())
    }

    async fn find_tenant(&mut self, id: &str) -> Result<Option<TenantRecord>, MigrationError> {
        Ok(self.state.lock().tenants.iter().find(|t| t.id == id).cloned())
    }
}

#[async_trait]
impl ControlSession for MockControl {
    async fn try_advisory_lock(&mut self, _name: &str) -> Result<bool, MigrationError> {
        if !self.lock_delay.is_zero() {
            tokio::time::sleep(self.lock_delay).await;
        }
        let mut state = self.state.lock();
        state.lock_calls += 1;
        Ok(!state.lock_held_elsewhere)
    }

    async fn advisory_unlock(&mut self, _name: &str) -> Result<bool, MigrationError> {
        self.state.lock().unlock_calls += 1;
        Ok(true)
    }

    async fn close(self: Box<Self>) -> Result<(), MigrationError> {
        self.state.lock().control_closed += 1;
        Ok(())
    }
}

struct MockMigrator {
    schema: String,
    state: Arc<Mutex<BackendState>>,
    work_delay: Duration,
}

#[async_trait]
impl SchemaMigrator for MockMigrator {
    async fn ensure_schema(&mut self) -> Result<(), MigrationError> {
        self.state.lock().ensured_schemas.push(self.schema.clone());
        Ok(())
    }

    async fn ensure_tracking_table(&mut self) -> Result<(), MigrationError> {
        tokio::time::sleep(self.work_delay).await;
        Ok(())
    }

    async fn executed_migrations(&mut self) -> Result<Vec<String>, MigrationError> {
        Ok(self.state.lock().executed.get(&self.schema).cloned().unwrap_or_default())
    }

    async fn apply(&mut self, migration: &Migration) -> Result<(), MigrationError> {
        let mut state = self.state.lock();
        if state.failing_schemas.contains(&self.schema) {
            return Err(MigrationError::database(format!(
                "relation \"users\" already exists in {}",
                self.schema
            )));
        }
        state
            .executed
            .entry(self.schema.clone())
            .or_default()
            .push(migration.name.to_string());
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), MigrationError> {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        state.sessions_closed += 1;
        Ok(())
    }
}

/// Connector whose "connection" is just the schema it was opened for
#[derive(Default)]
pub struct EchoConnector {
    pub opened: Arc<Mutex<Vec<String>>>,
}

impl SchemaConnector for EchoConnector {
    type Pool = EchoPool;

    fn create_pool(&self, schema: &SchemaName, _config: &PoolConfig) -> EchoPool {
        EchoPool {
            schema: schema.clone(),
            opened: Arc::clone(&self.opened),
        }
    }
}

pub struct EchoPool {
    schema: SchemaName,
    opened: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl PoolHandle for EchoPool {
    type Connection = SchemaName;
    type Lease = Box<SchemaName>;

    async fn acquire(&self) -> Result<Box<SchemaName>, TenancyError> {
        self.opened.lock().push(self.schema.to_string());
        Ok(Box::new(self.schema.clone()))
    }

    fn discard(&self, _lease: Box<SchemaName>) {}

    fn size(&self) -> usize {
        0
    }

    fn num_idle(&self) -> usize {
        0
    }

    async fn close(&self) {}
}
