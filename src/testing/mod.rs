use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::database::{PoolConfig, PoolHandle, SchemaConnector};
use crate::tenancy::{SchemaName, TenancyError};

/// In-memory connection handed out by [`MockPool`]
#[derive(Debug)]
pub struct MockConnection {
    pub id: u64,
    pub schema: SchemaName,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    connects: usize,
    fail_next: usize,
    failing_schemas: HashSet<String>,
    invalid: HashSet<u64>,
    closed: Vec<u64>,
    validate_delay: Duration,
}

/// Connector double that records every connect and close across all its pools
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` connect attempts fail
    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().fail_next = n;
    }

    /// Every connect to `schema` fails until further notice
    pub fn fail_schema(&self, schema: &str) {
        self.state.lock().failing_schemas.insert(schema.to_string());
    }

    /// Connection `id` fails its next validation
    pub fn invalidate(&self, id: u64) {
        self.state.lock().invalid.insert(id);
    }

    /// Time each idle connection spends being validated before reuse
    pub fn set_validate_delay(&self, delay: Duration) {
        self.state.lock().validate_delay = delay;
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn closed(&self) -> Vec<u64> {
        self.state.lock().closed.clone()
    }
}

impl SchemaConnector for MockConnector {
    type Pool = MockPool;

    fn create_pool(&self, schema: &SchemaName, config: &PoolConfig) -> MockPool {
        MockPool {
            schema: schema.clone(),
            acquire_timeout: config.acquire_timeout,
            permits: Arc::new(Semaphore::new(config.max_size)),
            slots: Arc::new(Mutex::new(Slots::default())),
            state: Arc::clone(&self.state),
        }
    }
}

#[derive(Default)]
struct Slots {
    idle: Vec<MockConnection>,
    open: usize,
    closed: bool,
}

/// Bounded pool with validate-on-checkout, shaped like the sqlx pool it stands in for
#[derive(Clone)]
pub struct MockPool {
    schema: SchemaName,
    acquire_timeout: Duration,
    permits: Arc<Semaphore>,
    slots: Arc<Mutex<Slots>>,
    state: Arc<Mutex<MockState>>,
}

impl MockPool {
    async fn checkout(&self) -> Result<MockLease, TenancyError> {
        if self.slots.lock().closed {
            return Err(TenancyError::PoolClosed(self.schema.clone()));
        }
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TenancyError::PoolClosed(self.schema.clone()))?;

        loop {
            let Some(conn) = self.slots.lock().idle.pop() else {
                break;
            };
            let mut validating = Validating {
                conn: Some(conn),
                pool: self,
            };

            let delay = self.state.lock().validate_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !validating.is_valid() {
                continue;
            }
            if let Some(conn) = validating.conn.take() {
                return Ok(self.lease(conn, permit));
            }
        }

        let conn = self.connect()?;
        self.slots.lock().open += 1;
        Ok(self.lease(conn, permit))
    }

    fn connect(&self) -> Result<MockConnection, TenancyError> {
        let mut state = self.state.lock();
        if state.fail_next > 0 || state.failing_schemas.contains(self.schema.as_str()) {
            state.fail_next = state.fail_next.saturating_sub(1);
            return Err(TenancyError::Connect {
                schema: self.schema.clone(),
                message: "connection refused".into(),
            });
        }
        state.next_id += 1;
        state.connects += 1;
        Ok(MockConnection {
            id: state.next_id,
            schema: self.schema.clone(),
        })
    }

    fn lease(&self, conn: MockConnection, permit: OwnedSemaphorePermit) -> MockLease {
        MockLease {
            conn: Some(conn),
            pool: self.clone(),
            _permit: permit,
        }
    }

    fn close_connection(&self, conn: MockConnection) {
        self.state.lock().closed.push(conn.id);
        let mut slots = self.slots.lock();
        slots.open = slots.open.saturating_sub(1);
    }

    fn put_back(&self, conn: MockConnection) {
        let mut slots = self.slots.lock();
        if slots.closed {
            drop(slots);
            self.close_connection(conn);
        } else {
            slots.idle.push(conn);
        }
    }
}

/// Idle connection taken out for validation; closed if the check never finishes
struct Validating<'a> {
    conn: Option<MockConnection>,
    pool: &'a MockPool,
}

impl Validating<'_> {
    fn is_valid(&self) -> bool {
        match &self.conn {
            Some(conn) => !self.pool.state.lock().invalid.contains(&conn.id),
            None => false,
        }
    }
}

impl Drop for Validating<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.close_connection(conn);
        }
    }
}

#[async_trait]
impl PoolHandle for MockPool {
    type Connection = MockConnection;
    type Lease = MockLease;

    async fn acquire(&self) -> Result<MockLease, TenancyError> {
        let started = Instant::now();
        match tokio::time::timeout(self.acquire_timeout, self.checkout()).await {
            Ok(result) => result,
            Err(_) => Err(TenancyError::AcquireTimeout {
                schema: self.schema.clone(),
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    fn discard(&self, mut lease: MockLease) {
        if let Some(conn) = lease.conn.take() {
            self.close_connection(conn);
        }
    }

    fn size(&self) -> usize {
        self.slots.lock().open
    }

    fn num_idle(&self) -> usize {
        self.slots.lock().idle.len()
    }

    async fn close(&self) {
        let idle = {
            let mut slots = self.slots.lock();
            slots.closed = true;
            std::mem::take(&mut slots.idle)
        };
        self.permits.close();
        for conn in idle {
            self.close_connection(conn);
        }
    }
}

/// Borrowed [`MockConnection`]; returns to its pool on drop
pub struct MockLease {
    conn: Option<MockConnection>,
    pool: MockPool,
    _permit: OwnedSemaphorePermit,
}

impl Deref for MockLease {
    type Target = MockConnection;

    fn deref(&self) -> &MockConnection {
        self.conn.as_ref().expect("lease already returned")
    }
}

impl DerefMut for MockLease {
    fn deref_mut(&mut self) -> &mut MockConnection {
        self.conn.as_mut().expect("lease already returned")
    }
}

impl Drop for MockLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }
}
