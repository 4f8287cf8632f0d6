// Per-schema pool bookkeeping on top of the connector's physical pool

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::connector::{ConnectionOf, LeaseOf, PoolHandle, SchemaConnector};
use crate::tenancy::{SchemaName, TenancyError};

/// Sizing and timing for every per-schema pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_size: usize,
    pub min_size: usize,
    /// Longest an acquire may wait, including opening a new connection
    pub acquire_timeout: Duration,
    /// Idle connections older than this are closed
    pub idle_timeout: Duration,
    /// A pool unused for this long with nothing borrowed is evicted
    pub inactivity_timeout: Duration,
    /// How often the eviction sweeper runs
    pub cleanup_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 5,
            min_size: 0,
            acquire_timeout: Duration::from_millis(15_000),
            idle_timeout: Duration::from_millis(60_000),
            inactivity_timeout: Duration::from_millis(300_000),
            cleanup_interval: Duration::from_millis(300_000),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), TenancyError> {
        if self.max_size == 0 {
            return Err(TenancyError::Config("max_size must be greater than 0".into()));
        }
        if self.min_size > self.max_size {
            return Err(TenancyError::Config(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(TenancyError::Config("acquire_timeout must be greater than zero".into()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(TenancyError::Config("cleanup_interval must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Point-in-time view of one pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub schema: String,
    pub borrowed: usize,
    pub idle: usize,
    /// Open connections, idle or borrowed
    pub open: usize,
    pub acquired: u64,
    pub released: u64,
    /// Connections closed instead of returned after a connection-level failure
    pub discarded: u64,
    pub idle_for_ms: u64,
    pub draining: bool,
}

struct PoolState {
    /// Handed out plus reserved by in-flight acquisitions
    borrowed: usize,
    last_used: Instant,
    draining: bool,
    acquired: u64,
    released: u64,
    discarded: u64,
}

struct PoolInner<C: SchemaConnector> {
    schema: SchemaName,
    config: PoolConfig,
    handle: C::Pool,
    state: Mutex<PoolState>,
}

/// Registry entry for one schema: the physical pool plus the borrow and
/// activity bookkeeping eviction relies on. Cloning shares the same pool.
pub struct SchemaPool<C: SchemaConnector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: SchemaConnector> Clone for SchemaPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: SchemaConnector> fmt::Debug for SchemaPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaPool")
            .field("schema", &self.inner.schema)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<C: SchemaConnector> SchemaPool<C> {
    pub fn new(schema: SchemaName, handle: C::Pool, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                schema,
                config,
                handle,
                state: Mutex::new(PoolState {
                    borrowed: 0,
                    last_used: Instant::now(),
                    draining: false,
                    acquired: 0,
                    released: 0,
                    discarded: 0,
                }),
            }),
        }
    }

    pub fn schema(&self) -> &SchemaName {
        &self.inner.schema
    }

    /// Open connections until `min_size` are available
    pub async fn warm(&self) -> Result<(), TenancyError> {
        let min_size = self.inner.config.min_size;
        let mut held = Vec::with_capacity(min_size);
        while self.inner.handle.size() < min_size {
            held.push(self.inner.handle.acquire().await?);
        }
        Ok(())
    }

    /// Borrow a validated connection, waiting up to `acquire_timeout`
    pub async fn acquire(&self) -> Result<PooledConnection<C>, TenancyError> {
        let reservation = self.reserve()?;
        let lease = self.inner.handle.acquire().await.map_err(|e| {
            if let TenancyError::AcquireTimeout { waited_ms, .. } = &e {
                tracing::warn!(
                    "Timed out after {}ms acquiring connection for schema: {}",
                    waited_ms,
                    self.inner.schema
                );
            }
            e
        })?;
        reservation.commit();

        Ok(PooledConnection {
            lease: Some(lease),
            pool: self.clone(),
            broken: false,
        })
    }

    fn reserve(&self) -> Result<Reservation<'_, C>, TenancyError> {
        let mut state = self.inner.state.lock();
        if state.draining {
            return Err(TenancyError::PoolClosed(self.inner.schema.clone()));
        }
        state.borrowed += 1;
        state.last_used = Instant::now();
        Ok(Reservation {
            pool: self,
            committed: false,
        })
    }

    /// Return a borrowed connection. Runs from `Drop`, so it cannot await.
    fn give_back(&self, lease: LeaseOf<C>, broken: bool) {
        if broken {
            self.inner.handle.discard(lease);
        } else {
            drop(lease);
        }

        let mut state = self.inner.state.lock();
        state.borrowed = state.borrowed.saturating_sub(1);
        state.released += 1;
        if broken {
            state.discarded += 1;
        }
        state.last_used = Instant::now();
    }

    /// Record activity without borrowing
    pub fn touch(&self) {
        self.inner.state.lock().last_used = Instant::now();
    }

    pub fn borrowed(&self) -> usize {
        self.inner.state.lock().borrowed
    }

    pub fn idle_count(&self) -> usize {
        self.inner.handle.num_idle()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }

    /// Time since the pool was last borrowed from or returned to
    pub fn idle_for(&self) -> Duration {
        self.inner.state.lock().last_used.elapsed()
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.handle.num_idle();
        let open = self.inner.handle.size();
        let state = self.inner.state.lock();
        PoolStats {
            schema: self.inner.schema.to_string(),
            borrowed: state.borrowed,
            idle,
            open,
            acquired: state.acquired,
            released: state.released,
            discarded: state.discarded,
            idle_for_ms: state.last_used.elapsed().as_millis() as u64,
            draining: state.draining,
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Mark the pool draining if nothing is borrowed and it has been unused for
    /// longer than `inactivity`. Check and mark happen under one lock, so no
    /// acquisition can slip in between.
    pub(crate) fn try_begin_drain(&self, inactivity: Duration) -> bool {
        let mut state = self.inner.state.lock();
        if state.draining {
            return true;
        }
        if state.borrowed == 0 && state.last_used.elapsed() > inactivity {
            state.draining = true;
            return true;
        }
        false
    }

    /// Refuse new borrowers and close the physical pool. Borrowed connections
    /// are closed as they come back.
    pub async fn drain(&self) {
        self.inner.state.lock().draining = true;
        self.inner.handle.close().await;
        tracing::debug!("Drained connection pool for schema: {}", self.inner.schema);
    }
}

/// Slot held by an in-flight acquisition; released unless committed
struct Reservation<'a, C: SchemaConnector> {
    pool: &'a SchemaPool<C>,
    committed: bool,
}

impl<C: SchemaConnector> Reservation<'_, C> {
    fn commit(mut self) {
        self.committed = true;
        self.pool.inner.state.lock().acquired += 1;
    }
}

impl<C: SchemaConnector> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        if !self.committed {
            let mut state = self.pool.inner.state.lock();
            state.borrowed = state.borrowed.saturating_sub(1);
        }
    }
}

/// A connection borrowed from a [`SchemaPool`].
///
/// Goes back to its pool on [`release`](Self::release) or drop, on every exit
/// path. Must not outlive the operation it was acquired for.
pub struct PooledConnection<C: SchemaConnector> {
    lease: Option<LeaseOf<C>>,
    pool: SchemaPool<C>,
    broken: bool,
}

impl<C: SchemaConnector> PooledConnection<C> {
    /// Schema this connection's session is pinned to
    pub fn schema(&self) -> &SchemaName {
        self.pool.schema()
    }

    /// Close instead of reusing when released
    pub fn invalidate(&mut self) {
        self.broken = true;
    }

    pub fn release(self) {
        drop(self);
    }
}

impl<C: SchemaConnector> Deref for PooledConnection<C> {
    type Target = ConnectionOf<C>;

    fn deref(&self) -> &Self::Target {
        self.lease.as_deref().expect("pooled connection used after release")
    }
}

impl<C: SchemaConnector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.lease.as_deref_mut().expect("pooled connection used after release")
    }
}

impl<C: SchemaConnector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("schema", self.schema())
            .field("broken", &self.broken)
            .finish()
    }
}

impl<C: SchemaConnector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.pool.give_back(lease, self.broken);
        }
    }
}
