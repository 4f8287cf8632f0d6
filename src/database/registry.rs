use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use super::connector::SchemaConnector;
use super::pool::{PoolConfig, PoolStats, PooledConnection, SchemaPool};
use crate::tenancy::{SchemaName, TenancyError};

struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Lazily created connection pools, one per schema
pub struct PoolRegistry<C: SchemaConnector> {
    connector: Arc<C>,
    config: PoolConfig,
    pools: RwLock<HashMap<SchemaName, SchemaPool<C>>>,
    sweeper: Mutex<Option<Sweeper>>,
    closed: AtomicBool,
}

impl<C: SchemaConnector> PoolRegistry<C> {
    pub fn new(connector: C, config: PoolConfig) -> Result<Self, TenancyError> {
        config.validate()?;
        Ok(Self {
            connector: Arc::new(connector),
            config,
            pools: RwLock::new(HashMap::new()),
            sweeper: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Pool for `schema`, created on first use.
    ///
    /// Concurrent first requests for the same schema share one pool. A pool
    /// already draining for eviction is replaced rather than handed out.
    pub async fn get_or_create_pool(&self, schema: &SchemaName) -> Result<SchemaPool<C>, TenancyError> {
        if self.is_closed() {
            return Err(TenancyError::PoolClosed(schema.clone()));
        }

        // Fast path: try read lock
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(schema) {
                if !pool.is_draining() {
                    pool.touch();
                    return Ok(pool.clone());
                }
            }
        }

        let (pool, created) = {
            let mut pools = self.pools.write().await;
            match pools.get(schema) {
                Some(pool) if !pool.is_draining() => {
                    pool.touch();
                    (pool.clone(), false)
                }
                _ => {
                    let handle = self.connector.create_pool(schema, &self.config);
                    let pool = SchemaPool::new(schema.clone(), handle, self.config.clone());
                    pools.insert(schema.clone(), pool.clone());
                    (pool, true)
                }
            }
        };

        if created {
            info!("Created connection pool for schema: {}", schema);
            if let Err(e) = pool.warm().await {
                tracing::error!("Failed to warm connection pool for schema {}: {}", schema, e);
                self.forget(&pool).await;
                pool.drain().await;
                return Err(e);
            }
        }

        Ok(pool)
    }

    async fn forget(&self, pool: &SchemaPool<C>) {
        let mut pools = self.pools.write().await;
        if pools.get(pool.schema()).is_some_and(|p| p.ptr_eq(pool)) {
            pools.remove(pool.schema());
        }
    }

    /// Borrow a connection pinned to `schema`
    pub async fn acquire(&self, schema: &SchemaName) -> Result<PooledConnection<C>, TenancyError> {
        let pool = self.get_or_create_pool(schema).await?;
        match pool.acquire().await {
            // Lost a race with eviction; the next lookup builds a fresh pool
            Err(TenancyError::PoolClosed(_)) if !self.is_closed() => {
                tracing::debug!("Pool for schema {} was evicted during acquire, retrying", schema);
                self.get_or_create_pool(schema).await?.acquire().await
            }
            other => other,
        }
    }

    pub fn release(&self, conn: PooledConnection<C>) {
        conn.release();
    }

    /// Close pools unused past `inactivity_timeout` with nothing borrowed.
    /// Returns the evicted schemas.
    pub async fn evict_idle(&self) -> Vec<SchemaName> {
        let inactivity = self.config.inactivity_timeout;

        let evicted: Vec<SchemaPool<C>> = {
            let mut pools = self.pools.write().await;
            let mut names = Vec::new();
            for (schema, pool) in pools.iter() {
                if pool.try_begin_drain(inactivity) {
                    names.push(schema.clone());
                }
            }
            names.iter().filter_map(|n| pools.remove(n)).collect()
        };

        for pool in &evicted {
            info!("Evicting idle connection pool for schema: {}", pool.schema());
            pool.drain().await;
        }

        evicted.iter().map(|p| p.schema().clone()).collect()
    }

    /// Run [`evict_idle`](Self::evict_idle) every `cleanup_interval` until
    /// [`shutdown`](Self::shutdown) or the registry is dropped
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }

        let (shutdown, mut stop) = watch::channel(false);
        let weak = Arc::downgrade(self);
        let interval = self.config.cleanup_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.changed() => break,
                }
                let Some(registry) = weak.upgrade() else {
                    break;
                };
                let evicted = registry.evict_idle().await;
                if !evicted.is_empty() {
                    tracing::debug!("Sweeper evicted {} pools", evicted.len());
                }
            }
        });

        info!("Started pool sweeper every {}ms", interval.as_millis());
        *slot = Some(Sweeper { shutdown, handle });
    }

    /// Stop the sweeper and close every pool. New acquisitions fail afterwards.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);

        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.shutdown.send(true);
            if let Err(e) = sweeper.handle.await {
                tracing::warn!("Pool sweeper ended abnormally: {}", e);
            }
        }

        let pools: Vec<SchemaPool<C>> = {
            let mut pools = self.pools.write().await;
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in &pools {
            pool.drain().await;
        }
        info!("Closed {} connection pools", pools.len());
    }

    pub async fn stats(&self) -> Vec<PoolStats> {
        let pools = self.pools.read().await;
        let mut stats: Vec<PoolStats> = pools.values().map(SchemaPool::stats).collect();
        stats.sort_by(|a, b| a.schema.cmp(&b.schema));
        stats
    }

    pub async fn contains(&self, schema: &SchemaName) -> bool {
        self.pools.read().await.contains_key(schema)
    }

    pub async fn len(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Borrow and return a validated connection on the public schema
    pub async fn health_check(&self) -> Result<(), TenancyError> {
        let conn = self.acquire(&SchemaName::public()).await?;
        conn.release();
        Ok(())
    }
}
