use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use super::connector::{ConnectionOf, SchemaConnector};
use super::registry::PoolRegistry;
use crate::tenancy::{current_schema, with_schema, SchemaName, TenancyError};

/// Retry budget for [`SchemaExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Wait before the first retry; doubles each retry after that
    pub base_delay: Duration,
    /// Overall limit across every attempt, including backoff
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Runs caller operations on a connection pinned to a schema, with the schema
/// bound as the ambient context for the duration of each attempt
pub struct SchemaExecutor<C: SchemaConnector> {
    registry: Arc<PoolRegistry<C>>,
    policy: RetryPolicy,
}

impl<C: SchemaConnector> Clone for SchemaExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            policy: self.policy.clone(),
        }
    }
}

impl<C: SchemaConnector> SchemaExecutor<C> {
    pub fn new(registry: Arc<PoolRegistry<C>>, policy: RetryPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &Arc<PoolRegistry<C>> {
        &self.registry
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` against `schema`.
    ///
    /// Transient failures (acquire timeouts, lost connections) are retried up
    /// to `max_retries` times with exponential backoff; anything else is
    /// returned after the first attempt. Each attempt borrows its own
    /// connection and gives it back before the next one starts, whatever the
    /// outcome. A connection that failed with a connection-level error is
    /// closed rather than reused. Nothing is retried once the registry has
    /// shut down.
    pub async fn run_in_schema<T, F>(&self, schema: &SchemaName, mut op: F) -> Result<T, TenancyError>
    where
        F: for<'c> FnMut(&'c mut ConnectionOf<C>) -> BoxFuture<'c, Result<T, TenancyError>> + Send,
        T: Send,
    {
        match self.policy.deadline {
            Some(limit) => tokio::time::timeout(limit, self.attempts(schema, &mut op))
                .await
                .map_err(|_| {
                    tracing::warn!(
                        "Operation on schema {} exceeded its {}ms deadline",
                        schema,
                        limit.as_millis()
                    );
                    TenancyError::DeadlineExceeded {
                        schema: schema.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    }
                })?,
            None => self.attempts(schema, &mut op).await,
        }
    }

    /// Run `op` against the schema bound by the enclosing request scope
    pub async fn run_in_current_schema<T, F>(&self, op: F) -> Result<T, TenancyError>
    where
        F: for<'c> FnMut(&'c mut ConnectionOf<C>) -> BoxFuture<'c, Result<T, TenancyError>> + Send,
        T: Send,
    {
        let schema = current_schema()?;
        self.run_in_schema(&schema, op).await
    }

    /// Run `op` against the shared public schema
    pub async fn run_in_public<T, F>(&self, op: F) -> Result<T, TenancyError>
    where
        F: for<'c> FnMut(&'c mut ConnectionOf<C>) -> BoxFuture<'c, Result<T, TenancyError>> + Send,
        T: Send,
    {
        self.run_in_schema(&SchemaName::public(), op).await
    }

    async fn attempts<T, F>(&self, schema: &SchemaName, op: &mut F) -> Result<T, TenancyError>
    where
        F: for<'c> FnMut(&'c mut ConnectionOf<C>) -> BoxFuture<'c, Result<T, TenancyError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match self.attempt(schema, op).await {
                Ok(value) => return Ok(value),
                Err(e)
                    if e.is_transient() && attempt < self.policy.max_retries && !self.registry.is_closed() =>
                {
                    let delay = self.policy.backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "Transient failure on schema {} (retry {}/{} in {}ms): {}",
                        schema,
                        attempt,
                        self.policy.max_retries,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!(
                            "Giving up on schema {} after {} attempts: {}",
                            schema,
                            attempt + 1,
                            e
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn attempt<T, F>(&self, schema: &SchemaName, op: &mut F) -> Result<T, TenancyError>
    where
        F: for<'c> FnMut(&'c mut ConnectionOf<C>) -> BoxFuture<'c, Result<T, TenancyError>> + Send,
        T: Send,
    {
        with_schema(schema.clone(), async {
            let mut conn = self.registry.acquire(schema).await?;
            let result = op(&mut *conn).await;
            if let Err(e) = &result {
                if e.is_connection_loss() {
                    tracing::warn!("Discarding connection for schema {} after: {}", schema, e);
                    conn.invalidate();
                }
            }
            conn.release();
            result
        })
        .await
    }
}
