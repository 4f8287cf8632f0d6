// Request-scoped schema binding carried across await points

use std::future::Future;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::error::TenancyError;
use super::schema::SchemaName;

tokio::task_local! {
    static CURRENT_SCHEMA: SchemaName;
}

/// Run `fut` with `schema` bound as the current schema.
///
/// The binding is visible to everything `fut` awaits, directly or indirectly, and
/// to nothing else: concurrently running requests each see their own value.
/// Nested calls shadow the outer binding for their own extent.
pub async fn with_schema<F>(schema: SchemaName, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_SCHEMA.scope(schema, fut).await
}

/// The schema bound by the innermost enclosing [`with_schema`].
///
/// Fails with [`TenancyError::NoContext`] outside any scope. Callers must not fall
/// back to a default schema.
pub fn current_schema() -> Result<SchemaName, TenancyError> {
    CURRENT_SCHEMA.try_with(Clone::clone).map_err(|_| {
        tracing::error!("current_schema() called outside of a schema scope");
        TenancyError::NoContext
    })
}

/// Like [`current_schema`] but for code that legitimately runs unscoped
pub fn try_current_schema() -> Option<SchemaName> {
    CURRENT_SCHEMA.try_with(Clone::clone).ok()
}

/// Spawn a task that inherits the caller's schema binding.
///
/// `tokio::spawn` does not carry task-locals into the new task.
pub fn spawn_in_schema<F>(fut: F) -> Result<JoinHandle<F::Output>, TenancyError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let schema = current_schema()?;
    Ok(tokio::spawn(with_schema(schema, fut)))
}

/// Explicit per-request handle, inserted into request extensions by the resolver
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub schema: SchemaName,
    pub request_id: Uuid,
    pub public: bool,
}

impl RequestContext {
    pub fn new(schema: SchemaName, public: bool) -> Self {
        Self {
            schema,
            request_id: Uuid::new_v4(),
            public,
        }
    }

    /// Run `fut` with this context's schema as the ambient binding
    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        with_schema(self.schema.clone(), fut).await
    }
}
