pub mod connector;
pub mod executor;
pub mod pool;
pub mod registry;

pub use connector::{redact_database_url, ConnectionOf, PgSchemaConnector, PgSchemaPool, PoolHandle, SchemaConnector};
pub use executor::{RetryPolicy, SchemaExecutor};
pub use pool::{PoolConfig, PoolStats, PooledConnection, SchemaPool};
pub use registry::PoolRegistry;
