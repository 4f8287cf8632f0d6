pub mod context;
pub mod error;
pub mod resolver;
pub mod schema;

pub use context::{current_schema, spawn_in_schema, try_current_schema, with_schema, RequestContext};
pub use error::TenancyError;
pub use resolver::{MetadataValue, OperationScope, RequestMetadata, SchemaResolver, SCHEMA_METADATA_KEY};
pub use schema::{validate, SchemaName, SchemaRejection, PUBLIC_SCHEMA};
