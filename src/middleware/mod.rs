pub mod propagate;
pub mod response;
pub mod tenant_schema;

pub use propagate::{PropagateSchema, PropagateSchemaLayer};
pub use response::{ApiResponse, ApiResult};
pub use tenant_schema::{bind_public_schema, resolve_tenant_schema};
