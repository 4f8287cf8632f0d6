use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::tenancy::{OperationScope, RequestContext, SchemaName, SchemaResolver, TenancyError};

/// Middleware that resolves the tenant schema from request headers and binds it
/// for the rest of the request.
///
/// Rejects the request with 400 before any handler (or database access) runs
/// when the schema is missing or invalid.
pub async fn resolve_tenant_schema(
    State(resolver): State<SchemaResolver>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let schema = resolver.resolve(request.headers(), OperationScope::Tenant)?;
    let context = RequestContext::new(schema, false);

    tracing::debug!(
        "Request {} {} bound to schema {} ({})",
        request.method(),
        request.uri().path(),
        context.schema,
        context.request_id
    );

    request.extensions_mut().insert(context.clone());
    Ok(context.scope(next.run(request)).await)
}

/// Middleware for routes that operate on shared data; binds the public schema
/// without looking at the request
pub async fn bind_public_schema(mut request: Request, next: Next) -> Response {
    let context = RequestContext::new(SchemaName::public(), true);
    request.extensions_mut().insert(context.clone());
    context.scope(next.run(request)).await
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestContext>().cloned().ok_or_else(|| {
            tracing::error!("RequestContext requested on a route without schema middleware");
            TenancyError::NoContext.into()
        })
    }
}
