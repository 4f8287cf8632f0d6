// Outgoing side of schema propagation: stamps the ambient schema onto
// requests sent to downstream services

use axum::http::{HeaderValue, Request};
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::tenancy::{try_current_schema, SCHEMA_METADATA_KEY};

/// Wraps an outgoing client so every call carries `schema-name`
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagateSchemaLayer;

impl<S> Layer<S> for PropagateSchemaLayer {
    type Service = PropagateSchema<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PropagateSchema { inner }
    }
}

#[derive(Debug, Clone)]
pub struct PropagateSchema<S> {
    inner: S,
}

impl<S, B> Service<Request<B>> for PropagateSchema<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        // An explicit header set by the caller wins
        if !request.headers().contains_key(SCHEMA_METADATA_KEY) {
            if let Some(schema) = try_current_schema() {
                match HeaderValue::from_str(schema.as_str()) {
                    Ok(value) => {
                        request.headers_mut().insert(SCHEMA_METADATA_KEY, value);
                    }
                    Err(e) => tracing::warn!("Cannot propagate schema {}: {}", schema, e),
                }
            }
        }
        self.inner.call(request)
    }
}
