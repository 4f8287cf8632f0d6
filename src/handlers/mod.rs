// handlers/mod.rs - HTTP surface over the tenancy core
//
// Public routes bind the shared schema; tenant routes resolve `schema-name`
// from the request headers before the handler runs.

use axum::{
    extract::State,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::database::{ConnectionOf, PoolStats, SchemaConnector, SchemaExecutor};
use crate::middleware::{bind_public_schema, resolve_tenant_schema, ApiResponse, ApiResult};
use crate::tenancy::{current_schema, RequestContext, SchemaName, SchemaResolver, TenancyError};

/// Shared handler state
pub struct AppState<C: SchemaConnector> {
    pub executor: SchemaExecutor<C>,
    pub resolver: SchemaResolver,
}

impl<C: SchemaConnector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

impl<C: SchemaConnector> AppState<C> {
    pub fn new(executor: SchemaExecutor<C>, resolver: SchemaResolver) -> Self {
        Self { executor, resolver }
    }
}

pub fn app<C: SchemaConnector>(state: AppState<C>) -> Router {
    let tenant_routes = Router::new()
        .route("/api/context", get(context::<C>))
        .route_layer(from_fn_with_state(state.resolver.clone(), resolve_tenant_schema));

    let public_routes = Router::new()
        .route("/api/public/context", get(context::<C>))
        .route_layer(from_fn(bind_public_schema));

    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health::<C>))
        .route("/api/pools", get(pools::<C>))
        .merge(public_routes)
        // Tenant scoped
        .merge(tenant_routes)
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "Tenant Schema Router",
            "version": version,
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "pools": "/api/pools (public - connection pool statistics)",
                "public_context": "/api/public/context (public schema)",
                "context": "/api/context (tenant - requires schema-name header)",
            }
        }
    }))
}

async fn health<C: SchemaConnector>(State(state): State<AppState<C>>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.executor.registry().health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}

async fn pools<C: SchemaConnector>(State(state): State<AppState<C>>) -> ApiResult<Vec<PoolStats>> {
    Ok(ApiResponse::success(state.executor.registry().stats().await))
}

#[derive(Debug, Serialize)]
struct ContextInfo {
    schema: SchemaName,
    /// Schema the repository layer observed while holding a pinned connection
    observed_schema: SchemaName,
    request_id: Uuid,
    public: bool,
}

fn ambient_schema<T>(_conn: &mut T) -> BoxFuture<'_, Result<SchemaName, TenancyError>> {
    Box::pin(async { current_schema() })
}

async fn context<C: SchemaConnector>(
    State(state): State<AppState<C>>,
    ctx: RequestContext,
) -> ApiResult<ContextInfo> {
    let observed_schema = state
        .executor
        .run_in_current_schema(ambient_schema::<ConnectionOf<C>>)
        .await?;

    Ok(ApiResponse::success(ContextInfo {
        schema: ctx.schema,
        observed_schema,
        request_id: ctx.request_id,
        public: ctx.public,
    }))
}
