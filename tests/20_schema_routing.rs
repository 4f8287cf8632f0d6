mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

use common::EchoConnector;
use tenant_schema_router::database::{PoolConfig, PoolRegistry, RetryPolicy, SchemaExecutor};
use tenant_schema_router::handlers::{app, AppState};
use tenant_schema_router::tenancy::{
    current_schema, spawn_in_schema, with_schema, MetadataValue, OperationScope, SchemaName, SchemaResolver,
    TenancyError, SCHEMA_METADATA_KEY,
};

fn executor() -> SchemaExecutor<EchoConnector> {
    let registry = PoolRegistry::new(EchoConnector::default(), PoolConfig::default()).unwrap();
    SchemaExecutor::new(Arc::new(registry), RetryPolicy::default())
}

/// Schema the connection was opened for, and the ambient schema after a yield
fn pinned(conn: &mut SchemaName) -> BoxFuture<'_, Result<(SchemaName, SchemaName), TenancyError>> {
    Box::pin(async move {
        tokio::task::yield_now().await;
        Ok((conn.clone(), current_schema()?))
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_see_each_others_schema() {
    let executor = executor();
    let router = app(AppState::new(executor.clone(), SchemaResolver::default()));

    let requests = (0..50).map(|i| {
        let router = router.clone();
        let schema = format!("tenant_{:03}", i % 10);
        async move {
            let request = Request::builder()
                .uri("/api/context")
                .header(SCHEMA_METADATA_KEY, &schema)
                .body(Body::empty())
                .unwrap();
            let response = router.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body: Value = serde_json::from_slice(&bytes).unwrap();
            (schema, body)
        }
    });

    for (schema, body) in join_all(requests).await {
        assert_eq!(body["data"]["schema"], schema.as_str());
        assert_eq!(body["data"]["observed_schema"], schema.as_str());
    }

    // One pool per distinct schema
    assert_eq!(executor.registry().len().await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connections_match_the_ambient_schema() {
    let executor = executor();

    let runs = (0..40).map(|i| {
        let executor = executor.clone();
        let schema = SchemaName::parse(&format!("tenant_{:03}", i % 8)).unwrap();
        async move {
            let (connection, ambient) = with_schema(schema.clone(), executor.run_in_current_schema(pinned))
                .await
                .unwrap();
            assert_eq!(connection, schema);
            assert_eq!(ambient, schema);
        }
    });
    join_all(runs).await;

    let opened = executor.registry().connector().opened.lock().clone();
    assert!(opened.iter().all(|s| s.starts_with("tenant_")));
}

#[tokio::test]
async fn public_operations_use_the_public_schema() {
    let executor = executor();
    let (connection, _) = with_schema(SchemaName::public(), executor.run_in_public(pinned))
        .await
        .unwrap();
    assert!(connection.is_public());
}

#[tokio::test]
async fn unscoped_work_fails_instead_of_defaulting() {
    let executor = executor();
    let err = executor.run_in_current_schema(pinned).await.unwrap_err();
    assert!(matches!(err, TenancyError::NoContext));
    assert!(executor.registry().is_empty().await);
}

#[tokio::test]
async fn spawned_tasks_inherit_the_binding() {
    let schema = SchemaName::parse("tenant_spawn").unwrap();
    let handle = with_schema(schema.clone(), async { spawn_in_schema(async { current_schema() }) })
        .await
        .unwrap();
    assert_eq!(handle.await.unwrap().unwrap(), schema);

    assert!(matches!(
        spawn_in_schema(async {}),
        Err(TenancyError::NoContext)
    ));
}

#[test]
fn rpc_metadata_resolution() {
    let resolver = SchemaResolver::new(true);

    let mut metadata: HashMap<String, MetadataValue> = HashMap::new();
    metadata.insert(
        SCHEMA_METADATA_KEY.to_string(),
        MetadataValue::List(vec!["tenant_first".to_string(), "tenant_second".to_string()]),
    );
    assert_eq!(
        resolver.resolve(&metadata, OperationScope::Tenant).unwrap().as_str(),
        "tenant_first"
    );

    // Empty canonical value falls through to the legacy key
    let mut metadata: HashMap<String, MetadataValue> = HashMap::new();
    metadata.insert(SCHEMA_METADATA_KEY.to_string(), MetadataValue::from(""));
    metadata.insert("schema_name".to_string(), MetadataValue::from("tenant_legacy"));
    assert_eq!(
        resolver.resolve(&metadata, OperationScope::Tenant).unwrap().as_str(),
        "tenant_legacy"
    );

    let empty: HashMap<String, MetadataValue> = HashMap::new();
    assert!(matches!(
        resolver.resolve(&empty, OperationScope::Tenant),
        Err(TenancyError::MissingSchema)
    ));
    assert!(resolver.resolve(&empty, OperationScope::Public).unwrap().is_public());

    let mut metadata: HashMap<String, MetadataValue> = HashMap::new();
    metadata.insert(SCHEMA_METADATA_KEY.to_string(), MetadataValue::from("tenant; drop"));
    assert!(matches!(
        resolver.resolve(&metadata, OperationScope::Tenant),
        Err(TenancyError::InvalidSchema { .. })
    ));
}
