use axum::http::HeaderMap;
use std::collections::HashMap;
use uuid::Uuid;

use super::error::TenancyError;
use super::schema::SchemaName;

/// Canonical metadata key carrying the tenant schema
pub const SCHEMA_METADATA_KEY: &str = "schema-name";

/// Older spellings still sent by some clients, checked after the canonical key
pub const LEGACY_SCHEMA_KEYS: [&str; 2] = ["schemaName", "schema_name"];

/// Whether an operation runs against a tenant schema or the shared public schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationScope {
    Tenant,
    Public,
}

/// One metadata entry: a single value or a list of values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Scalar(String),
    List(Vec<String>),
}

impl MetadataValue {
    /// The usable value: the scalar, or the first list element. Empty counts as absent.
    pub fn first(&self) -> Option<&str> {
        let value = match self {
            MetadataValue::Scalar(v) => Some(v.as_str()),
            MetadataValue::List(values) => values.first().map(String::as_str),
        };
        value.filter(|v| !v.is_empty())
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Scalar(value.to_string())
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(values: Vec<String>) -> Self {
        MetadataValue::List(values)
    }
}

/// Read access to inbound request metadata (HTTP headers, RPC metadata)
pub trait RequestMetadata {
    fn lookup(&self, key: &str) -> Option<MetadataValue>;
}

impl RequestMetadata for HeaderMap {
    fn lookup(&self, key: &str) -> Option<MetadataValue> {
        let values: Vec<String> = self
            .get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .collect();

        match values.len() {
            0 => None,
            1 => values.into_iter().next().map(MetadataValue::Scalar),
            _ => Some(MetadataValue::List(values)),
        }
    }
}

impl RequestMetadata for HashMap<String, MetadataValue> {
    fn lookup(&self, key: &str) -> Option<MetadataValue> {
        self.get(key).cloned()
    }
}

/// Determines the schema an inbound call operates against
#[derive(Debug, Clone)]
pub struct SchemaResolver {
    keys: Vec<&'static str>,
}

impl SchemaResolver {
    pub fn new(accept_legacy_keys: bool) -> Self {
        let mut keys = vec![SCHEMA_METADATA_KEY];
        if accept_legacy_keys {
            keys.extend(LEGACY_SCHEMA_KEYS);
        }
        Self { keys }
    }

    /// Keys checked, in order
    pub fn keys(&self) -> &[&'static str] {
        &self.keys
    }

    /// Resolve and validate the schema for one inbound call
    pub fn resolve<M>(&self, metadata: &M, scope: OperationScope) -> Result<SchemaName, TenancyError>
    where
        M: RequestMetadata + ?Sized,
    {
        if scope == OperationScope::Public {
            tracing::debug!("Operation is public, using schema '{}'", SchemaName::public());
            return Ok(SchemaName::public());
        }

        let candidate = self.extract(metadata).ok_or_else(|| {
            tracing::warn!("Missing {} in request metadata", SCHEMA_METADATA_KEY);
            TenancyError::MissingSchema
        })?;

        let schema = SchemaName::parse(&candidate).map_err(|reason| {
            let error_id = Uuid::new_v4();
            tracing::warn!(
                "Rejected schema name '{}': {} (ref: {})",
                candidate.escape_debug(),
                reason,
                error_id
            );
            TenancyError::invalid_schema(candidate.clone(), reason)
        })?;

        tracing::debug!("Using schema '{}' for request", schema);
        Ok(schema)
    }

    /// First non-empty value among the accepted keys
    pub fn extract<M>(&self, metadata: &M) -> Option<String>
    where
        M: RequestMetadata + ?Sized,
    {
        for key in &self.keys {
            if let Some(value) = metadata.lookup(key) {
                if let Some(first) = value.first() {
                    if *key != SCHEMA_METADATA_KEY {
                        tracing::debug!("Schema resolved from legacy metadata key '{}'", key);
                    }
                    return Some(first.to_string());
                }
            }
        }
        None
    }
}

impl Default for SchemaResolver {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn rpc_metadata(entries: &[(&str, MetadataValue)]) -> HashMap<String, MetadataValue> {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn resolves_canonical_header() {
        let mut headers = HeaderMap::new();
        headers.insert(SCHEMA_METADATA_KEY, HeaderValue::from_static("tenant_ab12cd34ef"));

        let schema = SchemaResolver::default().resolve(&headers, OperationScope::Tenant).unwrap();
        assert_eq!(schema.as_str(), "tenant_ab12cd34ef");
    }

    #[test]
    fn public_scope_skips_lookup() {
        let schema = SchemaResolver::default()
            .resolve(&HeaderMap::new(), OperationScope::Public)
            .unwrap();
        assert!(schema.is_public());
    }

    #[test]
    fn missing_schema_is_rejected() {
        let err = SchemaResolver::new(true)
            .resolve(&HeaderMap::new(), OperationScope::Tenant)
            .unwrap_err();
        assert!(matches!(err, TenancyError::MissingSchema));
    }

    #[test]
    fn invalid_schema_is_rejected() {
        let md = rpc_metadata(&[(SCHEMA_METADATA_KEY, "pg_catalog".into())]);
        let err = SchemaResolver::default().resolve(&md, OperationScope::Tenant).unwrap_err();
        assert!(matches!(err, TenancyError::InvalidSchema { ref schema, .. } if schema == "pg_catalog"));
    }

    #[test]
    fn takes_first_element_of_list() {
        let md = rpc_metadata(&[(
            SCHEMA_METADATA_KEY,
            vec!["tenant_first".to_string(), "tenant_second".to_string()].into(),
        )]);
        let schema = SchemaResolver::default().resolve(&md, OperationScope::Tenant).unwrap();
        assert_eq!(schema.as_str(), "tenant_first");
    }

    #[test]
    fn legacy_keys_checked_in_order_when_enabled() {
        let md = rpc_metadata(&[
            ("schema_name", "tenant_snake".into()),
            ("schemaName", "tenant_camel".into()),
        ]);

        let legacy = SchemaResolver::new(true);
        assert_eq!(legacy.resolve(&md, OperationScope::Tenant).unwrap().as_str(), "tenant_camel");

        let strict = SchemaResolver::new(false);
        assert!(matches!(
            strict.resolve(&md, OperationScope::Tenant),
            Err(TenancyError::MissingSchema)
        ));
    }

    #[test]
    fn empty_values_count_as_absent() {
        let md = rpc_metadata(&[
            (SCHEMA_METADATA_KEY, "".into()),
            ("schemaName", MetadataValue::List(vec![])),
            ("schema_name", "tenant_fallback".into()),
        ]);
        let schema = SchemaResolver::new(true).resolve(&md, OperationScope::Tenant).unwrap();
        assert_eq!(schema.as_str(), "tenant_fallback");
    }

    #[test]
    fn repeated_headers_become_a_list() {
        let mut headers = HeaderMap::new();
        headers.append(SCHEMA_METADATA_KEY, HeaderValue::from_static("tenant_aaaaa"));
        headers.append(SCHEMA_METADATA_KEY, HeaderValue::from_static("tenant_bbbbb"));
        assert_eq!(
            headers.lookup(SCHEMA_METADATA_KEY),
            Some(MetadataValue::List(vec!["tenant_aaaaa".into(), "tenant_bbbbb".into()]))
        );
    }
}
