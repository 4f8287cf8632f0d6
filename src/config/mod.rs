use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::database::{PoolConfig, RetryPolicy};
use crate::migration::MigrationOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub pool: PoolSettings,
    pub retry: RetrySettings,
    pub migration: MigrationSettings,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Unset until provided through DATABASE_URL
    pub url: Option<String>,
    pub connect_timeout_secs: u64,
}

/// Pool sizing, all durations in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    pub max_size: usize,
    pub min_size: usize,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub inactivity_timeout_ms: u64,
    pub cleanup_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    pub batch_size: usize,
    pub lock_timeout_seconds: u64,
    pub specific_tenant_id: Option<String>,
    pub silent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    /// Also read `schemaName` and `schema_name` request metadata
    pub accept_legacy_schema_keys: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("DB_CONNECT_TIMEOUT") {
            self.database.connect_timeout_secs = v.parse().unwrap_or(self.database.connect_timeout_secs);
        }

        // Pool overrides
        if let Ok(v) = env::var("DB_POOL_SIZE") {
            self.pool.max_size = v.parse().unwrap_or(self.pool.max_size);
        }
        if let Ok(v) = env::var("DB_POOL_MIN_SIZE") {
            self.pool.min_size = v.parse().unwrap_or(self.pool.min_size);
        }
        if let Ok(v) = env::var("DB_POOL_ACQUIRE_TIMEOUT") {
            self.pool.acquire_timeout_ms = v.parse().unwrap_or(self.pool.acquire_timeout_ms);
        }
        if let Ok(v) = env::var("DB_POOL_IDLE_TIMEOUT") {
            self.pool.idle_timeout_ms = v.parse().unwrap_or(self.pool.idle_timeout_ms);
        }
        if let Ok(v) = env::var("DB_POOL_INACTIVITY_TIMEOUT") {
            self.pool.inactivity_timeout_ms = v.parse().unwrap_or(self.pool.inactivity_timeout_ms);
        }
        if let Ok(v) = env::var("DB_POOL_CLEANUP_INTERVAL") {
            self.pool.cleanup_interval_ms = v.parse().unwrap_or(self.pool.cleanup_interval_ms);
        }

        // Retry overrides
        if let Ok(v) = env::var("DB_RETRY_MAX") {
            self.retry.max_retries = v.parse().unwrap_or(self.retry.max_retries);
        }
        if let Ok(v) = env::var("DB_RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = v.parse().unwrap_or(self.retry.base_delay_ms);
        }
        if let Ok(v) = env::var("DB_OPERATION_TIMEOUT_MS") {
            self.retry.operation_timeout_ms = v.parse().ok();
        }

        // Migration overrides
        if let Ok(v) = env::var("MIGRATION_BATCH_SIZE") {
            self.migration.batch_size = v.parse().unwrap_or(self.migration.batch_size);
        }
        if let Ok(v) = env::var("MIGRATION_LOCK_TIMEOUT_SECONDS") {
            self.migration.lock_timeout_seconds = v.parse().unwrap_or(self.migration.lock_timeout_seconds);
        }
        if let Ok(v) = env::var("MIGRATION_TENANT_ID") {
            self.migration.specific_tenant_id = Some(v).filter(|id| !id.is_empty());
        }
        if let Ok(v) = env::var("MIGRATION_SILENT") {
            self.migration.silent = v.parse().unwrap_or(self.migration.silent);
        }

        // API overrides
        if let Ok(v) = env::var("API_PORT").or_else(|_| env::var("PORT")) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("TENANCY_ACCEPT_LEGACY_SCHEMA_KEYS") {
            self.api.accept_legacy_schema_keys = v.parse().unwrap_or(self.api.accept_legacy_schema_keys);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                connect_timeout_secs: 30,
            },
            pool: PoolSettings::defaults(),
            retry: RetrySettings {
                max_retries: 2,
                base_delay_ms: 100,
                operation_timeout_ms: None,
            },
            migration: MigrationSettings::defaults(),
            api: ApiConfig {
                port: 3000,
                accept_legacy_schema_keys: true,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: None,
                connect_timeout_secs: 10,
            },
            pool: PoolSettings::defaults(),
            retry: RetrySettings {
                max_retries: 2,
                base_delay_ms: 100,
                operation_timeout_ms: Some(30_000),
            },
            migration: MigrationSettings::defaults(),
            api: ApiConfig {
                port: 3000,
                accept_legacy_schema_keys: true,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: None,
                connect_timeout_secs: 5,
            },
            pool: PoolSettings {
                max_size: 10,
                ..PoolSettings::defaults()
            },
            retry: RetrySettings {
                max_retries: 2,
                base_delay_ms: 100,
                operation_timeout_ms: Some(10_000),
            },
            migration: MigrationSettings {
                silent: true,
                ..MigrationSettings::defaults()
            },
            api: ApiConfig {
                port: 3000,
                accept_legacy_schema_keys: false,
            },
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout_secs)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.pool.max_size,
            min_size: self.pool.min_size,
            acquire_timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
            idle_timeout: Duration::from_millis(self.pool.idle_timeout_ms),
            inactivity_timeout: Duration::from_millis(self.pool.inactivity_timeout_ms),
            cleanup_interval: Duration::from_millis(self.pool.cleanup_interval_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            deadline: self.retry.operation_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn migration_options(&self) -> MigrationOptions {
        MigrationOptions {
            batch_size: self.migration.batch_size,
            lock_timeout: Duration::from_secs(self.migration.lock_timeout_seconds),
            silent: self.migration.silent,
            specific_tenant_id: self.migration.specific_tenant_id.clone(),
            ..MigrationOptions::default()
        }
    }
}

impl PoolSettings {
    fn defaults() -> Self {
        Self {
            max_size: 5,
            min_size: 0,
            acquire_timeout_ms: 15_000,
            idle_timeout_ms: 60_000,
            inactivity_timeout_ms: 300_000,
            cleanup_interval_ms: 300_000,
        }
    }
}

impl MigrationSettings {
    fn defaults() -> Self {
        Self {
            batch_size: 5,
            lock_timeout_seconds: 300,
            specific_tenant_id: None,
            silent: false,
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(config.api.accept_legacy_schema_keys);
        assert_eq!(config.pool.max_size, 5);
        assert_eq!(config.pool_config(), PoolConfig::default());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert!(!config.api.accept_legacy_schema_keys);
        assert!(config.migration.silent);
        assert_eq!(config.retry_policy().deadline, Some(Duration::from_secs(10)));
        assert!(config.pool_config().validate().is_ok());
    }

    #[test]
    fn migration_options_follow_settings() {
        let mut config = AppConfig::development();
        config.migration.batch_size = 3;
        config.migration.specific_tenant_id = Some("42".into());

        let options = config.migration_options();
        assert_eq!(options.batch_size, 3);
        assert_eq!(options.lock_timeout, Duration::from_secs(300));
        assert_eq!(options.specific_tenant_id.as_deref(), Some("42"));
        assert!(!options.include_public);
    }
}
