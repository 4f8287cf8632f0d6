pub mod utils;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AppConfig;
use crate::database::{redact_database_url, PgSchemaConnector};
use crate::migration::{MigrationError, MigrationOptions, MigrationOrchestrator, MigrationSummary, PgMigrationBackend};

#[derive(Parser, Debug)]
#[command(name = "migrate_tenants")]
#[command(about = "Apply pending migrations to every tenant schema")]
#[command(version)]
pub struct Cli {
    #[arg(long, help = "Tenants migrated concurrently [env: MIGRATION_BATCH_SIZE, default 5]")]
    pub batch_size: Option<usize>,

    #[arg(long, help = "Give up on taking the migration lock after this many seconds")]
    pub lock_timeout_seconds: Option<u64>,

    #[arg(long, help = "Only log errors")]
    pub silent: bool,

    #[arg(long, help = "Migrate a single tenant by id [env: MIGRATION_TENANT_ID]")]
    pub tenant_id: Option<String>,

    #[arg(long, help = "Migrate the public schema before the tenants")]
    pub include_public: bool,

    #[arg(long, help = "Stop starting new batches after this many seconds")]
    pub deadline_seconds: Option<u64>,

    #[arg(long, help = "Output the summary in JSON format")]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

impl Cli {
    /// Command line flags layered over the environment configuration
    pub fn options(&self, config: &AppConfig) -> MigrationOptions {
        let mut options = config.migration_options();
        if let Some(batch_size) = self.batch_size {
            options.batch_size = batch_size;
        }
        if let Some(seconds) = self.lock_timeout_seconds {
            options.lock_timeout = Duration::from_secs(seconds);
        }
        if self.silent {
            options.silent = true;
        }
        if let Some(id) = &self.tenant_id {
            options.specific_tenant_id = Some(id.clone());
        }
        options.include_public = self.include_public;
        options.deadline = self.deadline_seconds.map(Duration::from_secs);
        options
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<MigrationSummary> {
    let config = crate::config::config();
    let output_format = OutputFormat::from_cli(&cli);
    let options = cli.options(config);

    let database_url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL must be set")?;
    if !options.silent {
        tracing::info!("Migrating tenants on {}", redact_database_url(database_url));
    }

    let connector = PgSchemaConnector::from_url(database_url, config.connect_timeout())?;
    let orchestrator = MigrationOrchestrator::new(PgMigrationBackend::new(connector), options);
    let summary = match orchestrator.run().await {
        Ok(summary) => summary,
        Err(MigrationError::DeadlineExceeded {
            processed,
            remaining,
            summary,
        }) => {
            utils::print_summary(&output_format, &summary)?;
            anyhow::bail!(
                "Migration run deadline exceeded: {} tenants processed, {} not started",
                processed,
                remaining
            );
        }
        Err(e) => return Err(e.into()),
    };

    utils::print_summary(&output_format, &summary)?;
    Ok(summary)
}
