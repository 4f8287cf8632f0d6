use clap::Parser;
use tenant_schema_router::cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match tenant_schema_router::cli::run(cli).await {
        Ok(summary) if summary.failed > 0 => std::process::exit(1),
        Ok(_) => Ok(()),
        Err(e) => {
            match std::env::var("CLI_VERBOSE").as_deref() {
                Ok("true") | Ok("1") => eprintln!("Migration process failed: {e:?}"),
                _ => eprintln!("Migration process failed: {e}"),
            }
            std::process::exit(1);
        }
    }
}
