use crate::cli::OutputFormat;
use crate::migration::MigrationSummary;

/// Milliseconds as `42s` or `1m 5s`
pub fn format_duration(ms: u64) -> String {
    let seconds = ms / 1000;
    let minutes = seconds / 60;

    if minutes == 0 {
        format!("{}s", seconds)
    } else {
        format!("{}m {}s", minutes, seconds % 60)
    }
}

/// Output the run summary in the appropriate format
pub fn print_summary(output_format: &OutputFormat, summary: &MigrationSummary) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Text => {
            println!("=== MIGRATION SUMMARY ===");
            println!("Total tenants: {}", summary.total_tenants);
            println!("Successful: {}", summary.successful);
            println!("Skipped: {}", summary.skipped);
            println!("Failed: {}", summary.failed);
            println!("Total duration: {}", format_duration(summary.total_duration_ms));

            if summary.failed > 0 {
                eprintln!("Failed tenants:");
                for tenant in &summary.failed_tenants {
                    eprintln!("- {}: {}", tenant.schema, tenant.error);
                }
            } else {
                println!("All tenant migrations completed successfully");
            }
        }
    }
    Ok(())
}
