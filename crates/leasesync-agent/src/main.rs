//! CLI entry point for the leasesync agent.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use leasesync_agent::config::SyncConfig;
use leasesync_agent::runner::run_targets;

#[derive(Parser)]
#[command(name = "leasesync")]
#[command(about = "Sync OPNsense DHCP leases and ARP entries into phpIPAM")]
struct Cli {
    /// Config file prefix (default: leasesync).
    #[arg(short, long, default_value = "leasesync")]
    config: String,

    /// Only run the target with this name.
    #[arg(short, long)]
    target: Option<String>,

    /// Compute and report the changes without writing to the inventory.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Reports go to stdout; keep logs off it.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let sync = SyncConfig::load(&cli.config)?;
    sync.validate()?;

    let reports = run_targets(&sync, cli.target.as_deref(), cli.dry_run).await?;

    let mut failed = 0usize;
    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
        if !report.is_success() {
            failed += 1;
        }
    }

    if failed > 0 {
        tracing::error!(failed, total = reports.len(), "Some targets did not complete");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
