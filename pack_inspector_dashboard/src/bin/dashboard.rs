use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pack_inspector::{InspectorConfig, MAX_WINDOW_DAYS, ReportConfig};
use pack_inspector_dashboard::{DEFAULT_BIND_ADDR, ServerConfig, start_server};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pack_inspector_dashboard", version, about = "Defect log reporting dashboard")]
struct Args {
    #[arg(long, default_value = DEFAULT_BIND_ADDR)]
    bind: String,

    /// Rig configuration; supplies the log path and report window.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the log path from the configuration.
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Overrides the default report window.
    #[arg(long)]
    days: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let (mut log_path, mut report) = match &args.config {
        Some(path) => {
            let config = InspectorConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?;
            (config.log_path, config.report)
        }
        None => (PathBuf::from("defect_log.txt"), ReportConfig::default()),
    };
    if let Some(path) = args.log_path {
        log_path = path;
    }
    if let Some(days) = args.days {
        anyhow::ensure!(
            (1..=MAX_WINDOW_DAYS).contains(&days),
            "--days must lie in 1..={MAX_WINDOW_DAYS}"
        );
        report.window_days = days;
    }

    let handle = start_server(ServerConfig {
        bind_addr: args.bind,
        log_path,
        report,
    })
    .await?;
    handle.await?;
    Ok(())
}
