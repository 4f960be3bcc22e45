use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sct_export::accounts;
use sct_export::config::ResolvedConfig;
use sct_export::driver::CdpDriver;
use sct_export::session::SessionRunner;

#[derive(Parser)]
#[command(name = "sct-export")]
#[command(about = "Batch exporter for tax portal account statements")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "sct-export.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show current configuration
    Config,
    /// Process the account roster (the default)
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off",
            )
        }))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let cli = Cli::parse();

    let config = ResolvedConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;

    match cli.command {
        Some(Command::Config) => {
            println!("Config file: {}", cli.config.display());
            println!("Accounts file: {}", config.accounts_file.display());
            println!("Download directory: {}", config.download_dir.display());
            println!("Login URL: {}", config.portal.login_url);
            Ok(())
        }
        Some(Command::Run) | None => run_batch(&config).await,
    }
}

async fn run_batch(config: &ResolvedConfig) -> Result<()> {
    // Roster problems are fatal before any browser action begins.
    let roster = accounts::load_roster(&config.accounts_file)?;
    println!("Found {} account(s) to process.", roster.len());

    let driver = CdpDriver::launch(&config.chrome, &config.download_dir)
        .await
        .context("Browser initialization failed")?;

    let runner = SessionRunner::new(&driver, config);
    let result = runner.run(&roster).await;
    driver.shutdown().await;
    let summary = result?;

    println!();
    for report in &summary.reports {
        println!("{}: {}", report.login_id, report.outcome.describe());
    }
    println!(
        "\nProcessed {} account(s): {} exported, {} skipped, {} failed.",
        summary.reports.len(),
        summary.exported(),
        summary.skipped(),
        summary.failed()
    );

    Ok(())
}
