mod catalog;
mod cleanup;
mod config;
mod driver;
mod fetch;
mod http;
mod metrics;
mod models;
mod pipeline;
mod poll;
mod remote;
mod retriever;
mod supabase;
#[cfg(test)]
mod testing;

use clap::Parser;
use eyre::WrapErr;
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use config::AppConfig;
use models::{RunOutcome, RunReport};
use pipeline::{Pipeline, RunOptions};

/// Turn one catalog item's product photo into a 3D model via the hosted
/// image-to-3D generator, store it and record it in the catalog.
#[derive(Debug, Parser)]
#[command(name = "stager-convert", version, about)]
struct Cli {
    /// Catalog item name, e.g. "Accent Chair 03093".
    item: String,

    /// Store the model locally but do not write the catalog reference.
    #[arg(long)]
    skip_catalog: bool,

    /// Leave the browser window open after the run.
    #[arg(long)]
    keep_session: bool,

    /// Keep the downloaded source image.
    #[arg(long)]
    keep_temp: bool,

    /// Do not delete the generation from the remote account.
    #[arg(long)]
    keep_remote: bool,

    /// Stop after the cost check without starting a generation.
    #[arg(long)]
    dry_run: bool,

    /// Only write the catalog reference for a model that is already stored.
    #[arg(long, conflicts_with_all = ["skip_catalog", "dry_run"])]
    only_catalog: bool,

    /// Write the JSON run report to this path.
    #[arg(long, value_name = "PATH", env = "STAGER_REPORT")]
    report: Option<PathBuf>,
}

impl Cli {
    fn options(&self) -> RunOptions {
        RunOptions {
            skip_catalog: self.skip_catalog,
            keep_session: self.keep_session,
            keep_temp: self.keep_temp,
            keep_remote: self.keep_remote,
            dry_run: self.dry_run,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            println!("ERROR: {err:#}");
            error!(target = "stager.cli", error = ?err, "run aborted");
            ExitCode::from(2)
        }
    }
}

async fn run() -> eyre::Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing();

    let config = AppConfig::from_env().wrap_err("loading configuration")?;
    let pipeline = Pipeline::from_config(&config).wrap_err("building pipeline")?;

    if cli.only_catalog {
        let updated = pipeline.record_existing_asset(&cli.item).await?;
        println!("Catalog updated for `{}` ({updated} row(s))", cli.item.trim());
        return Ok(ExitCode::SUCCESS);
    }

    info!(target = "stager.cli", item = %cli.item, dry_run = cli.dry_run, "starting conversion");
    let report = pipeline.run(&cli.item, &cli.options()).await;
    summarize(&report);
    if let Some(path) = &cli.report {
        write_report(path, &report).await?;
    }

    Ok(if report.outcome.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn summarize(report: &RunReport) {
    match &report.outcome {
        RunOutcome::Succeeded { asset } => {
            println!("Done: `{}` -> {asset}", report.item)
        }
        RunOutcome::Previewed { observed_cost } => {
            println!("Dry run: generate button shows cost {observed_cost}; nothing generated")
        }
        RunOutcome::Skipped { reason } => println!("Skipped `{}`: {reason}", report.item),
        RunOutcome::Failed { step, error, .. } => {
            println!("ERROR: `{}` failed at {step}: {error}", report.item)
        }
    }
}

async fn write_report(path: &PathBuf, report: &RunReport) -> eyre::Result<()> {
    let body = serde_json::to_vec_pretty(report).wrap_err("serializing run report")?;
    tokio::fs::write(path, body)
        .await
        .wrap_err_with(|| format!("writing run report to {}", path.display()))?;
    info!(target = "stager.cli", path = %path.display(), "run report written");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
