use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rcl_sync::{build_scheduler, init_tracing, PipelineConfig, RunLog, RunReport, Services, Stage};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "rcl-cli")]
#[command(about = "RFP content library pipeline")]
struct Cli {
    /// Config file; defaults to $RCL_CONFIG, then rcl.yaml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print the run report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Archive, clean and publish the latest survey export.
    Clean,
    /// Render one document per canonical record.
    Materialize,
    /// Converge the external mirror folder and publish the mapping.
    Mirror,
    /// Purge the search index and rerun the indexer.
    Reindex,
    /// All four stages in order.
    Run,
    /// Run the scheduler until Ctrl-C.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let run_log = RunLog::new();
    init_tracing(&run_log);

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path),
        None => PipelineConfig::from_env(),
    }
    .context("loading configuration")?;
    let services = Services::from_config(config, run_log)?;

    let stage = match cli.command.unwrap_or(Commands::Run) {
        Commands::Clean => Stage::Clean,
        Commands::Materialize => Stage::Materialize,
        Commands::Mirror => Stage::Mirror,
        Commands::Reindex => Stage::Reindex,
        Commands::Run => Stage::All,
        Commands::Schedule => return schedule(Arc::new(services)).await,
    };

    let report = services.run(stage, rcl_sync::today()).await?;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing run report")?
        );
    } else {
        print_summary(&report);
    }
    Ok(())
}

async fn schedule(services: Arc<Services>) -> Result<()> {
    let Some(mut sched) = build_scheduler(Arc::clone(&services)).await? else {
        anyhow::bail!("scheduler.enabled is false in the configuration");
    };
    sched.start().await.context("starting scheduler")?;
    info!(jobs = services.config.scheduler.cron.len(), "scheduler running; Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    sched.shutdown().await.context("stopping scheduler")?;
    info!("scheduler stopped");
    Ok(())
}

fn print_summary(report: &RunReport) {
    if let Some(cleaning) = &report.cleaning {
        println!(
            "clean: source={} dataset={} records={} review_pairs={}",
            cleaning.source_name,
            cleaning.dataset_name,
            cleaning.records.len(),
            cleaning.review.len()
        );
    }
    if let Some(dir) = &report.report_dir {
        println!("reports: {}", dir.display());
    }
    if let Some(m) = &report.materialize {
        println!(
            "materialize: dataset={} written={} removed_stale={} skipped={}",
            m.dataset.as_deref().unwrap_or("-"),
            m.written,
            m.removed_stale,
            m.skipped_blank_key
        );
    }
    if let Some(s) = &report.mirror {
        println!(
            "mirror: uploaded={} upload_failures={} deleted={} delete_failures={} mapping_rows={} duplicates={}",
            s.uploaded.len(),
            s.upload_failures.len(),
            s.deleted.len(),
            s.delete_failures.len(),
            s.mapping.len(),
            s.duplicate_names.len()
        );
    }
    if let Some(i) = &report.index {
        println!("reindex: index={} indexer={} purged={}", i.index, i.indexer, i.purged);
    }
}
