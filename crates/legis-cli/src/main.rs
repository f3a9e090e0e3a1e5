use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use legis_core::EntityKind;
use legis_sync::{maybe_build_scheduler, SyncConfig, SyncPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "legis-cli")]
#[command(about = "Legislative data ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch and reconcile one entity family from its upstream source.
    Sync {
        #[arg(value_enum)]
        entity: EntityArg,
        /// Forget stored progress for this endpoint before running.
        #[arg(long)]
        full_resync: bool,
    },
    /// Run one AI enrichment batch over bills without summaries.
    Enrich,
    /// Initialize the schema and repair legacy naive timestamps.
    Migrate,
    /// Host the cron scheduler in the foreground.
    Schedule,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EntityArg {
    Bills,
    BillDetails,
    Members,
    MemberDetails,
    MemberBios,
}

impl From<EntityArg> for EntityKind {
    fn from(arg: EntityArg) -> Self {
        match arg {
            EntityArg::Bills => EntityKind::Bills,
            EntityArg::BillDetails => EntityKind::BillDetails,
            EntityArg::Members => EntityKind::Members,
            EntityArg::MemberDetails => EntityKind::MemberDetails,
            EntityArg::MemberBios => EntityKind::MemberBios,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let pipeline = SyncPipeline::new(SyncConfig::from_env()).await?;

    match cli.command {
        Commands::Sync {
            entity,
            full_resync,
        } => {
            let kind = EntityKind::from(entity);
            if full_resync {
                pipeline.store().reset_endpoint(kind.endpoint_id()).await?;
            }
            let summary = pipeline.run_sync(kind).await?;
            println!(
                "sync complete: endpoint={} run_id={} pages={} inserted={} updated={} unchanged={} skipped={} errors={}",
                summary.endpoint,
                summary.run_id,
                summary.pages,
                summary.stats.inserted,
                summary.stats.updated,
                summary.stats.unchanged,
                summary.stats.skipped,
                summary.stats.errors,
            );
        }
        Commands::Enrich => {
            let summary = pipeline.run_enrichment().await?;
            println!(
                "enrichment complete: run_id={} processed={} succeeded={} failed={} tags={} low_confidence={}",
                summary.run_id,
                summary.processed,
                summary.succeeded,
                summary.failed,
                summary.tags_applied,
                summary.tags_below_threshold,
            );
        }
        Commands::Migrate => {
            let repaired = pipeline.store().migrate().await?;
            println!("migrate complete: repaired_timestamps={repaired}");
        }
        Commands::Schedule => {
            let pipeline = Arc::new(pipeline);
            let Some(mut scheduler) = maybe_build_scheduler(pipeline).await? else {
                bail!("scheduler is disabled; set LEGIS_SCHEDULER_ENABLED=1");
            };
            scheduler.start().await?;
            println!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            scheduler.shutdown().await?;
        }
    }

    Ok(())
}
