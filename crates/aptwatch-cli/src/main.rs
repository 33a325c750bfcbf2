use std::sync::Arc;

use anyhow::{Context, Result};
use aptwatch_core::{today_kst, AddressResolver, LegalCodeTable, SourceFamily};
use aptwatch_pricing::{HouseTypeComparisonBuilder, MarketAnalyzer, PriceBadgeCalculator};
use aptwatch_storage::{AnnouncementStore, TransactionStore, UnitTypeStore};
use aptwatch_sync::{connect_store, run_sync_once_from_env, SyncConfig, SyncPipeline};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "aptwatch-cli")]
#[command(about = "Housing subscription announcement collector")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile every configured area and source family into the store.
    Sync,
    /// Delete announcements past the retention window.
    Cleanup {
        /// Explicit cutoff (YYYY-MM-DD) instead of five years before today.
        #[arg(long)]
        before: Option<NaiveDate>,
    },
    /// Print announcements published on one date as JSON lines.
    Collect {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Fetch priced unit types for stored announcements that lack them.
    UnitTypes,
    /// Compute price badges for stored private-market announcements.
    Badges,
    /// Market statistics and per-unit-type comparison for one announcement.
    Compare {
        #[arg(long)]
        management_no: String,
        #[arg(long)]
        admin_code: String,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aptwatch=info")))
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} areas={} chains={} {}",
                summary.run_id, summary.areas, summary.chains, summary.result
            );
        }
        Commands::Cleanup { before } => {
            let store = Arc::new(connect_store(&config).await?);
            let pipeline = SyncPipeline::from_config(config).await?;
            let service = pipeline.reconciliation(store)?;
            let removed = match before {
                Some(cutoff) => service.cleanup_before(cutoff).await?,
                None => service.cleanup().await?,
            };
            println!("cleanup complete: removed={removed}");
        }
        Commands::Collect { date } => {
            let store = Arc::new(connect_store(&config).await?);
            let pipeline = SyncPipeline::from_config(config).await?;
            let collector = pipeline.collector(store)?;
            for announcement in collector.collect_for_date(date.unwrap_or_else(today_kst)).await {
                println!(
                    "{}",
                    serde_json::to_string(&announcement).context("serializing announcement")?
                );
            }
        }
        Commands::UnitTypes => {
            let store = Arc::new(connect_store(&config).await?);
            let pipeline = SyncPipeline::from_config(config).await?;
            let source = pipeline.unit_type_source();
            let summary = pipeline.reconciliation(store)?.sync_unit_types(&source).await?;
            println!(
                "unit types: candidates={} already_stored={} inserted={} failed={}",
                summary.candidates, summary.already_stored, summary.inserted, summary.failed
            );
        }
        Commands::Badges => {
            let resolver: Arc<dyn AddressResolver> =
                Arc::new(LegalCodeTable::load(config.legal_codes_path())?);
            let store = Arc::new(connect_store(&config).await?);
            let calculator = PriceBadgeCalculator::new(store.clone(), resolver);
            for family in SourceFamily::ALL.into_iter().filter(|f| f.publishes_market_pricing()) {
                for stored in store.list_by_family(family).await? {
                    let evaluation = calculator.evaluate(&stored.announcement).await;
                    println!(
                        "{}\t{}\t{}",
                        stored.announcement.natural_key(),
                        evaluation.badge,
                        serde_json::to_string(&evaluation).context("serializing badge")?
                    );
                }
            }
        }
        Commands::Compare {
            management_no,
            admin_code,
        } => {
            let store = connect_store(&config).await?;
            let unit_types = store.unit_types_for(&management_no).await?;
            let transactions = store.transactions_for_code(&admin_code).await?;
            let report = serde_json::json!({
                "market": MarketAnalyzer::new().analyze(&transactions),
                "unit_types": HouseTypeComparisonBuilder::new().build(&unit_types, &transactions),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("serializing comparison")?
            );
        }
    }

    Ok(())
}
