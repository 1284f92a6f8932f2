use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use price_watch::backoff::{Clock, SystemClock};
use price_watch::change_detector::ChangeDetector;
use price_watch::config::AppConfig;
use price_watch::jobs::{HealthReporter, RetentionCleaner};
use price_watch::models::{NewProduct, PriceObservation, TrackedProduct};
use price_watch::runner::BulkScrapeRunner;
use price_watch::scheduler::PriceScheduler;
use price_watch::scraper::{FetchOutcome, FetchPipeline, Fetcher};
use price_watch::store::{Mutation, ProductStore, SqliteProductStore};

#[derive(Parser)]
#[command(name = "price-watch", version, about = "Track product prices and alert on drops")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler daemon until interrupted
    Run,
    /// Run one scrape batch over all active products
    Scrape,
    /// Delete price history and scrape logs past the retention window
    Cleanup,
    /// Print aggregate health counters
    Health,
    /// Fetch a product page and start tracking it
    Add {
        url: String,
        /// Alert when the price drops to or below this value
        #[arg(long)]
        target_price: Option<Decimal>,
    },
    /// List all tracked products
    List,
}

fn init_tracing(log_file: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,price_watch=debug"));

    match log_file {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path.file_name().unwrap_or_else(|| "price-watch.log".as_ref());
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

fn build_runner(
    config: &AppConfig,
    store: Arc<dyn ProductStore>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<BulkScrapeRunner>> {
    let pipeline = FetchPipeline::new(&config.scraper, Arc::clone(&clock))?;

    Ok(Arc::new(BulkScrapeRunner::new(
        Arc::new(pipeline),
        store,
        ChangeDetector::new(config.tracking.price_epsilon),
        clock,
        Duration::from_secs(config.scraper.politeness_delay_secs),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("loading configuration")?;
    let _log_guard = init_tracing(config.logging.file.as_deref());

    let store: Arc<dyn ProductStore> = Arc::new(
        SqliteProductStore::connect(&config.database.url, config.database.max_connections)
            .await
            .context("connecting to database")?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Command::Run => {
            let runner = build_runner(&config, Arc::clone(&store), Arc::clone(&clock))?;
            let cleaner = Arc::new(RetentionCleaner::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                config.retention.days,
            ));
            let health = Arc::new(HealthReporter::new(Arc::clone(&store), Arc::clone(&clock)));

            let mut scheduler =
                PriceScheduler::new(runner, cleaner, health, config.scheduler.clone()).await?;
            scheduler.start().await.context("starting scheduler")?;

            info!("price-watch running, press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;

            info!("shutting down");
            scheduler.shutdown().await?;
            // Let an in-flight batch commit before the runtime goes away
            if !scheduler.wait_until_idle(Duration::from_secs(60)).await {
                warn!("a job was still running after the shutdown grace period");
            }
        }
        Command::Scrape => {
            let runner = build_runner(&config, store, clock)?;
            let report = runner.run_once().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Cleanup => {
            let cleaner = RetentionCleaner::new(store, clock, config.retention.days);
            let report = cleaner.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Health => {
            let reporter = HealthReporter::new(store, clock);
            let report = reporter.report().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Add { url, target_price } => {
            let pipeline = FetchPipeline::new(&config.scraper, Arc::clone(&clock))?;
            info!(%url, "fetching product page");

            match pipeline.fetch(&url).await {
                FetchOutcome::Success(result) => {
                    let product = TrackedProduct::new(NewProduct {
                        url,
                        title: result.title,
                        current_price: Some(result.price),
                        target_price,
                    });
                    store.insert_product(&product).await?;
                    store
                        .apply(vec![Mutation::AppendObservation(PriceObservation::new(
                            product.id.clone(),
                            result.price,
                            clock.now(),
                        ))])
                        .await?;
                    println!("Tracking \"{}\" at {}", product.short_title(), result.price);
                }
                other => anyhow::bail!("could not fetch product page: {}", other.kind()),
            }
        }
        Command::List => {
            let products = store.list_products().await?;
            println!("{}", serde_json::to_string_pretty(&products)?);
        }
    }

    Ok(())
}
