use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use maple_match::core::config_manager::ConfigManager;
use maple_match::core::database::Database;
use maple_match::enrichment::ContactEnricher;
use maple_match::registry::{BulkRegistryLoader, RegistrySearchScraper};
use maple_match::scraping::orchestrator::ScraperOrchestrator;
use maple_match::scraping::sources::registered_sources;
use maple_match::start_web_server;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Parser)]
#[command(name = "maplematch")]
#[command(about = "Canadian SME/CPA intelligence platform")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server (default)
    Serve {
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Run one provincial scraper, or all of them
    Scrape {
        /// Source tag (e.g. "on"); omit with --all to run everything
        source: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Purge a source's records and scrape it fresh
    Rescrape { source: String },
    /// Bulk-load the business register extract from an archive URL
    LoadRegistry { archive_url: String },
    /// Run the search-driven registry scraper
    SearchRegistry,
    /// Run one contact-enrichment batch
    Enrich,
    /// List the registered scrapers
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    Registry::default()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or(EnvFilter::new("maple_match=info,rocket::server=off")),
        )
        .init();

    let cli = Cli::parse();
    let config = ConfigManager::load()?;
    config.ensure_directories().await?;

    match cli.command.unwrap_or(Command::Serve { port: 8000 }) {
        Command::Serve { port } => {
            info!("Starting MapleMatch API server");
            start_web_server(config.environment, config.scraping, port).await
        }
        Command::Scrape { source, all } => {
            let db = Database::new(&config.environment.database_path).await?;
            let orchestrator = ScraperOrchestrator::new(db, config.scraping);

            if all || source.is_none() {
                let outcomes = orchestrator.run_all().await;
                for (tag, outcome) in &outcomes {
                    info!("{}: {:?}", tag, outcome);
                }
            } else if let Some(tag) = source {
                let counts = orchestrator.run_single(&tag).await?;
                info!(
                    "{}: {} found, {} inserted, {} skipped",
                    tag, counts.found, counts.inserted, counts.skipped
                );
            }
            Ok(())
        }
        Command::Rescrape { source } => {
            let db = Database::new(&config.environment.database_path).await?;
            let orchestrator = ScraperOrchestrator::new(db, config.scraping);
            let counts = orchestrator.rescrape(&source).await?;
            info!(
                "{}: {} found, {} inserted, {} skipped",
                source, counts.found, counts.inserted, counts.skipped
            );
            Ok(())
        }
        Command::LoadRegistry { archive_url } => {
            let db = Database::new(&config.environment.database_path).await?;
            let loader = BulkRegistryLoader::new(&db, &config.scraping);
            let counts = loader.load(&archive_url).await?;
            info!(
                "Registry load: {} rows, {} inserted, {} skipped",
                counts.found, counts.inserted, counts.skipped
            );
            Ok(())
        }
        Command::SearchRegistry => {
            let db = Database::new(&config.environment.database_path).await?;
            let scraper = RegistrySearchScraper::new(&db, &config.scraping);
            let counts = scraper.run().await?;
            info!(
                "Registry search: {} entities, {} inserted, {} skipped",
                counts.found, counts.inserted, counts.skipped
            );
            Ok(())
        }
        Command::Enrich => {
            let db = Database::new(&config.environment.database_path).await?;
            let enricher = ContactEnricher::new(&db, &config.scraping);
            let summary = enricher.run().await?;
            info!(
                "Enrichment: {}/{} records enriched",
                summary.enriched, summary.scanned
            );
            Ok(())
        }
        Command::Sources => {
            for source in registered_sources() {
                info!(
                    "{:<4} {:<4} {:?} - {}",
                    source.tag, source.province, source.strategy, source.name
                );
            }
            Ok(())
        }
    }
}
