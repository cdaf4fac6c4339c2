// src/scraping/orchestrator.rs
//! Runs the provincial scrapers and isolates their failures.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info};

use crate::core::config_manager::ScrapingConfig;
use crate::core::database::Database;
use crate::scraping::directory::{DirectoryScraper, ScrapeCounts};
use crate::scraping::sources::{find_source, registered_sources, source_tags};

/// Per-source result of an orchestrated run.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SourceOutcome {
    Completed(ScrapeCounts),
    Failed { error: String },
}

pub struct ScraperOrchestrator {
    db: Database,
    config: ScrapingConfig,
}

impl ScraperOrchestrator {
    pub fn new(db: Database, config: ScrapingConfig) -> Self {
        Self { db, config }
    }

    /// Run every registered scraper sequentially. A hard failure in one
    /// jurisdiction is caught and recorded; it never prevents the others
    /// from running. The per-source job rows carry the detail.
    pub async fn run_all(&self) -> BTreeMap<String, SourceOutcome> {
        let mut outcomes = BTreeMap::new();

        for source in registered_sources() {
            let scraper = DirectoryScraper::new(&source, &self.db, &self.config);
            let outcome = match scraper.run().await {
                Ok(counts) => SourceOutcome::Completed(counts),
                Err(e) => {
                    error!("[{}] scraper failed: {:#}", source.tag, e);
                    SourceOutcome::Failed {
                        error: format!("{:#}", e),
                    }
                }
            };
            outcomes.insert(source.tag.to_string(), outcome);
        }

        info!("Orchestrated run finished: {} sources", outcomes.len());
        outcomes
    }

    /// Run one scraper by tag. Unknown tags fail fast with the valid list.
    pub async fn run_single(&self, tag: &str) -> Result<ScrapeCounts> {
        let source = find_source(tag).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown scraper '{}'. Valid sources: {}",
                tag,
                source_tags().join(", ")
            )
        })?;

        DirectoryScraper::new(&source, &self.db, &self.config)
            .run()
            .await
    }

    /// Admin re-scrape: purge everything previously collected for the
    /// source, then run it fresh. Irreversible; not safe concurrently with
    /// an in-progress scrape of the same source.
    pub async fn rescrape(&self, tag: &str) -> Result<ScrapeCounts> {
        let source = find_source(tag).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown scraper '{}'. Valid sources: {}",
                tag,
                source_tags().join(", ")
            )
        })?;

        let purged = self.db.persons().purge_source(source.tag).await?;
        info!("[{}] purged {} records before re-scrape", source.tag, purged);

        DirectoryScraper::new(&source, &self.db, &self.config)
            .run()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_source_fails_fast_with_valid_names() {
        let db = Database::in_memory().await.unwrap();
        let orchestrator = ScraperOrchestrator::new(db, ScrapingConfig::default());

        let err = orchestrator.run_single("yukon").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Unknown scraper 'yukon'"));
        assert!(message.contains("on"));
        assert!(message.contains("pe"));
    }
}
