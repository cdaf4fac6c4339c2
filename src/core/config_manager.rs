// src/core/config_manager.rs
//! Unified configuration management - one place for paths and scraping knobs

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub environment: EnvironmentConfig,
    pub scraping: ScrapingConfig,
}

#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub data_path: PathBuf,
    pub database_path: PathBuf,
}

/// Knobs shared by every outbound collection component. The inter-request
/// delay is a hard constraint on target sites, not a tuning parameter:
/// hammering the provincial directories gets the collector blocked.
#[derive(Debug, Clone)]
pub struct ScrapingConfig {
    pub request_delay: Duration,
    pub page_timeout: Duration,
    pub download_timeout: Duration,
    pub enrichment_daily_cap: usize,
    pub enrichment_fetch_timeout: Duration,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(2500),
            page_timeout: Duration::from_secs(20),
            download_timeout: Duration::from_secs(300),
            enrichment_daily_cap: 200,
            enrichment_fetch_timeout: Duration::from_secs(10),
        }
    }
}

impl ConfigManager {
    /// Load all configurations
    pub fn load() -> Result<Self> {
        let environment = Self::load_environment()?;
        let scraping = Self::load_scraping();

        Ok(Self {
            environment,
            scraping,
        })
    }

    /// Load environment configuration
    fn load_environment() -> Result<EnvironmentConfig> {
        let env = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "local".to_string());
        info!("Loading environment configuration for: {}", env);

        let base_dir = if env == "production" {
            PathBuf::from("/app")
        } else {
            std::env::current_dir().context("Failed to get current directory")?
        };

        Ok(EnvironmentConfig {
            data_path: base_dir.join("data"),
            database_path: base_dir.join("maplematch.db"),
        })
    }

    /// Load scraping configuration from env vars, falling back to defaults
    fn load_scraping() -> ScrapingConfig {
        let mut config = ScrapingConfig::default();

        if let Some(ms) = env_u64("SCRAPE_REQUEST_DELAY_MS") {
            config.request_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("SCRAPE_PAGE_TIMEOUT_SECS") {
            config.page_timeout = Duration::from_secs(secs);
        }
        if let Some(cap) = env_u64("ENRICHMENT_DAILY_CAP") {
            config.enrichment_daily_cap = cap as usize;
        }

        config
    }

    /// Ensure all required directories exist
    pub async fn ensure_directories(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.environment.data_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create data directory: {}",
                    self.environment.data_path.display()
                )
            })?;

        if let Some(db_parent) = self.environment.database_path.parent() {
            tokio::fs::create_dir_all(db_parent)
                .await
                .context("Failed to create database directory")?;
        }

        Ok(())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scraping_defaults_respect_rate_limit_floor() {
        let config = ScrapingConfig::default();
        assert!(config.request_delay >= Duration::from_secs(2));
        assert_eq!(config.enrichment_daily_cap, 200);
    }
}
