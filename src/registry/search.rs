// src/registry/search.rs
//! Search-driven ingestion of the corporate registry.
//!
//! The registry's search form has no "list all" shape, so coverage is
//! approximated by walking term lists built from common business-name
//! tokens, corporate-structure words, place names and short prefixes. Each
//! result link carries an opaque entity identifier that resolves to a JSON
//! detail record.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::core::config_manager::ScrapingConfig;
use crate::core::database::{Database, NewBusiness};
use crate::core::session::SessionHttpClient;
use crate::registry::bulk::naics_label;
use crate::scraping::directory::ScrapeCounts;

const COMMON_TOKENS: &[&str] = &[
    "consulting", "services", "solutions", "holdings", "enterprises", "group", "systems",
    "construction", "transport", "logistics", "management", "properties", "farms", "energy",
    "digital", "medical", "dental", "financial", "capital", "ventures",
];

const CORPORATE_WORDS: &[&str] = &["inc", "ltd", "corp", "limited", "incorporated", "co"];

const PLACE_NAMES: &[&str] = &[
    "toronto", "montreal", "vancouver", "calgary", "edmonton", "ottawa", "winnipeg", "halifax",
    "quebec", "regina", "saskatoon", "moncton",
];

const SHORT_PREFIXES: &[&str] = &[
    "can", "nor", "wes", "eas", "sou", "pro", "tec", "mar", "tra", "con", "int", "gre", "alp",
    "atl", "pac",
];

/// Result links look like `details.html?corpId=1234567`; the number is the
/// registry's own stable identifier.
static ENTITY_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:corpId|corporationId|entityId)=(\d+)").expect("static regex"));

pub struct RegistrySearchScraper<'a> {
    db: &'a Database,
    config: &'a ScrapingConfig,
    search_url: String,
    detail_url_base: String,
}

impl<'a> RegistrySearchScraper<'a> {
    pub fn new(db: &'a Database, config: &'a ScrapingConfig) -> Self {
        Self {
            db,
            config,
            search_url: "https://www.ic.gc.ca/app/scr/cc/CorporationsCanada/fdrlCrpSrch.html"
                .to_string(),
            detail_url_base: "https://www.ic.gc.ca/app/scr/cc/CorporationsCanada/api/corporations"
                .to_string(),
        }
    }

    /// Walk the term lists under a tracked job.
    pub async fn run(&self) -> Result<ScrapeCounts> {
        let job = self.db.jobs().start("registry-search").await?;

        match self.run_inner(job.id).await {
            Ok(counts) => {
                self.db
                    .jobs()
                    .complete(job.id, counts.found, counts.inserted, counts.skipped, None)
                    .await?;
                info!(
                    "Registry search completed: {} entities, {} inserted, {} skipped",
                    counts.found, counts.inserted, counts.skipped
                );
                Ok(counts)
            }
            Err(e) => {
                self.db.jobs().fail(job.id, &format!("{:#}", e)).await?;
                Err(e)
            }
        }
    }

    async fn run_inner(&self, job_id: i64) -> Result<ScrapeCounts> {
        let mut session = SessionHttpClient::new(
            &self.search_url,
            self.config.request_delay,
            self.config.page_timeout,
        );
        session
            .establish_session()
            .await
            .context("Registry search entry page failed to load")?;

        let mut counts = ScrapeCounts::default();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for (index, term) in search_terms().iter().enumerate() {
            if index > 0 {
                session.pace().await;
            }

            let html = match session
                .submit_search(&self.search_url, &[("searchCriteria", term.clone())], &[])
                .await
            {
                Ok(html) => html,
                Err(e) => {
                    warn!("Registry search '{}' failed: {:#}", term, e);
                    session
                        .record_failure()
                        .await
                        .context("Registry session could not be re-established")?;
                    continue;
                }
            };

            for entity_id in extract_entity_ids(&html) {
                if !seen_ids.insert(entity_id.clone()) {
                    continue;
                }

                session.pace().await;
                match self.fetch_detail(&mut session, &entity_id).await {
                    Ok(business) => {
                        counts.found += 1;
                        self.persist(business, job_id, &mut counts).await;
                    }
                    Err(e) => {
                        warn!("Detail fetch for entity {} failed: {:#}", entity_id, e);
                        session.record_failure().await?;
                    }
                }
            }
        }

        Ok(counts)
    }

    async fn fetch_detail(
        &self,
        session: &mut SessionHttpClient,
        entity_id: &str,
    ) -> Result<NewBusiness> {
        let url = format!("{}/{}.json", self.detail_url_base, entity_id);
        let body = session.get(&url).await?;
        let detail: serde_json::Value =
            serde_json::from_str(&body).context("Entity detail is not valid JSON")?;

        business_from_detail(&detail, entity_id)
            .ok_or_else(|| anyhow::anyhow!("Entity detail record has no name"))
    }

    async fn persist(&self, business: NewBusiness, job_id: i64, counts: &mut ScrapeCounts) {
        let business = NewBusiness {
            job_id: Some(job_id),
            ..business
        };

        match self.db.businesses().insert(&business).await {
            Ok(true) => counts.inserted += 1,
            Ok(false) => counts.skipped += 1,
            Err(e) => {
                warn!("Failed to persist business '{}': {:#}", business.name, e);
                counts.skipped += 1;
            }
        }
    }
}

/// The practical approximation of full coverage: every term group, in fixed
/// order, deduplicated.
pub fn search_terms() -> Vec<String> {
    let mut seen = HashSet::new();
    COMMON_TOKENS
        .iter()
        .chain(CORPORATE_WORDS)
        .chain(PLACE_NAMES)
        .chain(SHORT_PREFIXES)
        .filter(|term| seen.insert(**term))
        .map(|term| term.to_string())
        .collect()
}

/// Pull the opaque entity identifiers out of a result page's links.
pub fn extract_entity_ids(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let link_selector = Selector::parse("a[href]").expect("static selector");

    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for link in document.select(&link_selector) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if let Some(capture) = ENTITY_ID_RE.captures(href) {
            let id = capture[1].to_string();
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
    }

    ids
}

fn business_from_detail(detail: &serde_json::Value, entity_id: &str) -> Option<NewBusiness> {
    let field = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .filter_map(|key| detail.get(key))
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
    };

    let name = field(&["corporationName", "name", "legalName"])?;
    let naics = field(&["naicsCode", "naics"]);

    Some(NewBusiness {
        source: "registry-search".to_string(),
        name,
        registry_number: field(&["corporationNumber", "businessNumber"])
            .or_else(|| Some(entity_id.to_string())),
        province: field(&["province", "jurisdiction"]),
        city: field(&["city"]),
        industry: Some(naics_label(naics.as_deref()).to_string()),
        employee_range: None,
        operating_status: field(&["status", "statusDescription"]),
        job_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ids_come_from_result_links() {
        let html = r#"
            <div class="results">
              <a href="details.html?corpId=1234567">MAPLE WIDGETS INC.</a>
              <a href="details.html?corpId=7654321&lang=eng">NORTHERN CO</a>
              <a href="details.html?corpId=1234567">duplicate link</a>
              <a href="/help">help</a>
            </div>
        "#;
        let ids = extract_entity_ids(html);
        assert_eq!(ids, vec!["1234567".to_string(), "7654321".to_string()]);
    }

    #[test]
    fn term_lists_span_all_groups_without_duplicates() {
        let terms = search_terms();
        assert!(terms.contains(&"consulting".to_string()));
        assert!(terms.contains(&"inc".to_string()));
        assert!(terms.contains(&"toronto".to_string()));
        assert!(terms.contains(&"can".to_string()));

        let unique: HashSet<_> = terms.iter().collect();
        assert_eq!(unique.len(), terms.len());
    }

    #[test]
    fn detail_record_maps_to_business_with_registry_number() {
        let detail = serde_json::json!({
            "corporationName": "Maple Widgets Inc",
            "corporationNumber": "123456-7",
            "status": "Active",
            "city": "Ottawa",
            "province": "ON",
            "naicsCode": "3261"
        });

        let business = business_from_detail(&detail, "1234567").unwrap();
        assert_eq!(business.name, "Maple Widgets Inc");
        assert_eq!(business.registry_number.as_deref(), Some("123456-7"));
        assert_eq!(business.industry.as_deref(), Some("Manufacturing"));

        // Falls back to the opaque entity id when no number is published.
        let sparse = serde_json::json!({"name": "Sparse Co"});
        let fallback = business_from_detail(&sparse, "99").unwrap();
        assert_eq!(fallback.registry_number.as_deref(), Some("99"));
    }
}
