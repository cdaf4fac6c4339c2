// src/enrichment/mod.rs
//! Opportunistic contact enrichment.
//!
//! Persisted professionals with a firm name but no email get a small set of
//! guessed web domains; reachable ones are scanned for email-shaped strings,
//! preferring addresses carrying the person's own name over role inboxes.
//! A daily cap and a fixed delay keep the outbound load polite. Failures
//! leave the record untouched so the next run retries it.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::core::config_manager::ScrapingConfig;
use crate::core::database::{Database, PersonStatus, ScrapedPerson};
use crate::core::session::COLLECTOR_USER_AGENT;

/// Legal/structural tokens stripped from firm names before guessing a
/// domain.
const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "ltd", "llp", "llc", "corp", "co", "limited", "incorporated", "corporation",
    "professional", "chartered", "accountants", "accountant", "cpa", "and", "associates",
    "partners", "group",
];

/// Role inboxes ranked below anything bearing the person's name.
const GENERIC_PREFIXES: &[&str] = &[
    "info", "contact", "admin", "office", "hello", "support", "sales", "reception", "inquiries",
    "mail", "general",
];

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("static regex"));

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EnrichmentSummary {
    pub scanned: usize,
    pub enriched: usize,
}

pub struct ContactEnricher<'a> {
    db: &'a Database,
    config: &'a ScrapingConfig,
    client: Client,
}

impl<'a> ContactEnricher<'a> {
    pub fn new(db: &'a Database, config: &'a ScrapingConfig) -> Self {
        let client = Client::builder()
            .user_agent(COLLECTOR_USER_AGENT)
            .timeout(config.enrichment_fetch_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { db, config, client }
    }

    /// Process one daily batch. Only successful lookups mutate the record;
    /// everything else stays `raw` and is retried on a later run.
    pub async fn run(&self) -> Result<EnrichmentSummary> {
        let batch = self
            .db
            .persons()
            .unenriched_batch(self.config.enrichment_daily_cap as i64)
            .await?;

        info!("Enrichment batch: {} candidates", batch.len());
        let mut summary = EnrichmentSummary {
            scanned: batch.len(),
            enriched: 0,
        };

        for (index, person) in batch.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.request_delay).await;
            }

            match self.enrich_one(person).await {
                Ok(true) => summary.enriched += 1,
                Ok(false) => {}
                Err(e) => warn!("Enrichment failed for '{}': {:#}", person.full_name, e),
            }
        }

        info!(
            "Enrichment finished: {}/{} records enriched",
            summary.enriched, summary.scanned
        );
        Ok(summary)
    }

    async fn enrich_one(&self, person: &ScrapedPerson) -> Result<bool> {
        let Some(firm) = person.firm.as_deref() else {
            return Ok(false);
        };

        for domain in candidate_domains(firm) {
            let html = match self.client.get(&domain).send().await {
                Ok(response) if response.status().is_success() => match response.text().await {
                    Ok(html) => html,
                    Err(_) => continue,
                },
                _ => {
                    debug!("Domain guess unreachable: {}", domain);
                    continue;
                }
            };

            if let Some(email) = best_email(&html, &person.first_name, &person.last_name) {
                info!("Enriched '{}' via {}", person.full_name, domain);
                self.db
                    .persons()
                    .set_contact(person.id, &email, PersonStatus::Enriched)
                    .await?;
                return Ok(true);
            }
        }

        Ok(false)
    }
}

// ===== Pure helpers =====

/// Collapse a firm name to the token a firm would register as a domain:
/// legal suffixes stripped, lower-cased, non-alphanumerics removed.
pub fn normalize_firm(firm: &str) -> Option<String> {
    let base: String = firm
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty() && !LEGAL_SUFFIXES.contains(token))
        .collect();

    if base.is_empty() {
        None
    } else {
        Some(base)
    }
}

/// Plausible web homes for a firm, in probe order.
pub fn candidate_domains(firm: &str) -> Vec<String> {
    let Some(base) = normalize_firm(firm) else {
        return Vec::new();
    };

    vec![
        format!("https://{}.ca", base),
        format!("https://{}.com", base),
        format!("https://www.{}.ca", base),
        format!("https://www.{}.com", base),
    ]
}

/// Pick the best email on a page: one bearing the person's first or last
/// name, then any non-generic inbox, then anything at all.
pub fn best_email(html: &str, first_name: &str, last_name: &str) -> Option<String> {
    let mut seen = HashSet::new();
    let emails: Vec<String> = EMAIL_RE
        .find_iter(html)
        .map(|m| m.as_str().to_lowercase())
        .filter(|email| seen.insert(email.clone()))
        .collect();

    if emails.is_empty() {
        return None;
    }

    let first = first_name.to_lowercase();
    let last = last_name.to_lowercase();

    let named = emails.iter().find(|email| {
        let local = email.split('@').next().unwrap_or_default();
        (!first.is_empty() && local.contains(&first)) || (!last.is_empty() && local.contains(&last))
    });
    if let Some(email) = named {
        return Some(email.clone());
    }

    let non_generic = emails.iter().find(|email| {
        let local = email.split('@').next().unwrap_or_default();
        !GENERIC_PREFIXES
            .iter()
            .any(|prefix| local == *prefix || local.starts_with(&format!("{}.", prefix)))
    });
    if let Some(email) = non_generic {
        return Some(email.clone());
    }

    emails.first().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firm_names_collapse_to_domain_bases() {
        assert_eq!(
            normalize_firm("Smith & Partners LLP").as_deref(),
            Some("smith")
        );
        assert_eq!(
            normalize_firm("Maple Leaf Accounting Inc.").as_deref(),
            Some("mapleleafaccounting")
        );
        assert_eq!(normalize_firm("LLP Inc Ltd"), None);
    }

    #[test]
    fn domain_guesses_cover_both_tlds_and_www() {
        let domains = candidate_domains("Tremblay Comptables Inc");
        assert_eq!(
            domains,
            vec![
                "https://tremblaycomptables.ca",
                "https://tremblaycomptables.com",
                "https://www.tremblaycomptables.ca",
                "https://www.tremblaycomptables.com",
            ]
        );
    }

    #[test]
    fn named_address_beats_role_inboxes() {
        let html = "Contact us: info@firm.ca or jsmith@firm.ca or sales@firm.ca";
        assert_eq!(
            best_email(html, "John", "Smith").as_deref(),
            Some("jsmith@firm.ca")
        );
    }

    #[test]
    fn non_generic_beats_generic_when_no_name_matches() {
        let html = "info@firm.ca, payroll@firm.ca";
        assert_eq!(
            best_email(html, "Anne", "Roy").as_deref(),
            Some("payroll@firm.ca")
        );
    }

    #[test]
    fn any_address_is_better_than_none() {
        let html = "Write to info@firm.ca";
        assert_eq!(best_email(html, "Anne", "Roy").as_deref(), Some("info@firm.ca"));
        assert_eq!(best_email("no addresses here", "Anne", "Roy"), None);
    }
}
