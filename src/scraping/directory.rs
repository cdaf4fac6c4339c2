// src/scraping/directory.rs
//! The generic provincial-directory scraper.
//!
//! Jurisdictions differ only in configuration (entry URL, column map,
//! enumeration strategy, a couple of flags), so there is exactly one engine
//! here and ten `DirectorySource` records in `sources.rs` - no per-province
//! subclassing.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::config_manager::ScrapingConfig;
use crate::core::database::{Database, NewPerson};
use crate::core::session::SessionHttpClient;
use crate::identity::identity_hash;
use crate::scraping::parsers::{
    detect_captcha, detect_sentinel, parse_detail_page, parse_embedded_script, parse_grid,
    DetailOutcome, GridColumns, RawMember, SearchSentinel,
};
use crate::scraping::strategies::{narrowed_terms, EnumerationStrategy};

/// Which response parser a jurisdiction's pages need.
#[derive(Debug, Clone, Copy)]
pub enum ParserKind {
    Grid(GridColumns),
    DetailPage,
    EmbeddedScript,
}

/// Everything jurisdiction-specific, as data.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    pub tag: &'static str,
    pub name: &'static str,
    pub province: &'static str,
    pub entry_url: &'static str,
    pub search_url: &'static str,
    pub parser: ParserKind,
    pub strategy: EnumerationStrategy,
    /// Form field carrying the last-name search term.
    pub last_name_field: &'static str,
    /// Form field for the first-name initial (narrowing strategy).
    pub first_name_field: Option<&'static str>,
    /// Search fields blanked on every submit so stale terms never linger.
    pub cleared_fields: &'static [&'static str],
    /// ASP.NET-style backends must hand us hidden form state on the entry
    /// page; its absence means the layout changed and guessing would
    /// silently produce garbage.
    pub requires_form_state: bool,
    /// Probe cheaply for a CAPTCHA wall before enumerating 676 terms
    /// against it.
    pub captcha_probe: bool,
    /// Query-string parameter for the SPA fallback GET.
    pub query_param: &'static str,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScrapeCounts {
    pub found: i64,
    pub inserted: i64,
    pub skipped: i64,
}

/// What one search response contained, after sentinel classification.
#[derive(Debug, Clone, PartialEq)]
enum PageData {
    Members(Vec<RawMember>),
    Refused,
    Empty,
}

pub struct DirectoryScraper<'a> {
    source: &'a DirectorySource,
    db: &'a Database,
    config: &'a ScrapingConfig,
}

impl<'a> DirectoryScraper<'a> {
    pub fn new(source: &'a DirectorySource, db: &'a Database, config: &'a ScrapingConfig) -> Self {
        Self { source, db, config }
    }

    /// Run the scrape under a tracked job. The job row always reaches
    /// exactly one terminal state, success or throw.
    pub async fn run(&self) -> Result<ScrapeCounts> {
        let job = self.db.jobs().start(self.source.tag).await?;
        info!(
            "[{}] scrape started ({}), job {}",
            self.source.tag, self.source.name, job.run_id
        );

        match self.run_inner(job.id).await {
            Ok((counts, note)) => {
                self.db
                    .jobs()
                    .complete(
                        job.id,
                        counts.found,
                        counts.inserted,
                        counts.skipped,
                        note.as_deref(),
                    )
                    .await?;
                info!(
                    "[{}] scrape completed: {} found, {} inserted, {} skipped",
                    self.source.tag, counts.found, counts.inserted, counts.skipped
                );
                Ok(counts)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                self.db.jobs().fail(job.id, &message).await?;
                warn!("[{}] scrape failed: {}", self.source.tag, message);
                Err(e)
            }
        }
    }

    async fn run_inner(&self, job_id: i64) -> Result<(ScrapeCounts, Option<String>)> {
        let mut session = SessionHttpClient::new(
            self.source.entry_url,
            self.config.request_delay,
            self.config.page_timeout,
        );

        if self.source.captcha_probe {
            let probe = session
                .get(self.source.entry_url)
                .await
                .context("CAPTCHA probe request failed")?;
            if detect_captcha(&probe) {
                anyhow::bail!(
                    "CAPTCHA challenge detected at {}; this source needs a browser-automation integration",
                    self.source.entry_url
                );
            }
        }

        if let EnumerationStrategy::SpaFallback = self.source.strategy {
            return self.run_spa(&mut session, job_id).await;
        }

        session
            .establish_session()
            .await
            .context("Initial session establishment failed")?;

        if self.source.requires_form_state && session.hidden_fields().is_empty() {
            anyhow::bail!(
                "Entry page at {} carries no hidden form fields; expected a view-state form. \
                 The directory layout has likely changed",
                self.source.entry_url
            );
        }

        let terms = self.source.strategy.terms();
        let interval = self.source.strategy.progress_interval();
        let mut counts = ScrapeCounts::default();

        for (index, term) in terms.iter().enumerate() {
            if index > 0 {
                session.pace().await;
            }

            match self.search_term(&mut session, term).await {
                Ok(members) => {
                    self.persist(&members, job_id, &mut counts).await;
                }
                Err(e) => {
                    // One bad term never aborts the sweep; five consecutive
                    // ones re-establish the session, and only a failed
                    // re-establishment ends the run.
                    warn!(
                        "[{}] search term '{}' failed: {:#}",
                        self.source.tag, term, e
                    );
                    session
                        .record_failure()
                        .await
                        .context("Session could not be re-established")?;
                }
            }

            if (index + 1) % interval == 0 {
                info!(
                    "[{}] {}/{} terms processed: {} found, {} inserted",
                    self.source.tag,
                    index + 1,
                    terms.len(),
                    counts.found,
                    counts.inserted
                );
            }
        }

        Ok((counts, None))
    }

    /// One search term end to end, including the narrowing loop when the
    /// directory refuses to list an unfiltered surname.
    async fn search_term(
        &self,
        session: &mut SessionHttpClient,
        term: &str,
    ) -> Result<Vec<RawMember>> {
        let html = session
            .submit_search(
                self.source.search_url,
                &[(self.source.last_name_field, term.to_string())],
                self.source.cleared_fields,
            )
            .await?;

        match self.classify(&html) {
            PageData::Members(members) => Ok(members),
            PageData::Empty => Ok(Vec::new()),
            PageData::Refused => {
                if self.source.strategy != EnumerationStrategy::Narrowing {
                    anyhow::bail!(
                        "Directory refused search '{}' and no narrowing path is configured",
                        term
                    );
                }
                self.narrow(session, term).await
            }
        }
    }

    /// A-Z first-initial narrowing for a refused surname, aggregating
    /// whatever each narrower sub-search returns.
    async fn narrow(
        &self,
        session: &mut SessionHttpClient,
        last_name: &str,
    ) -> Result<Vec<RawMember>> {
        let first_field = self.source.first_name_field.ok_or_else(|| {
            anyhow::anyhow!("Narrowing strategy configured without a first-name field")
        })?;

        info!(
            "[{}] '{}' refused as too broad, narrowing by initial",
            self.source.tag, last_name
        );

        let mut members = Vec::new();
        for (last, initial) in narrowed_terms(last_name) {
            session.pace().await;

            let html = match session
                .submit_search(
                    self.source.search_url,
                    &[
                        (self.source.last_name_field, last.clone()),
                        (first_field, initial.clone()),
                    ],
                    self.source.cleared_fields,
                )
                .await
            {
                Ok(html) => html,
                Err(e) => {
                    warn!(
                        "[{}] narrowed search '{} {}' failed: {:#}",
                        self.source.tag, last, initial, e
                    );
                    session.record_failure().await?;
                    continue;
                }
            };

            match self.classify(&html) {
                PageData::Members(found) => members.extend(found),
                PageData::Empty => {}
                PageData::Refused => warn!(
                    "[{}] narrowed search '{} {}' still refused, skipping",
                    self.source.tag, last, initial
                ),
            }
        }

        Ok(members)
    }

    /// SPA directories render nothing without JavaScript; try a query-string
    /// GET for partial pre-rendering and record empty runs as a known
    /// limitation rather than a silent zero.
    async fn run_spa(
        &self,
        session: &mut SessionHttpClient,
        job_id: i64,
    ) -> Result<(ScrapeCounts, Option<String>)> {
        let mut counts = ScrapeCounts::default();

        for (index, term) in self.source.strategy.terms().iter().enumerate() {
            if index > 0 {
                session.pace().await;
            }

            let url = format!(
                "{}?{}={}",
                self.source.search_url, self.source.query_param, term
            );
            match session.get(&url).await {
                Ok(html) => {
                    let members = parse_embedded_script(&html);
                    self.persist(&members, job_id, &mut counts).await;
                }
                Err(e) => {
                    warn!("[{}] SPA query '{}' failed: {:#}", self.source.tag, term, e);
                    session.record_failure().await?;
                }
            }
        }

        let note = if counts.found == 0 {
            Some(
                "SPA directory returned no server-rendered results; known limitation, \
                 needs a browser-automation integration"
                    .to_string(),
            )
        } else {
            None
        };

        Ok((counts, note))
    }

    fn classify(&self, html: &str) -> PageData {
        match detect_sentinel(html) {
            Some(SearchSentinel::TooManyResults) => return PageData::Refused,
            Some(SearchSentinel::NoResults) => return PageData::Empty,
            None => {}
        }

        match &self.source.parser {
            ParserKind::Grid(columns) => PageData::Members(parse_grid(html, columns)),
            ParserKind::EmbeddedScript => PageData::Members(parse_embedded_script(html)),
            ParserKind::DetailPage => match parse_detail_page(html) {
                DetailOutcome::Member(member) => PageData::Members(vec![member]),
                DetailOutcome::TooManyResults => PageData::Refused,
                DetailOutcome::NoResults => PageData::Empty,
            },
        }
    }

    /// Hash, dedup-check and insert each parsed member. A duplicate hash is
    /// a skip; a database error on one record is logged and counted, never
    /// fatal to the run.
    async fn persist(&self, members: &[RawMember], job_id: i64, counts: &mut ScrapeCounts) {
        let persons = self.db.persons();

        for member in members {
            counts.found += 1;

            let person = NewPerson {
                source: self.source.tag.to_string(),
                first_name: member.first_name.clone(),
                last_name: member.last_name.clone(),
                full_name: member.full_name.clone(),
                designation: member.designation.clone(),
                province: self.source.province.to_string(),
                city: member.city.clone(),
                firm: None,
                identity_hash: identity_hash(&member.full_name, self.source.province),
                job_id: Some(job_id),
            };

            match persons.insert(&person).await {
                Ok(true) => counts.inserted += 1,
                Ok(false) => counts.skipped += 1,
                Err(e) => {
                    warn!(
                        "[{}] failed to persist '{}': {:#}",
                        self.source.tag, member.full_name, e
                    );
                    counts.skipped += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::database::RecordFilter;

    fn grid_source() -> DirectorySource {
        DirectorySource {
            tag: "on",
            name: "Test Directory",
            province: "ON",
            entry_url: "https://example.ca/search",
            search_url: "https://example.ca/search",
            parser: ParserKind::Grid(GridColumns::combined(0, Some(1), true)),
            strategy: EnumerationStrategy::Narrowing,
            last_name_field: "txtLastName",
            first_name_field: Some("txtFirstName"),
            cleared_fields: &["txtCity"],
            requires_form_state: true,
            captcha_probe: false,
            query_param: "q",
        }
    }

    #[tokio::test]
    async fn classify_routes_sentinels_before_parsing() {
        let db = Database::in_memory().await.unwrap();
        let config = ScrapingConfig::default();
        let source = grid_source();
        let scraper = DirectoryScraper::new(&source, &db, &config);

        let refused = "<h2>Please refine your search criteria.</h2>";
        assert_eq!(scraper.classify(refused), PageData::Refused);

        let empty = "<h3>No records found</h3>";
        assert_eq!(scraper.classify(empty), PageData::Empty);

        let grid = "<table><tr><td>Smith, John CPA</td><td>Toronto</td></tr></table>";
        match scraper.classify(grid) {
            PageData::Members(members) => assert_eq!(members.len(), 1),
            other => panic!("expected members, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn persist_is_idempotent_across_runs() {
        let db = Database::in_memory().await.unwrap();
        let config = ScrapingConfig::default();
        let source = grid_source();
        let scraper = DirectoryScraper::new(&source, &db, &config);

        let members = vec![
            RawMember {
                first_name: "John".to_string(),
                last_name: "Smith".to_string(),
                full_name: "John Smith".to_string(),
                city: Some("Toronto".to_string()),
                designation: Some("CPA".to_string()),
            },
            RawMember {
                first_name: "Anne".to_string(),
                last_name: "Roy".to_string(),
                full_name: "Anne Roy".to_string(),
                city: None,
                designation: None,
            },
        ];

        let mut first_run = ScrapeCounts::default();
        scraper.persist(&members, 1, &mut first_run).await;
        assert_eq!((first_run.found, first_run.inserted, first_run.skipped), (2, 2, 0));

        // Second pass over identical responses: every record dedups.
        let mut second_run = ScrapeCounts::default();
        scraper.persist(&members, 2, &mut second_run).await;
        assert_eq!(second_run.inserted, 0);
        assert_eq!(second_run.skipped, first_run.inserted);

        let total = db.persons().count(&RecordFilter::default()).await.unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn refusal_without_narrowing_is_a_protection_wall() {
        let db = Database::in_memory().await.unwrap();
        let config = ScrapingConfig::default();
        let mut source = grid_source();
        source.strategy = EnumerationStrategy::ExactNameList;
        let scraper = DirectoryScraper::new(&source, &db, &config);

        // Classified as refused; with no narrowing path the engine must
        // surface this as an error, which search_term encodes.
        let refused = "<h2>Too many results. Narrow your search.</h2>";
        assert_eq!(scraper.classify(refused), PageData::Refused);
    }
}
