// src/web/handlers.rs - handler functions behind the thin route layer

use rocket::serde::json::Json;
use rocket::State;
use tracing::{error, info};

use crate::core::config_manager::ScrapingConfig;
use crate::core::database::{Database, RecordFilter, ScrapeJob, ScrapedBusiness, ScrapedPerson};
use crate::enrichment::ContactEnricher;
use crate::matching::{find_top_matches, MatchResult};
use crate::registry::{BulkRegistryLoader, RegistrySearchScraper};
use crate::scraping::orchestrator::ScraperOrchestrator;
use crate::scraping::sources::{find_source, source_tags};
use crate::web::types::{
    ActionResponse, CountData, DataResponse, MatchRequest, RegistryLoadRequest, RescrapeRequest,
    ScrapeRequest, StandardErrorResponse, TextResponse,
};

const DEFAULT_MATCH_LIMIT: usize = 10;

// ===== Matching =====

/// Synchronous: scores the supplied candidates and returns the ranking.
pub async fn match_candidates_handler(
    request: Json<MatchRequest>,
) -> Json<DataResponse<Vec<MatchResult>>> {
    let limit = request.limit.unwrap_or(DEFAULT_MATCH_LIMIT);
    let results = find_top_matches(&request.client, &request.candidates, limit);

    info!(
        "Match request: {} candidates in, {} ranked out",
        request.candidates.len(),
        results.len()
    );

    Json(DataResponse::success(
        format!("{} matches ranked", results.len()),
        results,
    ))
}

// ===== Scrape triggers (fire-and-forget) =====

pub async fn trigger_scrape_handler(
    request: Json<ScrapeRequest>,
    db: &State<Database>,
    config: &State<ScrapingConfig>,
) -> Result<Json<ActionResponse>, Json<StandardErrorResponse>> {
    let orchestrator = ScraperOrchestrator::new(db.inner().clone(), config.inner().clone());

    match &request.source {
        Some(tag) => {
            // Fail fast on unknown names; everything after the ack is only
            // observable through the job queries.
            if find_source(tag).is_none() {
                return Err(Json(StandardErrorResponse::new(
                    format!("Unknown scraper '{}'", tag),
                    "UNKNOWN_SOURCE".to_string(),
                    vec![format!("Valid sources: {}", source_tags().join(", "))],
                )));
            }

            let tag = tag.clone();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.run_single(&tag).await {
                    error!("Background scrape '{}' failed: {:#}", tag, e);
                }
            });

            Ok(Json(ActionResponse::accepted(
                format!("Scrape of '{}' started", request.source.as_deref().unwrap_or_default()),
                "scrape_started".to_string(),
            )))
        }
        None => {
            tokio::spawn(async move {
                orchestrator.run_all().await;
            });

            Ok(Json(ActionResponse::accepted(
                "Scrape of all registered sources started".to_string(),
                "scrape_all_started".to_string(),
            )))
        }
    }
}

/// Admin purge-then-run. Irreversible for the named source's records.
pub async fn rescrape_handler(
    request: Json<RescrapeRequest>,
    db: &State<Database>,
    config: &State<ScrapingConfig>,
) -> Result<Json<ActionResponse>, Json<StandardErrorResponse>> {
    if find_source(&request.source).is_none() {
        return Err(Json(StandardErrorResponse::new(
            format!("Unknown scraper '{}'", request.source),
            "UNKNOWN_SOURCE".to_string(),
            vec![format!("Valid sources: {}", source_tags().join(", "))],
        )));
    }

    let orchestrator = ScraperOrchestrator::new(db.inner().clone(), config.inner().clone());
    let tag = request.source.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.rescrape(&tag).await {
            error!("Background re-scrape '{}' failed: {:#}", tag, e);
        }
    });

    Ok(Json(ActionResponse::accepted(
        format!("Purge and re-scrape of '{}' started", request.source),
        "rescrape_started".to_string(),
    )))
}

pub async fn registry_load_handler(
    request: Json<RegistryLoadRequest>,
    db: &State<Database>,
    config: &State<ScrapingConfig>,
) -> Json<ActionResponse> {
    let db = db.inner().clone();
    let config = config.inner().clone();
    let url = request.archive_url.clone();

    tokio::spawn(async move {
        let loader = BulkRegistryLoader::new(&db, &config);
        if let Err(e) = loader.load(&url).await {
            error!("Background registry load failed: {:#}", e);
        }
    });

    Json(ActionResponse::accepted(
        "Bulk registry load started".to_string(),
        "registry_load_started".to_string(),
    ))
}

pub async fn registry_search_handler(
    db: &State<Database>,
    config: &State<ScrapingConfig>,
) -> Json<ActionResponse> {
    let db = db.inner().clone();
    let config = config.inner().clone();

    tokio::spawn(async move {
        let scraper = RegistrySearchScraper::new(&db, &config);
        if let Err(e) = scraper.run().await {
            error!("Background registry search failed: {:#}", e);
        }
    });

    Json(ActionResponse::accepted(
        "Registry search scrape started".to_string(),
        "registry_search_started".to_string(),
    ))
}

pub async fn enrich_handler(
    db: &State<Database>,
    config: &State<ScrapingConfig>,
) -> Json<ActionResponse> {
    let db = db.inner().clone();
    let config = config.inner().clone();

    tokio::spawn(async move {
        let enricher = ContactEnricher::new(&db, &config);
        if let Err(e) = enricher.run().await {
            error!("Background enrichment failed: {:#}", e);
        }
    });

    Json(ActionResponse::accepted(
        "Contact enrichment batch started".to_string(),
        "enrichment_started".to_string(),
    ))
}

// ===== Job observability =====

pub async fn recent_jobs_handler(
    limit: Option<i64>,
    db: &State<Database>,
) -> Result<Json<DataResponse<Vec<ScrapeJob>>>, Json<StandardErrorResponse>> {
    match db.jobs().recent(limit.unwrap_or(20)).await {
        Ok(jobs) => Ok(Json(DataResponse::success(
            format!("{} recent jobs", jobs.len()),
            jobs,
        ))),
        Err(e) => {
            error!("Job listing failed: {:#}", e);
            Err(Json(database_error()))
        }
    }
}

pub async fn job_by_run_id_handler(
    run_id: &str,
    db: &State<Database>,
) -> Result<Json<DataResponse<ScrapeJob>>, Json<StandardErrorResponse>> {
    match db.jobs().find_by_run_id(run_id).await {
        Ok(Some(job)) => Ok(Json(DataResponse::success(
            format!("Job {} is {}", job.run_id, job.status),
            job,
        ))),
        Ok(None) => Err(Json(StandardErrorResponse::new(
            format!("No job with run id '{}'", run_id),
            "JOB_NOT_FOUND".to_string(),
            vec!["List recent jobs via /api/jobs".to_string()],
        ))),
        Err(e) => {
            error!("Job lookup failed: {:#}", e);
            Err(Json(database_error()))
        }
    }
}

// ===== Record queries =====

#[allow(clippy::too_many_arguments)]
pub async fn list_persons_handler(
    filter: RecordFilter,
    db: &State<Database>,
) -> Result<Json<DataResponse<Vec<ScrapedPerson>>>, Json<StandardErrorResponse>> {
    match db.persons().list(&filter).await {
        Ok(persons) => Ok(Json(DataResponse::success(
            format!("{} professionals", persons.len()),
            persons,
        ))),
        Err(e) => {
            error!("Person listing failed: {:#}", e);
            Err(Json(database_error()))
        }
    }
}

pub async fn count_persons_handler(
    filter: RecordFilter,
    db: &State<Database>,
) -> Result<Json<DataResponse<CountData>>, Json<StandardErrorResponse>> {
    match db.persons().count(&filter).await {
        Ok(count) => Ok(Json(DataResponse::success(
            "Professional record count".to_string(),
            CountData { count },
        ))),
        Err(e) => {
            error!("Person count failed: {:#}", e);
            Err(Json(database_error()))
        }
    }
}

pub async fn list_businesses_handler(
    filter: RecordFilter,
    db: &State<Database>,
) -> Result<Json<DataResponse<Vec<ScrapedBusiness>>>, Json<StandardErrorResponse>> {
    match db.businesses().list(&filter).await {
        Ok(businesses) => Ok(Json(DataResponse::success(
            format!("{} businesses", businesses.len()),
            businesses,
        ))),
        Err(e) => {
            error!("Business listing failed: {:#}", e);
            Err(Json(database_error()))
        }
    }
}

pub async fn count_businesses_handler(
    filter: RecordFilter,
    db: &State<Database>,
) -> Result<Json<DataResponse<CountData>>, Json<StandardErrorResponse>> {
    match db.businesses().count(&filter).await {
        Ok(count) => Ok(Json(DataResponse::success(
            "Business record count".to_string(),
            CountData { count },
        ))),
        Err(e) => {
            error!("Business count failed: {:#}", e);
            Err(Json(database_error()))
        }
    }
}

// ===== Health =====

pub async fn health_handler(db: &State<Database>) -> Json<TextResponse> {
    match db.health_check().await {
        Ok(()) => Json(TextResponse::success("ok".to_string())),
        Err(e) => {
            error!("Health check failed: {:#}", e);
            Json(TextResponse {
                response_type: crate::web::types::ResponseType::Text,
                success: false,
                message: "database unreachable".to_string(),
            })
        }
    }
}

fn database_error() -> StandardErrorResponse {
    StandardErrorResponse::new(
        "Database query failed".to_string(),
        "DATABASE_ERROR".to_string(),
        vec!["Try again in a few moments".to_string()],
    )
}
