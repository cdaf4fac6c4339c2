// src/web/mod.rs - route layer over the core services

pub mod handlers;
pub mod types;

pub use types::*;

use anyhow::Result;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Header, Status};
use rocket::serde::json::Json;
use rocket::{catchers, get, options, post, routes, Request, Response, State};
use tracing::info;

use crate::core::config_manager::{EnvironmentConfig, ScrapingConfig};
use crate::core::database::{Database, RecordFilter, ScrapeJob, ScrapedBusiness, ScrapedPerson};
use crate::matching::MatchResult;

// CORS Fairing
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "Add CORS headers to responses",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "POST, GET, OPTIONS",
        ));
        response.set_header(Header::new("Access-Control-Allow-Headers", "*"));
    }
}

// ===== Routes =====

#[post("/match", data = "<request>")]
pub async fn match_candidates(
    request: Json<MatchRequest>,
) -> Json<DataResponse<Vec<MatchResult>>> {
    handlers::match_candidates_handler(request).await
}

#[post("/scrape", data = "<request>")]
pub async fn trigger_scrape(
    request: Json<ScrapeRequest>,
    db: &State<Database>,
    config: &State<ScrapingConfig>,
) -> Result<Json<ActionResponse>, Json<StandardErrorResponse>> {
    handlers::trigger_scrape_handler(request, db, config).await
}

#[post("/rescrape", data = "<request>")]
pub async fn rescrape(
    request: Json<RescrapeRequest>,
    db: &State<Database>,
    config: &State<ScrapingConfig>,
) -> Result<Json<ActionResponse>, Json<StandardErrorResponse>> {
    handlers::rescrape_handler(request, db, config).await
}

#[post("/registry/load", data = "<request>")]
pub async fn load_registry(
    request: Json<RegistryLoadRequest>,
    db: &State<Database>,
    config: &State<ScrapingConfig>,
) -> Json<ActionResponse> {
    handlers::registry_load_handler(request, db, config).await
}

#[post("/registry/search")]
pub async fn search_registry(
    db: &State<Database>,
    config: &State<ScrapingConfig>,
) -> Json<ActionResponse> {
    handlers::registry_search_handler(db, config).await
}

#[post("/enrich")]
pub async fn enrich(
    db: &State<Database>,
    config: &State<ScrapingConfig>,
) -> Json<ActionResponse> {
    handlers::enrich_handler(db, config).await
}

#[get("/jobs?<limit>")]
pub async fn recent_jobs(
    limit: Option<i64>,
    db: &State<Database>,
) -> Result<Json<DataResponse<Vec<ScrapeJob>>>, Json<StandardErrorResponse>> {
    handlers::recent_jobs_handler(limit, db).await
}

#[get("/jobs/<run_id>")]
pub async fn job_by_run_id(
    run_id: &str,
    db: &State<Database>,
) -> Result<Json<DataResponse<ScrapeJob>>, Json<StandardErrorResponse>> {
    handlers::job_by_run_id_handler(run_id, db).await
}

#[get("/persons?<source>&<province>&<city>&<status>&<page>&<limit>")]
#[allow(clippy::too_many_arguments)]
pub async fn list_persons(
    source: Option<String>,
    province: Option<String>,
    city: Option<String>,
    status: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
    db: &State<Database>,
) -> Result<Json<DataResponse<Vec<ScrapedPerson>>>, Json<StandardErrorResponse>> {
    let filter = RecordFilter {
        source,
        province,
        city,
        status,
        page,
        limit,
    };
    handlers::list_persons_handler(filter, db).await
}

#[get("/persons/count?<source>&<province>&<city>&<status>")]
pub async fn count_persons(
    source: Option<String>,
    province: Option<String>,
    city: Option<String>,
    status: Option<String>,
    db: &State<Database>,
) -> Result<Json<DataResponse<CountData>>, Json<StandardErrorResponse>> {
    let filter = RecordFilter {
        source,
        province,
        city,
        status,
        ..Default::default()
    };
    handlers::count_persons_handler(filter, db).await
}

#[get("/businesses?<source>&<province>&<city>&<status>&<page>&<limit>")]
#[allow(clippy::too_many_arguments)]
pub async fn list_businesses(
    source: Option<String>,
    province: Option<String>,
    city: Option<String>,
    status: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
    db: &State<Database>,
) -> Result<Json<DataResponse<Vec<ScrapedBusiness>>>, Json<StandardErrorResponse>> {
    let filter = RecordFilter {
        source,
        province,
        city,
        status,
        page,
        limit,
    };
    handlers::list_businesses_handler(filter, db).await
}

#[get("/businesses/count?<source>&<province>&<city>&<status>")]
pub async fn count_businesses(
    source: Option<String>,
    province: Option<String>,
    city: Option<String>,
    status: Option<String>,
    db: &State<Database>,
) -> Result<Json<DataResponse<CountData>>, Json<StandardErrorResponse>> {
    let filter = RecordFilter {
        source,
        province,
        city,
        status,
        ..Default::default()
    };
    handlers::count_businesses_handler(filter, db).await
}

#[get("/health")]
pub async fn health(db: &State<Database>) -> Json<TextResponse> {
    handlers::health_handler(db).await
}

#[options("/<_..>")]
pub async fn options() -> Status {
    Status::Ok
}

// Error catchers
#[rocket::catch(400)]
pub fn bad_request() -> Json<StandardErrorResponse> {
    Json(StandardErrorResponse::new(
        "Invalid request format".to_string(),
        "BAD_REQUEST".to_string(),
        vec![
            "Check your request JSON format".to_string(),
            "Verify all required fields are present".to_string(),
        ],
    ))
}

#[rocket::catch(404)]
pub fn not_found() -> Json<StandardErrorResponse> {
    Json(StandardErrorResponse::new(
        "Resource not found".to_string(),
        "NOT_FOUND".to_string(),
        vec!["Check the request path".to_string()],
    ))
}

#[rocket::catch(500)]
pub fn internal_error() -> Json<StandardErrorResponse> {
    Json(StandardErrorResponse::new(
        "Internal server error".to_string(),
        "INTERNAL_ERROR".to_string(),
        vec!["Try again in a few moments".to_string()],
    ))
}

// Main server start function
pub async fn start_web_server(
    environment: EnvironmentConfig,
    scraping: ScrapingConfig,
    port: u16,
) -> Result<()> {
    let db = Database::new(&environment.database_path).await?;

    info!("Starting MapleMatch API server on port {}", port);
    info!("Database: {}", environment.database_path.display());
    info!("Scrape triggers are fire-and-forget; poll /api/jobs for outcomes");

    let figment = rocket::Config::figment()
        .merge(("port", port))
        .merge(("address", "0.0.0.0"));

    let _rocket = rocket::custom(figment)
        .attach(Cors)
        .manage(db)
        .manage(scraping)
        .register("/api", catchers![bad_request, not_found, internal_error])
        .mount(
            "/api",
            routes![
                match_candidates,
                trigger_scrape,
                rescrape,
                load_registry,
                search_registry,
                enrich,
                recent_jobs,
                job_by_run_id,
                list_persons,
                count_persons,
                list_businesses,
                count_businesses,
                health,
                options,
            ],
        )
        .launch()
        .await;

    Ok(())
}
