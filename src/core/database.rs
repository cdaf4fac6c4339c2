// src/core/database.rs
//! Unified database operations - connection management, schema, repositories

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Hard cap on page size for list queries.
const MAX_PAGE_LIMIT: i64 = 100;

// ===== Core Database Connection Management =====

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create new database connection with automatic setup
    pub async fn new(database_path: &Path) -> Result<Self> {
        if let Some(parent) = database_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path.display());
        let pool = SqlitePool::connect(&database_url).await.with_context(|| {
            format!("Failed to connect to database: {}", database_path.display())
        })?;

        info!(
            "Database connection established: {}",
            database_path.display()
        );

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory database, used by tests and nothing else
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get pool reference for custom operations
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn persons(&self) -> PersonRepository<'_> {
        PersonRepository::new(&self.pool)
    }

    pub fn businesses(&self) -> BusinessRepository<'_> {
        BusinessRepository::new(&self.pool)
    }

    pub fn jobs(&self) -> JobRepository<'_> {
        JobRepository::new(&self.pool)
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scraped_persons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                full_name TEXT NOT NULL,
                designation TEXT,
                province TEXT NOT NULL,
                city TEXT,
                firm TEXT,
                phone TEXT,
                email TEXT,
                identity_hash TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'raw',
                job_id INTEGER,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scraped_businesses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                name TEXT NOT NULL,
                registry_number TEXT UNIQUE,
                province TEXT,
                city TEXT,
                industry TEXT,
                employee_range TEXT,
                operating_status TEXT,
                job_id INTEGER,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scrape_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                found INTEGER NOT NULL DEFAULT 0,
                inserted INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                note TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes for the filtered list/count queries
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_persons_source ON scraped_persons(source);")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_persons_province ON scraped_persons(province);",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_persons_status ON scraped_persons(status);")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_started ON scrape_jobs(started_at);")
            .execute(&self.pool)
            .await?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }
}

// ===== Models =====

/// Lifecycle of a scraped professional record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonStatus {
    Raw,
    Enriched,
    Contacted,
    Converted,
}

impl PersonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Enriched => "enriched",
            Self::Contacted => "contacted",
            Self::Converted => "converted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScrapedPerson {
    pub id: i64,
    pub source: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub designation: Option<String>,
    pub province: String,
    pub city: Option<String>,
    pub firm: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub identity_hash: String,
    pub status: String,
    pub job_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a professional record; the identity hash is computed
/// by the caller before this struct exists.
#[derive(Debug, Clone)]
pub struct NewPerson {
    pub source: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub designation: Option<String>,
    pub province: String,
    pub city: Option<String>,
    pub firm: Option<String>,
    pub identity_hash: String,
    pub job_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScrapedBusiness {
    pub id: i64,
    pub source: String,
    pub name: String,
    pub registry_number: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub industry: Option<String>,
    pub employee_range: Option<String>,
    pub operating_status: Option<String>,
    pub job_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBusiness {
    pub source: String,
    pub name: String,
    pub registry_number: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub industry: Option<String>,
    pub employee_range: Option<String>,
    pub operating_status: Option<String>,
    pub job_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScrapeJob {
    pub id: i64,
    pub run_id: String,
    pub source: String,
    pub status: String,
    pub found: i64,
    pub inserted: i64,
    pub skipped: i64,
    pub error: Option<String>,
    pub note: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Filter + pagination for the person/business list and count queries.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub source: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl RecordFilter {
    /// Page size clamped to [1, 100]; page is 1-based.
    pub fn page_window(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(50).clamp(1, MAX_PAGE_LIMIT);
        let page = self.page.unwrap_or(1).max(1);
        (limit, (page - 1) * limit)
    }
}

// ===== Person Repository =====

pub struct PersonRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PersonRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a newly scraped person. Returns false when a record with the
    /// same identity hash already exists - the duplicate is rejected, never
    /// merged. The UNIQUE constraint makes check-and-insert atomic.
    pub async fn insert(&self, person: &NewPerson) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO scraped_persons
                (source, first_name, last_name, full_name, designation,
                 province, city, firm, identity_hash, status, job_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'raw', ?, ?)
            "#,
        )
        .bind(&person.source)
        .bind(&person.first_name)
        .bind(&person.last_name)
        .bind(&person.full_name)
        .bind(&person.designation)
        .bind(&person.province)
        .bind(&person.city)
        .bind(&person.firm)
        .bind(&person.identity_hash)
        .bind(person.job_id)
        .bind(Utc::now())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Hard delete every record for a source. Admin re-scrape only.
    pub async fn purge_source(&self, source: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scraped_persons WHERE source = ?")
            .bind(source)
            .execute(self.pool)
            .await?;

        let purged = result.rows_affected();
        info!("Purged {} person records for source: {}", purged, source);
        Ok(purged)
    }

    pub async fn list(&self, filter: &RecordFilter) -> Result<Vec<ScrapedPerson>> {
        let (sql, binds) = filtered_query(
            "SELECT * FROM scraped_persons",
            filter,
            "status",
            "ORDER BY created_at DESC, id DESC",
        );
        let (limit, offset) = filter.page_window();

        let mut query = sqlx::query_as::<_, ScrapedPerson>(&sql);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }
        let persons = query
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool)
            .await?;

        Ok(persons)
    }

    pub async fn count(&self, filter: &RecordFilter) -> Result<i64> {
        let (sql, binds) =
            filtered_count("SELECT COUNT(*) FROM scraped_persons", filter, "status");

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }

        Ok(query.fetch_one(self.pool).await?)
    }

    /// Records eligible for contact enrichment: a firm to guess a domain
    /// from, no email yet, still in the raw state.
    pub async fn unenriched_batch(&self, limit: i64) -> Result<Vec<ScrapedPerson>> {
        let persons = sqlx::query_as::<_, ScrapedPerson>(
            r#"
            SELECT * FROM scraped_persons
            WHERE status = 'raw' AND email IS NULL
              AND firm IS NOT NULL AND firm != ''
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(persons)
    }

    pub async fn set_contact(&self, id: i64, email: &str, status: PersonStatus) -> Result<()> {
        sqlx::query("UPDATE scraped_persons SET email = ?, status = ? WHERE id = ?")
            .bind(email)
            .bind(status.as_str())
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}

// ===== Business Repository =====

pub struct BusinessRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BusinessRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert one business. The registry-assigned number is the dedup key
    /// when present; records without one are always inserted.
    pub async fn insert(&self, business: &NewBusiness) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO scraped_businesses
                (source, name, registry_number, province, city, industry,
                 employee_range, operating_status, job_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&business.source)
        .bind(&business.name)
        .bind(&business.registry_number)
        .bind(&business.province)
        .bind(&business.city)
        .bind(&business.industry)
        .bind(&business.employee_range)
        .bind(&business.operating_status)
        .bind(business.job_id)
        .bind(Utc::now())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Batch insert inside one transaction. Returns (inserted, skipped);
    /// duplicates by registry number count as skipped, not errors.
    pub async fn insert_batch(&self, batch: &[NewBusiness]) -> Result<(u64, u64)> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut inserted = 0u64;
        let mut skipped = 0u64;

        for business in batch {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO scraped_businesses
                    (source, name, registry_number, province, city, industry,
                     employee_range, operating_status, job_id, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&business.source)
            .bind(&business.name)
            .bind(&business.registry_number)
            .bind(&business.province)
            .bind(&business.city)
            .bind(&business.industry)
            .bind(&business.employee_range)
            .bind(&business.operating_status)
            .bind(business.job_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            } else {
                skipped += 1;
            }
        }

        tx.commit().await?;
        Ok((inserted, skipped))
    }

    pub async fn list(&self, filter: &RecordFilter) -> Result<Vec<ScrapedBusiness>> {
        let (sql, binds) = filtered_query(
            "SELECT * FROM scraped_businesses",
            filter,
            "operating_status",
            "ORDER BY created_at DESC, id DESC",
        );
        let (limit, offset) = filter.page_window();

        let mut query = sqlx::query_as::<_, ScrapedBusiness>(&sql);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }
        let businesses = query
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool)
            .await?;

        Ok(businesses)
    }

    pub async fn count(&self, filter: &RecordFilter) -> Result<i64> {
        let (sql, binds) = filtered_count(
            "SELECT COUNT(*) FROM scraped_businesses",
            filter,
            "operating_status",
        );

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }

        Ok(query.fetch_one(self.pool).await?)
    }
}

// ===== Job Repository =====

pub struct JobRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> JobRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a job row in the running state and return it. The run id is a
    /// UUID handed back to fire-and-forget callers for later polling.
    pub async fn start(&self, source: &str) -> Result<ScrapeJob> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO scrape_jobs (run_id, source, status, started_at)
            VALUES (?, ?, 'running', ?)
            "#,
        )
        .bind(&run_id)
        .bind(source)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(ScrapeJob {
            id: result.last_insert_rowid(),
            run_id,
            source: source.to_string(),
            status: "running".to_string(),
            found: 0,
            inserted: 0,
            skipped: 0,
            error: None,
            note: None,
            started_at: now,
            completed_at: None,
        })
    }

    pub async fn complete(
        &self,
        id: i64,
        found: i64,
        inserted: i64,
        skipped: i64,
        note: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET status = 'completed', found = ?, inserted = ?, skipped = ?,
                note = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(found)
        .bind(inserted)
        .bind(skipped)
        .bind(note)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET status = 'failed', error = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Most recent jobs first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<ScrapeJob>> {
        let jobs = sqlx::query_as::<_, ScrapeJob>(
            "SELECT * FROM scrape_jobs ORDER BY started_at DESC, id DESC LIMIT ?",
        )
        .bind(limit.clamp(1, MAX_PAGE_LIMIT))
        .fetch_all(self.pool)
        .await?;

        Ok(jobs)
    }

    pub async fn find_by_run_id(&self, run_id: &str) -> Result<Option<ScrapeJob>> {
        let job = sqlx::query_as::<_, ScrapeJob>("SELECT * FROM scrape_jobs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(self.pool)
            .await?;

        Ok(job)
    }
}

// ===== Filter SQL assembly =====

fn filter_clauses(filter: &RecordFilter, status_column: &str) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut binds = Vec::new();

    if let Some(source) = &filter.source {
        clauses.push("source = ?".to_string());
        binds.push(source.clone());
    }
    if let Some(province) = &filter.province {
        clauses.push("province = ?".to_string());
        binds.push(province.clone());
    }
    if let Some(city) = &filter.city {
        clauses.push("city = ?".to_string());
        binds.push(city.clone());
    }
    if let Some(status) = &filter.status {
        clauses.push(format!("{} = ?", status_column));
        binds.push(status.clone());
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    (where_sql, binds)
}

fn filtered_query(
    base: &str,
    filter: &RecordFilter,
    status_column: &str,
    order: &str,
) -> (String, Vec<String>) {
    let (where_sql, binds) = filter_clauses(filter, status_column);
    (
        format!("{}{} {} LIMIT ? OFFSET ?", base, where_sql, order),
        binds,
    )
}

fn filtered_count(base: &str, filter: &RecordFilter, status_column: &str) -> (String, Vec<String>) {
    let (where_sql, binds) = filter_clauses(filter, status_column);
    (format!("{}{}", base, where_sql), binds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_person(hash: &str) -> NewPerson {
        NewPerson {
            source: "on".to_string(),
            first_name: "John".to_string(),
            last_name: "Smith".to_string(),
            full_name: "John Smith".to_string(),
            designation: Some("CPA, CA".to_string()),
            province: "ON".to_string(),
            city: Some("Toronto".to_string()),
            firm: None,
            identity_hash: hash.to_string(),
            job_id: None,
        }
    }

    #[test]
    fn page_window_caps_limit() {
        let filter = RecordFilter {
            limit: Some(500),
            page: Some(3),
            ..Default::default()
        };
        let (limit, offset) = filter.page_window();
        assert_eq!(limit, 100);
        assert_eq!(offset, 200);

        let default_window = RecordFilter::default().page_window();
        assert_eq!(default_window, (50, 0));
    }

    #[test]
    fn filter_clauses_compose_in_bind_order() {
        let filter = RecordFilter {
            source: Some("on".to_string()),
            status: Some("raw".to_string()),
            ..Default::default()
        };
        let (sql, binds) = filter_clauses(&filter, "status");
        assert_eq!(sql, " WHERE source = ? AND status = ?");
        assert_eq!(binds, vec!["on".to_string(), "raw".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_hash_is_rejected_not_merged() {
        let db = Database::in_memory().await.unwrap();
        let persons = db.persons();

        assert!(persons.insert(&sample_person("abc123")).await.unwrap());
        assert!(!persons.insert(&sample_person("abc123")).await.unwrap());

        let count = persons.count(&RecordFilter::default()).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn purge_is_scoped_to_source() {
        let db = Database::in_memory().await.unwrap();
        let persons = db.persons();

        persons.insert(&sample_person("h1")).await.unwrap();
        let mut bc_person = sample_person("h2");
        bc_person.source = "bc".to_string();
        persons.insert(&bc_person).await.unwrap();

        let purged = persons.purge_source("on").await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(persons.count(&RecordFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn job_reaches_exactly_one_terminal_state() {
        let db = Database::in_memory().await.unwrap();
        let jobs = db.jobs();

        let job = jobs.start("on").await.unwrap();
        assert_eq!(job.status, "running");

        jobs.fail(job.id, "CAPTCHA challenge detected").await.unwrap();

        let stored = jobs.find_by_run_id(&job.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, "failed");
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.error.as_deref(), Some("CAPTCHA challenge detected"));
    }

    #[tokio::test]
    async fn business_batch_dedups_on_registry_number() {
        let db = Database::in_memory().await.unwrap();
        let businesses = db.businesses();

        let business = NewBusiness {
            source: "registry-bulk".to_string(),
            name: "Maple Widgets Inc".to_string(),
            registry_number: Some("123456789".to_string()),
            province: Some("ON".to_string()),
            city: Some("Ottawa".to_string()),
            industry: Some("Manufacturing".to_string()),
            employee_range: Some("1-4".to_string()),
            operating_status: Some("Active".to_string()),
            job_id: None,
        };

        let (inserted, skipped) = businesses
            .insert_batch(&[business.clone(), business])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(skipped, 1);
    }
}
