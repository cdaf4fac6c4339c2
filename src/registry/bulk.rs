// src/registry/bulk.rs
//! Bulk ingestion of the government open business register extract.
//!
//! One large compressed archive, downloaded whole, whose main data file is
//! always the largest CSV entry. Columns are resolved by header name (the
//! publisher reorders them between releases), the NAICS code is translated
//! to a human label, and the StatCan `..` missing-value sentinel is
//! normalized to empty before anything reaches the database.

use anyhow::{Context, Result};
use reqwest::Client;
use std::io::{Cursor, Read};
use tracing::{info, warn};
use zip::ZipArchive;

use crate::core::config_manager::ScrapingConfig;
use crate::core::database::{Database, NewBusiness};
use crate::core::session::COLLECTOR_USER_AGENT;
use crate::scraping::directory::ScrapeCounts;

/// Rows per insert transaction; bounds memory and transaction size.
const BATCH_SIZE: usize = 500;

/// StatCan's literal marker for "value unavailable".
const MISSING_VALUE_SENTINEL: &str = "..";

/// Candidate header names per target field, checked case-insensitively.
const NAME_HEADERS: &[&str] = &["business_name", "busname", "company_name", "legal_name", "name"];
const NUMBER_HEADERS: &[&str] = &["registry_number", "busno", "business_number", "corp_num", "bn"];
const PROVINCE_HEADERS: &[&str] = &["province", "prov", "province_en"];
const CITY_HEADERS: &[&str] = &["city", "municipality", "csd_name", "csd"];
const NAICS_HEADERS: &[&str] = &["naics", "naics_code", "industry_code"];
const EMPLOYEE_HEADERS: &[&str] = &["employees", "employee_count", "employment_size", "emp"];
const STATUS_HEADERS: &[&str] = &["status", "operating_status", "business_status"];

pub struct BulkRegistryLoader<'a> {
    db: &'a Database,
    config: &'a ScrapingConfig,
    client: Client,
}

impl<'a> BulkRegistryLoader<'a> {
    pub fn new(db: &'a Database, config: &'a ScrapingConfig) -> Self {
        let client = Client::builder()
            .user_agent(COLLECTOR_USER_AGENT)
            .timeout(config.download_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { db, config, client }
    }

    /// Download, extract and load the register under a tracked job.
    pub async fn load(&self, archive_url: &str) -> Result<ScrapeCounts> {
        let job = self.db.jobs().start("registry-bulk").await?;
        info!("Bulk register load started from {}", archive_url);

        match self.load_inner(archive_url, job.id).await {
            Ok(counts) => {
                self.db
                    .jobs()
                    .complete(job.id, counts.found, counts.inserted, counts.skipped, None)
                    .await?;
                info!(
                    "Bulk register load completed: {} rows, {} inserted, {} skipped",
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

    async fn load_inner(&self, archive_url: &str, job_id: i64) -> Result<ScrapeCounts> {
        let response = self
            .client
            .get(archive_url)
            .send()
            .await
            .with_context(|| format!("Failed to download archive: {}", archive_url))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Archive download returned HTTP {}: {}",
                response.status(),
                archive_url
            );
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read archive body")?;
        info!("Downloaded {} bytes, locating main CSV entry", bytes.len());

        let mut archive = ZipArchive::new(Cursor::new(bytes.as_ref()))
            .context("Archive is not a readable zip file")?;

        let index = largest_csv_index(&mut archive)?;
        let mut raw = String::new();
        {
            let mut entry = archive.by_index(index)?;
            info!(
                "Parsing {} ({} bytes uncompressed)",
                entry.name(),
                entry.size()
            );

            entry
                .read_to_string(&mut raw)
                .context("Failed to decompress CSV entry")?;
        }

        self.load_csv(&raw, job_id).await
    }

    /// Stream-parse the CSV text and insert in batches. Individual bad rows
    /// are logged and skipped; they never lose the rest of the batch.
    async fn load_csv(&self, raw: &str, job_id: i64) -> Result<ScrapeCounts> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(raw.as_bytes());

        let headers = reader.headers().context("CSV has no header row")?.clone();
        let columns = ColumnIndices::resolve(&headers)?;

        let mut counts = ScrapeCounts::default();
        let mut batch: Vec<NewBusiness> = Vec::with_capacity(BATCH_SIZE);

        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping malformed CSV row: {}", e);
                    counts.skipped += 1;
                    continue;
                }
            };

            counts.found += 1;
            match columns.business_from_record(&record, job_id) {
                Some(business) => batch.push(business),
                None => {
                    counts.skipped += 1;
                    continue;
                }
            }

            if batch.len() >= BATCH_SIZE {
                self.flush(&mut batch, &mut counts).await;
            }
        }

        self.flush(&mut batch, &mut counts).await;
        Ok(counts)
    }

    async fn flush(&self, batch: &mut Vec<NewBusiness>, counts: &mut ScrapeCounts) {
        if batch.is_empty() {
            return;
        }

        match self.db.businesses().insert_batch(batch).await {
            Ok((inserted, skipped)) => {
                counts.inserted += inserted as i64;
                counts.skipped += skipped as i64;
            }
            Err(e) => {
                warn!("Batch insert of {} rows failed: {:#}", batch.len(), e);
                counts.skipped += batch.len() as i64;
            }
        }
        batch.clear();
    }
}

/// The main data file is always the largest CSV entry in the archive.
fn largest_csv_index<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> Result<usize> {
    let mut best: Option<(usize, u64)> = None;

    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        if !entry.name().to_lowercase().ends_with(".csv") {
            continue;
        }
        if best.map_or(true, |(_, size)| entry.size() > size) {
            best = Some((index, entry.size()));
        }
    }

    best.map(|(index, _)| index)
        .ok_or_else(|| anyhow::anyhow!("Archive contains no CSV entry"))
}

// ===== Column resolution & row mapping =====

#[derive(Debug, Clone, Copy)]
struct ColumnIndices {
    name: usize,
    number: Option<usize>,
    province: Option<usize>,
    city: Option<usize>,
    naics: Option<usize>,
    employees: Option<usize>,
    status: Option<usize>,
}

impl ColumnIndices {
    /// Resolve positions by header name. A register extract without a
    /// recognizable business-name column means the layout changed; bailing
    /// beats guessing an offset and loading garbage.
    fn resolve(headers: &csv::StringRecord) -> Result<Self> {
        let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();

        let find = |candidates: &[&str]| -> Option<usize> {
            candidates
                .iter()
                .find_map(|candidate| lowered.iter().position(|h| h == candidate))
        };

        let name = find(NAME_HEADERS).ok_or_else(|| {
            anyhow::anyhow!(
                "No business-name column found; expected one of {:?}, got {:?}",
                NAME_HEADERS,
                headers
            )
        })?;

        Ok(Self {
            name,
            number: find(NUMBER_HEADERS),
            province: find(PROVINCE_HEADERS),
            city: find(CITY_HEADERS),
            naics: find(NAICS_HEADERS),
            employees: find(EMPLOYEE_HEADERS),
            status: find(STATUS_HEADERS),
        })
    }

    fn business_from_record(&self, record: &csv::StringRecord, job_id: i64) -> Option<NewBusiness> {
        let name = clean_cell(record.get(self.name)?)?;
        let cell = |index: Option<usize>| index.and_then(|i| record.get(i)).and_then(clean_cell);

        let naics = cell(self.naics);
        Some(NewBusiness {
            source: "registry-bulk".to_string(),
            name,
            registry_number: cell(self.number),
            province: cell(self.province),
            city: cell(self.city),
            industry: Some(naics_label(naics.as_deref()).to_string()),
            employee_range: cell(self.employees),
            operating_status: cell(self.status),
            job_id: Some(job_id),
        })
    }
}

/// Trimmed cell value with the `..` missing-value sentinel (and blanks)
/// normalized to None - the literal must never reach the database.
fn clean_cell(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == MISSING_VALUE_SENTINEL {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Top-level NAICS code to label. Unrecognized codes map to "Other",
/// missing codes to "Unknown".
pub fn naics_label(code: Option<&str>) -> &'static str {
    let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
        return "Unknown";
    };

    let prefix: String = code.chars().take(2).collect();
    match prefix.as_str() {
        "11" => "Agriculture, Forestry, Fishing and Hunting",
        "21" => "Mining, Quarrying, and Oil and Gas Extraction",
        "22" => "Utilities",
        "23" => "Construction",
        "31" | "32" | "33" => "Manufacturing",
        "41" => "Wholesale Trade",
        "44" | "45" => "Retail Trade",
        "48" | "49" => "Transportation and Warehousing",
        "51" => "Information and Cultural Industries",
        "52" => "Finance and Insurance",
        "53" => "Real Estate and Rental and Leasing",
        "54" => "Professional, Scientific and Technical Services",
        "55" => "Management of Companies and Enterprises",
        "56" => "Administrative and Support Services",
        "61" => "Educational Services",
        "62" => "Health Care and Social Assistance",
        "71" => "Arts, Entertainment and Recreation",
        "72" => "Accommodation and Food Services",
        "81" => "Other Services",
        "91" => "Public Administration",
        _ => "Other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::database::RecordFilter;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const SAMPLE_CSV: &str = "\
BUSNAME,BUSNO,PROV,CSD,NAICS,EMP,STATUS
\"Maple Widgets Inc\",123456789,ON,Toronto,3261,..,Active
\"Comma, Quoted Ltd\",987654321,QC,Montreal,5412,1-4,Active
,555,BC,Victoria,52,5-9,Active
";

    #[test]
    fn naics_labels_fall_back_sanely() {
        assert_eq!(naics_label(Some("5412")), "Professional, Scientific and Technical Services");
        assert_eq!(naics_label(Some("3261")), "Manufacturing");
        assert_eq!(naics_label(Some("99")), "Other");
        assert_eq!(naics_label(None), "Unknown");
        assert_eq!(naics_label(Some("")), "Unknown");
    }

    #[test]
    fn missing_value_sentinel_never_survives() {
        assert_eq!(clean_cell(".."), None);
        assert_eq!(clean_cell("  ..  "), None);
        assert_eq!(clean_cell(""), None);
        assert_eq!(clean_cell(" 1-4 "), Some("1-4".to_string()));
    }

    #[test]
    fn columns_resolve_by_header_name_not_position() {
        let headers = csv::StringRecord::from(vec!["NAICS", "BUSNAME", "PROV"]);
        let columns = ColumnIndices::resolve(&headers).unwrap();
        assert_eq!(columns.name, 1);
        assert_eq!(columns.naics, Some(0));
        assert_eq!(columns.number, None);

        let unusable = csv::StringRecord::from(vec!["a", "b"]);
        assert!(ColumnIndices::resolve(&unusable).is_err());
    }

    #[tokio::test]
    async fn csv_rows_load_with_sentinel_normalized() {
        let db = Database::in_memory().await.unwrap();
        let config = ScrapingConfig::default();
        let loader = BulkRegistryLoader::new(&db, &config);

        let counts = loader.load_csv(SAMPLE_CSV, 1).await.unwrap();
        assert_eq!(counts.found, 3);
        assert_eq!(counts.inserted, 2);
        // The nameless row is skipped, not fatal.
        assert_eq!(counts.skipped, 1);

        let businesses = db.businesses().list(&RecordFilter::default()).await.unwrap();
        let widgets = businesses
            .iter()
            .find(|b| b.name == "Maple Widgets Inc")
            .unwrap();
        // `..` employee count must be stored as NULL, not the literal.
        assert_eq!(widgets.employee_range, None);
        assert_eq!(widgets.industry.as_deref(), Some("Manufacturing"));

        let quoted = businesses
            .iter()
            .find(|b| b.name == "Comma, Quoted Ltd")
            .expect("quoted field with comma parses as one cell");
        assert_eq!(quoted.employee_range.as_deref(), Some("1-4"));
    }

    #[test]
    fn largest_csv_entry_wins() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = SimpleFileOptions::default();
            writer.start_file("readme.txt", options).unwrap();
            writer.write_all(b"ignore me").unwrap();
            writer.start_file("small.csv", options).unwrap();
            writer.write_all(b"a,b\n1,2\n").unwrap();
            writer.start_file("register.csv", options).unwrap();
            writer
                .write_all(b"BUSNAME,PROV\nBig Co,ON\nBigger Co,BC\nBiggest Co,AB\n")
                .unwrap();
            writer.finish().unwrap();
        }
        buffer.set_position(0);

        let mut archive = ZipArchive::new(buffer).unwrap();
        let index = largest_csv_index(&mut archive).unwrap();
        assert_eq!(archive.by_index(index).unwrap().name(), "register.csv");
    }
}
