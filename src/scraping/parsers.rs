// src/scraping/parsers.rs
//! Response parsers for the three directory families.
//!
//! Which parser a jurisdiction uses, and where its columns live, is
//! configuration (`DirectorySource`), not subclassing. All three produce the
//! same partial-record shape; hashing and dedup are the caller's job.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

/// Names longer than this are mis-parsed markup, not people.
const MAX_NAME_LEN: usize = 80;

/// A partially-populated person record as parsed from one directory page.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMember {
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub city: Option<String>,
    pub designation: Option<String>,
}

/// Declarative column map for the grid parser. Either `combined_name` or
/// the `first_name`/`last_name` pair must be set.
#[derive(Debug, Clone, Copy)]
pub struct GridColumns {
    pub combined_name: Option<usize>,
    pub first_name: Option<usize>,
    pub last_name: Option<usize>,
    pub city: Option<usize>,
    pub designation: Option<usize>,
    /// The name cell carries credentials after the first name,
    /// e.g. "Smith, John CPA, CA".
    pub designation_in_name: bool,
}

impl GridColumns {
    pub const fn combined(name: usize, city: Option<usize>, designation_in_name: bool) -> Self {
        Self {
            combined_name: Some(name),
            first_name: None,
            last_name: None,
            city,
            designation: None,
            designation_in_name,
        }
    }

    pub const fn split(
        first: usize,
        last: usize,
        city: Option<usize>,
        designation: Option<usize>,
    ) -> Self {
        Self {
            combined_name: None,
            first_name: Some(first),
            last_name: Some(last),
            city,
            designation,
            designation_in_name: false,
        }
    }

    fn max_index(&self) -> usize {
        [
            self.combined_name,
            self.first_name,
            self.last_name,
            self.city,
            self.designation,
        ]
        .iter()
        .flatten()
        .copied()
        .max()
        .unwrap_or(0)
    }
}

/// Outcome of a detail-page style search, where the server answers with
/// either one member, a refusal to list, or nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailOutcome {
    Member(RawMember),
    /// "Refine your search" sentinel - the caller must narrow, this is NOT
    /// zero results.
    TooManyResults,
    NoResults,
}

// ===== Grid parser =====

/// Parse an HTML results table into member records, skipping header, pager
/// and no-results chrome rows.
pub fn parse_grid(html: &str, columns: &GridColumns) -> Vec<RawMember> {
    let document = Html::parse_document(html);
    let row_selector = Selector::parse("table tr").expect("static selector");
    let cell_selector = Selector::parse("td").expect("static selector");

    let mut members = Vec::new();

    for row in document.select(&row_selector) {
        if is_chrome_row(&row) {
            continue;
        }

        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|cell| clean_text(&cell.text().collect::<Vec<_>>().join(" ")))
            .collect();

        // Header rows use <th>, short rows are pager/no-results chrome.
        if cells.is_empty() || cells.len() <= columns.max_index() {
            continue;
        }

        if let Some(member) = member_from_cells(&cells, columns) {
            members.push(member);
        }
    }

    members
}

fn is_chrome_row(row: &ElementRef) -> bool {
    if let Some(class) = row.value().attr("class") {
        let class = class.to_lowercase();
        if ["header", "pager", "heading", "no-records", "norecords"]
            .iter()
            .any(|marker| class.contains(marker))
        {
            return true;
        }
    }

    let th_selector = Selector::parse("th").expect("static selector");
    row.select(&th_selector).next().is_some()
}

fn member_from_cells(cells: &[String], columns: &GridColumns) -> Option<RawMember> {
    let city = columns
        .city
        .and_then(|i| cells.get(i))
        .filter(|c| !c.is_empty())
        .cloned();
    let column_designation = columns
        .designation
        .and_then(|i| cells.get(i))
        .filter(|d| !d.is_empty())
        .cloned();

    let (first_name, last_name, embedded_designation) = if let Some(i) = columns.combined_name {
        split_combined_name(cells.get(i)?, columns.designation_in_name)?
    } else {
        let first = cells.get(columns.first_name?)?.clone();
        let last = cells.get(columns.last_name?)?.clone();
        (first, last, None)
    };

    if !plausible_name(&first_name) || !plausible_name(&last_name) {
        return None;
    }

    let full_name = format!("{} {}", first_name, last_name);
    Some(RawMember {
        first_name,
        last_name,
        full_name,
        city,
        designation: embedded_designation.or(column_designation),
    })
}

/// Split a combined "Last, First [credentials]" cell.
///
/// "Smith, John CPA, CA" => ("John", "Smith", Some("CPA, CA")) when the
/// source embeds credentials; without the flag the whole remainder after the
/// first comma is the first name.
pub fn split_combined_name(
    raw: &str,
    designation_embedded: bool,
) -> Option<(String, String, Option<String>)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    match raw.split_once(',') {
        Some((last, rest)) => {
            let rest = rest.trim();
            if designation_embedded {
                let mut parts = rest.splitn(2, char::is_whitespace);
                let first = parts.next().unwrap_or_default().trim().to_string();
                let designation = parts
                    .next()
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty());
                Some((first, last.trim().to_string(), designation))
            } else {
                Some((rest.to_string(), last.trim().to_string(), None))
            }
        }
        // No comma: assume "First Last" word order.
        None => {
            let (first, last) = raw.split_once(char::is_whitespace)?;
            Some((first.trim().to_string(), last.trim().to_string(), None))
        }
    }
}

fn plausible_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN
}

// ===== Detail-page parser =====

/// Markers the directories print instead of a result grid. Checked against
/// the page's heading/alert text, lower-cased.
const TOO_MANY_MARKERS: &[&str] = &[
    "too many results",
    "refine your search",
    "narrow your search",
    "returned more than",
];
const NO_RESULT_MARKERS: &[&str] = &["no results", "no records", "no members found", "0 results"];

/// Refusal/no-results sentinels a search page can answer with instead of
/// data. Shared across parser families: a grid-based directory under the
/// narrowing strategy prints the same "refine your search" banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSentinel {
    TooManyResults,
    NoResults,
}

pub fn detect_sentinel(html: &str) -> Option<SearchSentinel> {
    let document = Html::parse_document(html);
    let sentinel_selector = Selector::parse("h1, h2, h3, h4, .alert, .message, .search-message")
        .expect("static selector");

    for heading in document.select(&sentinel_selector) {
        let text = clean_text(&heading.text().collect::<Vec<_>>().join(" ")).to_lowercase();
        if TOO_MANY_MARKERS.iter().any(|marker| text.contains(marker)) {
            return Some(SearchSentinel::TooManyResults);
        }
        if NO_RESULT_MARKERS.iter().any(|marker| text.contains(marker)) {
            return Some(SearchSentinel::NoResults);
        }
    }

    None
}

/// Parse a single-member detail page built from label/value rows, or
/// recognize the refusal/no-results sentinels.
pub fn parse_detail_page(html: &str) -> DetailOutcome {
    match detect_sentinel(html) {
        Some(SearchSentinel::TooManyResults) => return DetailOutcome::TooManyResults,
        Some(SearchSentinel::NoResults) => return DetailOutcome::NoResults,
        None => {}
    }

    let document = Html::parse_document(html);

    let row_selector = Selector::parse("table tr").expect("static selector");
    let cell_selector = Selector::parse("td, th").expect("static selector");

    let mut name = None;
    let mut city = None;
    let mut designation = None;

    for row in document.select(&row_selector) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|cell| clean_text(&cell.text().collect::<Vec<_>>().join(" ")))
            .collect();
        if cells.len() < 2 {
            continue;
        }

        let label = cells[0].to_lowercase();
        let value = cells[1].clone();
        if value.is_empty() {
            continue;
        }

        if label.contains("member name") || label == "name" || label.contains("full name") {
            name = Some(value);
        } else if label.contains("city") || label.contains("location") {
            city = Some(value);
        } else if label.contains("designation") || label.contains("member type") {
            designation = Some(value);
        }
    }

    let Some(name) = name else {
        return DetailOutcome::NoResults;
    };

    match split_combined_name(&name, false) {
        Some((first, last, _)) if plausible_name(&first) && plausible_name(&last) => {
            let full_name = format!("{} {}", first, last);
            DetailOutcome::Member(RawMember {
                first_name: first,
                last_name: last,
                full_name,
                city,
                designation,
            })
        }
        _ => {
            warn!("Detail page member name not parseable: {}", name);
            DetailOutcome::NoResults
        }
    }
}

// ===== Embedded-script-array parser =====

static SCRIPT_ARRAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)=\s*(\[\s*\{.*?\}\s*\])\s*;").expect("static regex"));

/// Some backends ship results as a JSON array literal assigned inside a
/// script block. Decode that when present; otherwise fall back to scanning
/// card/row-like elements for name and city text.
pub fn parse_embedded_script(html: &str) -> Vec<RawMember> {
    let document = Html::parse_document(html);
    let script_selector = Selector::parse("script").expect("static selector");

    for script in document.select(&script_selector) {
        let body = script.text().collect::<Vec<_>>().join("");
        for capture in SCRIPT_ARRAY_RE.captures_iter(&body) {
            if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(&capture[1]) {
                let members: Vec<RawMember> =
                    values.iter().filter_map(member_from_json).collect();
                if !members.is_empty() {
                    return members;
                }
            }
        }
    }

    debug!("No embedded script array found, scanning card elements");
    parse_result_cards(&document)
}

fn member_from_json(value: &serde_json::Value) -> Option<RawMember> {
    let first = json_field(value, &["FirstName", "firstName", "first_name", "GivenName"]);
    let last = json_field(value, &["LastName", "lastName", "last_name", "Surname"]);
    let city = json_field(value, &["City", "city", "Location", "location"]);
    let designation = json_field(value, &["Designation", "designation", "MemberType", "Title"]);

    let (first, last) = match (first, last) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            let full = json_field(value, &["Name", "name", "FullName", "fullName"])?;
            let (first, last, _) = split_combined_name(&full, false)?;
            (first, last)
        }
    };

    if !plausible_name(&first) || !plausible_name(&last) {
        return None;
    }

    let full_name = format!("{} {}", first, last);
    Some(RawMember {
        first_name: first,
        last_name: last,
        full_name,
        city,
        designation,
    })
}

fn json_field(value: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(key))
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

fn parse_result_cards(document: &Html) -> Vec<RawMember> {
    let card_selector =
        Selector::parse("[class*='card'], [class*='result'], [class*='member-row']")
            .expect("static selector");
    let name_selector =
        Selector::parse("[class*='name'], h3, h4, strong").expect("static selector");
    let city_selector =
        Selector::parse("[class*='city'], [class*='location']").expect("static selector");

    let mut members = Vec::new();

    for card in document.select(&card_selector) {
        let Some(name_el) = card.select(&name_selector).next() else {
            continue;
        };
        let name = clean_text(&name_el.text().collect::<Vec<_>>().join(" "));
        let Some((first, last, _)) = split_combined_name(&name, false) else {
            continue;
        };
        if !plausible_name(&first) || !plausible_name(&last) {
            continue;
        }

        let city = card
            .select(&city_selector)
            .next()
            .map(|el| clean_text(&el.text().collect::<Vec<_>>().join(" ")))
            .filter(|c| !c.is_empty());

        let full_name = format!("{} {}", first, last);
        members.push(RawMember {
            first_name: first,
            last_name: last,
            full_name,
            city,
            designation: None,
        });
    }

    members
}

// ===== Protection-wall detection =====

/// Explicit CAPTCHA markers. Deliberately not a response-length heuristic:
/// a legitimately short page must not read as a block.
const CAPTCHA_MARKERS: &[&str] = &[
    "g-recaptcha",
    "grecaptcha",
    "h-captcha",
    "hcaptcha",
    "cf-turnstile",
    "data-sitekey",
];

pub fn detect_captcha(html: &str) -> bool {
    let lowered = html.to_lowercase();
    CAPTCHA_MARKERS.iter().any(|marker| lowered.contains(marker))
}

// ===== Shared text cleanup =====

pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRID_FIXTURE: &str = r#"
        <table id="memberGrid">
          <tr class="headerRow"><th>Name</th><th>City</th></tr>
          <tr><td>Smith, John CPA, CA</td><td>Toronto</td></tr>
          <tr><td>Tremblay, Marie CPA, CGA</td><td>Ottawa</td></tr>
          <tr class="noRecords"><td>No records to display.</td></tr>
        </table>
    "#;

    #[test]
    fn grid_parses_data_rows_and_skips_chrome() {
        let columns = GridColumns::combined(0, Some(1), true);
        let members = parse_grid(GRID_FIXTURE, &columns);

        assert_eq!(members.len(), 2);
        assert_eq!(members[0].last_name, "Smith");
        assert_eq!(members[0].first_name, "John");
        assert_eq!(members[0].designation.as_deref(), Some("CPA, CA"));
        assert_eq!(members[0].city.as_deref(), Some("Toronto"));
        assert_eq!(members[1].full_name, "Marie Tremblay");
    }

    #[test]
    fn grid_supports_split_name_columns() {
        let html = r#"
            <table>
              <tr><th>First</th><th>Last</th><th>City</th><th>Designation</th></tr>
              <tr><td>Anne</td><td>Roy</td><td>Halifax</td><td>CPA</td></tr>
            </table>
        "#;
        let columns = GridColumns::split(0, 1, Some(2), Some(3));
        let members = parse_grid(html, &columns);

        assert_eq!(members.len(), 1);
        assert_eq!(members[0].full_name, "Anne Roy");
        assert_eq!(members[0].designation.as_deref(), Some("CPA"));
    }

    #[test]
    fn grid_rejects_implausible_names() {
        let long_name = format!("{}, John", "x".repeat(100));
        let html = format!(
            "<table><tr><td>{}</td><td>Toronto</td></tr></table>",
            long_name
        );
        let columns = GridColumns::combined(0, Some(1), false);
        assert!(parse_grid(&html, &columns).is_empty());
    }

    #[test]
    fn split_name_without_designation_flag_keeps_remainder_as_first() {
        let (first, last, designation) = split_combined_name("Smith, John", false).unwrap();
        assert_eq!((first.as_str(), last.as_str()), ("John", "Smith"));
        assert!(designation.is_none());
    }

    #[test]
    fn detail_page_extracts_member_rows() {
        let html = r#"
            <table>
              <tr><td>Member Name</td><td>Leblanc, Paul</td></tr>
              <tr><td>City</td><td>Moncton</td></tr>
              <tr><td>Designation</td><td>CPA, CMA</td></tr>
            </table>
        "#;
        match parse_detail_page(html) {
            DetailOutcome::Member(member) => {
                assert_eq!(member.full_name, "Paul Leblanc");
                assert_eq!(member.city.as_deref(), Some("Moncton"));
                assert_eq!(member.designation.as_deref(), Some("CPA, CMA"));
            }
            other => panic!("expected member, got {:?}", other),
        }
    }

    #[test]
    fn detail_page_distinguishes_sentinels() {
        let refused = "<h2>Your search returned too many results. Please refine your search.</h2>";
        assert_eq!(parse_detail_page(refused), DetailOutcome::TooManyResults);

        let empty = "<h3>No members found matching your criteria</h3>";
        assert_eq!(parse_detail_page(empty), DetailOutcome::NoResults);
    }

    #[test]
    fn embedded_script_array_decodes() {
        let html = r#"
            <div id="results"></div>
            <script>
              var memberData = [{"FirstName":"Lise","LastName":"Gagnon","City":"Quebec City"},
                                {"FirstName":"Marc","LastName":"Cote","City":"Levis"}];
            </script>
        "#;
        let members = parse_embedded_script(html);
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].full_name, "Lise Gagnon");
        assert_eq!(members[1].city.as_deref(), Some("Levis"));
    }

    #[test]
    fn embedded_script_falls_back_to_cards() {
        let html = r#"
            <div class="member-card">
              <h3 class="member-name">Singh, Raj</h3>
              <span class="member-city">Winnipeg</span>
            </div>
        "#;
        let members = parse_embedded_script(html);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].first_name, "Raj");
        assert_eq!(members[0].city.as_deref(), Some("Winnipeg"));
    }

    #[test]
    fn captcha_detection_uses_markers_not_length() {
        assert!(detect_captcha(
            "<div class=\"g-recaptcha\" data-sitekey=\"abc\"></div>"
        ));
        assert!(!detect_captcha("<html><body>ok</body></html>"));
    }
}
