// src/scraping/sources.rs
//! The ten registered provincial directories.
//!
//! Each entry is pure configuration consumed by `DirectoryScraper`; the
//! protocol families (view-state grids, single-member detail pages,
//! script-embedded JSON, Lightning SPA) and enumeration strategies are
//! combined per what each regulator's search form actually tolerates.

use crate::scraping::directory::{DirectorySource, ParserKind};
use crate::scraping::parsers::GridColumns;
use crate::scraping::strategies::EnumerationStrategy;

pub fn registered_sources() -> Vec<DirectorySource> {
    vec![
        // ASP.NET Web Forms grid; prefix-matching search bounded per page.
        DirectorySource {
            tag: "on",
            name: "CPA Ontario member directory",
            province: "ON",
            entry_url: "https://myportal.cpaontario.ca/s/member-directory",
            search_url: "https://myportal.cpaontario.ca/s/member-directory",
            parser: ParserKind::Grid(GridColumns::combined(0, Some(2), true)),
            strategy: EnumerationStrategy::PrefixSweep,
            last_name_field: "ctl00$MainContent$txtLastName",
            first_name_field: None,
            cleared_fields: &["ctl00$MainContent$txtFirstName", "ctl00$MainContent$txtCity"],
            requires_form_state: true,
            captcha_probe: false,
            query_param: "q",
        },
        // Sitecore backend shipping results as a JSON literal in a script tag.
        DirectorySource {
            tag: "bc",
            name: "CPABC member search",
            province: "BC",
            entry_url: "https://www.bccpa.ca/member-search",
            search_url: "https://www.bccpa.ca/member-search/results",
            parser: ParserKind::EmbeddedScript,
            strategy: EnumerationStrategy::PrefixSweep,
            last_name_field: "lastName",
            first_name_field: None,
            cleared_fields: &["firstName", "city"],
            requires_form_state: false,
            captcha_probe: false,
            query_param: "lastName",
        },
        // Refuses broad surnames with a "refine your search" page; single
        // hits render as a member detail table.
        DirectorySource {
            tag: "ab",
            name: "CPA Alberta directory",
            province: "AB",
            entry_url: "https://www.cpaalberta.ca/protecting-the-public/member-search",
            search_url: "https://www.cpaalberta.ca/protecting-the-public/member-search",
            parser: ParserKind::DetailPage,
            strategy: EnumerationStrategy::Narrowing,
            last_name_field: "ctl00$ContentBody$txtSurname",
            first_name_field: Some("ctl00$ContentBody$txtGivenName"),
            cleared_fields: &["ctl00$ContentBody$txtCity"],
            requires_form_state: true,
            captcha_probe: false,
            query_param: "q",
        },
        // Legacy HTML form, exact last-name match only.
        DirectorySource {
            tag: "sk",
            name: "CPA Saskatchewan member listing",
            province: "SK",
            entry_url: "https://www.cpask.ca/member-directory",
            search_url: "https://www.cpask.ca/member-directory/search",
            parser: ParserKind::Grid(GridColumns::split(1, 0, Some(2), Some(3))),
            strategy: EnumerationStrategy::ExactNameList,
            last_name_field: "surname",
            first_name_field: None,
            cleared_fields: &["givenName", "firm"],
            requires_form_state: false,
            captcha_probe: false,
            query_param: "q",
        },
        // View-state grid with credentials embedded in the name column.
        DirectorySource {
            tag: "mb",
            name: "CPA Manitoba directory",
            province: "MB",
            entry_url: "https://cpamb.ca/public-directory",
            search_url: "https://cpamb.ca/public-directory",
            parser: ParserKind::Grid(GridColumns::combined(0, Some(1), true)),
            strategy: EnumerationStrategy::PrefixSweep,
            last_name_field: "ctl00$Body$SearchLastName",
            first_name_field: None,
            cleared_fields: &["ctl00$Body$SearchFirstName"],
            requires_form_state: true,
            captcha_probe: false,
            query_param: "q",
        },
        // Salesforce Lightning SPA; nothing server-rendered to parse, so the
        // scraper degrades to a query-string GET and flags empty runs.
        DirectorySource {
            tag: "qc",
            name: "Ordre des CPA du Quebec bottin",
            province: "QC",
            entry_url: "https://cpaquebec.ca/en/find-a-cpa/",
            search_url: "https://cpaquebec.ca/en/find-a-cpa/results",
            parser: ParserKind::EmbeddedScript,
            strategy: EnumerationStrategy::SpaFallback,
            last_name_field: "lastName",
            first_name_field: None,
            cleared_fields: &[],
            requires_form_state: false,
            captcha_probe: false,
            query_param: "nom",
        },
        // Exact-match legacy form.
        DirectorySource {
            tag: "ns",
            name: "CPA Nova Scotia directory",
            province: "NS",
            entry_url: "https://www.cpans.ca/web/CPANS/Directory",
            search_url: "https://www.cpans.ca/web/CPANS/Directory/Search",
            parser: ParserKind::Grid(GridColumns::combined(0, Some(1), false)),
            strategy: EnumerationStrategy::ExactNameList,
            last_name_field: "LastName",
            first_name_field: None,
            cleared_fields: &["FirstName", "City"],
            requires_form_state: false,
            captcha_probe: false,
            query_param: "q",
        },
        // Sits behind a CAPTCHA; probe first so a blocked run fails in one
        // request instead of burning hours against the wall.
        DirectorySource {
            tag: "nb",
            name: "CPA New Brunswick directory",
            province: "NB",
            entry_url: "https://cpanewbrunswick.ca/find-a-cpa/",
            search_url: "https://cpanewbrunswick.ca/find-a-cpa/search",
            parser: ParserKind::Grid(GridColumns::combined(0, Some(1), false)),
            strategy: EnumerationStrategy::ExactNameList,
            last_name_field: "last_name",
            first_name_field: None,
            cleared_fields: &["first_name"],
            requires_form_state: false,
            captcha_probe: true,
            query_param: "q",
        },
        // Single-member detail pages; broad surnames are refused.
        DirectorySource {
            tag: "nl",
            name: "CPA Newfoundland and Labrador register",
            province: "NL",
            entry_url: "https://cpanl.ca/member-search",
            search_url: "https://cpanl.ca/member-search",
            parser: ParserKind::DetailPage,
            strategy: EnumerationStrategy::Narrowing,
            last_name_field: "ctl00$Main$txtLastName",
            first_name_field: Some("ctl00$Main$txtFirstName"),
            cleared_fields: &[],
            requires_form_state: true,
            captcha_probe: false,
            query_param: "q",
        },
        // Small membership, exact-match form.
        DirectorySource {
            tag: "pe",
            name: "CPA Prince Edward Island directory",
            province: "PE",
            entry_url: "https://cpapei.ca/members/directory",
            search_url: "https://cpapei.ca/members/directory/search",
            parser: ParserKind::Grid(GridColumns::split(0, 1, Some(2), None)),
            strategy: EnumerationStrategy::ExactNameList,
            last_name_field: "lastname",
            first_name_field: None,
            cleared_fields: &["firstname"],
            requires_form_state: false,
            captcha_probe: false,
            query_param: "q",
        },
    ]
}

/// Lookup by source tag.
pub fn find_source(tag: &str) -> Option<DirectorySource> {
    registered_sources()
        .into_iter()
        .find(|source| source.tag.eq_ignore_ascii_case(tag))
}

/// Valid tags, for fail-fast error messages.
pub fn source_tags() -> Vec<&'static str> {
    registered_sources().iter().map(|s| s.tag).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_jurisdictions_with_unique_tags_and_provinces() {
        let sources = registered_sources();
        assert_eq!(sources.len(), 10);

        let mut tags: Vec<_> = sources.iter().map(|s| s.tag).collect();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), 10);

        let mut provinces: Vec<_> = sources.iter().map(|s| s.province).collect();
        provinces.sort();
        provinces.dedup();
        assert_eq!(provinces.len(), 10);
    }

    #[test]
    fn narrowing_sources_carry_a_first_name_field() {
        for source in registered_sources() {
            if source.strategy == EnumerationStrategy::Narrowing {
                assert!(
                    source.first_name_field.is_some(),
                    "{} narrows without a first-name field",
                    source.tag
                );
            }
        }
    }

    #[test]
    fn find_source_is_case_insensitive_and_total() {
        assert!(find_source("ON").is_some());
        assert!(find_source("qc").is_some());
        assert!(find_source("yt").is_none());
        assert_eq!(source_tags().len(), 10);
    }
}
