// src/core/session.rs
//! Cookie- and view-state-carrying HTTP conversations with stateful legacy
//! web applications.
//!
//! The provincial directories are mostly ASP.NET Web Forms era software: a
//! POST is only accepted when it echoes back the hidden form state of the
//! page that preceded it, and the response carries a refreshed hidden-field
//! set that the next request must use. Losing that handshake desynchronizes
//! the conversation and the server answers with empty or stale pages.

use anyhow::{Context, Result};
use reqwest::header::{COOKIE, REFERER, SET_COOKIE};
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Identifies the collector to target sites on every request.
pub const COLLECTOR_USER_AGENT: &str =
    "MapleMatchBot/1.0 (business directory aggregator; contact: ops@maplematch.ca)";

/// Consecutive failures tolerated before the session is re-established.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Where the client sits in its conversation with the target server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Established,
    Expired,
}

pub struct SessionHttpClient {
    client: Client,
    entry_url: String,
    state: SessionState,
    cookies: HashMap<String, String>,
    hidden_fields: HashMap<String, String>,
    referer: String,
    consecutive_failures: u32,
    request_delay: Duration,
}

impl SessionHttpClient {
    pub fn new(entry_url: &str, request_delay: Duration, page_timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(COLLECTOR_USER_AGENT)
            .timeout(page_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            entry_url: entry_url.to_string(),
            state: SessionState::Uninitialized,
            cookies: HashMap::new(),
            hidden_fields: HashMap::new(),
            referer: entry_url.to_string(),
            consecutive_failures: 0,
            request_delay,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn hidden_fields(&self) -> &HashMap<String, String> {
        &self.hidden_fields
    }

    /// Mandatory pause between requests. Skipping this is a correctness bug,
    /// not a missed optimization: the target sites answer bursts with
    /// degraded or empty pages.
    pub async fn pace(&self) {
        tokio::time::sleep(self.request_delay).await;
    }

    /// GET the entry page, capture session cookies and the hidden form
    /// state needed for the first POST to be accepted.
    pub async fn establish_session(&mut self) -> Result<()> {
        debug!("Establishing session: {}", self.entry_url);

        let response = self
            .client
            .get(&self.entry_url)
            .send()
            .await
            .with_context(|| format!("Failed to load entry page: {}", self.entry_url))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Entry page returned HTTP {}: {}",
                response.status(),
                self.entry_url
            );
        }

        let set_cookies = collect_set_cookies(response.headers());
        merge_cookies(&mut self.cookies, &set_cookies);

        let html = response
            .text()
            .await
            .context("Failed to read entry page body")?;

        self.hidden_fields = extract_hidden_fields(&html);
        self.referer = self.entry_url.clone();
        self.state = SessionState::Established;
        self.consecutive_failures = 0;

        debug!(
            "Session established: {} hidden fields, {} cookies",
            self.hidden_fields.len(),
            self.cookies.len()
        );
        Ok(())
    }

    /// POST a search against the carried session state.
    ///
    /// The form body is every carried hidden field verbatim, with the fields
    /// in `clear` blanked and the `overrides` written on top. On success the
    /// refreshed hidden-field set from the response replaces the carried one
    /// and new cookies are merged in.
    pub async fn submit_search(
        &mut self,
        url: &str,
        overrides: &[(&str, String)],
        clear: &[&str],
    ) -> Result<String> {
        let mut form: Vec<(String, String)> = self
            .hidden_fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for field in clear {
            set_form_field(&mut form, field, String::new());
        }
        for (field, value) in overrides {
            set_form_field(&mut form, field, value.clone());
        }

        let mut request = self
            .client
            .post(url)
            .header(REFERER, self.referer.clone())
            .form(&form);
        if !self.cookies.is_empty() {
            request = request.header(COOKIE, cookie_header(&self.cookies));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Search POST failed: {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Search POST returned HTTP {}: {}", response.status(), url);
        }

        let set_cookies = collect_set_cookies(response.headers());
        merge_cookies(&mut self.cookies, &set_cookies);

        let html = response.text().await.context("Failed to read search response")?;

        // The server's refreshed view state supersedes ours; keep the old
        // set only when the response carries none at all.
        let refreshed = extract_hidden_fields(&html);
        if !refreshed.is_empty() {
            self.hidden_fields = refreshed;
        }
        self.referer = url.to_string();
        self.consecutive_failures = 0;

        Ok(html)
    }

    /// Plain GET carrying the session cookies. Used by detail-page fetches
    /// and the SPA query-string fallback.
    pub async fn get(&mut self, url: &str) -> Result<String> {
        let mut request = self.client.get(url).header(REFERER, self.referer.clone());
        if !self.cookies.is_empty() {
            request = request.header(COOKIE, cookie_header(&self.cookies));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("GET failed: {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("GET returned HTTP {}: {}", response.status(), url);
        }

        let set_cookies = collect_set_cookies(response.headers());
        merge_cookies(&mut self.cookies, &set_cookies);

        response.text().await.context("Failed to read response body")
    }

    /// Record one failed round trip. After five consecutive failures the
    /// session is re-established from scratch; a re-establishment failure
    /// propagates and ends the caller's run.
    pub async fn record_failure(&mut self) -> Result<()> {
        self.consecutive_failures += 1;

        if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            warn!(
                "{} consecutive failures against {}, re-establishing session",
                self.consecutive_failures, self.entry_url
            );
            self.state = SessionState::Expired;
            self.establish_session()
                .await
                .context("Session re-establishment failed")?;
        }

        Ok(())
    }
}

// ===== Pure helpers =====

/// All hidden inputs of the page, by name. View-state style fields
/// (__VIEWSTATE, __EVENTVALIDATION, ...) are what make the next POST valid.
pub fn extract_hidden_fields(html: &str) -> HashMap<String, String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("input[type='hidden']").expect("static selector");

    document
        .select(&selector)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

fn collect_set_cookies(headers: &reqwest::header::HeaderMap) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .collect()
}

/// Merge Set-Cookie headers into the jar: same-named entries are
/// overwritten, unknown names added, nothing ever deleted.
pub fn merge_cookies(jar: &mut HashMap<String, String>, set_cookies: &[String]) {
    for raw in set_cookies {
        let pair = raw.split(';').next().unwrap_or_default();
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                jar.insert(name.to_string(), value.trim().to_string());
            }
        }
    }
}

pub fn cookie_header(jar: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = jar.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    pairs.sort();
    pairs.join("; ")
}

fn set_form_field(form: &mut Vec<(String, String)>, field: &str, value: String) {
    if let Some(entry) = form.iter_mut().find(|(name, _)| name == field) {
        entry.1 = value;
    } else {
        form.push((field.to_string(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_view_state_fields() {
        let html = r#"
            <html><body><form id="aspnetForm">
              <input type="hidden" name="__VIEWSTATE" value="dDwtMTI3OTMz" />
              <input type="hidden" name="__EVENTVALIDATION" value="wEWBAKc" />
              <input type="text" name="txtLastName" value="" />
            </form></body></html>
        "#;

        let fields = extract_hidden_fields(html);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["__VIEWSTATE"], "dDwtMTI3OTMz");
        assert_eq!(fields["__EVENTVALIDATION"], "wEWBAKc");
    }

    #[test]
    fn cookie_merge_overwrites_and_adds_but_never_deletes() {
        let mut jar = HashMap::new();
        merge_cookies(
            &mut jar,
            &["ASP.NET_SessionId=abc; path=/; HttpOnly".to_string()],
        );
        merge_cookies(
            &mut jar,
            &[
                "ASP.NET_SessionId=def; path=/".to_string(),
                "tracking=1".to_string(),
            ],
        );

        assert_eq!(jar.len(), 2);
        assert_eq!(jar["ASP.NET_SessionId"], "def");
        assert_eq!(jar["tracking"], "1");
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let mut jar = HashMap::new();
        merge_cookies(&mut jar, &["a=1".to_string(), "b=2".to_string()]);
        assert_eq!(cookie_header(&jar), "a=1; b=2");
    }

    #[test]
    fn form_overrides_replace_hidden_values() {
        let mut form = vec![
            ("__VIEWSTATE".to_string(), "xyz".to_string()),
            ("txtLastName".to_string(), "old".to_string()),
        ];
        set_form_field(&mut form, "txtLastName", "sm".to_string());
        set_form_field(&mut form, "txtFirstName", String::new());

        assert_eq!(form.len(), 3);
        assert_eq!(form[1], ("txtLastName".to_string(), "sm".to_string()));
        assert_eq!(form[2], ("txtFirstName".to_string(), String::new()));
    }

    #[test]
    fn new_client_starts_uninitialized() {
        let client = SessionHttpClient::new(
            "https://example.ca/directory",
            Duration::from_millis(1),
            Duration::from_secs(5),
        );
        assert_eq!(client.state(), SessionState::Uninitialized);
        assert!(client.hidden_fields().is_empty());
    }
}
