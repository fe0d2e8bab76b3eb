use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::{Client, ClientBuilder};
use scraper::{Html, Selector};
use tokio::sync::RwLock;
use url::Url;
use urlencoding::encode;

use crate::errors::ScrapeError;
use crate::models::{SemesterRecord, StudentRecord};
use crate::utils::bulk::ResultSource;
use crate::utils::catalog::programme_for_roll;
use crate::utils::parser::parse_result_html;
use crate::utils::roll_numbers::is_valid_roll_number;

const USER_AGENT: &str = concat!("result-scraper/", env!("CARGO_PKG_VERSION"));
const CSRF_FIELD: &str = "CSRFToken";
const VERIFICATION_FIELD: &str = "RequestVerificationToken";
// Dual-degree students past this many semesters continue on the second scheme.
const DUAL_DEGREE_AFTER_SEMESTERS: usize = 6;

static CSRF_INPUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[name="CSRFToken"]"#).expect("static selector is valid"));
static VERIFICATION_INPUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[name="RequestVerificationToken"]"#).expect("static selector is valid"));

/// Form page and result page of one upstream scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub index_url: Url,
    pub result_url: Url,
}

impl Endpoint {
    // Builds both pages under `{base}{scheme}{YY}/studentresult/`.
    pub fn for_scheme(base: &Url, scheme: &str, batch: &str) -> Result<Endpoint, ScrapeError> {
        let dir = base
            .join(&format!("{scheme}{batch}/studentresult/"))
            .map_err(|e| ScrapeError::InvalidRollNumber(format!("{scheme}{batch}: {e}")))?;
        let join = |page: &str| dir.join(page).map_err(|e| ScrapeError::InvalidRollNumber(e.to_string()));
        Ok(Endpoint { index_url: join("index.asp")?, result_url: join("result.asp")? })
    }

    /// Endpoint of the scheme serving the programme encoded in the roll number.
    pub fn for_roll_number(base: &Url, roll_number: &str) -> Result<Endpoint, ScrapeError> {
        let programme =
            programme_for_roll(roll_number).ok_or_else(|| ScrapeError::UnknownProgramme(roll_number.to_string()))?;
        Endpoint::for_scheme(base, programme.scheme, batch_of(roll_number)?)
    }

    // Second scheme of a dual-degree roll number; `None` for every other programme.
    pub fn dual_degree_for_roll_number(base: &Url, roll_number: &str) -> Result<Option<Endpoint>, ScrapeError> {
        let Some(scheme) = programme_for_roll(roll_number).and_then(|p| p.dual_scheme) else {
            return Ok(None);
        };
        Endpoint::for_scheme(base, scheme, batch_of(roll_number)?).map(Some)
    }
}

// Two-digit batch prefix of a roll number.
fn batch_of(roll_number: &str) -> Result<&str, ScrapeError> {
    roll_number
        .get(..2)
        .ok_or_else(|| ScrapeError::InvalidRollNumber(roll_number.to_string()))
}

// Appends the dual-degree semesters to the first record; the last one now
// carries the overall CGPI.
pub fn append_dual_degree(record: &mut StudentRecord, semesters: Vec<SemesterRecord>) {
    record.semesters.extend(semesters.into_iter().map(|semester| SemesterRecord { dual_degree: true, ..semester }));
    if let Some(last) = record.semesters.last() {
        record.cgpi = last.cgpi;
    }
}

/// Hidden form values the upstream wants replayed with every submission, plus
/// the cookies its form page handed out.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTokens {
    pub csrf_token: String,
    pub verification_token: String,
    pub cookies: Vec<String>,
}

/// Pulls both hidden-field values out of the form page.
pub fn extract_tokens(html: &str) -> Result<(String, String), ScrapeError> {
    let document = Html::parse_document(html);
    let value = |selector: &Selector, field: &'static str| {
        document
            .select(selector)
            .find_map(|el| el.value().attr("value"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ScrapeError::MissingToken(field))
    };
    Ok((value(&*CSRF_INPUT, CSRF_FIELD)?, value(&*VERIFICATION_INPUT, VERIFICATION_FIELD)?))
}

/// Session tokens per result endpoint, kept for the life of the process.
///
/// Only complete token pairs are stored. Racing misses may each fetch; the
/// first stored pair wins and every caller gets that pair back.
#[derive(Default)]
pub struct TokenCache {
    entries: RwLock<HashMap<String, SessionTokens>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    // Cached pair for an endpoint, if one was stored.
    pub async fn get(&self, endpoint: &str) -> Option<SessionTokens> {
        self.entries.read().await.get(endpoint).cloned()
    }

    // Returns the cached pair, or runs `fetch` and stores its result if complete.
    pub async fn get_or_fetch_with<F, Fut>(&self, endpoint: &str, fetch: F) -> Result<SessionTokens, ScrapeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionTokens, ScrapeError>>,
    {
        if let Some(tokens) = self.get(endpoint).await {
            return Ok(tokens);
        }

        let fetched = fetch().await?;
        if fetched.csrf_token.is_empty() {
            return Err(ScrapeError::MissingToken(CSRF_FIELD));
        }
        if fetched.verification_token.is_empty() {
            return Err(ScrapeError::MissingToken(VERIFICATION_FIELD));
        }

        let mut entries = self.entries.write().await;
        Ok(entries.entry(endpoint.to_string()).or_insert(fetched).clone())
    }
}

/// HTTP client side of the result portal.
pub struct Portal {
    base_url: Url,
    timeout: Duration,
    tokens: TokenCache,
}

impl Portal {
    // Creates a portal client with an empty token cache.
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        Portal { base_url, timeout, tokens: TokenCache::new() }
    }

    // Shared client settings for every upstream request.
    fn client_builder(&self) -> ClientBuilder {
        Client::builder().user_agent(USER_AGENT).timeout(self.timeout)
    }

    // Loads the form page and reads its hidden tokens and session cookies.
    async fn fetch_tokens(&self, endpoint: &Endpoint) -> Result<SessionTokens, ScrapeError> {
        let client = self.client_builder().cookie_store(true).build()?;

        info!("Fetching session tokens from {}", endpoint.index_url);
        let response = client.get(endpoint.index_url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(ScrapeError::UpstreamRejected { status: response.status().as_u16() });
        }
        let cookies: Vec<String> = response.cookies().map(|c| format!("{}={}", c.name(), c.value())).collect();
        let html = response.text().await?;

        let (csrf_token, verification_token) = extract_tokens(&html)?;
        Ok(SessionTokens { csrf_token, verification_token, cookies })
    }

    // Tokens for an endpoint, fetched once and then served from the cache.
    pub async fn session_tokens(&self, endpoint: &Endpoint) -> Result<SessionTokens, ScrapeError> {
        self.tokens
            .get_or_fetch_with(endpoint.result_url.as_str(), || self.fetch_tokens(endpoint))
            .await
    }

    /// Submits the result form for one roll number and returns the page as-is.
    pub async fn fetch(&self, endpoint: &Endpoint, roll_number: &str, tokens: &SessionTokens) -> Result<String, ScrapeError> {
        // The upstream session is bound to the cookies of the form page.
        let jar = Jar::default();
        for cookie in &tokens.cookies {
            jar.add_cookie_str(cookie, &endpoint.result_url);
        }
        let client = self.client_builder().cookie_provider(Arc::new(jar)).build()?;

        let body = format!(
            "RollNumber={}&{}={}&{}={}&B1=Submit",
            encode(roll_number),
            CSRF_FIELD,
            encode(&tokens.csrf_token),
            VERIFICATION_FIELD,
            encode(&tokens.verification_token),
        );

        let response = client
            .post(endpoint.result_url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(REFERER, endpoint.index_url.as_str())
            .header("DNT", "1")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScrapeError::UpstreamRejected { status: response.status().as_u16() });
        }
        Ok(response.text().await?)
    }

    // Fetches one endpoint and decodes its page.
    async fn fetch_record(&self, endpoint: &Endpoint, roll_number: &str) -> Result<StudentRecord, ScrapeError> {
        let tokens = self.session_tokens(endpoint).await?;

        debug!("Posting result form for {roll_number} to {}", endpoint.result_url);
        let html = self.fetch(endpoint, roll_number, &tokens).await?;
        parse_result_html(&html, roll_number)
    }

    // Semesters from the dual-degree scheme, `None` when the programme has none.
    async fn dual_degree_semesters(&self, roll_number: &str) -> Result<Option<Vec<SemesterRecord>>, ScrapeError> {
        let Some(endpoint) = Endpoint::dual_degree_for_roll_number(&self.base_url, roll_number)? else {
            return Ok(None);
        };
        Ok(Some(self.fetch_record(&endpoint, roll_number).await?.semesters))
    }

    /// Fetches and decodes the result of one roll number, once, without retry.
    ///
    /// Dual-degree students with more than six semesters get the rest of their
    /// record from the second scheme. If that page fails the first record is
    /// returned unchanged.
    pub async fn get_result(&self, roll_number: &str) -> Result<StudentRecord, ScrapeError> {
        if !is_valid_roll_number(roll_number) {
            return Err(ScrapeError::InvalidRollNumber(roll_number.to_string()));
        }
        let endpoint = Endpoint::for_roll_number(&self.base_url, roll_number)?;
        let mut record = self.fetch_record(&endpoint, roll_number).await?;

        if record.semesters.len() > DUAL_DEGREE_AFTER_SEMESTERS {
            match self.dual_degree_semesters(roll_number).await {
                Ok(Some(semesters)) => {
                    debug!("{roll_number}: {} dual-degree semesters appended", semesters.len());
                    append_dual_degree(&mut record, semesters);
                }
                Ok(None) => {}
                Err(e) => warn!("Dual-degree result unavailable for {roll_number}: {e}"),
            }
        }
        Ok(record)
    }
}

#[async_trait]
impl ResultSource for Portal {
    // Single attempt, retries belong to the caller.
    async fn scrape(&self, roll_number: &str) -> Result<StudentRecord, ScrapeError> {
        self.get_result(roll_number).await
    }
}
