//! HTTP surface over the scraping core.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::ScrapeError;
use crate::utils::bulk::scrape_in_bulk;
use crate::utils::portal::Portal;
use crate::utils::roll_numbers::{generate, generate_for_class, FIRST_BATCH};

// Upper bound of the accepted year range. 2100 validates but generates nothing.
const LAST_ACCEPTED_YEAR: u16 = 2100;
const IDENTITY_HEADER: &str = "X-IDENTITY-KEY";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub portal: Arc<Portal>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden,
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    // Maps each error to its status and a JSON body.
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Missing or invalid SERVER_IDENTITY".to_string()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    #[serde(rename = "rollNumbers", default)]
    pub roll_numbers: Vec<String>,
}

type Params = Query<HashMap<String, String>>;

// Reads and validates a batch year query parameter.
fn batch_year(params: &HashMap<String, String>, key: &str) -> Result<u16, ApiError> {
    let raw = params
        .get(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{key} query parameter is required")))?;
    match raw.parse::<u16>() {
        Ok(year) if (FIRST_BATCH..=LAST_ACCEPTED_YEAR).contains(&year) => Ok(year),
        _ => Err(ApiError::BadRequest(format!(
            "{key} should be a valid year in YYYY format between {FIRST_BATCH} and {LAST_ACCEPTED_YEAR}"
        ))),
    }
}

// An empty generated list is a 404.
fn non_empty(roll_numbers: Vec<String>) -> Result<Vec<String>, ApiError> {
    if roll_numbers.is_empty() {
        return Err(ApiError::NotFound("No roll numbers generated for the given batch year".to_string()));
    }
    Ok(roll_numbers)
}

// Rejects requests without the server identity header.
async fn require_identity(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = request.headers().get(IDENTITY_HEADER).and_then(|v| v.to_str().ok());
    if key != Some(state.config.server_identity.as_str()) {
        warn!("Rejected {} {}: missing or wrong identity key", request.method(), request.uri().path());
        return ApiError::Forbidden.into_response();
    }
    next.run(request).await
}

// Liveness check.
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// Scrapes one roll number.
async fn scrape_one(State(state): State<AppState>, Query(params): Params) -> Result<Response, ApiError> {
    let roll = params
        .get("rollNo")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("rollNo query parameter is required".to_string()))?;

    match state.portal.get_result(roll).await {
        Ok(record) => Ok(Json(record).into_response()),
        Err(ScrapeError::InvalidRollNumber(r)) => Err(ApiError::BadRequest(format!("Invalid roll number: {r}"))),
        Err(e) => Err(ApiError::Internal(format!("error for rollNumber {roll}: {e}"))),
    }
}

// Runs a bulk scrape and returns every outcome as JSON.
async fn run_bulk(state: &AppState, roll_numbers: Vec<String>, workers: usize) -> Response {
    let options = state.config.bulk_options(workers);
    let outcomes = scrape_in_bulk(state.portal.clone(), roll_numbers, &options, CancellationToken::new()).await;
    Json(outcomes).into_response()
}

// Scrapes the roll numbers posted in the body.
async fn bulk_scrape(
    State(state): State<AppState>,
    body: Result<Json<BulkRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let roll_numbers = match body {
        Ok(Json(req)) if !req.roll_numbers.is_empty() => req.roll_numbers,
        _ => return Err(ApiError::BadRequest("Invalid input or empty rollNumbers list".to_string())),
    };
    Ok(run_bulk(&state, roll_numbers, state.config.bulk_workers).await)
}

// Scrapes every generated roll number of a batch.
async fn scrape_batch(State(state): State<AppState>, Query(params): Params) -> Result<Response, ApiError> {
    let year = batch_year(&params, "batchYear")?;
    let roll_numbers = non_empty(generate(year))?;
    Ok(run_bulk(&state, roll_numbers, state.config.batch_workers).await)
}

// Scrapes one class, or the whole batch when branch or programme is missing.
async fn scrape_class(State(state): State<AppState>, Query(params): Params) -> Result<Response, ApiError> {
    let year = batch_year(&params, "batch")?;
    let roll_numbers = match (params.get("branch"), params.get("programme")) {
        (Some(branch), Some(programme)) => generate_for_class(year, branch, programme),
        _ => generate(year),
    };
    let roll_numbers = non_empty(roll_numbers)?;
    Ok(run_bulk(&state, roll_numbers, state.config.batch_workers).await)
}

// Lists the roll numbers of a batch without fetching anything.
async fn generate_roll_numbers(Query(params): Params) -> Result<Json<Vec<String>>, ApiError> {
    let year = batch_year(&params, "batch")?;
    Ok(Json(non_empty(generate(year))?))
}

// Routes, with the identity check on everything but `/health`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scrape", get(scrape_one))
        .route("/bulk-scrape", post(bulk_scrape))
        .route("/scrape-batch", post(scrape_batch))
        .route("/scrape-class", get(scrape_class))
        .route("/generate-roll-numbers", get(generate_roll_numbers))
        .layer(middleware::from_fn_with_state(state.clone(), require_identity))
        .route("/health", get(health))
        .with_state(state)
}

// Binds the listener and serves until the process stops.
pub async fn serve(config: Config) -> Result<()> {
    let bind_addr = config.bind_addr;
    let portal = Portal::new(config.results_base_url.clone(), config.http_timeout);
    let state = AppState { config: Arc::new(config), portal: Arc::new(portal) };

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, router(state)).await.context("HTTP server failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use simplelog::LevelFilter;
    use std::time::Duration;
    use tower::ServiceExt;
    use url::Url;

    fn app() -> Router {
        let config = Config {
            server_identity: "secret".to_string(),
            bind_addr: ([127, 0, 0, 1], 0).into(),
            results_base_url: Url::parse("http://127.0.0.1:9/").unwrap(),
            http_timeout: Duration::from_millis(200),
            rate_interval: Duration::from_millis(1),
            bulk_workers: 2,
            batch_workers: 4,
            bulk_deadline: Duration::from_secs(1),
            max_attempts: 1,
            backoff_base: Duration::from_millis(1),
            log_level: LevelFilter::Off,
        };
        let portal = Portal::new(config.results_base_url.clone(), config.http_timeout);
        router(AppState { config: Arc::new(config), portal: Arc::new(portal) })
    }

    async fn call(method: &str, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(IDENTITY_HEADER, "secret")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn requests_without_identity_are_forbidden() {
        let request = axum::http::Request::builder().uri("/generate-roll-numbers?batch=2021").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn health_is_open() {
        let request = axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn scrape_requires_roll_number() {
        let (status, body) = call("GET", "/scrape", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "rollNo query parameter is required");

        let (status, _) = call("GET", "/scrape?rollNo=abc", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn scrape_failure_is_500_with_error_body() {
        let (status, body) = call("GET", "/scrape?rollNo=21bcs001", "").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("21bcs001"));
    }

    #[tokio::test]
    async fn generate_returns_ids_without_fetching() {
        let (status, body) = call("GET", "/generate-roll-numbers?batch=2021", "").await;
        assert_eq!(status, StatusCode::OK);
        let ids = body.as_array().unwrap();
        assert_eq!(ids.len(), generate(2021).len());
        assert_eq!(ids[0], "21BAR001");
    }

    #[tokio::test]
    async fn batch_year_is_validated() {
        for uri in [
            "/generate-roll-numbers",
            "/generate-roll-numbers?batch=2019",
            "/generate-roll-numbers?batch=2101",
            "/generate-roll-numbers?batch=twenty",
        ] {
            let (status, _) = call("GET", uri, "").await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        }
        let (status, body) = call("GET", "/generate-roll-numbers?batch=2099", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0], "99BAR001");
        let (status, _) = call("GET", "/generate-roll-numbers?batch=2100", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call("POST", "/scrape-batch", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_class_is_not_found() {
        let (status, _) = call("GET", "/scrape-class?batch=2021&branch=zz&programme=B.Tech", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bulk_rejects_missing_or_empty_list() {
        let (status, _) = call("POST", "/bulk-scrape", r#"{"rollNumbers": []}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call("POST", "/bulk-scrape", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call("POST", "/bulk-scrape", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bulk_returns_mixed_outcomes_with_200() {
        let (status, body) = call("POST", "/bulk-scrape", r#"{"rollNumbers": ["21bcs001", "bogus"]}"#).await;
        assert_eq!(status, StatusCode::OK);
        let outcomes = body.as_array().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o["status"] == "failed"));
        let mut rolls: Vec<&str> = outcomes.iter().map(|o| o["rollNumber"].as_str().unwrap()).collect();
        rolls.sort();
        assert_eq!(rolls, ["21bcs001", "bogus"]);
    }
}
