//! Notion database adapter.
//!
//! Every method makes exactly one logical remote call and reports failures as
//! [`RemoteError`]; retries belong to [`crate::sync::RetryingClient`].
//! Archived pages are not returned by database queries, so remote deletions
//! only become visible through [`RemoteClient::fetch`].

mod mapping;

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::client::{RemoteBook, RemoteClient, RemoteError, RemotePage, RemoteRef};
use crate::config::SyncSettings;
use crate::error::Error;
use crate::models::{Book, BookId};
use crate::util::{compact_text, is_http_url, normalize_text_option};

pub use mapping::{
    book_properties, parse_page, status_from_notion, status_to_notion, MAX_TAGS, MAX_TEXT_CHARS,
};

/// Largest page size the query endpoint accepts
const QUERY_PAGE_SIZE: u32 = 100;

/// Upper bound on a server-requested wait
const MAX_RETRY_AFTER: Duration = Duration::from_secs(15 * 60);

/// Connection details for one Notion database
#[derive(Clone, PartialEq, Eq)]
pub struct NotionConfig {
    pub api_base_url: String,
    pub api_token: String,
    pub database_id: String,
    pub notion_version: String,
    pub request_timeout: Duration,
    pub min_request_interval: Duration,
}

impl std::fmt::Debug for NotionConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("NotionConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &"[REDACTED]")
            .field("database_id", &self.database_id)
            .field("notion_version", &self.notion_version)
            .field("request_timeout", &self.request_timeout)
            .field("min_request_interval", &self.min_request_interval)
            .finish()
    }
}

impl NotionConfig {
    /// Combine validated settings with an API token
    pub fn from_settings(settings: &SyncSettings, api_token: &str) -> crate::error::Result<Self> {
        let api_token = normalize_text_option(Some(api_token.to_string()))
            .ok_or_else(|| Error::Config("Notion API token must not be empty".to_string()))?;
        let database_id = normalize_text_option(settings.notion_database_id.clone())
            .ok_or_else(|| Error::Config("notion_database_id is not set".to_string()))?;

        Ok(Self {
            api_base_url: settings.notion_api_base_url.trim_end_matches('/').to_string(),
            api_token,
            database_id,
            notion_version: settings.notion_version.clone(),
            request_timeout: settings.request_timeout(),
            min_request_interval: settings.min_request_interval(),
        })
    }
}

/// [`RemoteClient`] backed by the Notion REST API
pub struct NotionClient {
    client: Client,
    config: NotionConfig,
    last_request: Mutex<Option<Instant>>,
}

impl NotionClient {
    pub fn new(config: NotionConfig) -> crate::error::Result<Self> {
        if !is_http_url(&config.api_base_url) {
            return Err(Error::Config(
                "Notion API base URL must include http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            client,
            config,
            last_request: Mutex::new(None),
        })
    }

    pub const fn config(&self) -> &NotionConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Request, RemoteError> {
        let url = format!("{}{path}", self.config.api_base_url);
        let mut builder = self
            .client
            .request(method, url)
            .bearer_auth(&self.config.api_token)
            .header("Notion-Version", &self.config.notion_version)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder
            .build()
            .map_err(|error| RemoteError::Permanent(format!("invalid request: {error}")))
    }

    fn build_create_request(&self, book: &Book) -> Result<Request, RemoteError> {
        let body = json!({
            "parent": { "database_id": self.config.database_id },
            "properties": book_properties(book),
        });
        self.request(Method::POST, "/v1/pages", Some(&body))
    }

    fn build_update_request(&self, page_id: &str, book: &Book) -> Result<Request, RemoteError> {
        let body = json!({
            "properties": book_properties(book),
            "archived": book.is_deleted,
        });
        self.request(Method::PATCH, &format!("/v1/pages/{page_id}"), Some(&body))
    }

    fn build_get_request(&self, page_id: &str) -> Result<Request, RemoteError> {
        self.request(Method::GET, &format!("/v1/pages/{page_id}"), None)
    }

    fn build_query_request(&self, body: &Value) -> Result<Request, RemoteError> {
        let path = format!("/v1/databases/{}/query", self.config.database_id);
        self.request(Method::POST, &path, Some(body))
    }

    /// Keep at least `min_request_interval` between requests
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.config.min_request_interval {
                tokio::time::sleep(self.config.min_request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn execute(&self, request: Request) -> Result<Response, RemoteError> {
        self.throttle().await;
        tracing::debug!(method = %request.method(), url = %request.url(), "Notion request");
        self.client.execute(request).await.map_err(transport_error)
    }

    async fn send(&self, request: Request) -> Result<Response, RemoteError> {
        ensure_success(self.execute(request).await?).await
    }

    async fn send_for_page(&self, request: Request) -> Result<RemoteBook, RemoteError> {
        let page: Value = self.send(request).await?.json().await.map_err(transport_error)?;
        parse_page(&page)
    }

    /// Live page created from this local book, if any
    async fn find_by_local_id(&self, local_id: &BookId) -> Result<Option<String>, RemoteError> {
        let body = json!({
            "filter": {
                "property": mapping::PROP_LOCAL_ID,
                "rich_text": { "equals": local_id.to_string() },
            },
            "page_size": 1,
        });
        let request = self.build_query_request(&body)?;
        let response: QueryResponse = self.send(request).await?.json().await.map_err(transport_error)?;
        Ok(response
            .results
            .first()
            .and_then(|page| page.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

impl RemoteClient for NotionClient {
    async fn push(&self, book: &Book) -> Result<RemoteRef, RemoteError> {
        let existing = match &book.remote_id {
            Some(remote_id) => Some(remote_id.clone()),
            None => self.find_by_local_id(&book.id).await?,
        };

        let page = match existing {
            Some(page_id) => {
                let request = self.build_update_request(&page_id, book)?;
                self.send_for_page(request).await?
            }
            None => {
                let created = self.send_for_page(self.build_create_request(book)?).await?;
                if book.is_deleted {
                    let request = self.build_update_request(&created.remote_id, book)?;
                    self.send_for_page(request).await?
                } else {
                    created
                }
            }
        };

        Ok(RemoteRef {
            remote_id: page.remote_id,
            modified_at: page.modified_at,
        })
    }

    async fn pull_page(&self, since: i64, cursor: Option<&str>) -> Result<RemotePage, RemoteError> {
        let request = self.build_query_request(&query_body(since, cursor))?;
        let response: QueryResponse = self.send(request).await?.json().await.map_err(transport_error)?;

        let mut records = Vec::with_capacity(response.results.len());
        for page in &response.results {
            match parse_page(page) {
                Ok(record) => records.push(record),
                Err(error) => tracing::warn!("Skipping unreadable Notion page: {error}"),
            }
        }

        Ok(RemotePage {
            records,
            next_cursor: response
                .next_cursor
                .filter(|_| response.has_more.unwrap_or(true)),
        })
    }

    async fn fetch(&self, remote_id: &str) -> Result<Option<RemoteBook>, RemoteError> {
        let response = self.execute(self.build_get_request(remote_id)?).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let page: Value = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        parse_page(&page).map(Some)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Value>,
    next_cursor: Option<String>,
    has_more: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct NotionErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Body of a database query for pages edited at or after `since` (Unix ms)
fn query_body(since: i64, cursor: Option<&str>) -> Value {
    let mut body = json!({
        "sorts": [{ "timestamp": "last_edited_time", "direction": "ascending" }],
        "page_size": QUERY_PAGE_SIZE,
    });
    if since > 0 {
        if let Some(since) = DateTime::<Utc>::from_timestamp_millis(since) {
            body["filter"] = json!({
                "timestamp": "last_edited_time",
                "last_edited_time": { "on_or_after": since.to_rfc3339_opts(SecondsFormat::Millis, true) },
            });
        }
    }
    if let Some(cursor) = cursor {
        body["start_cursor"] = json!(cursor);
    }
    body
}

async fn ensure_success(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, retry_after, &body))
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .map_or(MAX_RETRY_AFTER, |wait| wait.min(MAX_RETRY_AFTER))
        })
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_builder() || error.is_decode() {
        RemoteError::Permanent(error.to_string())
    } else {
        RemoteError::Transient(error.to_string())
    }
}

/// Map a non-success response to the retry classification
fn error_for_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> RemoteError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return RemoteError::RateLimited { retry_after };
    }

    let message = parse_api_error(status, body);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::CONFLICT
    {
        RemoteError::Transient(message)
    } else {
        RemoteError::Permanent(message)
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<NotionErrorBody>(body) {
        if let Some(message) = payload.message {
            return match payload.code {
                Some(code) => format!("{} [{code}] ({})", message.trim(), status.as_u16()),
                None => format!("{} ({})", message.trim(), status.as_u16()),
            };
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP ({})", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookFields;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;

    fn config() -> NotionConfig {
        NotionConfig {
            api_base_url: "https://api.notion.com".to_string(),
            api_token: "secret_token".to_string(),
            database_id: "db123".to_string(),
            notion_version: "2022-06-28".to_string(),
            request_timeout: Duration::from_secs(30),
            min_request_interval: Duration::from_millis(350),
        }
    }

    fn client() -> NotionClient {
        NotionClient::new(config()).unwrap()
    }

    fn body_json(request: &Request) -> Value {
        let bytes = request.body().and_then(reqwest::Body::as_bytes).unwrap();
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn create_request_shape() {
        let book = Book::new(BookFields::new("Piranesi", "Susanna Clarke").unwrap());
        let request = client().build_create_request(&book).unwrap();

        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().as_str(), "https://api.notion.com/v1/pages");
        assert_eq!(
            request.headers().get("Notion-Version").unwrap(),
            "2022-06-28"
        );
        let auth = request
            .headers()
            .get(reqwest::header::AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(auth, "Bearer secret_token");

        let body = body_json(&request);
        assert_eq!(body["parent"]["database_id"], "db123");
        assert_eq!(
            body["properties"]["Title"]["title"][0]["text"]["content"],
            "Piranesi"
        );
    }

    #[test]
    fn update_request_archives_tombstones() {
        let mut book = Book::new(BookFields::new("Jonathan Strange", "Susanna Clarke").unwrap());
        book.is_deleted = true;
        let request = client().build_update_request("page-1", &book).unwrap();

        assert_eq!(request.method(), Method::PATCH);
        assert_eq!(request.url().as_str(), "https://api.notion.com/v1/pages/page-1");
        assert_eq!(body_json(&request)["archived"], true);
    }

    #[test]
    fn query_body_filters_by_last_edit() {
        let body = query_body(1_709_633_700_000, Some("cursor-2"));
        assert_eq!(
            body["filter"]["last_edited_time"]["on_or_after"],
            "2024-03-05T10:15:00.000Z"
        );
        assert_eq!(body["sorts"][0]["direction"], "ascending");
        assert_eq!(body["page_size"], 100);
        assert_eq!(body["start_cursor"], "cursor-2");

        let initial = query_body(0, None);
        assert!(initial.get("filter").is_none());
        assert!(initial.get("start_cursor").is_none());
    }

    #[test]
    fn status_codes_map_to_retry_classes() {
        assert_eq!(
            error_for_status(
                StatusCode::TOO_MANY_REQUESTS,
                Some(Duration::from_secs(3)),
                ""
            ),
            RemoteError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::CONFLICT,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(matches!(
                error_for_status(status, None, ""),
                RemoteError::Transient(_)
            ));
        }
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::NOT_FOUND,
        ] {
            assert!(matches!(
                error_for_status(status, None, ""),
                RemoteError::Permanent(_)
            ));
        }
    }

    #[test]
    fn api_error_message_uses_notion_body() {
        let body = r#"{"object":"error","status":400,"code":"validation_error","message":"Title is not a property that exists."}"#;
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, body),
            "Title is not a property that exists. [validation_error] (400)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP (502)");
    }

    #[test]
    fn retry_after_header_is_parsed() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn oversized_retry_after_is_capped() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e20"));
        assert_eq!(retry_after(&headers), Some(MAX_RETRY_AFTER));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("3600"));
        assert_eq!(retry_after(&headers), Some(MAX_RETRY_AFTER));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_are_spaced_out() {
        let client = client();
        let start = Instant::now();

        client.throttle().await;
        client.throttle().await;
        client.throttle().await;

        assert!(start.elapsed() >= Duration::from_millis(700));
    }

    #[test]
    fn config_debug_redacts_token() {
        let debug = format!("{:?}", config());
        assert!(!debug.contains("secret_token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn config_from_settings_requires_token_and_database() {
        let mut settings = SyncSettings {
            notion_api_base_url: "https://api.notion.com/".to_string(),
            ..SyncSettings::default()
        };
        assert!(matches!(
            NotionConfig::from_settings(&settings, "secret_token"),
            Err(Error::Config(_))
        ));

        settings.notion_database_id = Some(" db123 ".to_string());
        assert!(matches!(
            NotionConfig::from_settings(&settings, "  "),
            Err(Error::Config(_))
        ));

        let config = NotionConfig::from_settings(&settings, "secret_token").unwrap();
        assert_eq!(config.database_id, "db123");
        assert_eq!(config.api_base_url, "https://api.notion.com");
        assert!(NotionClient::new(config).is_ok());
    }

    #[test]
    fn rejects_non_http_base_url() {
        let mut config = config();
        config.api_base_url = "api.notion.com".to_string();
        assert!(matches!(NotionClient::new(config), Err(Error::Config(_))));
    }
}
