use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crawl_queue::QueueTask;

/// Structured content handed back by the external fetcher.
#[derive(Debug, Clone, Default)]
pub struct FetchedContent {
    pub title: String,
    pub content: String,
    pub author: String,
    pub published_at: Option<DateTime<Utc>>,
    pub links: Vec<String>,
    pub images: Vec<String>,
}

#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
    pub status: Option<u16>,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

/// The fetcher collaborator: turns a task into structured content or a
/// categorized error, respecting the caller's timeout. Browser drivers and
/// platform scrapers live behind this seam, outside the orchestration plane.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, task: &QueueTask, timeout: Duration)
        -> Result<FetchedContent, FetchError>;
}

/// Minimal HTTP fetcher used when no browser fleet is wired in: one GET, the
/// `<title>` element, and the raw body as content.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        task: &QueueTask,
        timeout: Duration,
    ) -> Result<FetchedContent, FetchError> {
        let response = self
            .client
            .get(&task.url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::new(format!("timeout fetching {}: {e}", task.url))
                } else {
                    FetchError::new(format!("network error fetching {}: {e}", task.url))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::with_status(
                format!("fetch of {} returned {status}", task.url),
                status.as_u16(),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::new(format!("error reading body of {}: {e}", task.url)))?;

        Ok(FetchedContent {
            title: extract_title(&body).unwrap_or_default(),
            content: body,
            ..FetchedContent::default()
        })
    }
}

fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let start = lower.find("<title")?;
    let open_end = lower[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    Some(html[open_end..close].trim().to_string())
}
