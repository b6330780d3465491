//! Collector backed by an external scraper process.
//!
//! The process is started once per page. Its arguments may contain `{keyword}`
//! and `{page}` placeholders. It must print the page's listings to stdout,
//! either as one JSON array or as one JSON object per line:
//!
//! ```json
//! {"id": "7421", "title": "iPhone 12", "price": "¥2,800", "location": "杭州"}
//! ```
//!
//! An empty page ends the run early.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CollectBatch, CollectRequest, Collector, pause_between_pages};
use crate::domain::item::CollectedItem;
use crate::{Error, Result};

/// Default per-page process timeout.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCollectorConfig {
    pub program: String,
    pub args: Vec<String>,
    pub page_timeout: Duration,
}

impl CommandCollectorConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
        }
    }
}

/// One listing as printed by the scraper.
#[derive(Debug, Deserialize)]
struct RawListing {
    #[serde(alias = "external_id")]
    id: String,
    title: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    seller_credit: Option<String>,
}

impl RawListing {
    fn into_item(self, keyword: &str) -> CollectedItem {
        let mut item = CollectedItem::new(self.id, self.title, self.price)
            .with_location(self.location)
            .with_source_keyword(keyword);
        item.link = self.link.filter(|s| !s.is_empty());
        item.image_url = self.image_url.filter(|s| !s.is_empty());
        item.seller_credit = self.seller_credit.filter(|s| !s.is_empty());
        item
    }
}

/// Runs a scraper command per page and parses its JSON output.
pub struct CommandCollector {
    config: CommandCollectorConfig,
}

enum PageOutcome {
    Fetched(Vec<CollectedItem>),
    Stopped,
}

impl CommandCollector {
    pub fn new(config: CommandCollectorConfig) -> Result<Self> {
        if config.program.trim().is_empty() {
            return Err(Error::config("collector command must not be empty"));
        }
        Ok(Self { config })
    }

    fn page_args(&self, keyword: &str, page: u32) -> Vec<String> {
        let page = page.to_string();
        self.config
            .args
            .iter()
            .map(|arg| arg.replace("{keyword}", keyword).replace("{page}", &page))
            .collect()
    }

    async fn fetch_page(
        &self,
        keyword: &str,
        page: u32,
        stop: &CancellationToken,
    ) -> Result<PageOutcome> {
        let mut command = Command::new(&self.config.program);
        command
            .args(self.page_args(keyword, page))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            Error::collector(format!("failed to start {}: {e}", self.config.program))
        })?;

        // Dropping the output future kills the child.
        let output = tokio::select! {
            _ = stop.cancelled() => return Ok(PageOutcome::Stopped),
            result = tokio::time::timeout(self.config.page_timeout, child.wait_with_output()) => {
                match result {
                    Ok(output) => output.map_err(|e| Error::collector(format!("scraper I/O error: {e}")))?,
                    Err(_) => {
                        return Err(Error::collector(format!(
                            "scraper timed out after {:?} on page {page}",
                            self.config.page_timeout
                        )));
                    }
                }
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::collector(format!(
                "scraper exited with {:?} on page {page}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let items = parse_listings(&stdout)?
            .into_iter()
            .map(|raw| raw.into_item(keyword))
            .collect();
        Ok(PageOutcome::Fetched(items))
    }
}

fn parse_listings(stdout: &str) -> Result<Vec<RawListing>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| Error::collector(format!("malformed scraper output: {e}")));
    }
    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| Error::collector(format!("malformed scraper output line: {e}")))
        })
        .collect()
}

#[async_trait]
impl Collector for CommandCollector {
    fn name(&self) -> &str {
        &self.config.program
    }

    async fn collect(
        &self,
        request: &CollectRequest,
        stop: &CancellationToken,
    ) -> Result<CollectBatch> {
        let mut items = Vec::new();
        let mut pages_fetched = 0;
        let mut interrupted = false;

        for page in 1..=request.max_pages {
            if page > 1 && !pause_between_pages(request.page_delay, stop).await {
                interrupted = true;
                break;
            }
            if stop.is_cancelled() {
                interrupted = true;
                break;
            }

            match self.fetch_page(&request.keyword, page, stop).await {
                Ok(PageOutcome::Fetched(page_items)) => {
                    pages_fetched += 1;
                    debug!(keyword = %request.keyword, page, items = page_items.len(), "Fetched page");
                    if page_items.is_empty() {
                        break;
                    }
                    items.extend(page_items);
                }
                Ok(PageOutcome::Stopped) => {
                    interrupted = true;
                    break;
                }
                // Keep what earlier pages produced.
                Err(e) if pages_fetched > 0 => {
                    warn!(keyword = %request.keyword, page, error = %e, "Page failed, keeping earlier pages");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            keyword = %request.keyword,
            pages = pages_fetched,
            items = items.len(),
            interrupted,
            "Collection finished"
        );
        Ok(CollectBatch::new(items, pages_fetched, interrupted))
    }
}
