//! "Is this site alive and maintained" heuristics on the company homepage
//!
//! One fetch of `https://{domain}` per cache window. The page is checked for
//! a body of real paragraphs, navigation back into the same site and a
//! current or prior calendar year somewhere in the text. Any fetch problem
//! makes the whole report unknown.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use regex::Regex;
use reqwest::Url;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{ActivityConfig, HttpConfig};
use crate::model::ActivityReport;
use crate::throttle::DomainThrottle;
use crate::{bounded, PipelineError, Result, SignalError};

const CONTENT_WEIGHT: f32 = 0.3;
const NAVIGATION_WEIGHT: f32 = 0.3;
const RECENCY_WEIGHT: f32 = 0.4;

/// Bytes of a page body read before the rest is ignored
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// A fetched page reduced to what the heuristics read
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchedPage {
    pub status: u16,
    /// Visible text, paragraphs separated by blank lines
    pub text: String,
    /// Raw `href` values in document order
    pub links: Vec<String>,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Page-fetch capability
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPage, SignalError>;
}

/// reqwest backed fetcher that strips HTML down to text and links
pub struct HttpPageFetcher {
    http_client: reqwest::Client,
    hidden: Regex,
    block_tag: Regex,
    any_tag: Regex,
    whitespace: Regex,
    href: Regex,
}

impl HttpPageFetcher {
    pub fn new(http: &HttpConfig, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(http.user_agent.as_str())
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| PipelineError::Initialization(format!("page fetcher: {}", e)))?;

        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| PipelineError::Initialization(format!("page fetcher regex: {}", e)))
        };

        Ok(Self {
            http_client,
            hidden: compile(r"(?is)<!--.*?-->|<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>")?,
            block_tag: compile(
                r"(?i)</?(?:p|div|br|li|ul|ol|h[1-6]|section|article|header|footer|nav|main|aside|tr|table|blockquote)\b[^>]*>",
            )?,
            any_tag: compile(r"<[^>]*>")?,
            whitespace: compile(r"\s+")?,
            href: compile(r#"(?i)<a\b[^>]*?\bhref\s*=\s*["']([^"']*)["']"#)?,
        })
    }

    /// Visible text of an HTML document, one paragraph per block element
    pub fn extract_text(&self, html: &str) -> String {
        let visible = self.hidden.replace_all(html, " ");
        let flat = self.whitespace.replace_all(&visible, " ");
        let blocks = self.block_tag.replace_all(&flat, "\n\n");
        let text = self.any_tag.replace_all(&blocks, " ");

        text.split("\n\n")
            .map(|block| {
                let block = decode_entities(block);
                self.whitespace.replace_all(block.trim(), " ").into_owned()
            })
            .filter(|block| !block.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn extract_links(&self, html: &str) -> Vec<String> {
        self.href
            .captures_iter(html)
            .filter_map(|caps| caps.get(1))
            .map(|m| decode_entities(m.as_str()))
            .collect()
    }
}

/// Append as much of `chunk` as fits under `limit`. Returns false once the
/// limit is reached.
fn append_capped(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> bool {
    let room = limit.saturating_sub(body.len());
    let take = chunk.len().min(room);
    body.extend_from_slice(&chunk[..take]);
    body.len() < limit
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&copy;", "©")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPage, SignalError> {
        debug!(url = %url, "Fetching page");

        let mut response = self.http_client.get(url).send().await?;
        let status = response.status().as_u16();

        if !response.status().is_success() {
            return Ok(FetchedPage {
                status,
                ..FetchedPage::default()
            });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if !append_capped(&mut body, &chunk, MAX_BODY_BYTES) {
                debug!(url = %url, "Page body truncated at {} bytes", MAX_BODY_BYTES);
                break;
            }
        }

        let html = String::from_utf8_lossy(&body);
        Ok(FetchedPage {
            status,
            text: self.extract_text(&html),
            links: self.extract_links(&html),
        })
    }
}

/// Pure page heuristics
pub struct ActivityAnalyzer {
    min_paragraphs: usize,
    min_paragraph_words: usize,
    min_internal_links: usize,
    paragraph_break: Regex,
    year_token: Regex,
}

impl ActivityAnalyzer {
    pub fn new(config: &ActivityConfig) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| PipelineError::Initialization(format!("activity regex: {}", e)))
        };

        Ok(Self {
            min_paragraphs: config.min_paragraphs,
            min_paragraph_words: config.min_paragraph_words,
            min_internal_links: config.min_internal_links,
            paragraph_break: compile(r"\n\s*\n")?,
            year_token: compile(r"\b\d{4}\b")?,
        })
    }

    pub fn analyze(&self, domain: &str, page: &FetchedPage, current_year: i32) -> ActivityReport {
        let paragraphs = self
            .paragraph_break
            .split(&page.text)
            .filter(|block| block.split_whitespace().count() >= self.min_paragraph_words)
            .count();
        let has_content = paragraphs > self.min_paragraphs;

        let has_navigation = internal_link_count(domain, &page.links) >= self.min_internal_links;

        let shows_activity = self
            .year_token
            .find_iter(&page.text)
            .filter_map(|m| m.as_str().parse::<i32>().ok())
            .any(|year| year == current_year || year == current_year - 1);

        let score = CONTENT_WEIGHT * f32::from(u8::from(has_content))
            + NAVIGATION_WEIGHT * f32::from(u8::from(has_navigation))
            + RECENCY_WEIGHT * f32::from(u8::from(shows_activity));

        ActivityReport {
            has_content,
            has_navigation,
            shows_activity,
            score,
        }
    }
}

fn same_site(host: &str, domain: &str) -> bool {
    let host = host.to_lowercase();
    host.trim_start_matches("www.") == domain.trim_start_matches("www.")
}

/// Distinct same-site pages linked from the homepage, the homepage excluded
fn internal_link_count(domain: &str, links: &[String]) -> usize {
    let Ok(base) = Url::parse(&format!("https://{}/", domain)) else {
        return 0;
    };

    let mut pages = HashSet::new();
    for href in links {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(url) = base.join(href) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        if !url.host_str().is_some_and(|host| same_site(host, domain)) {
            continue;
        }
        let path = url.path().trim_end_matches('/').to_lowercase();
        if !path.is_empty() {
            pages.insert(path);
        }
    }
    pages.len()
}

/// Fetch-and-analyze with throttling and a hard timeout
pub struct ActivityProber {
    fetcher: Arc<dyn PageFetcher>,
    throttle: Arc<DomainThrottle>,
    analyzer: ActivityAnalyzer,
    timeout: Duration,
}

impl ActivityProber {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        throttle: Arc<DomainThrottle>,
        config: &ActivityConfig,
    ) -> Result<Self> {
        Ok(Self {
            fetcher,
            throttle,
            analyzer: ActivityAnalyzer::new(config)?,
            timeout: config.fetch_timeout(),
        })
    }

    /// Single fetch attempt, no retries. `None` on any failure.
    pub async fn probe(&self, domain: &str) -> Option<ActivityReport> {
        self.throttle.acquire_host(domain).await;

        let url = format!("https://{}", domain);
        let page = match bounded(self.timeout, self.fetcher.fetch(&url)).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Activity fetch failed for {}: {}", url, e);
                return None;
            }
        };

        if !page.is_success() {
            debug!("Activity fetch for {} returned HTTP {}", url, page.status);
            return None;
        }

        let report = self.analyzer.analyze(domain, &page, Utc::now().year());
        debug!(
            domain = %domain,
            content = report.has_content,
            navigation = report.has_navigation,
            recent = report.shows_activity,
            "Activity probed"
        );
        Some(report)
    }
}
