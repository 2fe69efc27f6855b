//! Webpage tools: fetch page content, open links
//!
//! Fetching returns the page's visible text plus its links (name and URL),
//! so the model can follow up with `open_link`.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::tools::Tool;
use crate::{MurmurError, Result};

/// Browser-like User-Agent; some sites return 403 to non-browser clients.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Cap on returned page text so a single fetch cannot flood the context.
const MAX_TEXT_CHARS: usize = 12_000;

/// Webpage collaborator: content retrieval and link opening.
pub trait WebpageClient: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String>;
    fn open(&self, url: &str) -> Result<()>;
}

/// HTTP-backed webpage client.
pub struct HttpWebpageClient {
    client: reqwest::blocking::Client,
}

impl HttpWebpageClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MurmurError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl WebpageClient for HttpWebpageClient {
    fn fetch(&self, url: &str) -> Result<String> {
        debug!("Fetching webpage: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| MurmurError::ToolError(format!("request failed: {}", e)))?;

        let html = response
            .text()
            .map_err(|e| MurmurError::ToolError(format!("failed to read body: {}", e)))?;

        Ok(render_page(&html))
    }

    fn open(&self, url: &str) -> Result<()> {
        open_in_browser(url)
    }
}

/// Extract visible text and links from an HTML document.
fn render_page(html: &str) -> String {
    let document = scraper::Html::parse_document(html);

    let body_selector = scraper::Selector::parse("body").expect("static selector");
    let text = document
        .select(&body_selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default();
    let mut text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() > MAX_TEXT_CHARS {
        text = text.chars().take(MAX_TEXT_CHARS).collect();
        text.push('…');
    }

    let link_selector = scraper::Selector::parse("a[href]").expect("static selector");
    let links: Vec<serde_json::Value> = document
        .select(&link_selector)
        .map(|a| {
            serde_json::json!({
                "name": a.text().collect::<String>().trim(),
                "url": a.value().attr("href").unwrap_or_default(),
            })
        })
        .collect();

    serde_json::json!({ "text": text, "links": links }).to_string()
}

/// Open a URL with the platform's default browser.
fn open_in_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    let (program, args) = ("open", vec![url]);
    #[cfg(target_os = "windows")]
    let (program, args) = ("cmd", vec!["/C", "start", "", url]);
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let (program, args) = ("xdg-open", vec![url]);

    std::process::Command::new(program)
        .args(args)
        .spawn()
        .map_err(|e| MurmurError::ToolError(format!("could not open browser: {}", e)))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct UrlArgs {
    url: String,
}

pub struct FetchWebpageTool {
    client: Arc<dyn WebpageClient>,
}

impl FetchWebpageTool {
    pub fn new(client: Arc<dyn WebpageClient>) -> Self {
        Self { client }
    }
}

impl Tool for FetchWebpageTool {
    fn name(&self) -> &str {
        "fetch_webpage"
    }

    fn description(&self) -> &str {
        "Fetch the text content and links of a webpage given its URL"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "URL of the page to fetch" },
            },
            "required": ["url"],
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<String> {
        let args: UrlArgs = serde_json::from_value(args)
            .map_err(|e| MurmurError::ProtocolError(format!("invalid arguments: {}", e)))?;
        self.client.fetch(&args.url)
    }
}

pub struct OpenLinkTool {
    client: Arc<dyn WebpageClient>,
}

impl OpenLinkTool {
    pub fn new(client: Arc<dyn WebpageClient>) -> Self {
        Self { client }
    }
}

impl Tool for OpenLinkTool {
    fn name(&self) -> &str {
        "open_link"
    }

    fn description(&self) -> &str {
        "Open a link in the user's default web browser"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "URL to open" },
            },
            "required": ["url"],
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<String> {
        let args: UrlArgs = serde_json::from_value(args)
            .map_err(|e| MurmurError::ProtocolError(format!("invalid arguments: {}", e)))?;
        self.client.open(&args.url)?;
        Ok(format!("Opened {} in the browser", args.url))
    }
}
