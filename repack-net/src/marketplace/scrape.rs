// repack-net/src/marketplace/scrape.rs
// HTML fallback for marketplace reads. Extraction is a sequence of pure
// (document) -> optional(fields) functions tried in order; the first
// non-empty match wins. Only the page fetch itself is retried -- a page
// that parses but yields nothing is not a transient failure.
use std::time::Duration;

use async_trait::async_trait;
use repack_common::error::{RepackError, Result};
use repack_common::model::{PluginCategory, PluginSummary, PluginVersion};
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

use crate::http::build_http_client;

/// Seam between the scrape path and the network.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String>;
}

pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(HttpPageFetcher {
            client: build_http_client(timeout)?,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        debug!("Fetching marketplace page: {url}");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RepackError::Scrape(format!(
                "Marketplace page returned HTTP {status} for {url}"
            )));
        }
        Ok(response.text().await?)
    }
}

/// Fetches a page, retrying transient transport failures with linearly
/// increasing backoff (1s, 2s, 3s, ...).
pub(crate) async fn fetch_page_with_retry(
    pages: &dyn PageFetcher,
    url: &str,
    attempts: u32,
) -> Result<String> {
    let attempts = attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match pages.fetch_page(url).await {
            Ok(html) => return Ok(html),
            Err(e) => {
                warn!("Scrape fetch attempt {attempt}/{attempts} failed for {url}: {e}");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
            }
        }
    }
    Err(last_error.unwrap_or_else(|| RepackError::Scrape("scrape failed".to_string())))
}

/// Fields the plugin detail page yields. Author and name come from the
/// caller (they are part of the page URL), so extraction only needs the
/// display-oriented fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapedPlugin {
    pub display_name: String,
    pub description: String,
    pub category: String,
    pub icon: Option<String>,
    pub latest_version: Option<String>,
}

// --- Plugin detail extractors, in preference order ---

pub(crate) const PLUGIN_EXTRACTORS: &[fn(&Html) -> Option<ScrapedPlugin>] =
    &[plugin_from_next_data, plugin_from_markup];

/// The marketplace is a Next.js app; the full plugin record rides along in
/// the `__NEXT_DATA__` script blob.
fn plugin_from_next_data(doc: &Html) -> Option<ScrapedPlugin> {
    let data = next_data(doc)?;
    let plugin = dig(&data, &["props", "pageProps", "plugin"])
        .or_else(|| dig(&data, &["props", "pageProps", "detail"]))?;

    let display_name = i18n_or_str(plugin.get("label")).unwrap_or_default();
    let latest_version = plugin
        .get("latest_version")
        .or_else(|| plugin.get("version"))
        .and_then(Value::as_str)
        .map(str::to_string);
    if display_name.is_empty() && latest_version.is_none() {
        return None;
    }
    Some(ScrapedPlugin {
        display_name,
        description: i18n_or_str(plugin.get("brief")).unwrap_or_default(),
        category: plugin
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        icon: plugin.get("icon").and_then(Value::as_str).map(str::to_string),
        latest_version,
    })
}

/// Structural fallback for server-rendered markup.
fn plugin_from_markup(doc: &Html) -> Option<ScrapedPlugin> {
    let display_name = first_text(doc, &["[data-plugin-name]", "h1.plugin-name", "h1"])?;
    let latest_version = first_text(
        doc,
        &["[data-plugin-version]", ".plugin-version", "span.version"],
    );
    let description = first_text(doc, &["[data-plugin-brief]", ".plugin-description", "p.brief"])
        .unwrap_or_default();
    let category =
        first_text(doc, &["[data-plugin-category]", ".plugin-category"]).unwrap_or_default();
    let icon = first_attr(doc, &["img.plugin-icon", "[data-plugin-icon]"], "src");
    Some(ScrapedPlugin {
        display_name,
        description,
        category,
        icon,
        latest_version,
    })
}

pub(crate) fn extract_plugin(html: &str) -> Option<ScrapedPlugin> {
    let doc = Html::parse_document(html);
    PLUGIN_EXTRACTORS.iter().find_map(|extract| extract(&doc))
}

// --- Version list extractors ---

pub(crate) const VERSION_EXTRACTORS: &[fn(&Html) -> Option<Vec<PluginVersion>>] =
    &[versions_from_next_data, versions_from_markup];

fn versions_from_next_data(doc: &Html) -> Option<Vec<PluginVersion>> {
    let data = next_data(doc)?;
    let versions = dig(&data, &["props", "pageProps", "versions"])?.as_array()?;
    let parsed: Vec<PluginVersion> = versions
        .iter()
        .filter_map(|v| {
            let version = v
                .get("version")
                .and_then(Value::as_str)
                .or_else(|| v.as_str())?;
            Some(PluginVersion {
                version: version.to_string(),
                created_at: v
                    .get("created_at")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect();
    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

fn versions_from_markup(doc: &Html) -> Option<Vec<PluginVersion>> {
    for raw in ["[data-version]", ".version-list li", "li.version-item"] {
        let selector = Selector::parse(raw).ok()?;
        let parsed: Vec<PluginVersion> = doc
            .select(&selector)
            .map(|el| {
                let version = el
                    .value()
                    .attr("data-version")
                    .map(str::to_string)
                    .unwrap_or_else(|| el.text().collect::<String>().trim().to_string());
                PluginVersion {
                    version,
                    created_at: None,
                }
            })
            .filter(|v| !v.version.is_empty())
            .collect();
        if !parsed.is_empty() {
            return Some(parsed);
        }
    }
    None
}

pub(crate) fn extract_versions(html: &str) -> Option<Vec<PluginVersion>> {
    let doc = Html::parse_document(html);
    VERSION_EXTRACTORS.iter().find_map(|extract| extract(&doc))
}

// --- Search result extractors ---

pub(crate) const SEARCH_EXTRACTORS: &[fn(&Html) -> Option<Vec<PluginSummary>>] =
    &[search_from_next_data, search_from_markup];

fn search_from_next_data(doc: &Html) -> Option<Vec<PluginSummary>> {
    let data = next_data(doc)?;
    let plugins = dig(&data, &["props", "pageProps", "plugins"])?.as_array()?;
    let parsed: Vec<PluginSummary> = plugins
        .iter()
        .filter_map(|p| {
            Some(PluginSummary {
                author: p.get("author")?.as_str()?.to_string(),
                name: p.get("name")?.as_str()?.to_string(),
                display_name: i18n_or_str(p.get("label")).unwrap_or_default(),
                description: i18n_or_str(p.get("brief")).unwrap_or_default(),
                category: p
                    .get("category")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                icon: p.get("icon").and_then(Value::as_str).map(str::to_string),
                latest_version: p
                    .get("latest_version")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect();
    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

/// Plugin cards link to `/plugins/<author>/<name>`; that href is the only
/// structure the card markup reliably carries.
fn search_from_markup(doc: &Html) -> Option<Vec<PluginSummary>> {
    let selector = Selector::parse("a[href^=\"/plugins/\"]").ok()?;
    let mut seen = std::collections::HashSet::new();
    let parsed: Vec<PluginSummary> = doc
        .select(&selector)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            let mut parts = href.trim_start_matches("/plugins/").split('/');
            let author = parts.next()?.to_string();
            let name = parts.next()?.split('?').next()?.to_string();
            if author.is_empty() || name.is_empty() || !seen.insert((author.clone(), name.clone()))
            {
                return None;
            }
            let display_name = el.text().collect::<String>().trim().to_string();
            Some(PluginSummary {
                display_name: if display_name.is_empty() {
                    name.clone()
                } else {
                    display_name
                },
                description: String::new(),
                category: String::new(),
                icon: None,
                latest_version: None,
                author,
                name,
            })
        })
        .collect();
    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

pub(crate) fn extract_search(html: &str) -> Option<Vec<PluginSummary>> {
    let doc = Html::parse_document(html);
    SEARCH_EXTRACTORS.iter().find_map(|extract| extract(&doc))
}

// --- Category extractors ---

pub(crate) const CATEGORY_EXTRACTORS: &[fn(&Html) -> Option<Vec<PluginCategory>>] =
    &[categories_from_next_data, categories_from_markup];

fn categories_from_next_data(doc: &Html) -> Option<Vec<PluginCategory>> {
    let data = next_data(doc)?;
    let categories = dig(&data, &["props", "pageProps", "categories"])?.as_array()?;
    let parsed: Vec<PluginCategory> = categories
        .iter()
        .filter_map(|c| {
            let name = c
                .get("name")
                .and_then(Value::as_str)
                .or_else(|| c.as_str())?;
            Some(PluginCategory {
                name: name.to_string(),
                display_name: i18n_or_str(c.get("label")).unwrap_or_else(|| name.to_string()),
            })
        })
        .collect();
    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

fn categories_from_markup(doc: &Html) -> Option<Vec<PluginCategory>> {
    let selector = Selector::parse("a[href*=\"category=\"]").ok()?;
    let mut seen = std::collections::HashSet::new();
    let parsed: Vec<PluginCategory> = doc
        .select(&selector)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            let name = href.split("category=").nth(1)?.split('&').next()?.to_string();
            if name.is_empty() || !seen.insert(name.clone()) {
                return None;
            }
            let display_name = el.text().collect::<String>().trim().to_string();
            Some(PluginCategory {
                display_name: if display_name.is_empty() {
                    name.clone()
                } else {
                    display_name
                },
                name,
            })
        })
        .collect();
    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

pub(crate) fn extract_categories(html: &str) -> Option<Vec<PluginCategory>> {
    let doc = Html::parse_document(html);
    CATEGORY_EXTRACTORS.iter().find_map(|extract| extract(&doc))
}

// --- Shared helpers ---

fn next_data(doc: &Html) -> Option<Value> {
    let selector = Selector::parse("script#__NEXT_DATA__").ok()?;
    let script = doc.select(&selector).next()?;
    let raw = script.text().collect::<String>();
    serde_json::from_str(&raw).ok()
}

fn dig<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Display strings appear either as plain strings or i18n maps.
fn i18n_or_str(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("en_US")
            .or_else(|| map.values().next())
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }
}

fn first_text(doc: &Html, selectors: &[&str]) -> Option<String> {
    for raw in selectors {
        if let Ok(selector) = Selector::parse(raw) {
            if let Some(el) = doc.select(&selector).next() {
                let text = el.text().collect::<String>().trim().to_string();
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }
    None
}

fn first_attr(doc: &Html, selectors: &[&str], attr: &str) -> Option<String> {
    for raw in selectors {
        if let Ok(selector) = Selector::parse(raw) {
            if let Some(value) = doc.select(&selector).next().and_then(|el| el.value().attr(attr))
            {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}
