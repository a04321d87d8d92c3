// repack-net/src/marketplace/api.rs
// Structured-API transport for the marketplace. The trait is the seam the
// resilience client is tested through; the HTTP implementation talks to the
// real service with a bounded timeout.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use repack_common::error::{RepackError, Result};
use repack_common::model::{PluginCategory, PluginDetail, PluginSummary, PluginVersion};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::http::build_http_client;

#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn search(&self, query: &str, page: u32, page_size: u32) -> Result<Vec<PluginSummary>>;
    async fn plugin(&self, author: &str, name: &str) -> Result<PluginDetail>;
    async fn versions(&self, author: &str, name: &str) -> Result<Vec<PluginVersion>>;
    async fn categories(&self) -> Result<Vec<PluginCategory>>;
}

pub struct HttpMarketplaceApi {
    client: Client,
    base: String,
}

impl HttpMarketplaceApi {
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        Ok(HttpMarketplaceApi {
            client: build_http_client(timeout)?,
            base: base.trim_end_matches('/').to_string(),
        })
    }
}

/// Direct download endpoint for a resolved plugin version.
pub fn download_url(api_base: &str, author: &str, name: &str, version: &str) -> String {
    format!(
        "{}/plugins/{author}/{name}/{version}/download",
        api_base.trim_end_matches('/')
    )
}

#[async_trait]
impl MarketplaceApi for HttpMarketplaceApi {
    async fn search(&self, query: &str, page: u32, page_size: u32) -> Result<Vec<PluginSummary>> {
        let url = format!("{}/plugins/search/advanced", self.base);
        debug!("Marketplace API search: {url} (query: {query:?})");
        let body = json!({
            "page": page,
            "page_size": page_size,
            "query": query,
            "sort_by": "install_count",
            "sort_order": "DESC",
        });
        let response = self.client.post(&url).json(&body).send().await?;
        let envelope: Envelope<SearchData> = check(response).await?.json().await?;
        Ok(envelope
            .data
            .plugins
            .into_iter()
            .map(WirePlugin::into_summary)
            .collect())
    }

    async fn plugin(&self, author: &str, name: &str) -> Result<PluginDetail> {
        let url = format!("{}/plugins/{author}/{name}", self.base);
        debug!("Marketplace API plugin detail: {url}");
        let response = self.client.get(&url).send().await?;
        let envelope: Envelope<PluginData> = check(response).await?.json().await?;
        Ok(envelope.data.plugin.into_detail())
    }

    async fn versions(&self, author: &str, name: &str) -> Result<Vec<PluginVersion>> {
        let url = format!(
            "{}/plugins/{author}/{name}/versions?page=1&page_size=100",
            self.base
        );
        debug!("Marketplace API versions: {url}");
        let response = self.client.get(&url).send().await?;
        let envelope: Envelope<VersionData> = check(response).await?.json().await?;
        Ok(envelope
            .data
            .versions
            .into_iter()
            .map(|v| PluginVersion {
                version: v.version,
                created_at: v.created_at,
            })
            .collect())
    }

    async fn categories(&self) -> Result<Vec<PluginCategory>> {
        let url = format!("{}/categories", self.base);
        debug!("Marketplace API categories: {url}");
        let response = self.client.get(&url).send().await?;
        let envelope: Envelope<CategoryData> = check(response).await?.json().await?;
        Ok(envelope
            .data
            .categories
            .into_iter()
            .map(|c| PluginCategory {
                display_name: c.label.map(pick_i18n).unwrap_or_else(|| c.name.clone()),
                name: c.name,
            })
            .collect())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(RepackError::Api(format!(
            "Marketplace API returned HTTP {status}"
        )))
    }
}

// --- Wire shapes ---

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    plugins: Vec<WirePlugin>,
}

#[derive(Debug, Deserialize)]
struct PluginData {
    plugin: WirePlugin,
}

#[derive(Debug, Deserialize)]
struct VersionData {
    #[serde(default)]
    versions: Vec<WireVersion>,
}

#[derive(Debug, Deserialize)]
struct CategoryData {
    #[serde(default)]
    categories: Vec<WireCategory>,
}

/// The marketplace localizes display strings as language-tag maps.
fn pick_i18n(map: HashMap<String, String>) -> String {
    map.get("en_US")
        .cloned()
        .or_else(|| map.values().next().cloned())
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct WirePlugin {
    author: String,
    name: String,
    #[serde(default)]
    label: Option<HashMap<String, String>>,
    #[serde(default)]
    brief: Option<HashMap<String, String>>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    latest_version: Option<String>,
    #[serde(default)]
    install_count: Option<u64>,
}

impl WirePlugin {
    fn into_summary(self) -> PluginSummary {
        PluginSummary {
            display_name: self.label.map(pick_i18n).unwrap_or_else(|| self.name.clone()),
            description: self.brief.map(pick_i18n).unwrap_or_default(),
            category: self.category.unwrap_or_default(),
            icon: self.icon,
            latest_version: self.latest_version,
            author: self.author,
            name: self.name,
        }
    }

    fn into_detail(self) -> PluginDetail {
        PluginDetail {
            display_name: self.label.map(pick_i18n).unwrap_or_else(|| self.name.clone()),
            description: self.brief.map(pick_i18n).unwrap_or_default(),
            category: self.category.unwrap_or_default(),
            icon: self.icon,
            latest_version: self.latest_version,
            install_count: self.install_count.unwrap_or(0),
            author: self.author,
            name: self.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireVersion {
    version: String,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCategory {
    name: String,
    #[serde(default)]
    label: Option<HashMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_url_shape() {
        assert_eq!(
            download_url("https://marketplace.dify.ai/api/v1/", "langgenius", "agent", "0.0.9"),
            "https://marketplace.dify.ai/api/v1/plugins/langgenius/agent/0.0.9/download"
        );
    }

    #[test]
    fn wire_plugin_prefers_english_label() {
        let raw = json!({
            "author": "langgenius",
            "name": "agent",
            "label": {"zh_Hans": "代理", "en_US": "Agent"},
            "brief": {"en_US": "An agent plugin"},
            "category": "agent",
            "latest_version": "0.0.9"
        });
        let plugin: WirePlugin = serde_json::from_value(raw).unwrap();
        let summary = plugin.into_summary();
        assert_eq!(summary.display_name, "Agent");
        assert_eq!(summary.description, "An agent plugin");
        assert_eq!(summary.latest_version.as_deref(), Some("0.0.9"));
    }

    #[test]
    fn envelope_parses_search_payload() {
        let raw = json!({
            "code": 0,
            "data": { "plugins": [ {"author": "a", "name": "b"} ] }
        });
        let envelope: Envelope<SearchData> = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.data.plugins.len(), 1);
    }
}
