// repack-net/src/marketplace/mod.rs
// The marketplace resilience client: structured API first, HTML scrape as
// the fallback failure domain, stale cache as the last resort. A cache hit
// never touches the breaker or either upstream.
pub mod api;
pub mod breaker;
mod cache;
pub mod scrape;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use repack_common::config::Config;
use repack_common::error::{RepackError, Result};
use repack_common::kv::KvStore;
use repack_common::model::{
    MarketplaceMetadata, PluginCategory, PluginDetail, PluginSummary, PluginVersion, Resilient,
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub use api::{HttpMarketplaceApi, MarketplaceApi};
pub use breaker::{ApiPermit, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use scrape::{HttpPageFetcher, PageFetcher};

use cache::ResponseCache;

/// A marketplace reference resolved to something the fetch step can pull.
#[derive(Debug, Clone)]
pub struct ResolvedDownload {
    pub url: String,
    pub version: String,
    pub metadata: MarketplaceMetadata,
    pub fallback_used: bool,
}

pub struct MarketplaceClient {
    api: Arc<dyn MarketplaceApi>,
    pages: Arc<dyn PageFetcher>,
    breaker: CircuitBreaker,
    cache: ResponseCache,
    api_base: String,
    web_base: String,
    api_timeout: Duration,
    scrape_attempts: u32,
}

impl MarketplaceClient {
    pub fn new(config: &Config, store: Arc<dyn KvStore>) -> Result<Self> {
        let api = Arc::new(HttpMarketplaceApi::new(
            &config.marketplace_api_base,
            config.api_timeout,
        )?);
        let pages = Arc::new(HttpPageFetcher::new(config.scrape_timeout)?);
        Ok(Self::with_transports(config, store, api, pages))
    }

    /// Injection seam: tests substitute instrumented transports and a fresh
    /// store per run.
    pub fn with_transports(
        config: &Config,
        store: Arc<dyn KvStore>,
        api: Arc<dyn MarketplaceApi>,
        pages: Arc<dyn PageFetcher>,
    ) -> Self {
        MarketplaceClient {
            api,
            pages,
            breaker: CircuitBreaker::new(config.failure_threshold, config.reset_timeout),
            cache: ResponseCache::new(store, config.cache_ttl),
            api_base: config.marketplace_api_base.trim_end_matches('/').to_string(),
            web_base: config.marketplace_web_base.trim_end_matches('/').to_string(),
            api_timeout: config.api_timeout,
            scrape_attempts: config.scrape_attempts,
        }
    }

    /// Operational view of the breaker for the status surface.
    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    pub async fn search(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Resilient<Vec<PluginSummary>>> {
        let page_s = page.to_string();
        let size_s = page_size.to_string();
        let key = ResponseCache::key(
            "search",
            &[("query", query), ("page", &page_s), ("page_size", &size_s)],
        );
        if let Some(hit) = self.cache_hit(&key).await? {
            return Ok(hit);
        }

        if let Some(Ok(plugins)) = self.try_api(self.api.search(query, page, page_size)).await {
            self.cache.put(&key, &plugins, false).await?;
            return Ok(Resilient::fresh(plugins));
        }

        let url = format!("{}/plugins?q={}", self.web_base, urlencode(query));
        if let Some(plugins) = self.try_scrape(&url, scrape::extract_search).await {
            self.cache.put(&key, &plugins, true).await?;
            return Ok(Resilient::fallback(plugins));
        }

        self.stale_or_empty(&key, Vec::new()).await
    }

    pub async fn plugin(&self, author: &str, name: &str) -> Result<Resilient<Option<PluginDetail>>> {
        let key = ResponseCache::key("plugin", &[("author", author), ("name", name)]);
        if let Some(hit) = self.cache_hit(&key).await? {
            return Ok(hit);
        }

        if let Some(Ok(detail)) = self.try_api(self.api.plugin(author, name)).await {
            let value = Some(detail);
            self.cache.put(&key, &value, false).await?;
            return Ok(Resilient::fresh(value));
        }

        let url = self.plugin_page_url(author, name);
        if let Some(scraped) = self.try_scrape(&url, scrape::extract_plugin).await {
            let value = Some(PluginDetail {
                author: author.to_string(),
                name: name.to_string(),
                display_name: scraped.display_name,
                description: scraped.description,
                category: scraped.category,
                icon: scraped.icon,
                latest_version: scraped.latest_version,
                install_count: 0,
            });
            self.cache.put(&key, &value, true).await?;
            return Ok(Resilient::fallback(value));
        }

        self.stale_or_empty(&key, None).await
    }

    pub async fn versions(&self, author: &str, name: &str) -> Result<Resilient<Vec<PluginVersion>>> {
        let key = ResponseCache::key("versions", &[("author", author), ("name", name)]);
        if let Some(hit) = self.cache_hit(&key).await? {
            return Ok(hit);
        }

        if let Some(Ok(versions)) = self.try_api(self.api.versions(author, name)).await {
            self.cache.put(&key, &versions, false).await?;
            return Ok(Resilient::fresh(versions));
        }

        let url = self.plugin_page_url(author, name);
        if let Some(versions) = self.try_scrape(&url, scrape::extract_versions).await {
            self.cache.put(&key, &versions, true).await?;
            return Ok(Resilient::fallback(versions));
        }

        self.stale_or_empty(&key, Vec::new()).await
    }

    pub async fn categories(&self) -> Result<Resilient<Vec<PluginCategory>>> {
        let key = ResponseCache::key("categories", &[]);
        if let Some(hit) = self.cache_hit(&key).await? {
            return Ok(hit);
        }

        if let Some(Ok(categories)) = self.try_api(self.api.categories()).await {
            self.cache.put(&key, &categories, false).await?;
            return Ok(Resilient::fresh(categories));
        }

        let url = format!("{}/plugins", self.web_base);
        if let Some(categories) = self.try_scrape(&url, scrape::extract_categories).await {
            self.cache.put(&key, &categories, true).await?;
            return Ok(Resilient::fallback(categories));
        }

        self.stale_or_empty(&key, Vec::new()).await
    }

    /// Resolves `(author, name, version?)` to a concrete download URL plus
    /// display metadata, using latest-version resolution when the version is
    /// omitted. Unlike the read operations this fails hard when nothing can
    /// be resolved: the pipeline has no artifact to degrade to.
    pub async fn resolve_download(
        &self,
        author: &str,
        name: &str,
        version: Option<&str>,
    ) -> Result<ResolvedDownload> {
        let detail = self.plugin(author, name).await?;
        let mut fallback_used = detail.fallback_used;

        let resolved_version = match version {
            Some(v) => v.to_string(),
            None => match detail.value.as_ref().and_then(|d| d.latest_version.clone()) {
                Some(latest) => latest,
                None => {
                    let versions = self.versions(author, name).await?;
                    fallback_used |= versions.fallback_used;
                    latest_of(&versions.value).ok_or_else(|| {
                        RepackError::Api(format!(
                            "Could not resolve a version for {author}/{name}: marketplace unavailable"
                        ))
                    })?
                }
            },
        };

        let mut metadata = MarketplaceMetadata::new(author, name, &resolved_version);
        if let Some(d) = detail.value {
            metadata.display_name = d.display_name;
            metadata.category = d.category;
            metadata.icon = d.icon;
        }

        Ok(ResolvedDownload {
            url: api::download_url(&self.api_base, author, name, &resolved_version),
            version: resolved_version,
            metadata,
            fallback_used,
        })
    }

    // --- chain plumbing ---

    async fn cache_hit<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Resilient<T>>> {
        if let Some((value, fallback_used)) = self.cache.get_fresh(key).await? {
            debug!("marketplace cache hit for {key}");
            return Ok(Some(Resilient {
                value,
                fallback_used,
                stale: false,
            }));
        }
        Ok(None)
    }

    /// Runs the structured-API call if the breaker admits it, recording the
    /// outcome. `None` means the API was skipped entirely.
    async fn try_api<T, Fut>(&self, call: Fut) -> Option<Result<T>>
    where
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.breaker.admit();
        if permit == ApiPermit::Denied {
            debug!("Circuit breaker open, skipping structured API");
            return None;
        }

        // If this future is dropped mid-call the guard frees the probe
        // slot; once an outcome is recorded the slot is the breaker's.
        let probe = self.breaker.probe_guard(permit);
        let outcome = tokio::time::timeout(self.api_timeout, call).await;
        probe.disarm();

        match outcome {
            Ok(Ok(value)) => {
                self.breaker.record_success();
                Some(Ok(value))
            }
            Ok(Err(e)) => {
                warn!("Marketplace API call failed: {e}");
                self.breaker.record_failure();
                Some(Err(e))
            }
            Err(_) => {
                warn!("Marketplace API call timed out");
                self.breaker.record_failure();
                Some(Err(RepackError::Api("Marketplace API timed out".to_string())))
            }
        }
    }

    async fn try_scrape<T>(&self, url: &str, extract: fn(&str) -> Option<T>) -> Option<T> {
        match scrape::fetch_page_with_retry(self.pages.as_ref(), url, self.scrape_attempts).await {
            Ok(html) => {
                let result = extract(&html);
                if result.is_none() {
                    warn!("Scrape of {url} parsed but matched no selector pattern");
                }
                result
            }
            Err(e) => {
                warn!("Scrape fallback failed for {url}: {e}");
                None
            }
        }
    }

    /// Last links of the chain: the most recent cache entry even if expired,
    /// else an explicit empty result (both degradation flags set) so callers
    /// read it as "try again later", never "does not exist".
    async fn stale_or_empty<T: DeserializeOwned>(
        &self,
        key: &str,
        empty: T,
    ) -> Result<Resilient<T>> {
        if let Some((value, fallback_used)) = self.cache.get_any(key).await? {
            warn!("Serving stale marketplace cache entry for {key}");
            return Ok(Resilient {
                value,
                fallback_used,
                stale: true,
            });
        }
        warn!("Marketplace fully unavailable and no cache entry for {key}");
        Ok(Resilient {
            value: empty,
            fallback_used: true,
            stale: true,
        })
    }

    fn plugin_page_url(&self, author: &str, name: &str) -> String {
        format!("{}/plugins/{author}/{name}", self.web_base)
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Highest version in the list, semver-aware with a lexicographic fallback
/// for tags that do not parse.
fn latest_of(versions: &[PluginVersion]) -> Option<String> {
    let mut best: Option<(Option<semver::Version>, &str)> = None;
    for v in versions {
        let parsed = semver::Version::parse(&v.version).ok();
        let candidate = (parsed, v.version.as_str());
        best = Some(match best.take() {
            None => candidate,
            Some(current) => match (&current.0, &candidate.0) {
                (Some(a), Some(b)) => {
                    if b > a {
                        candidate
                    } else {
                        current
                    }
                }
                (None, Some(_)) => candidate,
                (Some(_), None) => current,
                (None, None) => {
                    if candidate.1 > current.1 {
                        candidate
                    } else {
                        current
                    }
                }
            },
        });
    }
    best.map(|(_, s)| s.to_string())
}
