// ===== repack-common/src/model/marketplace.rs =====
use serde::{Deserialize, Serialize};

/// One plugin as it appears in search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSummary {
    pub author: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
}

/// Full descriptor returned by the detail endpoint (or its scraped shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDetail {
    pub author: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub install_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginVersion {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCategory {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

/// Denormalized descriptor attached to a task whose source is a marketplace
/// reference, so the UI can render it without a second lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceMetadata {
    pub author: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Always "marketplace"; lets frame consumers tell resolved sources apart.
    pub source: String,
}

impl MarketplaceMetadata {
    pub fn new(author: &str, name: &str, version: &str) -> Self {
        MarketplaceMetadata {
            author: author.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            display_name: String::new(),
            category: String::new(),
            icon: None,
            source: "marketplace".to_string(),
        }
    }
}

/// A marketplace answer plus how it was obtained.
///
/// `fallback_used` marks results that came from the HTML scrape path,
/// `stale` marks expired cache entries served because every live path
/// failed. Both false means a fresh structured-API (or fresh-cache) answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resilient<T> {
    pub value: T,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default)]
    pub stale: bool,
}

impl<T> Resilient<T> {
    pub fn fresh(value: T) -> Self {
        Resilient {
            value,
            fallback_used: false,
            stale: false,
        }
    }

    pub fn fallback(value: T) -> Self {
        Resilient {
            value,
            fallback_used: true,
            stale: false,
        }
    }
}
