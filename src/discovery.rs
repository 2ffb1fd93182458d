// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - Catalog Discovery Source
 * Paged retrieval of plugin/theme candidates from the wordpress.org
 * directory API, with transient-failure classification for page retries
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::SourceError;
use crate::types::{ScanConfig, SortOrder};

const PLUGINS_API_URL: &str = "https://api.wordpress.org/plugins/info/1.2/";
const THEMES_API_URL: &str = "https://api.wordpress.org/themes/info/1.2/";
const PER_PAGE: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw candidate metadata as retrieved from the catalog, before scoring
/// and filtering.
#[derive(Debug, Clone, Default)]
pub struct CandidateMeta {
    pub slug: String,
    pub name: String,
    pub version: String,
    pub active_installs: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub short_description: String,
    /// WordPress core version the package declares compatibility with.
    pub tested: String,
    pub author: String,
    /// Catalog rating on a 0-100 scale.
    pub rating: u32,
    pub support_threads: u32,
    pub support_threads_resolved: u32,
    pub changelog: String,
    pub download_link: String,
}

impl CandidateMeta {
    /// Age of the last release in whole days, saturating at zero for
    /// clock skew. Unknown update times count as very stale.
    pub fn days_since_update(&self, now: DateTime<Utc>) -> u32 {
        match self.last_updated {
            Some(updated) => (now - updated).num_days().max(0) as u32,
            None => u32::MAX,
        }
    }
}

/// Seam to the package catalog. Implementations yield one page of
/// candidates at a time; an empty page signals catalog exhaustion.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn fetch_page(&self, config: &ScanConfig, page: u32)
        -> Result<Vec<CandidateMeta>, SourceError>;
}

// Wire format of the wordpress.org directory API. Tags arrive as a
// slug->label map for plugins but as a list for some theme records.
#[derive(Debug, Deserialize)]
struct DirectoryPage {
    #[serde(default)]
    plugins: Vec<DirectoryEntry>,
    #[serde(default)]
    themes: Vec<DirectoryEntry>,
}

#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    slug: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    active_installs: u64,
    #[serde(default)]
    last_updated: String,
    #[serde(default)]
    tags: TagSet,
    #[serde(default)]
    short_description: String,
    #[serde(default)]
    tested: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    rating: u32,
    #[serde(default)]
    support_threads: u32,
    #[serde(default)]
    support_threads_resolved: u32,
    #[serde(default)]
    sections: BTreeMap<String, String>,
    #[serde(default)]
    download_link: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum TagSet {
    Map(BTreeMap<String, String>),
    List(Vec<String>),
    #[default]
    Missing,
}

impl TagSet {
    fn into_slugs(self) -> Vec<String> {
        match self {
            TagSet::Map(map) => map.into_keys().collect(),
            TagSet::List(list) => list,
            TagSet::Missing => Vec::new(),
        }
    }
}

/// Catalog timestamps look like "2024-03-18 6:07pm GMT". Only the date
/// part is needed for day-granularity staleness math.
fn parse_last_updated(raw: &str) -> Option<DateTime<Utc>> {
    let date_part = raw.get(..10)?;
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

impl From<DirectoryEntry> for CandidateMeta {
    fn from(entry: DirectoryEntry) -> Self {
        let last_updated = parse_last_updated(&entry.last_updated);
        let changelog = entry.sections.get("changelog").cloned().unwrap_or_default();
        CandidateMeta {
            slug: entry.slug,
            name: entry.name,
            version: entry.version,
            active_installs: entry.active_installs,
            last_updated,
            tags: entry.tags.into_slugs(),
            short_description: entry.short_description,
            tested: entry.tested,
            author: entry.author,
            rating: entry.rating,
            support_threads: entry.support_threads,
            support_threads_resolved: entry.support_threads_resolved,
            changelog,
            download_link: entry.download_link,
        }
    }
}

/// Production discovery source backed by the wordpress.org directory API.
pub struct WpDirectorySource {
    client: reqwest::Client,
    plugins_url: String,
    themes_url: String,
}

impl WpDirectorySource {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("haukka/1.2")
            .build()
            .unwrap_or_default();
        Self {
            client,
            plugins_url: PLUGINS_API_URL.to_string(),
            themes_url: THEMES_API_URL.to_string(),
        }
    }

    /// Point both endpoints at an alternate base, for mirrors or stubs.
    pub fn with_base_urls(plugins_url: String, themes_url: String) -> Self {
        Self {
            plugins_url,
            themes_url,
            ..Self::new()
        }
    }

    fn browse_value(sort: SortOrder) -> &'static str {
        match sort {
            SortOrder::New => "new",
            SortOrder::Updated => "updated",
            SortOrder::Popular => "popular",
        }
    }
}

impl Default for WpDirectorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoverySource for WpDirectorySource {
    async fn fetch_page(
        &self,
        config: &ScanConfig,
        page: u32,
    ) -> Result<Vec<CandidateMeta>, SourceError> {
        let (url, action, list_key) = if config.themes {
            (&self.themes_url, "query_themes", "themes")
        } else {
            (&self.plugins_url, "query_plugins", "plugins")
        };

        let page_str = page.to_string();
        let per_page_str = PER_PAGE.to_string();
        let query: Vec<(&str, &str)> = vec![
            ("action", action),
            ("request[browse]", Self::browse_value(config.sort)),
            ("request[page]", &page_str),
            ("request[per_page]", &per_page_str),
            ("request[fields][active_installs]", "true"),
            ("request[fields][last_updated]", "true"),
            ("request[fields][tags]", "true"),
            ("request[fields][tested]", "true"),
            ("request[fields][rating]", "true"),
            ("request[fields][support_threads]", "true"),
            ("request[fields][support_threads_resolved]", "true"),
            ("request[fields][sections]", "true"),
            ("request[fields][short_description]", "true"),
            ("request[fields][download_link]", "true"),
        ];

        debug!("Fetching {} page {} (browse={})", list_key, page, Self::browse_value(config.sort));

        let response = self
            .client
            .get(url)
            .query(&query)
            .send()
            .await
            .map_err(|err| SourceError::Transient {
                page,
                reason: err.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            warn!("Catalog rate limit hit on page {}", page);
            return Err(SourceError::RateLimited { page, retry_after });
        }
        if status.is_server_error() {
            return Err(SourceError::Transient {
                page,
                reason: format!("catalog returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(SourceError::Fatal {
                reason: format!("catalog returned {status}"),
            });
        }

        let body: DirectoryPage =
            response.json().await.map_err(|err| SourceError::Transient {
                page,
                reason: format!("malformed catalog response: {err}"),
            })?;

        let entries = if config.themes { body.themes } else { body.plugins };
        Ok(entries.into_iter().map(CandidateMeta::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_last_updated_date_part() {
        let parsed = parse_last_updated("2024-03-18 6:07pm GMT").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2024-03-18");
        assert!(parse_last_updated("").is_none());
        assert!(parse_last_updated("not a date").is_none());
    }

    #[test]
    fn test_days_since_update_saturates() {
        let now = Utc::now();
        let mut meta = CandidateMeta::default();
        assert_eq!(meta.days_since_update(now), u32::MAX);

        meta.last_updated = Some(now + chrono::Duration::days(2));
        assert_eq!(meta.days_since_update(now), 0);
    }

    #[test]
    fn test_directory_entry_tag_shapes() {
        let as_map: DirectoryEntry = serde_json::from_value(serde_json::json!({
            "slug": "wp-forms",
            "tags": {"form": "Form", "contact": "Contact"}
        }))
        .unwrap();
        let mut slugs = as_map.tags.into_slugs();
        slugs.sort();
        assert_eq!(slugs, vec!["contact", "form"]);

        let as_list: DirectoryEntry = serde_json::from_value(serde_json::json!({
            "slug": "some-theme",
            "tags": ["dark", "blog"]
        }))
        .unwrap();
        assert_eq!(as_list.tags.into_slugs(), vec!["dark", "blog"]);
    }

    #[test]
    fn test_changelog_lifted_from_sections() {
        let entry: DirectoryEntry = serde_json::from_value(serde_json::json!({
            "slug": "wp-forms",
            "sections": {"description": "d", "changelog": "1.1: fixed xss"}
        }))
        .unwrap();
        let meta = CandidateMeta::from(entry);
        assert_eq!(meta.changelog, "1.1: fixed xss");
    }
}
