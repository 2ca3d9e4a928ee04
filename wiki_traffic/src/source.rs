//! Page-view fetch collaborator and the Wikimedia REST client

use crate::error::{Result, TrafficError};
use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Default endpoint of the per-article page-view API
pub const WIKIMEDIA_PAGEVIEWS_URL: &str =
    "https://wikimedia.org/api/rest_v1/metrics/pageviews/per-article";

/// Source of daily view counts for one page
pub trait PageViewSource {
    /// Daily views of `title` on the `language` Wikipedia, ascending by date
    ///
    /// Network, HTTP and decoding failures are reported as
    /// [`TrafficError::SourceUnavailable`].
    fn fetch_daily_views(
        &self,
        language: &str,
        title: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>>;
}

#[derive(Debug, Deserialize)]
struct PageViewResponse {
    items: Vec<PageViewItem>,
}

#[derive(Debug, Deserialize)]
struct PageViewItem {
    timestamp: String,
    views: u64,
}

/// Blocking client for the Wikimedia page-view API
#[derive(Debug, Clone)]
pub struct WikimediaClient {
    client: Client,
    base_url: String,
}

impl WikimediaClient {
    /// Create a new client with the given User-Agent and request timeout
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        Self::with_base_url(WIKIMEDIA_PAGEVIEWS_URL, user_agent, timeout)
    }

    /// Create a client against a different API root
    pub fn with_base_url(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| TrafficError::SourceUnavailable {
                page: base_url.to_string(),
                reason: format!("client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL of one article's daily series
    pub fn article_url(
        &self,
        language: &str,
        title: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Url> {
        let unavailable = |reason: String| TrafficError::SourceUnavailable {
            page: title.to_string(),
            reason,
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| unavailable(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| unavailable("base URL cannot take path segments".to_string()))?
            .extend(&[
                format!("{}.wikipedia", language),
                "all-access".to_string(),
                "all-agents".to_string(),
                title.replace(' ', "_"),
                "daily".to_string(),
                start.format("%Y%m%d").to_string(),
                end.format("%Y%m%d").to_string(),
            ]);
        Ok(url)
    }
}

impl PageViewSource for WikimediaClient {
    fn fetch_daily_views(
        &self,
        language: &str,
        title: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>> {
        let page = format!("{}:{}", language, title);
        let unavailable = |reason: String| TrafficError::SourceUnavailable {
            page: page.clone(),
            reason,
        };

        let url = self.article_url(language, title, start, end)?;
        debug!(%url, "Fetching page views");

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| unavailable(e.to_string()))?;
        let body: PageViewResponse = response.json().map_err(|e| unavailable(e.to_string()))?;

        parse_items(body.items).map_err(unavailable)
    }
}

/// Convert API items to a daily series, first entry per day wins
fn parse_items(items: Vec<PageViewItem>) -> std::result::Result<Vec<(NaiveDate, f64)>, String> {
    let mut days = BTreeMap::new();
    for item in items {
        // Timestamps look like 2024010100
        let day = item.timestamp.get(..8).unwrap_or(&item.timestamp);
        let date = NaiveDate::parse_from_str(day, "%Y%m%d")
            .map_err(|e| format!("bad timestamp '{}': {}", item.timestamp, e))?;
        days.entry(date).or_insert(item.views as f64);
    }
    Ok(days.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_url() {
        let client = WikimediaClient::new("wikitrends-test/0.1", Duration::from_secs(5)).unwrap();
        let url = client
            .article_url(
                "en",
                "Solar eclipse",
                NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 4, 10).unwrap(),
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://wikimedia.org/api/rest_v1/metrics/pageviews/per-article/en.wikipedia/all-access/all-agents/Solar_eclipse/daily/20240401/20240410"
        );
    }

    #[test]
    fn test_parse_items_deduplicates() {
        let body: PageViewResponse = serde_json::from_str(
            r#"{"items": [
                {"timestamp": "2024010100", "views": 10},
                {"timestamp": "2024010100", "views": 99},
                {"timestamp": "2024010200", "views": 12}
            ]}"#,
        )
        .unwrap();
        let series = parse_items(body.items).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].1, 10.0);
        assert_eq!(series[1].0, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[test]
    fn test_parse_items_rejects_bad_timestamp() {
        let items = vec![PageViewItem {
            timestamp: "soon".to_string(),
            views: 1,
        }];
        assert!(parse_items(items).is_err());
    }
}
