//! Live social feed via the X (Twitter) v2 recent-search API.
//!
//! API: `https://api.twitter.com/2/tweets/search/recent`
//! Auth: bearer token. Queries `$SYMBOL` cashtags, excluding retweets,
//! and scores each post by its public engagement metrics.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::SentimentSource;
use crate::types::SocialPost;

const SEARCH_URL: &str = "https://api.twitter.com/2/tweets/search/recent";

/// The API rejects `max_results` outside this range.
const MIN_RESULTS: u32 = 10;
const MAX_RESULTS: u32 = 100;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Tweet>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    text: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Deserialize, Default)]
struct PublicMetrics {
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    quote_count: u64,
}

impl PublicMetrics {
    /// Reposts count double: they carry the post to new audiences.
    fn engagement(&self) -> u64 {
        self.like_count + 2 * self.retweet_count + self.reply_count + self.quote_count
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TwitterSource {
    http: Client,
    bearer_token: SecretString,
    max_results: u32,
}

impl TwitterSource {
    pub fn new(bearer_token: SecretString, max_results: u32) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("SWARM/0.1.0")
            .build()
            .context("Failed to build Twitter HTTP client")?;
        Ok(Self {
            http,
            bearer_token,
            max_results: max_results.clamp(MIN_RESULTS, MAX_RESULTS),
        })
    }

    fn build_query(symbol: &str) -> String {
        format!("${} lang:en -is:retweet", symbol.to_uppercase())
    }

    fn to_posts(response: SearchResponse) -> Vec<SocialPost> {
        response
            .data
            .into_iter()
            .map(|t| SocialPost {
                engagement: t.public_metrics.unwrap_or_default().engagement(),
                timestamp: t.created_at.unwrap_or_else(Utc::now),
                text: t.text,
            })
            .collect()
    }
}

#[async_trait]
impl SentimentSource for TwitterSource {
    async fn fetch(&self, symbol: &str) -> Result<Vec<SocialPost>> {
        let query = Self::build_query(symbol);
        let url = format!(
            "{SEARCH_URL}?query={}&max_results={}&tweet.fields=public_metrics,created_at",
            urlencoding::encode(&query),
            self.max_results,
        );

        let resp = self
            .http
            .get(&url)
            .bearer_auth(self.bearer_token.expose_secret())
            .send()
            .await
            .context("Twitter search request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Twitter search error {status}: {body}");
        }

        let body: SearchResponse = resp
            .json()
            .await
            .context("Failed to parse Twitter search response")?;

        let posts = Self::to_posts(body);
        debug!(symbol, count = posts.len(), "Fetched social posts");
        Ok(posts)
    }

    fn source_name(&self) -> &'static str {
        "twitter"
    }
}
