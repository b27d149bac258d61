//! Social sentiment sources.
//!
//! Defines the `SentimentSource` trait and provides a live recent-search
//! feed (`twitter`) plus a fixed offline corpus (`fallback`).

pub mod fallback;
pub mod twitter;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::SocialPost;

/// Supplies raw social posts for a token symbol.
///
/// Implementors return an empty list when there is nothing to report,
/// including for symbols they have never heard of. Errors are reserved
/// for transport or upstream failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SentimentSource: Send + Sync {
    async fn fetch(&self, symbol: &str) -> Result<Vec<SocialPost>>;

    /// Source identifier for logging.
    fn source_name(&self) -> &'static str;
}
