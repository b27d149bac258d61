//! Fixed offline corpus.
//!
//! Used when no live feed credentials are configured, and by tests that
//! need deterministic input. Only a handful of well-known symbols carry
//! posts; every other symbol yields an empty list.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use super::SentimentSource;
use crate::types::SocialPost;

/// (symbol, text, engagement)
const CORPUS: &[(&str, &str, u64)] = &[
    ("ETH", "ETH staking inflows hit a record this week, validators keep growing", 420),
    ("ETH", "Gas fees are low and L2 activity is surging, bullish on $ETH", 310),
    ("ETH", "Worried about the ETH/BTC ratio, could drop further before any recovery", 150),
    ("ETH", "Big unlock coming, some fear of sell pressure on ETH", 90),
    ("BTC", "Spot ETF inflows remain strong, $BTC holding support", 800),
    ("BTC", "Miners selling into strength, short term weakness likely", 260),
    ("BTC", "Halving narrative keeps supporting long-term growth", 540),
    ("PEPE", "$PEPE whales accumulating again, volume up 3x", 210),
    ("PEPE", "Memecoin season looks weak, PEPE could crash hard", 180),
    ("PEPE", "New exchange listing rumored for PEPE", 75),
    ("LINK", "Chainlink CCIP adoption keeps growing across banks", 330),
    ("LINK", "LINK breaking out of a long accumulation range", 190),
    ("SOL", "Solana DEX volume flipped Ethereum again", 600),
    ("SOL", "Another SOL outage would be a real threat to momentum", 240),
];

/// Offline sentiment source backed by a static corpus.
#[derive(Debug, Default, Clone)]
pub struct FallbackCorpus;

impl FallbackCorpus {
    pub fn new() -> Self {
        Self
    }

    /// Symbols with at least one post in the corpus.
    pub fn known_symbols() -> Vec<&'static str> {
        let mut symbols: Vec<&str> = CORPUS.iter().map(|(s, _, _)| *s).collect();
        symbols.dedup();
        symbols
    }
}

#[async_trait]
impl SentimentSource for FallbackCorpus {
    async fn fetch(&self, symbol: &str) -> Result<Vec<SocialPost>> {
        let now = Utc::now();
        Ok(CORPUS
            .iter()
            .filter(|(s, _, _)| s.eq_ignore_ascii_case(symbol))
            .map(|(_, text, engagement)| SocialPost {
                text: text.to_string(),
                engagement: *engagement,
                timestamp: now,
            })
            .collect())
    }

    fn source_name(&self) -> &'static str {
        "fallback-corpus"
    }
}
