//! Deterministic collaborators for integration testing.
//!
//! A scripted sentiment source and LLM backend plus a paper venue seeded
//! with one ETH pool. Everything is in-memory with no network access.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use swarm::analysis::AnalysisEngine;
use swarm::config::{AgentConfig, ChainConfig, TokenConfig};
use swarm::engine::audit::AuditLog;
use swarm::engine::health::{HealthConfig, HealthSupervisor};
use swarm::engine::spawner::{Spawner, SpawnerConfig};
use swarm::execution::paper::PaperVenue;
use swarm::execution::service::ExecutionService;
use swarm::llm::LlmBackend;
use swarm::sentiment::SentimentSource;
use swarm::strategy::judge::{Judge, JudgeConfig};
use swarm::types::SocialPost;

pub const BASE: &str = "0xbase";
pub const ETH: &str = "0xeth";
pub const WALLET: &str = "0xwallet";
pub const TREASURY: &str = "0xtreasury";

// ---------------------------------------------------------------------------
// Sentiment source
// ---------------------------------------------------------------------------

/// Returns canned posts per symbol; unknown symbols get an empty list.
#[derive(Default)]
pub struct ScriptedSource {
    posts: HashMap<String, Vec<SocialPost>>,
    /// If set, every fetch fails with this message.
    force_error: Mutex<Option<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posts(mut self, symbol: &str, posts: Vec<SocialPost>) -> Self {
        self.posts.insert(symbol.to_string(), posts);
        self
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }
}

#[async_trait]
impl SentimentSource for ScriptedSource {
    async fn fetch(&self, symbol: &str) -> Result<Vec<SocialPost>> {
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        Ok(self.posts.get(symbol).cloned().unwrap_or_default())
    }

    fn source_name(&self) -> &'static str {
        "scripted"
    }
}

/// Four ETH posts with mixed polarity.
pub fn mixed_eth_posts() -> Vec<SocialPost> {
    vec![
        SocialPost::new("ETH breaking out, bullish momentum into the upgrade", 420),
        SocialPost::new("Accumulating more ETH on every dip", 150),
        SocialPost::new("ETH looks weak here, might dump to support", 60),
        SocialPost::new("Gas fees are fine today", 5),
    ]
}

// ---------------------------------------------------------------------------
// LLM backend
// ---------------------------------------------------------------------------

/// Always answers with the same JSON judgment and counts calls.
pub struct FixedJudgment {
    reply: String,
    calls: AtomicU64,
}

impl FixedJudgment {
    pub fn new(sentiment: f64, confidence: f64) -> Self {
        Self {
            reply: format!(
                r#"{{"sentiment": {sentiment}, "confidence": {confidence}, "marketCondition": "bullish", "reasoning": ["stub"], "suggestedActions": ["buy"]}}"#
            ),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmBackend for FixedJudgment {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.reply.clone())
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn chain() -> ChainConfig {
    let mut chain = ChainConfig {
        base_symbol: "BNB".to_string(),
        base_token_address: BASE.to_string(),
        wallet_address: WALLET.to_string(),
        treasury_address: TREASURY.to_string(),
        ..ChainConfig::default()
    };
    chain.tokens.insert(
        "ETH".to_string(),
        TokenConfig {
            address: ETH.to_string(),
            decimals: 18,
        },
    );
    chain
}

/// Paper venue with an ETH pool priced at 5 base and a funded wallet.
pub async fn venue() -> Arc<PaperVenue> {
    let venue = Arc::new(PaperVenue::new(BASE));
    venue.add_pool(ETH, dec!(200), dec!(1000)).await;
    venue.fund_native(WALLET, dec!(10)).await;
    venue.fund_token(ETH, WALLET, dec!(2)).await;
    venue
}

pub fn execution(venue: Arc<PaperVenue>) -> ExecutionService {
    ExecutionService::new(venue, &chain(), &AgentConfig::default())
}

pub struct Harness {
    pub venue: Arc<PaperVenue>,
    pub spawner: Spawner,
}

/// Spawner with default thresholds over `tokens`.
pub async fn harness(
    source: ScriptedSource,
    llm: Arc<FixedJudgment>,
    tokens: &[&str],
    max_agents_per_token: usize,
) -> Harness {
    let venue = venue().await;
    let spawner = Spawner::new(
        SpawnerConfig {
            name: "SWARM-IT".to_string(),
            tokens: tokens.iter().map(|s| s.to_string()).collect(),
            max_agents_per_token,
        },
        Arc::new(source),
        AnalysisEngine::new(llm),
        Judge::new(JudgeConfig::default()),
        execution(venue.clone()),
        HealthSupervisor::new(HealthConfig::default(), AuditLog::in_memory()),
    );
    Harness { venue, spawner }
}

pub fn approx_eq(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() < dec!(0.000000001)
}
