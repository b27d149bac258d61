//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults so a sparse file is valid. Numeric knobs
//! can then be overridden by environment variables (`MIN_CAPITAL`,
//! `MAX_AGENTS_PER_TOKEN`, ...). Secrets are referenced by env-var name
//! and resolved at runtime.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::str::FromStr;

use crate::types::SwarmError;

/// Upper bound for the spawn and health-check intervals (one week).
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 3600;
/// Upper bound for the swap deadline offset (one day).
pub const MAX_SWAP_DEADLINE_SECS: i64 = 24 * 3600;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sentiment: SentimentConfig,
    #[serde(default)]
    pub judge: JudgeSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    /// Spawn-evaluation tick interval.
    pub monitoring_interval_secs: u64,
    /// Symbols evaluated on every tick.
    pub tokens: Vec<String>,
    pub max_agents_per_token: usize,
    /// Swap deadline offset from submission.
    pub swap_deadline_secs: i64,
    /// Trade ledger capacity (oldest entries are dropped).
    pub trade_history_limit: usize,
    pub strategy: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "SWARM-001".to_string(),
            monitoring_interval_secs: 300,
            tokens: vec!["ETH".to_string()],
            max_agents_per_token: 3,
            swap_deadline_secs: 1200,
            trade_history_limit: 100,
            strategy: "sentiment".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// "openrouter" | "anthropic"
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    /// Fallback model for OpenRouter (used when primary model fails).
    pub fallback_model: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            model: "anthropic/claude-sonnet-4".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            max_tokens: 1024,
            fallback_model: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SentimentConfig {
    /// "twitter" | "fallback"
    pub source: String,
    pub bearer_token_env: Option<String>,
    /// Maximum posts fetched per symbol.
    pub max_posts: u32,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            source: "fallback".to_string(),
            bearer_token_env: Some("TWITTER_BEARER_TOKEN".to_string()),
            max_posts: 50,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JudgeSection {
    pub min_sentiment: f64,
    pub min_confidence: f64,
    pub min_capital: Decimal,
    pub max_capital: Decimal,
    pub max_slippage: f64,
    pub stop_loss_pct: f64,
    pub target_profit_pct: f64,
}

impl Default for JudgeSection {
    fn default() -> Self {
        Self {
            min_sentiment: 0.3,
            min_confidence: 0.7,
            min_capital: dec!(0.01),
            max_capital: dec!(0.1),
            max_slippage: 0.01,
            stop_loss_pct: 10.0,
            target_profit_pct: 20.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HealthSection {
    pub check_interval_secs: u64,
    pub max_loss_pct: f64,
    pub max_inactivity_hours: f64,
    pub min_roi_pct: f64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            max_loss_pct: 20.0,
            max_inactivity_hours: 24.0,
            min_roi_pct: -50.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    pub address: String,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

fn default_decimals() -> u32 {
    18
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint. When set, connectivity is verified at startup.
    pub rpc_url: Option<String>,
    pub base_symbol: String,
    /// Wrapped native asset used as the other side of token sales.
    pub base_token_address: String,
    /// Operator wallet that funds spawn swaps.
    pub wallet_address: String,
    /// Destination of funds withdrawn from terminated agents.
    pub treasury_address: String,
    /// Symbol → venue address. Symbols without an entry cannot be traded.
    pub tokens: HashMap<String, TokenConfig>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            base_symbol: "BNB".to_string(),
            base_token_address: "0xbb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c".to_string(),
            wallet_address: "0x0000000000000000000000000000000000000001".to_string(),
            treasury_address: "0x0000000000000000000000000000000000000002".to_string(),
            tokens: HashMap::new(),
        }
    }
}

/// Seed state for the in-memory paper venue.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PaperConfig {
    pub enabled: bool,
    pub wallet_balance: Decimal,
    /// Base-asset depth of every seeded pool.
    pub pool_base_reserve: Decimal,
    /// Symbol → initial price in base asset.
    pub prices: HashMap<String, Decimal>,
    /// Symbol → token quantity seeded into the operator wallet.
    pub holdings: HashMap<String, Decimal>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wallet_balance: dec!(10),
            pool_base_reserve: dec!(1000),
            prices: HashMap::new(),
            holdings: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuditConfig {
    /// JSONL file receiving one line per terminated agent.
    pub path: Option<String>,
    /// Terminations kept in memory for the dashboard.
    pub retain_records: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: Some("swarm_audit.jsonl".to_string()),
            retain_records: 500,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply environment-style overrides. `lookup` returns the raw value of
    /// a variable, if set.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_with(&lookup, "MONITORING_INTERVAL", &mut self.agent.monitoring_interval_secs)?;
        override_with(&lookup, "HEALTH_CHECK_INTERVAL", &mut self.health.check_interval_secs)?;
        override_with(&lookup, "MIN_CAPITAL", &mut self.judge.min_capital)?;
        override_with(&lookup, "MAX_CAPITAL", &mut self.judge.max_capital)?;
        override_with(&lookup, "MIN_SENTIMENT", &mut self.judge.min_sentiment)?;
        override_with(&lookup, "MIN_CONFIDENCE", &mut self.judge.min_confidence)?;
        override_with(&lookup, "MAX_AGENTS_PER_TOKEN", &mut self.agent.max_agents_per_token)?;
        override_with(&lookup, "MAX_LOSS_PERCENTAGE", &mut self.health.max_loss_pct)?;
        override_with(&lookup, "MAX_INACTIVITY_HOURS", &mut self.health.max_inactivity_hours)?;
        override_with(&lookup, "MIN_ROI", &mut self.health.min_roi_pct)?;
        Ok(())
    }

    /// Reject configurations the pipeline cannot honour.
    pub fn validate(&self) -> Result<(), SwarmError> {
        let invalid = |msg: String| Err(SwarmError::Config(msg));
        let j = &self.judge;
        if j.min_capital <= Decimal::ZERO {
            return invalid("judge.min_capital must be positive".to_string());
        }
        if j.min_capital > j.max_capital {
            return invalid(format!(
                "judge.min_capital ({}) exceeds judge.max_capital ({})",
                j.min_capital, j.max_capital
            ));
        }
        if !(0.0..=1.0).contains(&j.max_slippage) {
            return invalid("judge.max_slippage must be within [0, 1]".to_string());
        }
        for (name, secs) in [
            ("agent.monitoring_interval_secs", self.agent.monitoring_interval_secs),
            ("health.check_interval_secs", self.health.check_interval_secs),
        ] {
            if secs == 0 || secs > MAX_INTERVAL_SECS {
                return invalid(format!("{name} must be within 1..={MAX_INTERVAL_SECS} (got {secs})"));
            }
        }
        let deadline = self.agent.swap_deadline_secs;
        if deadline <= 0 || deadline > MAX_SWAP_DEADLINE_SECS {
            return invalid(format!(
                "agent.swap_deadline_secs must be within 1..={MAX_SWAP_DEADLINE_SECS} (got {deadline})"
            ));
        }
        Ok(())
    }

    /// Resolve a secret referenced by env-var name. Empty values count as unset.
    pub fn resolve_secret(env_name: &str) -> Option<SecretString> {
        std::env::var(env_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::new)
    }
}

fn override_with<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {name} ({raw}): {e}"))?;
    }
    Ok(())
}
