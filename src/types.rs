//! Shared types for the SWARM agent.
//!
//! These types form the data model used across all modules. Sentiment,
//! strategy, execution and engine modules depend on them without
//! depending on each other.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Social input
// ---------------------------------------------------------------------------

/// A single social post about a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialPost {
    pub text: String,
    /// Aggregate engagement (likes, reposts, replies...).
    pub engagement: u64,
    pub timestamp: DateTime<Utc>,
}

impl SocialPost {
    pub fn new(text: impl Into<String>, engagement: u64) -> Self {
        Self {
            text: text.into(),
            engagement,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Market judgment
// ---------------------------------------------------------------------------

/// Qualitative market condition reported by the analysis backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketCondition {
    Bullish,
    Bearish,
    Neutral,
}

impl MarketCondition {
    /// Derive a condition from a sentiment score with a ±0.1 dead-band.
    pub fn from_sentiment(sentiment: f64) -> Self {
        if sentiment > 0.1 {
            MarketCondition::Bullish
        } else if sentiment < -0.1 {
            MarketCondition::Bearish
        } else {
            MarketCondition::Neutral
        }
    }
}

impl fmt::Display for MarketCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketCondition::Bullish => write!(f, "bullish"),
            MarketCondition::Bearish => write!(f, "bearish"),
            MarketCondition::Neutral => write!(f, "neutral"),
        }
    }
}

impl std::str::FromStr for MarketCondition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bullish" | "bull" | "positive" => Ok(MarketCondition::Bullish),
            "bearish" | "bear" | "negative" => Ok(MarketCondition::Bearish),
            "neutral" | "sideways" | "mixed" => Ok(MarketCondition::Neutral),
            _ => Err(anyhow::anyhow!("Unknown market condition: {s}")),
        }
    }
}

/// Structured sentiment/market judgment for one symbol and one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketJudgment {
    /// -1.0 (max bearish) to +1.0 (max bullish)
    pub sentiment: f64,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub condition: MarketCondition,
    pub reasoning: Vec<String>,
    pub suggested_actions: Vec<String>,
}

impl MarketJudgment {
    /// Neutral, low-confidence judgment used whenever analysis cannot run.
    pub fn fallback() -> Self {
        Self {
            sentiment: 0.0,
            confidence: 0.5,
            condition: MarketCondition::Neutral,
            reasoning: vec!["fallback".to_string()],
            suggested_actions: vec!["wait for more data".to_string()],
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.reasoning.len() == 1 && self.reasoning[0] == "fallback"
    }
}

impl fmt::Display for MarketJudgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sentiment={:+.2} confidence={:.0}%",
            self.condition,
            self.sentiment,
            self.confidence * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Opportunity evaluation
// ---------------------------------------------------------------------------

/// Capital and risk parameters recommended for a spawned agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedConfig {
    /// Base-asset amount to commit.
    pub capital: Decimal,
    /// Fraction in [0, 1].
    pub max_slippage: f64,
    /// Percent loss at which the position should be cut.
    pub stop_loss: f64,
    /// Percent gain at which the position should be closed.
    pub target_profit: f64,
}

/// Spawn/no-spawn decision derived from a `MarketJudgment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityEvaluation {
    pub should_spawn: bool,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub recommended_config: RecommendedConfig,
}

// ---------------------------------------------------------------------------
// Trades & positions
// ---------------------------------------------------------------------------

/// Trade direction relative to the target token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    /// Base asset in, target token out.
    Buy,
    /// Target token in, base asset out.
    Sell,
}

impl TradeDirection {
    /// Positive sentiment buys, negative sells, zero does nothing.
    pub fn from_sentiment(sentiment: f64) -> Option<Self> {
        if sentiment > 0.0 {
            Some(TradeDirection::Buy)
        } else if sentiment < 0.0 {
            Some(TradeDirection::Sell)
        } else {
            None
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeDirection::Buy => write!(f, "BUY"),
            TradeDirection::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Completed,
    Failed,
}

/// One entry of the trade ledger. Only `status` may change after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    /// Token symbol.
    pub token: String,
    pub direction: TradeDirection,
    /// Target-token quantity.
    pub amount: Decimal,
    /// Base asset per target token.
    pub price: Decimal,
    pub tx_ref: String,
    pub status: TradeStatus,
    /// Supervised agent this trade belongs to, if any.
    pub agent_id: Option<String>,
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @ {} [{:?}] ({})",
            self.direction, self.amount, self.token, self.price, self.status, self.tx_ref,
        )
    }
}

/// Aggregate holding of one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub token: String,
    /// Venue address of the token.
    pub token_ref: String,
    pub amount: Decimal,
    /// Volume-weighted average entry price.
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub pnl: Decimal,
    pub strategy: String,
    pub last_update: DateTime<Utc>,
}

impl Position {
    /// Unrealized PnL at `price` against the weighted entry.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.amount
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.pnl >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "{} amount={} entry={} now={} ({sign}{})",
            self.token, self.amount, self.entry_price, self.current_price, self.pnl,
        )
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Terminated,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "🟢 ACTIVE"),
            AgentStatus::Terminated => write!(f, "🔴 TERMINATED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base-asset capital committed at spawn.
    pub capital: Decimal,
    /// Venue address of the token pool the agent trades.
    pub target_pool: String,
    pub max_slippage: f64,
}

/// A supervised unit representing one spawned position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub token: String,
    /// Sub-account holding the agent's funds.
    pub address: String,
    pub config: AgentConfig,
    pub deployed_at: DateTime<Utc>,
    pub status: AgentStatus,
}

impl Agent {
    /// Build a fresh active agent with a unique id and sub-account address.
    pub fn spawn(token: &str, config: AgentConfig, deployed_at: DateTime<Utc>) -> Self {
        let uid = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("agent-{}-{}", token.to_lowercase(), &uid[..12]),
            token: token.to_string(),
            address: format!("0x{:0>40}", uid),
            config,
            deployed_at,
            status: AgentStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    /// One-way transition to `Terminated`. Returns false if already terminated.
    pub fn terminate(&mut self) -> bool {
        if self.status == AgentStatus::Terminated {
            return false;
        }
        self.status = AgentStatus::Terminated;
        true
    }

    /// Time since deployment.
    pub fn lifetime(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.deployed_at
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} capital={} pool={}",
            self.id, self.token, self.status, self.config.capital, self.config.target_pool,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for SWARM.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("Transient data error ({symbol}): {message}")]
    TransientData { symbol: String, message: String },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Swap reverted ({tx_ref}): {reason}")]
    Reverted { tx_ref: String, reason: String },

    #[error("Approval error ({token}): {message}")]
    Approval { token: String, message: String },

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("No venue address configured for token: {0}")]
    UnknownToken(String),

    #[error("Health check error ({agent_id}): {message}")]
    HealthCheck { agent_id: String, message: String },

    #[error("Withdrawal error ({agent_id}): {message}")]
    Withdrawal { agent_id: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fallback_judgment() {
        let j = MarketJudgment::fallback();
        assert_eq!(j.sentiment, 0.0);
        assert_eq!(j.confidence, 0.5);
        assert_eq!(j.condition, MarketCondition::Neutral);
        assert_eq!(j.reasoning, vec!["fallback"]);
        assert_eq!(j.suggested_actions, vec!["wait for more data"]);
        assert!(j.is_fallback());
    }

    #[test]
    fn test_condition_from_sentiment() {
        assert_eq!(MarketCondition::from_sentiment(0.5), MarketCondition::Bullish);
        assert_eq!(MarketCondition::from_sentiment(-0.5), MarketCondition::Bearish);
        assert_eq!(MarketCondition::from_sentiment(0.05), MarketCondition::Neutral);
    }

    #[test]
    fn test_condition_parse() {
        assert_eq!("Bullish".parse::<MarketCondition>().unwrap(), MarketCondition::Bullish);
        assert_eq!(" bear ".parse::<MarketCondition>().unwrap(), MarketCondition::Bearish);
        assert!("moon".parse::<MarketCondition>().is_err());
    }

    #[test]
    fn test_direction_from_sentiment() {
        assert_eq!(TradeDirection::from_sentiment(0.4), Some(TradeDirection::Buy));
        assert_eq!(TradeDirection::from_sentiment(-0.4), Some(TradeDirection::Sell));
        assert_eq!(TradeDirection::from_sentiment(0.0), None);
    }

    #[test]
    fn test_agent_spawn_unique() {
        let cfg = AgentConfig {
            capital: dec!(0.05),
            target_pool: "0xpool".into(),
            max_slippage: 0.01,
        };
        let a = Agent::spawn("ETH", cfg.clone(), Utc::now());
        let b = Agent::spawn("ETH", cfg, Utc::now());
        assert_ne!(a.id, b.id);
        assert_ne!(a.address, b.address);
        assert!(a.id.starts_with("agent-eth-"));
        assert_eq!(a.address.len(), 42);
        assert!(a.is_active());
    }

    #[test]
    fn test_agent_terminate_is_one_way() {
        let mut a = Agent::spawn(
            "SOL",
            AgentConfig {
                capital: dec!(1),
                target_pool: "0xpool".into(),
                max_slippage: 0.01,
            },
            Utc::now(),
        );
        assert!(a.terminate());
        assert!(!a.terminate());
        assert_eq!(a.status, AgentStatus::Terminated);
    }

    #[test]
    fn test_position_unrealized_pnl() {
        let pos = Position {
            token: "ETH".into(),
            token_ref: "0xabc".into(),
            amount: dec!(10),
            entry_price: dec!(2),
            current_price: dec!(2),
            pnl: Decimal::ZERO,
            strategy: "sentiment".into(),
            last_update: Utc::now(),
        };
        assert_eq!(pos.unrealized_pnl(dec!(2.5)), dec!(5));
        assert_eq!(pos.unrealized_pnl(dec!(1.5)), dec!(-5));
    }

    #[test]
    fn test_error_display() {
        let e = SwarmError::Approval {
            token: "PEPE".into(),
            message: "reverted".into(),
        };
        assert_eq!(e.to_string(), "Approval error (PEPE): reverted");
    }
}
