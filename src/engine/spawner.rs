//! Agent lifecycle manager ("Spawner").
//!
//! Owns every piece of mutable swarm state (agent registry, health
//! supervisor, execution service with its ledger) and drives the spawn
//! pipeline for each monitored token:
//!
//!   fetch posts → analyze → thresholds → capacity → judge → direction
//!   → swap → record trade → register agent
//!
//! Each step short-circuits. Rejections are the normal negative path and
//! are logged at `info`; errors are contained per token.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::audit::TerminationRecord;
use super::health::{HealthSupervisor, KillReason};
use super::registry::AgentRegistry;
use super::{BalanceView, SwarmSnapshot};
use crate::analysis::AnalysisEngine;
use crate::execution::service::{ExecutionService, TradeOrder};
use crate::sentiment::SentimentSource;
use crate::strategy::judge::Judge;
use crate::types::{Agent, AgentConfig, MarketJudgment, SwarmError, Trade, TradeDirection};

/// Trades included in a snapshot.
const SNAPSHOT_TRADES: usize = 50;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a token did not spawn an agent this tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    BelowThresholds { sentiment: f64, confidence: f64 },
    AtCapacity { active: usize, max: usize },
    NotRecommended { reasons: Vec<String> },
    NeutralSentiment,
    ExecutionFailed { error: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::BelowThresholds { sentiment, confidence } => write!(
                f,
                "below thresholds (sentiment {sentiment:+.2}, confidence {confidence:.2})"
            ),
            Rejection::AtCapacity { active, max } => write!(f, "at capacity ({active}/{max} agents)"),
            Rejection::NotRecommended { reasons } => write!(f, "not recommended: {}", reasons.join("; ")),
            Rejection::NeutralSentiment => write!(f, "neutral sentiment, no direction"),
            Rejection::ExecutionFailed { error } => write!(f, "execution failed: {error}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SpawnOutcome {
    Spawned { agent_id: String, trade: Trade },
    Rejected { rejection: Rejection },
    /// Data was unavailable; the token is retried next tick.
    Skipped { error: String },
}

impl SpawnOutcome {
    pub fn is_spawned(&self) -> bool {
        matches!(self, SpawnOutcome::Spawned { .. })
    }
}

/// Result of one pass over all monitored tokens.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub outcomes: Vec<(String, SpawnOutcome)>,
}

impl TickReport {
    pub fn spawned(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_spawned()).count()
    }

    pub fn outcome(&self, token: &str) -> Option<&SpawnOutcome> {
        self.outcomes.iter().find(|(t, _)| t == token).map(|(_, o)| o)
    }
}

// ---------------------------------------------------------------------------
// Spawner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SpawnerConfig {
    pub name: String,
    /// Symbols evaluated every tick, in order.
    pub tokens: Vec<String>,
    pub max_agents_per_token: usize,
}

pub struct Spawner {
    config: SpawnerConfig,
    source: Arc<dyn SentimentSource>,
    analyst: AnalysisEngine,
    judge: Judge,
    execution: ExecutionService,
    registry: AgentRegistry,
    health: HealthSupervisor,
    judgments: HashMap<String, MarketJudgment>,
    started_at: DateTime<Utc>,
    ticks: u64,
    last_tick: Option<DateTime<Utc>>,
}

impl Spawner {
    pub fn new(
        config: SpawnerConfig,
        source: Arc<dyn SentimentSource>,
        analyst: AnalysisEngine,
        judge: Judge,
        execution: ExecutionService,
        health: HealthSupervisor,
    ) -> Self {
        Self {
            config,
            source,
            analyst,
            judge,
            execution,
            registry: AgentRegistry::new(),
            health,
            judgments: HashMap::new(),
            started_at: Utc::now(),
            ticks: 0,
            last_tick: None,
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn health(&self) -> &HealthSupervisor {
        &self.health
    }

    pub fn execution(&self) -> &ExecutionService {
        &self.execution
    }

    pub fn active_agents(&self, token: &str) -> usize {
        self.registry.active_count(token)
    }

    pub fn next_health_due(&mut self) -> Option<DateTime<Utc>> {
        self.health.next_due()
    }

    // -- Spawn pipeline -----------------------------------------------------

    /// One spawn tick over every monitored token. Never fails as a whole.
    pub async fn check_and_spawn_agents(&mut self, now: DateTime<Utc>) -> TickReport {
        self.ticks += 1;
        self.last_tick = Some(now);
        let tokens = self.config.tokens.clone();
        let mut outcomes = Vec::with_capacity(tokens.len());

        for symbol in tokens {
            let outcome = match self.evaluate_token(&symbol, now).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Token skipped this tick");
                    SpawnOutcome::Skipped { error: e.to_string() }
                }
            };
            if let SpawnOutcome::Rejected { rejection } = &outcome {
                info!(symbol = %symbol, reason = %rejection, "Spawn rejected");
            }
            outcomes.push((symbol, outcome));
        }

        let report = TickReport { at: now, outcomes };
        info!(
            tick = self.ticks,
            tokens = report.outcomes.len(),
            spawned = report.spawned(),
            agents = self.registry.len(),
            "Spawn tick complete"
        );
        report
    }

    /// Run the pipeline for one token.
    ///
    /// `Err` means the token's data was unavailable; every other negative
    /// result is a `Rejected` outcome.
    pub async fn evaluate_token(&mut self, symbol: &str, now: DateTime<Utc>) -> Result<SpawnOutcome, SwarmError> {
        // 1. Judgment
        let posts = self
            .source
            .fetch(symbol)
            .await
            .map_err(|e| SwarmError::TransientData {
                symbol: symbol.to_string(),
                message: e.to_string(),
            })?;
        let judgment = self.analyst.analyze(symbol, &posts).await;
        debug!(symbol, posts = posts.len(), judgment = %judgment, "Judgment received");
        self.judgments.insert(symbol.to_string(), judgment.clone());

        // 2. Thresholds
        if !self.judge.passes_thresholds(&judgment) {
            return Ok(rejected(Rejection::BelowThresholds {
                sentiment: judgment.sentiment,
                confidence: judgment.confidence,
            }));
        }

        // 3. Capacity (registry keys ignore case)
        let active = self.registry.active_count(symbol);
        if active >= self.config.max_agents_per_token {
            return Ok(rejected(Rejection::AtCapacity {
                active,
                max: self.config.max_agents_per_token,
            }));
        }

        // 4. Judge
        let evaluation = self.judge.evaluate(symbol, &judgment);
        if !evaluation.should_spawn {
            return Ok(rejected(Rejection::NotRecommended {
                reasons: evaluation.reasons,
            }));
        }

        // 5. Direction
        let Some(direction) = TradeDirection::from_sentiment(judgment.sentiment) else {
            return Ok(rejected(Rejection::NeutralSentiment));
        };

        // 6. Swap into a fresh agent sub-account
        let token = match self.execution.token(symbol) {
            Ok(t) => t.clone(),
            Err(e) => {
                return Ok(rejected(Rejection::ExecutionFailed { error: e.to_string() }));
            }
        };
        let rc = &evaluation.recommended_config;
        let agent = Agent::spawn(
            &token.symbol,
            AgentConfig {
                capital: rc.capital,
                target_pool: token.address.clone(),
                max_slippage: rc.max_slippage,
            },
            now,
        );
        let order = TradeOrder {
            token: token.symbol.clone(),
            direction,
            capital: rc.capital,
            slippage: rc.max_slippage,
            sender: self.execution.wallet().to_string(),
            recipient: agent.address.clone(),
            agent_id: Some(agent.id.clone()),
        };

        let trade = match self.execution.execute_trade(&order, now).await {
            Ok(trade) => trade,
            Err(e) => {
                warn!(symbol, direction = %direction, error = %e, "Spawn swap failed");
                return Ok(rejected(Rejection::ExecutionFailed { error: e.to_string() }));
            }
        };

        // 7. Record against supervision (the new agent is not supervised yet)
        self.note_agent_trade(&trade, true, now);

        // 8. Register
        info!(
            symbol,
            agent_id = %agent.id,
            direction = %direction,
            capital = %rc.capital,
            sentiment = format!("{:+.2}", judgment.sentiment),
            confidence = format!("{:.0}%", judgment.confidence * 100.0),
            "Agent spawned"
        );
        let agent_id = agent.id.clone();
        self.registry.insert(agent.clone());
        self.health.register(agent, None, now);

        Ok(SpawnOutcome::Spawned { agent_id, trade })
    }

    /// Count a trade against its agent if that agent is supervised.
    fn note_agent_trade(&mut self, trade: &Trade, successful: bool, now: DateTime<Utc>) {
        let Some(agent_id) = trade.agent_id.as_deref() else {
            return;
        };
        if self.health.contains(agent_id) {
            self.health
                .record_trade(agent_id, successful, trade.amount * trade.price, now);
        }
    }

    /// Execute a follow-up trade from an existing agent's sub-account.
    pub async fn trade_for_agent(
        &mut self,
        agent_id: &str,
        direction: TradeDirection,
        capital: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Trade, SwarmError> {
        let agent = self
            .registry
            .get(agent_id)
            .filter(|a| a.is_active())
            .cloned()
            .ok_or_else(|| SwarmError::Execution(format!("no active agent {agent_id}")))?;

        let order = TradeOrder {
            token: agent.token.clone(),
            direction,
            capital,
            slippage: agent.config.max_slippage,
            sender: agent.address.clone(),
            recipient: agent.address.clone(),
            agent_id: Some(agent.id.clone()),
        };

        match self.execution.execute_trade(&order, now).await {
            Ok(trade) => {
                self.note_agent_trade(&trade, true, now);
                Ok(trade)
            }
            Err(e) => {
                self.health.record_trade(agent_id, false, Decimal::ZERO, now);
                Err(e)
            }
        }
    }

    // -- Health -------------------------------------------------------------

    /// Mark positions and run every health check that is due.
    pub async fn run_health_checks(&mut self, now: DateTime<Utc>) -> Vec<TerminationRecord> {
        self.execution.refresh_positions(now).await;
        self.health
            .run_due(now, &mut self.registry, &self.execution)
            .await
    }

    /// Terminate an agent out of band. Unknown ids are a no-op.
    pub async fn kill_agent(&mut self, agent_id: &str, reason: KillReason, now: DateTime<Utc>) -> Option<TerminationRecord> {
        self.health
            .kill_agent(agent_id, reason, now, &mut self.registry, &self.execution)
            .await
    }

    // -- Operator surface ---------------------------------------------------

    /// Point-in-time copy of everything the operator surface shows.
    pub fn snapshot(&self) -> SwarmSnapshot {
        let mut judgments: Vec<(String, MarketJudgment)> = self
            .judgments
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        judgments.sort_by(|a, b| a.0.cmp(&b.0));

        SwarmSnapshot {
            name: self.config.name.clone(),
            started_at: self.started_at,
            ticks: self.ticks,
            last_tick: self.last_tick,
            tokens: self.config.tokens.clone(),
            max_agents_per_token: self.config.max_agents_per_token,
            venue: self.execution.venue_name().to_string(),
            base_symbol: self.execution.base_symbol().to_string(),
            agents: self.health.records(),
            positions: self.execution.ledger().positions(),
            trades: self.execution.ledger().recent_trades(SNAPSHOT_TRADES),
            terminations: self.health.audit().records().iter().cloned().collect(),
            judgments,
        }
    }

    /// Wallet and treasury balances. Read failures leave fields empty.
    pub async fn balance_view(&self) -> BalanceView {
        let exec = &self.execution;
        let wallet_native = exec.get_balance(exec.wallet()).await.ok();
        let wallet_tokens = exec.get_token_balances(exec.wallet()).await.unwrap_or_default();
        let treasury_native = exec.get_balance(exec.treasury()).await.ok();
        BalanceView {
            base_symbol: exec.base_symbol().to_string(),
            wallet: exec.wallet().to_string(),
            wallet_native,
            wallet_tokens,
            treasury: exec.treasury().to_string(),
            treasury_native,
        }
    }
}

fn rejected(rejection: Rejection) -> SpawnOutcome {
    SpawnOutcome::Rejected { rejection }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig as AgentSection, ChainConfig, TokenConfig};
    use crate::engine::audit::AuditLog;
    use crate::engine::health::HealthConfig;
    use crate::execution::paper::PaperVenue;
    use crate::execution::Venue;
    use crate::llm::MockLlmBackend;
    use crate::sentiment::MockSentimentSource;
    use crate::strategy::judge::JudgeConfig;
    use crate::types::SocialPost;
    use rust_decimal_macros::dec;

    const ETH: &str = "0xeth";
    const WALLET: &str = "0xwallet";

    fn chain() -> ChainConfig {
        let mut chain = ChainConfig {
            base_token_address: "0xbase".to_string(),
            wallet_address: WALLET.to_string(),
            treasury_address: "0xtreasury".to_string(),
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

    fn llm_reply(sentiment: f64, confidence: f64) -> MockLlmBackend {
        let mut llm = MockLlmBackend::new();
        llm.expect_complete().returning(move |_, _| {
            Ok(format!(r#"{{"sentiment": {sentiment}, "confidence": {confidence}}}"#))
        });
        llm
    }

    fn posts_source(count: usize) -> MockSentimentSource {
        let mut src = MockSentimentSource::new();
        src.expect_fetch().returning(move |sym| {
            Ok((0..count)
                .map(|i| SocialPost::new(format!("{sym} post {i}"), i as u64))
                .collect())
        });
        src
    }

    async fn spawner(source: MockSentimentSource, llm: MockLlmBackend, tokens: &[&str]) -> (Arc<PaperVenue>, Spawner) {
        let venue = Arc::new(PaperVenue::new("0xbase"));
        venue.add_pool(ETH, dec!(200), dec!(1000)).await;
        venue.fund_native(WALLET, dec!(10)).await;
        venue.fund_token(ETH, WALLET, dec!(5)).await;
        let exec = ExecutionService::new(venue.clone(), &chain(), &AgentSection::default());
        let spawner = Spawner::new(
            SpawnerConfig {
                name: "SWARM-TEST".to_string(),
                tokens: tokens.iter().map(|s| s.to_string()).collect(),
                max_agents_per_token: 3,
            },
            Arc::new(source),
            AnalysisEngine::new(Arc::new(llm)),
            Judge::new(JudgeConfig::default()),
            exec,
            HealthSupervisor::new(HealthConfig::default(), AuditLog::in_memory()),
        );
        (venue, spawner)
    }

    #[tokio::test]
    async fn test_buy_spawns_agent() {
        let (venue, mut s) = spawner(posts_source(4), llm_reply(0.75, 0.9), &["ETH"]).await;
        let now = Utc::now();
        let report = s.check_and_spawn_agents(now).await;
        assert_eq!(report.spawned(), 1);

        let Some(SpawnOutcome::Spawned { agent_id, trade }) = report.outcome("ETH") else {
            panic!("expected spawn");
        };
        assert_eq!(trade.direction, TradeDirection::Buy);
        assert_eq!(trade.agent_id.as_deref(), Some(agent_id.as_str()));
        assert_eq!(s.active_agents("ETH"), 1);
        assert_eq!(s.health().record(agent_id).unwrap().metrics.trades.successful, 0);

        let agent = s.registry().get(agent_id).unwrap();
        assert_eq!(agent.config.capital, s.judge.capital_for(0.9));
        assert_eq!(venue.token_balance(ETH, &agent.address).await.unwrap(), trade.amount);
    }

    #[tokio::test]
    async fn test_negative_sentiment_sells() {
        let (venue, mut s) = spawner(posts_source(3), llm_reply(-0.6, 0.8), &["ETH"]).await;
        let report = s.check_and_spawn_agents(Utc::now()).await;
        let Some(SpawnOutcome::Spawned { agent_id, trade }) = report.outcome("ETH") else {
            panic!("expected spawn");
        };
        assert_eq!(trade.direction, TradeDirection::Sell);
        let agent = s.registry().get(agent_id).unwrap();
        assert!(venue.native_balance(&agent.address).await.unwrap() > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let (_, mut s) = spawner(posts_source(4), llm_reply(0.75, 0.9), &["ETH"]).await;
        for _ in 0..3 {
            assert_eq!(s.check_and_spawn_agents(Utc::now()).await.spawned(), 1);
        }
        let report = s.check_and_spawn_agents(Utc::now()).await;
        assert!(matches!(
            report.outcome("ETH"),
            Some(SpawnOutcome::Rejected {
                rejection: Rejection::AtCapacity { active: 3, max: 3 }
            })
        ));
        assert_eq!(s.active_agents("ETH"), 3);
    }

    #[tokio::test]
    async fn test_lowercase_symbol_respects_capacity() {
        let (_, mut s) = spawner(posts_source(4), llm_reply(0.75, 0.9), &["eth"]).await;
        let mut spawned = 0;
        for _ in 0..5 {
            spawned += s.check_and_spawn_agents(Utc::now()).await.spawned();
        }
        assert_eq!(spawned, 3);
        assert_eq!(s.active_agents("eth"), 3);
        assert_eq!(s.active_agents("ETH"), 3);
        assert_eq!(s.registry().len(), 3);
        assert!(matches!(
            s.check_and_spawn_agents(Utc::now()).await.outcome("eth"),
            Some(SpawnOutcome::Rejected {
                rejection: Rejection::AtCapacity { active: 3, max: 3 }
            })
        ));
    }

    #[tokio::test]
    async fn test_source_error_contained_per_token() {
        let mut src = MockSentimentSource::new();
        src.expect_fetch().returning(|sym| {
            if sym == "PEPE" {
                Err(anyhow::anyhow!("rate limited"))
            } else {
                Ok(vec![SocialPost::new("ETH breakout", 10)])
            }
        });
        let (_, mut s) = spawner(src, llm_reply(0.75, 0.9), &["PEPE", "ETH"]).await;
        let report = s.check_and_spawn_agents(Utc::now()).await;
        assert!(matches!(report.outcome("PEPE"), Some(SpawnOutcome::Skipped { .. })));
        assert!(report.outcome("ETH").unwrap().is_spawned());
    }

    #[tokio::test]
    async fn test_unregistered_token_rejected_without_agent() {
        let (_, mut s) = spawner(posts_source(4), llm_reply(0.75, 0.9), &["DOGE"]).await;
        let report = s.check_and_spawn_agents(Utc::now()).await;
        assert!(matches!(
            report.outcome("DOGE"),
            Some(SpawnOutcome::Rejected {
                rejection: Rejection::ExecutionFailed { .. }
            })
        ));
        assert!(s.registry().is_empty());
        assert_eq!(s.execution().ledger().trade_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_sentiment_never_spawns() {
        let (_, mut s) = spawner(posts_source(4), llm_reply(0.0, 0.95), &["ETH"]).await;
        s.judge = Judge::new(JudgeConfig {
            min_sentiment: 0.0,
            ..JudgeConfig::default()
        });
        let report = s.check_and_spawn_agents(Utc::now()).await;
        assert!(matches!(
            report.outcome("ETH"),
            Some(SpawnOutcome::Rejected {
                rejection: Rejection::NeutralSentiment
            })
        ));
    }

    #[tokio::test]
    async fn test_follow_up_trade_counts_for_agent() {
        let (venue, mut s) = spawner(posts_source(4), llm_reply(0.75, 0.9), &["ETH"]).await;
        let now = Utc::now();
        let report = s.check_and_spawn_agents(now).await;
        let Some(SpawnOutcome::Spawned { agent_id, .. }) = report.outcome("ETH") else {
            panic!("expected spawn");
        };
        let agent_addr = s.registry().get(agent_id).unwrap().address.clone();
        venue.fund_native(&agent_addr, dec!(1)).await;

        let later = now + chrono::Duration::minutes(5);
        s.trade_for_agent(agent_id, TradeDirection::Buy, dec!(0.5), later)
            .await
            .unwrap();
        let rec = s.health().record(agent_id).unwrap();
        assert_eq!(rec.metrics.trades.successful, 1);
        assert_eq!(rec.last_activity, later);
        assert!(rec.metrics.trades.total_volume > Decimal::ZERO);

        // Not enough funds left in the sub-account.
        assert!(s
            .trade_for_agent(agent_id, TradeDirection::Buy, dec!(50), later)
            .await
            .is_err());
        assert_eq!(s.health().record(agent_id).unwrap().metrics.trades.failed, 1);
    }

    #[tokio::test]
    async fn test_manual_kill_and_snapshot() {
        let (_, mut s) = spawner(posts_source(4), llm_reply(0.75, 0.9), &["ETH"]).await;
        let now = Utc::now();
        let report = s.check_and_spawn_agents(now).await;
        let Some(SpawnOutcome::Spawned { agent_id, .. }) = report.outcome("ETH") else {
            panic!("expected spawn");
        };
        let agent_id = agent_id.clone();

        let snap = s.snapshot();
        assert_eq!(snap.agents.len(), 1);
        assert_eq!(snap.trades.len(), 1);
        assert_eq!(snap.positions.len(), 1);
        assert_eq!(snap.judgments[0].0, "ETH");

        assert!(s.kill_agent(&agent_id, KillReason::Manual("test".into()), now).await.is_some());
        assert!(s.kill_agent(&agent_id, KillReason::Manual("test".into()), now).await.is_none());
        let snap = s.snapshot();
        assert!(snap.agents.is_empty());
        assert_eq!(snap.terminations.len(), 1);
        let withdrawal = snap.terminations[0].withdrawal.as_ref().unwrap();
        assert!(withdrawal.token_amount > Decimal::ZERO);

        let balances = s.balance_view().await;
        assert_eq!(balances.wallet_tokens["ETH"], dec!(5));
    }
}
