//! End-to-end tests driving the spawn and supervision pipeline against the
//! paper venue.

mod support;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use swarm::engine::audit::AuditLog;
use swarm::engine::health::{HealthConfig, HealthSupervisor, KillReason};
use swarm::engine::registry::AgentRegistry;
use swarm::engine::spawner::{Rejection, SpawnOutcome};
use swarm::execution::ledger::Ledger;
use swarm::execution::Venue;
use swarm::strategy::judge::{Judge, JudgeConfig};
use swarm::types::{Agent, AgentConfig, Trade, TradeDirection, TradeStatus};

use support::*;

#[tokio::test]
async fn eth_buy_spawns_one_agent_with_zero_counted_trades() {
    let llm = Arc::new(FixedJudgment::new(0.75, 0.9));
    let source = ScriptedSource::new().with_posts("ETH", mixed_eth_posts());
    let Harness { venue, mut spawner } = harness(source, llm.clone(), &["ETH"], 3).await;

    let now = Utc::now();
    let report = spawner.check_and_spawn_agents(now).await;
    assert_eq!(llm.calls(), 1);
    assert_eq!(report.spawned(), 1);

    let Some(SpawnOutcome::Spawned { agent_id, trade }) = report.outcome("ETH") else {
        panic!("ETH should have spawned: {:?}", report.outcome("ETH"));
    };

    // Buy executed and recorded.
    assert_eq!(trade.direction, TradeDirection::Buy);
    assert_eq!(trade.status, TradeStatus::Completed);
    let ledger = spawner.execution().ledger();
    assert_eq!(ledger.trade_count(), 1);
    assert_eq!(ledger.position("ETH").unwrap().amount, trade.amount);

    // One agent, holding the swap output.
    assert_eq!(spawner.active_agents("ETH"), 1);
    let agent = spawner.registry().get(agent_id).unwrap().clone();
    assert_eq!(agent.token, "ETH");
    assert_eq!(
        agent.config.capital,
        Judge::new(JudgeConfig::default()).capital_for(0.9)
    );
    assert_eq!(
        assert_ok!(venue.token_balance(ETH, &agent.address).await),
        trade.amount
    );

    // The spawning swap is not counted against the agent.
    let record = spawner.health().record(agent_id).unwrap();
    assert_eq!(record.metrics.trades.successful, 0);
    assert_eq!(record.metrics.trades.failed, 0);

    // The next explicit trade is.
    venue.fund_native(&agent.address, dec!(1)).await;
    let later = now + Duration::minutes(1);
    assert_ok!(
        spawner
            .trade_for_agent(agent_id, TradeDirection::Buy, dec!(0.1), later)
            .await
    );
    let record = spawner.health().record(agent_id).unwrap();
    assert_eq!(record.metrics.trades.successful, 1);
    assert_eq!(record.last_activity, later);
}

#[tokio::test]
async fn no_posts_means_fallback_and_no_trade() {
    let llm = Arc::new(FixedJudgment::new(0.75, 0.9));
    let Harness { mut spawner, .. } = harness(ScriptedSource::new(), llm.clone(), &["XYZ"], 3).await;

    let report = spawner.check_and_spawn_agents(Utc::now()).await;

    // Empty input never reaches the backend.
    assert_eq!(llm.calls(), 0);
    match report.outcome("XYZ") {
        Some(SpawnOutcome::Rejected {
            rejection: Rejection::BelowThresholds { confidence, sentiment },
        }) => {
            assert_eq!(*confidence, 0.5);
            assert_eq!(*sentiment, 0.0);
        }
        other => panic!("expected threshold rejection, got {other:?}"),
    }
    assert_eq!(spawner.execution().ledger().trade_count(), 0);
    assert!(spawner.registry().is_empty());
    assert!(spawner.snapshot().judgments[0].1.is_fallback());
}

#[tokio::test]
async fn capacity_rejects_the_extra_spawn() {
    let llm = Arc::new(FixedJudgment::new(0.95, 0.99));
    let source = ScriptedSource::new().with_posts("ETH", mixed_eth_posts());
    let Harness { mut spawner, .. } = harness(source, llm, &["ETH"], 2).await;

    for _ in 0..2 {
        assert_eq!(spawner.check_and_spawn_agents(Utc::now()).await.spawned(), 1);
    }
    let report = spawner.check_and_spawn_agents(Utc::now()).await;
    assert!(matches!(
        report.outcome("ETH"),
        Some(SpawnOutcome::Rejected {
            rejection: Rejection::AtCapacity { active: 2, max: 2 }
        })
    ));
    assert_eq!(spawner.active_agents("ETH"), 2);
    assert_eq!(spawner.execution().ledger().trade_count(), 2);
}

#[tokio::test]
async fn source_outage_skips_tick_without_failing() {
    let llm = Arc::new(FixedJudgment::new(0.75, 0.9));
    let source = ScriptedSource::new().with_posts("ETH", mixed_eth_posts());
    source.set_error("upstream 503");
    let Harness { mut spawner, .. } = harness(source, llm, &["ETH"], 3).await;

    let report = spawner.check_and_spawn_agents(Utc::now()).await;
    assert!(matches!(report.outcome("ETH"), Some(SpawnOutcome::Skipped { .. })));
    assert!(spawner.registry().is_empty());
}

#[tokio::test]
async fn loss_beyond_threshold_terminates_with_exact_lifetime() {
    let venue = venue().await;
    let exec = execution(venue.clone());
    let mut registry = AgentRegistry::new();
    let mut health = HealthSupervisor::new(
        HealthConfig {
            max_loss_pct: 20.0,
            ..HealthConfig::default()
        },
        AuditLog::in_memory(),
    );

    let deployed = Utc::now() - Duration::minutes(30);
    let agent = Agent::spawn(
        "ETH",
        AgentConfig {
            capital: dec!(1.0),
            target_pool: ETH.to_string(),
            max_slippage: 0.01,
        },
        deployed,
    );
    // Holdings worth 0.75 base: ROI -25%.
    venue.fund_native(&agent.address, dec!(0.75)).await;
    let id = agent.id.clone();
    registry.insert(agent.clone());
    health.register(agent.clone(), None, deployed);

    let now = deployed + Duration::minutes(30) + Duration::milliseconds(1234);
    let killed = health.run_due(now, &mut registry, &exec).await;
    assert_eq!(killed.len(), 1);

    let rec = &killed[0];
    assert_eq!(rec.agent_id, id);
    assert_eq!(rec.reason, KillReason::LossExceedsThreshold.to_string());
    assert!(rec.reason.contains("loss exceeds threshold"));
    assert_eq!(rec.lifetime_ms, (now - deployed).num_milliseconds());
    assert_eq!(rec.lifetime_ms, 30 * 60 * 1000 + 1234);
    assert_eq!(rec.final_metrics.performance.roi, -25.0);

    // Funds moved to the treasury and the agent is gone everywhere.
    assert_eq!(rec.withdrawal.as_ref().unwrap().native, dec!(0.75));
    assert_eq!(assert_ok!(venue.native_balance(TREASURY).await), dec!(0.75));
    assert!(registry.get(&id).is_none());
    assert!(!health.contains(&id));
    assert_eq!(health.audit().records().len(), 1);
}

#[tokio::test]
async fn inactivity_is_checked_before_performance() {
    let venue = venue().await;
    let exec = execution(venue.clone());
    let mut registry = AgentRegistry::new();
    let mut health = HealthSupervisor::new(HealthConfig::default(), AuditLog::in_memory());

    let deployed = Utc::now() - Duration::hours(30);
    let agent = Agent::spawn(
        "ETH",
        AgentConfig {
            capital: dec!(1.0),
            target_pool: ETH.to_string(),
            max_slippage: 0.01,
        },
        deployed,
    );
    // Healthy by value: ROI +10%.
    venue.fund_native(&agent.address, dec!(1.1)).await;
    registry.insert(agent.clone());
    health.register(agent.clone(), None, deployed);

    let now = deployed + Duration::hours(25);
    let killed = health.run_due(now, &mut registry, &exec).await;
    assert_eq!(killed.len(), 1);
    assert_eq!(killed[0].reason, "inactive");
    assert!(killed[0].final_metrics.performance.roi > 0.0);
}

#[tokio::test]
async fn kill_twice_is_a_no_op() {
    let llm = Arc::new(FixedJudgment::new(0.75, 0.9));
    let source = ScriptedSource::new().with_posts("ETH", mixed_eth_posts());
    let Harness { mut spawner, .. } = harness(source, llm, &["ETH"], 3).await;

    let now = Utc::now();
    let report = spawner.check_and_spawn_agents(now).await;
    let Some(SpawnOutcome::Spawned { agent_id, .. }) = report.outcome("ETH") else {
        panic!("expected spawn");
    };
    let agent_id = agent_id.clone();

    let first = spawner
        .kill_agent(&agent_id, KillReason::Manual("operator".into()), now)
        .await;
    let second = spawner
        .kill_agent(&agent_id, KillReason::Manual("operator".into()), now)
        .await;
    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(spawner.health().audit().records().len(), 1);
    assert_eq!(spawner.active_agents("ETH"), 0);
    assert_err!(
        spawner
            .trade_for_agent(&agent_id, TradeDirection::Buy, dec!(0.01), now)
            .await
    );

    // A later sweep finds nothing to check.
    let later = now + Duration::hours(1);
    assert!(spawner.run_health_checks(later).await.is_empty());
    assert_eq!(spawner.next_health_due(), None);
}

#[tokio::test]
async fn insufficient_wallet_balance_rejects_spawn() {
    let llm = Arc::new(FixedJudgment::new(0.75, 0.9));
    let source = ScriptedSource::new().with_posts("ETH", mixed_eth_posts());
    let Harness { venue, mut spawner } = harness(source, llm, &["ETH"], 3).await;

    let drain = assert_ok!(venue.native_balance(WALLET).await);
    assert_ok!(venue.transfer_native(WALLET, TREASURY, drain).await);

    let report = spawner.check_and_spawn_agents(Utc::now()).await;
    assert!(matches!(
        report.outcome("ETH"),
        Some(SpawnOutcome::Rejected {
            rejection: Rejection::ExecutionFailed { .. }
        })
    ));
    assert!(spawner.registry().is_empty());
    assert_eq!(spawner.execution().ledger().trade_count(), 0);
}

#[test]
fn entry_price_is_volume_weighted() {
    let mut ledger = Ledger::new(100, "sentiment");
    let buys = [(dec!(2), dec!(10)), (dec!(3), dec!(12.5)), (dec!(0.5), dec!(8))];
    for (amount, price) in buys {
        ledger.record(
            Trade {
                timestamp: Utc::now(),
                token: "ETH".into(),
                direction: TradeDirection::Buy,
                amount,
                price,
                tx_ref: "0xtx".into(),
                status: TradeStatus::Completed,
                agent_id: None,
            },
            ETH,
        );
    }

    let notional: Decimal = buys.iter().map(|(a, p)| a * p).sum();
    let volume: Decimal = buys.iter().map(|(a, _)| *a).sum();
    let pos = ledger.position("ETH").unwrap();
    assert_eq!(pos.amount, dec!(5.5));
    assert!(approx_eq(pos.entry_price, notional / volume));
}
