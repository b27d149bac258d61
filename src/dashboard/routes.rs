//! Dashboard API route handlers.
//!
//! All endpoints return JSON projections of the last published
//! `SwarmSnapshot`. State is shared via `Arc<DashboardState>`; handlers
//! never reach into the live spawner.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::audit::TerminationRecord;
use crate::engine::{BalanceView, SwarmSnapshot};
use crate::types::{MarketCondition, Position, Trade};

/// Trades returned by `/api/trades`.
const MAX_TRADES: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub snapshot: RwLock<SwarmSnapshot>,
    pub balance: RwLock<BalanceView>,
}

impl DashboardState {
    pub fn new(initial: SwarmSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(initial),
            balance: RwLock::new(BalanceView::default()),
        }
    }

    /// Replace the published view.
    pub async fn publish(&self, snapshot: SwarmSnapshot, balance: BalanceView) {
        *self.snapshot.write().await = snapshot;
        *self.balance.write().await = balance;
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub venue: String,
    pub base_symbol: String,
    pub uptime_secs: i64,
    pub ticks: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub tokens: Vec<String>,
    pub active_agents: usize,
    /// Active agents per monitored token (zero entries included).
    pub agents_per_token: BTreeMap<String, usize>,
    pub max_agents_per_token: usize,
    pub open_positions: usize,
    pub terminated_agents: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentView {
    pub id: String,
    pub token: String,
    pub address: String,
    pub capital: Decimal,
    pub deployed_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub roi_pct: f64,
    pub drawdown_pct: f64,
    pub volatility: f64,
    pub successful_trades: u64,
    pub failed_trades: u64,
    pub total_volume: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct JudgmentView {
    pub token: String,
    pub sentiment: f64,
    pub confidence: f64,
    pub condition: MarketCondition,
    pub fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandHelp {
    pub path: &'static str,
    pub description: &'static str,
}

const COMMANDS: &[CommandHelp] = &[
    CommandHelp {
        path: "/api/status",
        description: "uptime, tick count and active agents per token",
    },
    CommandHelp {
        path: "/api/positions",
        description: "open positions with weighted entry and current price",
    },
    CommandHelp {
        path: "/api/agents",
        description: "supervised agents with their health metrics",
    },
    CommandHelp {
        path: "/api/trades",
        description: "most recent trades, newest first",
    },
    CommandHelp {
        path: "/api/balance",
        description: "operator wallet and treasury balances",
    },
    CommandHelp {
        path: "/api/terminations",
        description: "termination audit records",
    },
    CommandHelp {
        path: "/api/judgments",
        description: "latest market judgment per token",
    },
    CommandHelp {
        path: "/api/help",
        description: "this list",
    },
];

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snap = state.snapshot.read().await;

    let mut agents_per_token: BTreeMap<String, usize> =
        snap.tokens.iter().map(|t| (t.clone(), 0)).collect();
    for record in snap.agents.iter().filter(|r| r.agent.is_active()) {
        *agents_per_token.entry(record.agent.token.clone()).or_default() += 1;
    }

    Json(StatusResponse {
        name: snap.name.clone(),
        venue: snap.venue.clone(),
        base_symbol: snap.base_symbol.clone(),
        uptime_secs: (Utc::now() - snap.started_at).num_seconds(),
        ticks: snap.ticks,
        last_tick: snap.last_tick,
        tokens: snap.tokens.clone(),
        active_agents: agents_per_token.values().sum(),
        agents_per_token,
        max_agents_per_token: snap.max_agents_per_token,
        open_positions: snap.positions.iter().filter(|p| !p.amount.is_zero()).count(),
        terminated_agents: snap.terminations.len(),
    })
}

/// GET /api/positions
pub async fn get_positions(State(state): State<AppState>) -> Json<Vec<Position>> {
    Json(state.snapshot.read().await.positions.clone())
}

/// GET /api/agents
pub async fn get_agents(State(state): State<AppState>) -> Json<Vec<AgentView>> {
    let snap = state.snapshot.read().await;
    let agents = snap
        .agents
        .iter()
        .map(|r| AgentView {
            id: r.agent.id.clone(),
            token: r.agent.token.clone(),
            address: r.agent.address.clone(),
            capital: r.agent.config.capital,
            deployed_at: r.agent.deployed_at,
            last_activity: r.last_activity,
            roi_pct: r.metrics.performance.roi,
            drawdown_pct: r.metrics.performance.drawdown,
            volatility: r.metrics.performance.volatility,
            successful_trades: r.metrics.trades.successful,
            failed_trades: r.metrics.trades.failed,
            total_volume: r.metrics.trades.total_volume,
        })
        .collect();
    Json(agents)
}

/// GET /api/trades
pub async fn get_trades(State(state): State<AppState>) -> Json<Vec<Trade>> {
    let snap = state.snapshot.read().await;
    Json(snap.trades.iter().take(MAX_TRADES).cloned().collect())
}

/// GET /api/balance
pub async fn get_balance(State(state): State<AppState>) -> Json<BalanceView> {
    Json(state.balance.read().await.clone())
}

/// GET /api/terminations
pub async fn get_terminations(State(state): State<AppState>) -> Json<Vec<TerminationRecord>> {
    Json(state.snapshot.read().await.terminations.clone())
}

/// GET /api/judgments
pub async fn get_judgments(State(state): State<AppState>) -> Json<Vec<JudgmentView>> {
    let snap = state.snapshot.read().await;
    let views = snap
        .judgments
        .iter()
        .map(|(token, j)| JudgmentView {
            token: token.clone(),
            sentiment: j.sentiment,
            confidence: j.confidence,
            condition: j.condition,
            fallback: j.is_fallback(),
        })
        .collect();
    Json(views)
}

/// GET /api/help
pub async fn get_help() -> Json<&'static [CommandHelp]> {
    Json(COMMANDS)
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
