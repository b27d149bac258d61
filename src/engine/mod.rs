//! Core engine: agent lifecycle, health supervision and the termination audit.
//!
//! All mutable swarm state lives in one `Spawner` owned by the main event
//! loop. Health checks are driven from a single due-time queue rather than
//! a timer per agent.

pub mod audit;
pub mod health;
pub mod registry;
pub mod scheduler;
pub mod spawner;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::types::{MarketJudgment, Position, Trade};
use audit::TerminationRecord;
use health::HealthRecord;

/// Read-only copy of swarm state published to the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmSnapshot {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ticks: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub tokens: Vec<String>,
    pub max_agents_per_token: usize,
    pub venue: String,
    pub base_symbol: String,
    /// Supervised agents with their health records, sorted by id.
    pub agents: Vec<HealthRecord>,
    pub positions: Vec<Position>,
    /// Most recent first.
    pub trades: Vec<Trade>,
    pub terminations: Vec<TerminationRecord>,
    /// Latest judgment per token, sorted by symbol.
    pub judgments: Vec<(String, MarketJudgment)>,
}

impl Default for SwarmSnapshot {
    fn default() -> Self {
        Self {
            name: String::new(),
            started_at: Utc::now(),
            ticks: 0,
            last_tick: None,
            tokens: Vec::new(),
            max_agents_per_token: 0,
            venue: String::new(),
            base_symbol: String::new(),
            agents: Vec::new(),
            positions: Vec::new(),
            trades: Vec::new(),
            terminations: Vec::new(),
            judgments: Vec::new(),
        }
    }
}

/// Wallet and treasury balances. `None` means the read failed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BalanceView {
    pub base_symbol: String,
    pub wallet: String,
    pub wallet_native: Option<Decimal>,
    pub wallet_tokens: HashMap<String, Decimal>,
    pub treasury: String,
    pub treasury_native: Option<Decimal>,
}
