//! Health supervisor: per-agent liveness, ROI and loss checks.
//!
//! Every registered agent has a `HealthRecord` and an entry in the due
//! queue. A check refreshes ROI from the agent's current holdings, then
//! trips on the first failing condition in this order:
//!
//! 1. inactivity longer than `max_inactivity_hours`
//! 2. ROI below `min_roi_pct`
//! 3. drawdown above `max_loss_pct`
//!
//! Killing an agent withdraws its funds best-effort, writes an audit
//! record, and drops it from supervision even if the withdrawal failed.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::{debug, info, warn};

use super::audit::{AuditLog, TerminationRecord};
use super::registry::AgentRegistry;
use super::scheduler::DueQueue;
use crate::config::{HealthSection, MAX_INTERVAL_SECS};
use crate::execution::service::ExecutionService;
use crate::types::{Agent, SwarmError};

/// ROI samples kept for the volatility estimate.
const VOLATILITY_WINDOW: usize = 20;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthConfig {
    pub check_interval_secs: u64,
    /// Percent drawdown that triggers a kill.
    pub max_loss_pct: f64,
    pub max_inactivity_hours: f64,
    /// Percent ROI floor.
    pub min_roi_pct: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        (&HealthSection::default()).into()
    }
}

impl From<&HealthSection> for HealthConfig {
    fn from(s: &HealthSection) -> Self {
        Self {
            check_interval_secs: s.check_interval_secs,
            max_loss_pct: s.max_loss_pct,
            max_inactivity_hours: s.max_inactivity_hours,
            min_roi_pct: s.min_roi_pct,
        }
    }
}

impl HealthConfig {
    /// Check interval, clamped to `1..=MAX_INTERVAL_SECS`.
    pub fn interval(&self) -> Duration {
        let secs = self.check_interval_secs.clamp(1, MAX_INTERVAL_SECS);
        Duration::seconds(i64::try_from(secs).unwrap_or(1))
    }

    /// When the next check after `now` is due.
    pub fn next_check(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.interval()).unwrap_or(now)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeMetrics {
    pub successful: u64,
    pub failed: u64,
    pub total_volume: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    /// Percent return on allocated capital.
    pub roi: f64,
    /// `|roi|` while ROI is negative, otherwise left as it was.
    pub drawdown: f64,
    /// Standard deviation of recent ROI samples.
    pub volatility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetrics {
    pub trades: TradeMetrics,
    pub performance: PerformanceMetrics,
    pub last_update: DateTime<Utc>,
}

impl HealthMetrics {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            trades: TradeMetrics::default(),
            performance: PerformanceMetrics::default(),
            last_update: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub agent: Agent,
    pub config: HealthConfig,
    pub last_activity: DateTime<Utc>,
    pub metrics: HealthMetrics,
    #[serde(skip)]
    roi_samples: VecDeque<f64>,
}

impl HealthRecord {
    pub fn new(agent: Agent, config: HealthConfig, now: DateTime<Utc>) -> Self {
        Self {
            agent,
            config,
            last_activity: now,
            metrics: HealthMetrics::new(now),
            roi_samples: VecDeque::with_capacity(VOLATILITY_WINDOW),
        }
    }

    /// Fold a fresh valuation into ROI, drawdown and volatility.
    pub fn apply_valuation(&mut self, value: Decimal, now: DateTime<Utc>) -> Result<(), SwarmError> {
        let capital = self.agent.config.capital;
        if capital <= Decimal::ZERO {
            return Err(SwarmError::HealthCheck {
                agent_id: self.agent.id.clone(),
                message: "agent has no allocated capital".to_string(),
            });
        }
        let roi = ((value - capital) / capital * Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(0.0);

        let perf = &mut self.metrics.performance;
        perf.roi = roi;
        if roi < 0.0 {
            perf.drawdown = roi.abs();
        }

        if self.roi_samples.len() == VOLATILITY_WINDOW {
            self.roi_samples.pop_front();
        }
        self.roi_samples.push_back(roi);
        perf.volatility = std_dev(self.roi_samples.make_contiguous());

        self.metrics.last_update = now;
        Ok(())
    }
}

fn std_dev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    (samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt()
}

// ---------------------------------------------------------------------------
// Kill reasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum KillReason {
    Inactive,
    RoiBelowThreshold,
    LossExceedsThreshold,
    Manual(String),
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillReason::Inactive => write!(f, "inactive"),
            KillReason::RoiBelowThreshold => write!(f, "ROI below threshold"),
            KillReason::LossExceedsThreshold => write!(f, "loss exceeds threshold"),
            KillReason::Manual(why) => write!(f, "manual: {why}"),
        }
    }
}

/// First failing health condition, if any. Order matters.
pub fn evaluate(record: &HealthRecord, now: DateTime<Utc>) -> Option<KillReason> {
    let c = &record.config;
    let idle_ms = (now - record.last_activity).num_milliseconds() as f64;
    if idle_ms > c.max_inactivity_hours * 3_600_000.0 {
        return Some(KillReason::Inactive);
    }
    let perf = &record.metrics.performance;
    if perf.roi < c.min_roi_pct {
        return Some(KillReason::RoiBelowThreshold);
    }
    if perf.drawdown > c.max_loss_pct {
        return Some(KillReason::LossExceedsThreshold);
    }
    None
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct HealthSupervisor {
    records: HashMap<String, HealthRecord>,
    queue: DueQueue,
    audit: AuditLog,
    default_config: HealthConfig,
}

impl HealthSupervisor {
    pub fn new(default_config: HealthConfig, audit: AuditLog) -> Self {
        Self {
            records: HashMap::new(),
            queue: DueQueue::new(),
            audit,
            default_config,
        }
    }

    /// Start supervising `agent`; first check is one interval from `now`.
    pub fn register(&mut self, agent: Agent, config: Option<HealthConfig>, now: DateTime<Utc>) {
        let config = config.unwrap_or_else(|| self.default_config.clone());
        let id = agent.id.clone();
        self.queue.schedule(&id, config.next_check(now));
        info!(
            agent_id = %id,
            token = %agent.token,
            interval_secs = config.check_interval_secs,
            "Agent registered for health checks"
        );
        self.records.insert(id, HealthRecord::new(agent, config, now));
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.records.contains_key(agent_id)
    }

    pub fn record(&self, agent_id: &str) -> Option<&HealthRecord> {
        self.records.get(agent_id)
    }

    /// Records sorted by agent id.
    pub fn records(&self) -> Vec<HealthRecord> {
        let mut all: Vec<HealthRecord> = self.records.values().cloned().collect();
        all.sort_by(|a, b| a.agent.id.cmp(&b.agent.id));
        all
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn next_due(&mut self) -> Option<DateTime<Utc>> {
        self.queue.next_due()
    }

    /// Count a trade against the agent and mark it active.
    /// Returns false for an unknown agent.
    pub fn record_trade(&mut self, agent_id: &str, successful: bool, volume: Decimal, now: DateTime<Utc>) -> bool {
        let Some(record) = self.records.get_mut(agent_id) else {
            return false;
        };
        let trades = &mut record.metrics.trades;
        if successful {
            trades.successful += 1;
        } else {
            trades.failed += 1;
        }
        trades.total_volume += volume;
        record.last_activity = now;
        record.metrics.last_update = now;
        debug!(agent_id, successful, volume = %volume, "Trade recorded for agent");
        true
    }

    /// Re-read the agent's holdings and update its performance metrics.
    pub async fn refresh_performance(
        &mut self,
        agent_id: &str,
        exec: &ExecutionService,
        now: DateTime<Utc>,
    ) -> Result<(), SwarmError> {
        let Some(agent) = self.records.get(agent_id).map(|r| r.agent.clone()) else {
            return Ok(());
        };
        let value = exec.agent_value(&agent).await?;
        // The record may have gone while the read was in flight.
        match self.records.get_mut(agent_id) {
            Some(record) => record.apply_valuation(value, now),
            None => Ok(()),
        }
    }

    /// Run one health check. Returns the termination record if it killed.
    pub async fn check_agent(
        &mut self,
        agent_id: &str,
        now: DateTime<Utc>,
        registry: &mut AgentRegistry,
        exec: &ExecutionService,
    ) -> Option<TerminationRecord> {
        let next_check = self.records.get(agent_id)?.config.next_check(now);

        if let Err(e) = self.refresh_performance(agent_id, exec, now).await {
            warn!(agent_id, error = %e, "Health check skipped");
            if self.records.contains_key(agent_id) {
                self.queue.schedule(agent_id, next_check);
            }
            return None;
        }

        let record = self.records.get(agent_id)?;
        match evaluate(record, now) {
            Some(reason) => {
                warn!(
                    agent_id,
                    reason = %reason,
                    roi = format!("{:.2}%", record.metrics.performance.roi),
                    drawdown = format!("{:.2}%", record.metrics.performance.drawdown),
                    "Agent unhealthy"
                );
                self.kill_agent(agent_id, reason, now, registry, exec).await
            }
            None => {
                debug!(
                    agent_id,
                    roi = format!("{:.2}%", record.metrics.performance.roi),
                    "Agent healthy"
                );
                self.queue.schedule(agent_id, next_check);
                None
            }
        }
    }

    /// Check every agent due at or before `now`.
    pub async fn run_due(
        &mut self,
        now: DateTime<Utc>,
        registry: &mut AgentRegistry,
        exec: &ExecutionService,
    ) -> Vec<TerminationRecord> {
        let mut killed = Vec::new();
        for id in self.queue.pop_due(now) {
            if let Some(record) = self.check_agent(&id, now, registry, exec).await {
                killed.push(record);
            }
        }
        killed
    }

    /// Terminate an agent. A second call for the same id is a no-op.
    pub async fn kill_agent(
        &mut self,
        agent_id: &str,
        reason: KillReason,
        now: DateTime<Utc>,
        registry: &mut AgentRegistry,
        exec: &ExecutionService,
    ) -> Option<TerminationRecord> {
        // Out of supervision before the first suspension point.
        let Some(mut record) = self.records.remove(agent_id) else {
            debug!(agent_id, "Kill requested for unknown agent, ignoring");
            return None;
        };
        self.queue.cancel(agent_id);
        record.agent.terminate();

        let (withdrawal, withdrawal_error) = match exec.withdraw_agent_funds(&record.agent).await {
            Ok(w) => (Some(w), None),
            Err(e) => {
                warn!(
                    agent_id,
                    address = %record.agent.address,
                    error = %e,
                    funds_stranded = true,
                    "Withdrawal failed, terminating anyway"
                );
                (None, Some(e.to_string()))
            }
        };

        let termination = TerminationRecord {
            agent_id: record.agent.id.clone(),
            token: record.agent.token.clone(),
            reason: reason.to_string(),
            deployed_at: record.agent.deployed_at,
            terminated_at: now,
            lifetime_ms: record.agent.lifetime(now).num_milliseconds(),
            final_metrics: record.metrics.clone(),
            withdrawal,
            withdrawal_error,
        };
        self.audit.write(termination.clone());
        registry.remove(agent_id);

        info!(
            agent_id,
            token = %termination.token,
            reason = %termination.reason,
            lifetime_ms = termination.lifetime_ms,
            "Agent terminated"
        );
        Some(termination)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
