//! Opportunity evaluator ("Judge").
//!
//! Converts a `MarketJudgment` into a spawn/no-spawn decision with a
//! recommended capital allocation and risk parameters. Pure function of
//! its inputs and the static configuration.

use rust_decimal::prelude::*;
use tracing::debug;

use crate::config::JudgeSection;
use crate::types::{MarketJudgment, OpportunityEvaluation, RecommendedConfig};

/// Confidence at which capital starts scaling above the minimum.
const SCALE_FLOOR: f64 = 0.7;

/// Decimal places kept on recommended capital.
const CAPITAL_DP: u32 = 8;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// Minimum |sentiment| to act on.
    pub min_sentiment: f64,
    pub min_confidence: f64,
    pub min_capital: Decimal,
    pub max_capital: Decimal,
    pub max_slippage: f64,
    pub stop_loss_pct: f64,
    pub target_profit_pct: f64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        JudgeSection::default().into()
    }
}

impl From<JudgeSection> for JudgeConfig {
    fn from(s: JudgeSection) -> Self {
        Self {
            min_sentiment: s.min_sentiment,
            min_confidence: s.min_confidence,
            min_capital: s.min_capital,
            max_capital: s.max_capital,
            max_slippage: s.max_slippage,
            stop_loss_pct: s.stop_loss_pct,
            target_profit_pct: s.target_profit_pct,
        }
    }
}

// ---------------------------------------------------------------------------
// Judge
// ---------------------------------------------------------------------------

pub struct Judge {
    config: JudgeConfig,
}

impl Judge {
    pub fn new(config: JudgeConfig) -> Self {
        Self { config }
    }

    /// `|sentiment| >= min_sentiment && confidence >= min_confidence`.
    pub fn passes_thresholds(&self, judgment: &MarketJudgment) -> bool {
        judgment.sentiment.abs() >= self.config.min_sentiment
            && judgment.confidence >= self.config.min_confidence
    }

    /// Capital for a given confidence.
    ///
    /// Linear between `min_capital` at 0.7 and `max_capital` at 1.0;
    /// `min_capital` below 0.7. Always within `[min_capital, max_capital]`.
    pub fn capital_for(&self, confidence: f64) -> Decimal {
        let (min, max) = (self.config.min_capital, self.config.max_capital);
        if !confidence.is_finite() || confidence <= SCALE_FLOOR || max <= min {
            return min;
        }
        let frac = ((confidence - SCALE_FLOOR) / (1.0 - SCALE_FLOOR)).clamp(0.0, 1.0);
        let frac = Decimal::from_f64(frac).unwrap_or(Decimal::ZERO);
        let capital = (min + (max - min) * frac).round_dp_with_strategy(CAPITAL_DP, RoundingStrategy::ToZero);
        capital.clamp(min, max)
    }

    /// Evaluate a judgment for `symbol`.
    pub fn evaluate(&self, symbol: &str, judgment: &MarketJudgment) -> OpportunityEvaluation {
        let c = &self.config;
        let mut reasons = Vec::new();

        let strong_enough = judgment.sentiment.abs() >= c.min_sentiment;
        reasons.push(format!(
            "|sentiment| {:.2} {} {:.2}",
            judgment.sentiment.abs(),
            if strong_enough { ">=" } else { "<" },
            c.min_sentiment
        ));

        let confident_enough = judgment.confidence >= c.min_confidence;
        reasons.push(format!(
            "confidence {:.2} {} {:.2}",
            judgment.confidence,
            if confident_enough { ">=" } else { "<" },
            c.min_confidence
        ));

        reasons.push(format!("market condition {}", judgment.condition));

        let should_spawn = strong_enough && confident_enough;
        let capital = self.capital_for(judgment.confidence);

        debug!(
            symbol,
            should_spawn,
            capital = %capital,
            confidence = judgment.confidence,
            "Opportunity evaluated"
        );

        OpportunityEvaluation {
            should_spawn,
            confidence: judgment.confidence,
            reasons,
            recommended_config: RecommendedConfig {
                capital,
                max_slippage: c.max_slippage,
                stop_loss: c.stop_loss_pct,
                target_profit: c.target_profit_pct,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
