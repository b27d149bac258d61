//! Positions and the bounded trade ledger.
//!
//! Positions change only through `record`. A completed buy grows the
//! position and re-weights the entry price; a completed sell shrinks the
//! amount and leaves the entry price alone. Realized PnL on sells is not
//! booked.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::types::{Position, Trade, TradeDirection, TradeStatus};

pub struct Ledger {
    trades: VecDeque<Trade>,
    limit: usize,
    positions: HashMap<String, Position>,
    strategy: String,
}

impl Ledger {
    pub fn new(limit: usize, strategy: impl Into<String>) -> Self {
        Self {
            trades: VecDeque::with_capacity(limit.min(1024)),
            limit: limit.max(1),
            positions: HashMap::new(),
            strategy: strategy.into(),
        }
    }

    /// Append `trade` and, when completed, fold it into the token's position.
    pub fn record(&mut self, trade: Trade, token_ref: &str) {
        if trade.status == TradeStatus::Completed {
            self.apply(&trade, token_ref);
        }
        if self.trades.len() == self.limit {
            self.trades.pop_front();
        }
        self.trades.push_back(trade);
    }

    fn apply(&mut self, trade: &Trade, token_ref: &str) {
        let pos = self
            .positions
            .entry(trade.token.clone())
            .or_insert_with(|| Position {
                token: trade.token.clone(),
                token_ref: token_ref.to_string(),
                amount: Decimal::ZERO,
                entry_price: Decimal::ZERO,
                current_price: trade.price,
                pnl: Decimal::ZERO,
                strategy: self.strategy.clone(),
                last_update: trade.timestamp,
            });

        match trade.direction {
            TradeDirection::Buy => {
                let new_amount = pos.amount + trade.amount;
                if new_amount > Decimal::ZERO {
                    let cost = pos.amount * pos.entry_price + trade.amount * trade.price;
                    pos.entry_price = cost / new_amount;
                }
                pos.amount = new_amount;
            }
            TradeDirection::Sell => {
                pos.amount = (pos.amount - trade.amount).max(Decimal::ZERO);
            }
        }

        pos.current_price = trade.price;
        pos.pnl = pos.unrealized_pnl(trade.price);
        pos.last_update = trade.timestamp;

        debug!(
            token = %pos.token,
            amount = %pos.amount,
            entry = %pos.entry_price,
            "Position updated"
        );
    }

    /// Mark a position to `price`. Zero prices (failed reads) are ignored.
    pub fn mark(&mut self, token: &str, price: Decimal, now: DateTime<Utc>) {
        if price <= Decimal::ZERO {
            return;
        }
        if let Some(pos) = self.positions.get_mut(token) {
            pos.current_price = price;
            pos.pnl = pos.unrealized_pnl(price);
            pos.last_update = now;
        }
    }

    pub fn position(&self, token: &str) -> Option<&Position> {
        self.positions.get(token)
    }

    /// Positions sorted by token.
    pub fn positions(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.values().cloned().collect();
        all.sort_by(|a, b| a.token.cmp(&b.token));
        all
    }

    /// Oldest first.
    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.iter()
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    /// The most recent `n` trades, newest first.
    pub fn recent_trades(&self, n: usize) -> Vec<Trade> {
        self.trades.iter().rev().take(n).cloned().collect()
    }
}
