//! Trade execution against a DEX-style venue.
//!
//! Defines the `Venue` trait (swap, allowance, balance and pool-price
//! bindings) and provides:
//! - `paper`: in-memory constant-product venue for dry runs and tests
//! - `rpc`: JSON-RPC probe for startup connectivity and balance reads
//! - `ledger`: per-token positions and the bounded trade ledger
//! - `service`: `ExecutionService`, the only writer of trades/positions

pub mod ledger;
pub mod paper;
pub mod rpc;
pub mod service;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::Serialize;

/// A single-hop swap as submitted to the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapRequest {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    /// Settlement reverts if the output would be below this.
    pub amount_out_min: Decimal,
    /// Account paying `amount_in`.
    pub sender: String,
    /// Account receiving the output.
    pub recipient: String,
    /// Absolute expiry; the venue rejects later settlement.
    pub deadline: DateTime<Utc>,
}

/// Outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxHandle {
    pub reference: String,
    pub succeeded: bool,
    /// Output delivered to the recipient (zero when reverted or not a swap).
    pub amount_out: Decimal,
    pub revert_reason: Option<String>,
}

impl TxHandle {
    pub fn success(reference: impl Into<String>, amount_out: Decimal) -> Self {
        Self {
            reference: reference.into(),
            succeeded: true,
            amount_out,
            revert_reason: None,
        }
    }

    pub fn reverted(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            succeeded: false,
            amount_out: Decimal::ZERO,
            revert_reason: Some(reason.into()),
        }
    }
}

/// Abstraction over a DEX router plus the chain reads it needs.
///
/// Transport failures are `Err`; transactions that were accepted but
/// reverted come back as `Ok` with `succeeded == false`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Venue: Send + Sync {
    /// Spend native asset for `token_out`. `req.token_in` is the wrapped base.
    async fn swap_exact_native_for_tokens(&self, req: &SwapRequest) -> Result<TxHandle>;

    async fn swap_exact_tokens_for_tokens(&self, req: &SwapRequest) -> Result<TxHandle>;

    /// Expected output for `amount_in` at current pool state.
    async fn quote(&self, token_in: &str, token_out: &str, amount_in: Decimal) -> Result<Decimal>;

    /// Base asset per token at current pool state.
    async fn pool_price(&self, token: &str) -> Result<Decimal>;

    /// Router allowance granted by `owner` for `token`.
    async fn allowance(&self, token: &str, owner: &str) -> Result<Decimal>;

    async fn approve(&self, token: &str, owner: &str, amount: Decimal) -> Result<TxHandle>;

    async fn native_balance(&self, address: &str) -> Result<Decimal>;

    async fn token_balance(&self, token: &str, address: &str) -> Result<Decimal>;

    async fn transfer_native(&self, from: &str, to: &str, amount: Decimal) -> Result<TxHandle>;

    async fn transfer_token(&self, token: &str, from: &str, to: &str, amount: Decimal) -> Result<TxHandle>;

    fn name(&self) -> &str;
}

/// `amount * (1 - slippage)`, floored at `decimals` places.
pub fn amount_out_minimum(amount: Decimal, slippage: f64, decimals: u32) -> Decimal {
    let slippage = Decimal::from_f64(slippage.clamp(0.0, 1.0)).unwrap_or(Decimal::ZERO);
    (amount * (Decimal::ONE - slippage)).round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}
