//! Execution service: swaps, balances, prices and trade recording.
//!
//! Resolves token symbols to venue addresses, runs the pre-trade checks
//! (funds, allowance, minimum output), submits the swap, and folds the
//! result into the ledger. Typed `SwarmError`s let the caller tell an
//! approval failure apart from a swap failure.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::ledger::Ledger;
use super::{amount_out_minimum, SwapRequest, TxHandle, Venue};
use crate::config::{AgentConfig, ChainConfig, MAX_SWAP_DEADLINE_SECS};
use crate::types::{Agent, SwarmError, Trade, TradeDirection, TradeStatus};

/// Native asset decimals.
const BASE_DECIMALS: u32 = 18;

/// A tradable token as registered with the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRef {
    pub symbol: String,
    pub address: String,
    pub decimals: u32,
}

/// Low-level swap parameters, addresses already resolved.
#[derive(Debug, Clone)]
pub struct SwapParams {
    pub direction: TradeDirection,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    pub slippage: f64,
    pub deadline: DateTime<Utc>,
    pub sender: String,
    pub recipient: String,
}

/// A trade expressed in base-asset capital.
#[derive(Debug, Clone)]
pub struct TradeOrder {
    pub token: String,
    pub direction: TradeDirection,
    /// Base-asset value to commit. Sells convert it to a token quantity.
    pub capital: Decimal,
    pub slippage: f64,
    pub sender: String,
    pub recipient: String,
    pub agent_id: Option<String>,
}

/// Funds moved to the treasury when an agent is killed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Withdrawal {
    pub native: Decimal,
    pub token_amount: Decimal,
    pub tx_refs: Vec<String>,
}

pub struct ExecutionService {
    venue: Arc<dyn Venue>,
    /// Upper-case symbol → token.
    tokens: HashMap<String, TokenRef>,
    base: TokenRef,
    wallet: String,
    treasury: String,
    deadline: Duration,
    ledger: Ledger,
}

impl ExecutionService {
    pub fn new(venue: Arc<dyn Venue>, chain: &ChainConfig, agent: &AgentConfig) -> Self {
        let tokens = chain
            .tokens
            .iter()
            .map(|(symbol, t)| {
                let symbol = symbol.to_uppercase();
                (
                    symbol.clone(),
                    TokenRef {
                        symbol,
                        address: t.address.clone(),
                        decimals: t.decimals,
                    },
                )
            })
            .collect();

        Self {
            venue,
            tokens,
            base: TokenRef {
                symbol: chain.base_symbol.clone(),
                address: chain.base_token_address.clone(),
                decimals: BASE_DECIMALS,
            },
            wallet: chain.wallet_address.clone(),
            treasury: chain.treasury_address.clone(),
            deadline: Duration::seconds(agent.swap_deadline_secs.clamp(1, MAX_SWAP_DEADLINE_SECS)),
            ledger: Ledger::new(agent.trade_history_limit, agent.strategy.clone()),
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn wallet(&self) -> &str {
        &self.wallet
    }

    pub fn treasury(&self) -> &str {
        &self.treasury
    }

    pub fn base_symbol(&self) -> &str {
        &self.base.symbol
    }

    pub fn venue_name(&self) -> &str {
        self.venue.name()
    }

    /// Resolve a symbol to its venue registration.
    pub fn token(&self, symbol: &str) -> Result<&TokenRef, SwarmError> {
        self.tokens
            .get(&symbol.to_uppercase())
            .ok_or_else(|| SwarmError::UnknownToken(symbol.to_string()))
    }

    fn token_by_address(&self, address: &str) -> Option<&TokenRef> {
        if address.eq_ignore_ascii_case(&self.base.address) {
            return Some(&self.base);
        }
        self.tokens
            .values()
            .find(|t| t.address.eq_ignore_ascii_case(address))
    }

    /// Absolute swap expiry for a submission now.
    pub fn deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.deadline
    }

    // -- Swaps --------------------------------------------------------------

    /// Submit a swap. A revert is `Reverted`; transport failures are
    /// `Execution` errors.
    pub async fn swap(&self, params: &SwapParams) -> Result<TxHandle, SwarmError> {
        let handle = self.submit(params).await?;
        if !handle.succeeded {
            return Err(SwarmError::Reverted {
                tx_ref: handle.reference,
                reason: handle
                    .revert_reason
                    .unwrap_or_else(|| "unknown reason".to_string()),
            });
        }
        Ok(handle)
    }

    /// Pre-checks plus submission. A reverted transaction is returned as-is.
    ///
    /// `amount_out_min` is `quote × (1 - slippage)` on a fresh venue quote,
    /// not `amount_in × (1 - slippage)`: the input amount is in the other
    /// token's units.
    async fn submit(&self, params: &SwapParams) -> Result<TxHandle, SwarmError> {
        let out_token = self
            .token_by_address(&params.token_out)
            .ok_or_else(|| SwarmError::UnknownToken(params.token_out.clone()))?;
        let in_token = self
            .token_by_address(&params.token_in)
            .ok_or_else(|| SwarmError::UnknownToken(params.token_in.clone()))?;
        let out_decimals = out_token.decimals;
        let in_symbol = in_token.symbol.clone();

        // Funds
        let available = match params.direction {
            TradeDirection::Buy => self.venue.native_balance(&params.sender).await,
            TradeDirection::Sell => self.venue.token_balance(&params.token_in, &params.sender).await,
        }
        .map_err(|e| SwarmError::Execution(format!("balance read failed: {e}")))?;
        if available < params.amount_in {
            return Err(SwarmError::InsufficientFunds {
                needed: params.amount_in,
                available,
            });
        }

        // Allowance before any token sale
        if params.direction == TradeDirection::Sell {
            self.ensure_allowance(&in_symbol, &params.token_in, &params.sender, params.amount_in)
                .await?;
        }

        // Minimum output from the current quote
        let quoted = self
            .venue
            .quote(&params.token_in, &params.token_out, params.amount_in)
            .await
            .map_err(|e| SwarmError::Execution(format!("quote failed: {e}")))?;
        let amount_out_min = amount_out_minimum(quoted, params.slippage, out_decimals);

        let request = SwapRequest {
            token_in: params.token_in.clone(),
            token_out: params.token_out.clone(),
            amount_in: params.amount_in,
            amount_out_min,
            sender: params.sender.clone(),
            recipient: params.recipient.clone(),
            deadline: params.deadline,
        };

        debug!(
            direction = %params.direction,
            amount_in = %params.amount_in,
            quoted = %quoted,
            amount_out_min = %amount_out_min,
            "Submitting swap"
        );

        let result = match params.direction {
            TradeDirection::Buy => self.venue.swap_exact_native_for_tokens(&request).await,
            TradeDirection::Sell => self.venue.swap_exact_tokens_for_tokens(&request).await,
        };
        result.map_err(|e| SwarmError::Execution(format!("swap submission failed: {e}")))
    }

    /// Approve the router for `amount` if the standing allowance is short.
    async fn ensure_allowance(
        &self,
        symbol: &str,
        token: &str,
        owner: &str,
        amount: Decimal,
    ) -> Result<(), SwarmError> {
        let approval_err = |message: String| SwarmError::Approval {
            token: symbol.to_string(),
            message,
        };

        let current = self
            .venue
            .allowance(token, owner)
            .await
            .map_err(|e| approval_err(format!("allowance read failed: {e}")))?;
        if current >= amount {
            return Ok(());
        }

        info!(token = symbol, current = %current, needed = %amount, "Approving router");
        let handle = self
            .venue
            .approve(token, owner, amount)
            .await
            .map_err(|e| approval_err(format!("approval submission failed: {e}")))?;
        if !handle.succeeded {
            return Err(approval_err(format!(
                "approval reverted ({}): {}",
                handle.reference,
                handle.revert_reason.unwrap_or_default()
            )));
        }
        Ok(())
    }

    /// Execute `order` and record the resulting trade.
    ///
    /// Reverted swaps are recorded as `Failed` and returned as errors;
    /// pre-check failures leave the ledger untouched.
    pub async fn execute_trade(&mut self, order: &TradeOrder, now: DateTime<Utc>) -> Result<Trade, SwarmError> {
        let token = self.token(&order.token)?.clone();

        let (token_in, token_out, amount_in) = match order.direction {
            TradeDirection::Buy => (self.base.address.clone(), token.address.clone(), order.capital),
            TradeDirection::Sell => {
                let price = self.price(&token.address).await?;
                let qty = (order.capital / price)
                    .round_dp_with_strategy(token.decimals, RoundingStrategy::ToZero);
                (token.address.clone(), self.base.address.clone(), qty)
            }
        };
        if amount_in <= Decimal::ZERO {
            return Err(SwarmError::Execution(format!("non-positive swap amount {amount_in}")));
        }

        let params = SwapParams {
            direction: order.direction,
            token_in,
            token_out,
            amount_in,
            slippage: order.slippage,
            deadline: self.deadline_from(now),
            sender: order.sender.clone(),
            recipient: order.recipient.clone(),
        };

        let swapped = self.swap(&params).await;
        let handle = match swapped {
            Ok(handle) => handle,
            Err(SwarmError::Reverted { tx_ref, reason }) => {
                self.record_trade(
                    Trade {
                        timestamp: now,
                        token: token.symbol.clone(),
                        direction: order.direction,
                        amount: Decimal::ZERO,
                        price: Decimal::ZERO,
                        tx_ref: tx_ref.clone(),
                        status: TradeStatus::Failed,
                        agent_id: order.agent_id.clone(),
                    },
                    &token.address,
                );
                return Err(SwarmError::Reverted { tx_ref, reason });
            }
            Err(e) => return Err(e),
        };

        let (token_qty, base_qty) = match order.direction {
            TradeDirection::Buy => (handle.amount_out, amount_in),
            TradeDirection::Sell => (amount_in, handle.amount_out),
        };
        let price = if token_qty.is_zero() {
            Decimal::ZERO
        } else {
            base_qty / token_qty
        };

        let trade = Trade {
            timestamp: now,
            token: token.symbol.clone(),
            direction: order.direction,
            amount: token_qty,
            price,
            tx_ref: handle.reference,
            status: TradeStatus::Completed,
            agent_id: order.agent_id.clone(),
        };

        info!(
            token = %trade.token,
            direction = %trade.direction,
            amount = %trade.amount,
            price = %trade.price,
            tx = %trade.tx_ref,
            "Trade executed"
        );

        self.record_trade(trade.clone(), &token.address);
        Ok(trade)
    }

    /// Append to the ledger and update the position.
    pub fn record_trade(&mut self, trade: Trade, token_ref: &str) {
        self.ledger.record(trade, token_ref);
    }

    // -- Reads --------------------------------------------------------------

    /// Pool price of `token_address`, zero when the read fails.
    pub async fn get_price(&self, token_address: &str) -> Decimal {
        match self.venue.pool_price(token_address).await {
            Ok(p) => p,
            Err(e) => {
                warn!(token = token_address, error = %e, "Price read failed");
                Decimal::ZERO
            }
        }
    }

    /// Pool price that refuses to report zero.
    async fn price(&self, token_address: &str) -> Result<Decimal, SwarmError> {
        let price = self
            .venue
            .pool_price(token_address)
            .await
            .map_err(|e| SwarmError::Execution(format!("price read failed: {e}")))?;
        if price <= Decimal::ZERO {
            return Err(SwarmError::Execution(format!("no price for {token_address}")));
        }
        Ok(price)
    }

    pub async fn get_balance(&self, address: &str) -> Result<Decimal> {
        self.venue.native_balance(address).await
    }

    /// Balances of every registered token held by `address`.
    pub async fn get_token_balances(&self, address: &str) -> Result<HashMap<String, Decimal>> {
        let mut balances = HashMap::with_capacity(self.tokens.len());
        for t in self.tokens.values() {
            let bal = self.venue.token_balance(&t.address, address).await?;
            balances.insert(t.symbol.clone(), bal);
        }
        Ok(balances)
    }

    /// Base-asset value of an agent's sub-account: native + token × price.
    pub async fn agent_value(&self, agent: &Agent) -> Result<Decimal, SwarmError> {
        let health_err = |message: String| SwarmError::HealthCheck {
            agent_id: agent.id.clone(),
            message,
        };
        let token = self.token(&agent.token).map_err(|e| health_err(e.to_string()))?;

        let native = self
            .venue
            .native_balance(&agent.address)
            .await
            .map_err(|e| health_err(format!("balance read failed: {e}")))?;
        let held = self
            .venue
            .token_balance(&token.address, &agent.address)
            .await
            .map_err(|e| health_err(format!("token balance read failed: {e}")))?;
        if held.is_zero() {
            return Ok(native);
        }
        let price = self
            .venue
            .pool_price(&token.address)
            .await
            .map_err(|e| health_err(format!("price read failed: {e}")))?;
        if price <= Decimal::ZERO {
            return Err(health_err("zero pool price".to_string()));
        }
        Ok(native + held * price)
    }

    /// Mark every open position to the current pool price.
    pub async fn refresh_positions(&mut self, now: DateTime<Utc>) {
        let refs: Vec<(String, String)> = self
            .ledger
            .positions()
            .into_iter()
            .map(|p| (p.token, p.token_ref))
            .collect();
        for (token, address) in refs {
            let price = self.get_price(&address).await;
            self.ledger.mark(&token, price, now);
        }
    }

    /// Move everything an agent holds to the treasury.
    pub async fn withdraw_agent_funds(&self, agent: &Agent) -> Result<Withdrawal, SwarmError> {
        let withdraw_err = |message: String| SwarmError::Withdrawal {
            agent_id: agent.id.clone(),
            message,
        };
        let token = self.token(&agent.token).map_err(|e| withdraw_err(e.to_string()))?;
        let mut withdrawal = Withdrawal::default();

        let held = self
            .venue
            .token_balance(&token.address, &agent.address)
            .await
            .map_err(|e| withdraw_err(format!("token balance read failed: {e}")))?;
        if held > Decimal::ZERO {
            let tx = self
                .venue
                .transfer_token(&token.address, &agent.address, &self.treasury, held)
                .await
                .map_err(|e| withdraw_err(format!("token transfer failed: {e}")))?;
            if !tx.succeeded {
                return Err(withdraw_err(format!(
                    "token transfer reverted: {}",
                    tx.revert_reason.unwrap_or_default()
                )));
            }
            withdrawal.token_amount = held;
            withdrawal.tx_refs.push(tx.reference);
        }

        let native = self
            .venue
            .native_balance(&agent.address)
            .await
            .map_err(|e| withdraw_err(format!("balance read failed: {e}")))?;
        if native > Decimal::ZERO {
            let tx = self
                .venue
                .transfer_native(&agent.address, &self.treasury, native)
                .await
                .map_err(|e| withdraw_err(format!("native transfer failed: {e}")))?;
            if !tx.succeeded {
                return Err(withdraw_err(format!(
                    "native transfer reverted: {}",
                    tx.revert_reason.unwrap_or_default()
                )));
            }
            withdrawal.native = native;
            withdrawal.tx_refs.push(tx.reference);
        }

        info!(
            agent_id = %agent.id,
            native = %withdrawal.native,
            tokens = %withdrawal.token_amount,
            "Agent funds withdrawn to treasury"
        );
        Ok(withdrawal)
    }
}
