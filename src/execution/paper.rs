//! Paper venue: an in-memory Uniswap-V2-style router.
//!
//! Each configured token has a constant-product pool against the wrapped
//! base asset with the standard 0.3% fee. Balances, allowances, deadlines
//! and minimum outputs are enforced the way the on-chain router does, so
//! the execution service sees the same failure modes in a dry run.
//!
//! The wrapped base token and the native balance are the same ledger
//! entry here: selling into the base credits native balance directly.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{SwapRequest, TxHandle, Venue};
use crate::config::{ChainConfig, PaperConfig};

/// Precision kept on settled amounts.
const SETTLE_DP: u32 = 18;

/// `amount_in` after the 0.3% fee, against constant-product reserves.
pub fn get_amount_out(amount_in: Decimal, reserve_in: Decimal, reserve_out: Decimal) -> Decimal {
    if amount_in <= Decimal::ZERO || reserve_in <= Decimal::ZERO || reserve_out <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let out = amount_in
        .checked_mul(dec!(997))
        .and_then(|in_fee| {
            let num = in_fee.checked_mul(reserve_out)?;
            let den = reserve_in.checked_mul(dec!(1000))?.checked_add(in_fee)?;
            num.checked_div(den)
        })
        .unwrap_or(Decimal::ZERO);
    out.round_dp_with_strategy(SETTLE_DP, RoundingStrategy::ToZero)
}

fn key(address: &str) -> String {
    address.to_lowercase()
}

#[derive(Debug, Clone)]
struct Pool {
    token_reserve: Decimal,
    base_reserve: Decimal,
}

impl Pool {
    fn price(&self) -> Decimal {
        if self.token_reserve.is_zero() {
            return Decimal::ZERO;
        }
        self.base_reserve
            .checked_div(self.token_reserve)
            .unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Default)]
struct PaperState {
    pools: HashMap<String, Pool>,
    native: HashMap<String, Decimal>,
    /// (token, owner) → balance
    tokens: HashMap<(String, String), Decimal>,
    /// (token, owner) → router allowance
    allowances: HashMap<(String, String), Decimal>,
    nonce: u64,
}

impl PaperState {
    fn next_ref(&mut self) -> String {
        self.nonce += 1;
        format!("0x{:064x}", self.nonce)
    }

    fn native_of(&self, addr: &str) -> Decimal {
        self.native.get(addr).copied().unwrap_or(Decimal::ZERO)
    }

    fn token_of(&self, token: &str, addr: &str) -> Decimal {
        self.tokens
            .get(&(token.to_string(), addr.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

pub struct PaperVenue {
    base_token: String,
    state: Mutex<PaperState>,
}

impl PaperVenue {
    pub fn new(base_token: &str) -> Self {
        Self {
            base_token: key(base_token),
            state: Mutex::new(PaperState::default()),
        }
    }

    /// Seed pools and the operator wallet from configuration.
    ///
    /// Every token with both an address and a price gets a pool holding
    /// `pool_base_reserve` of base asset at that price.
    pub fn from_config(chain: &ChainConfig, paper: &PaperConfig) -> Self {
        let mut state = PaperState::default();
        let wallet = key(&chain.wallet_address);

        for (symbol, token) in &chain.tokens {
            let addr = key(&token.address);
            match paper.prices.get(symbol) {
                Some(price) if *price > Decimal::ZERO => {
                    let token_reserve = paper
                        .pool_base_reserve
                        .checked_div(*price)
                        .unwrap_or(Decimal::ZERO);
                    state.pools.insert(
                        addr.clone(),
                        Pool {
                            token_reserve,
                            base_reserve: paper.pool_base_reserve,
                        },
                    );
                }
                _ => warn!(symbol = %symbol, "No paper price configured, token has no pool"),
            }
            if let Some(qty) = paper.holdings.get(symbol) {
                state.tokens.insert((addr, wallet.clone()), *qty);
            }
        }
        state.native.insert(wallet, paper.wallet_balance);

        debug!(pools = state.pools.len(), "Paper venue seeded");
        Self {
            base_token: key(&chain.base_token_address),
            state: Mutex::new(state),
        }
    }

    /// Add (or replace) a pool for `token`.
    pub async fn add_pool(&self, token: &str, token_reserve: Decimal, base_reserve: Decimal) {
        self.state.lock().await.pools.insert(
            key(token),
            Pool {
                token_reserve,
                base_reserve,
            },
        );
    }

    /// Re-price a pool by resizing its token side, keeping base depth.
    pub async fn set_price(&self, token: &str, price: Decimal) {
        let mut st = self.state.lock().await;
        if let Some(pool) = st.pools.get_mut(&key(token)) {
            if price > Decimal::ZERO {
                pool.token_reserve = pool.base_reserve.checked_div(price).unwrap_or(pool.token_reserve);
            }
        }
    }

    pub async fn fund_native(&self, address: &str, amount: Decimal) {
        *self.state.lock().await.native.entry(key(address)).or_default() += amount;
    }

    pub async fn fund_token(&self, token: &str, address: &str, amount: Decimal) {
        *self
            .state
            .lock()
            .await
            .tokens
            .entry((key(token), key(address)))
            .or_default() += amount;
    }

    /// Shared settlement for both swap entry points.
    async fn settle(&self, req: &SwapRequest) -> TxHandle {
        let mut st = self.state.lock().await;
        let reference = st.next_ref();

        if Utc::now() > req.deadline {
            return TxHandle::reverted(reference, "UniswapV2Router: EXPIRED");
        }

        let token_in = key(&req.token_in);
        let token_out = key(&req.token_out);
        let sender = key(&req.sender);
        let recipient = key(&req.recipient);
        let buying = token_in == self.base_token;

        let pool_token = if buying {
            token_out.clone()
        } else if token_out == self.base_token {
            token_in.clone()
        } else {
            return TxHandle::reverted(reference, "PaperVenue: only base pairs are routed");
        };

        let Some(pool) = st.pools.get(&pool_token).cloned() else {
            return TxHandle::reverted(reference, "UniswapV2Library: INSUFFICIENT_LIQUIDITY");
        };

        let (reserve_in, reserve_out) = if buying {
            (pool.base_reserve, pool.token_reserve)
        } else {
            (pool.token_reserve, pool.base_reserve)
        };
        let amount_out = get_amount_out(req.amount_in, reserve_in, reserve_out);
        if amount_out.is_zero() || amount_out < req.amount_out_min {
            return TxHandle::reverted(reference, "UniswapV2Router: INSUFFICIENT_OUTPUT_AMOUNT");
        }

        // Debit the sender.
        if buying {
            let balance = st.native_of(&sender);
            if balance < req.amount_in {
                return TxHandle::reverted(reference, "TransferHelper: insufficient native balance");
            }
            st.native.insert(sender.clone(), balance - req.amount_in);
        } else {
            let balance = st.token_of(&token_in, &sender);
            let allowance_key = (token_in.clone(), sender.clone());
            let allowance = st.allowances.get(&allowance_key).copied().unwrap_or(Decimal::ZERO);
            if balance < req.amount_in || allowance < req.amount_in {
                return TxHandle::reverted(reference, "TransferHelper: TRANSFER_FROM_FAILED");
            }
            st.tokens.insert((token_in.clone(), sender.clone()), balance - req.amount_in);
            st.allowances.insert(allowance_key, allowance - req.amount_in);
        }

        // Move the pool.
        if let Some(p) = st.pools.get_mut(&pool_token) {
            if buying {
                p.base_reserve += req.amount_in;
                p.token_reserve -= amount_out;
            } else {
                p.token_reserve += req.amount_in;
                p.base_reserve -= amount_out;
            }
        }

        // Credit the recipient.
        if buying {
            *st.tokens.entry((token_out, recipient)).or_default() += amount_out;
        } else {
            *st.native.entry(recipient).or_default() += amount_out;
        }

        debug!(
            tx = %reference,
            amount_in = %req.amount_in,
            amount_out = %amount_out,
            "Paper swap settled"
        );
        TxHandle::success(reference, amount_out)
    }
}

#[async_trait]
impl Venue for PaperVenue {
    async fn swap_exact_native_for_tokens(&self, req: &SwapRequest) -> Result<TxHandle> {
        if key(&req.token_in) != self.base_token {
            anyhow::bail!("Native swap path must start with the wrapped base token");
        }
        Ok(self.settle(req).await)
    }

    async fn swap_exact_tokens_for_tokens(&self, req: &SwapRequest) -> Result<TxHandle> {
        Ok(self.settle(req).await)
    }

    async fn quote(&self, token_in: &str, token_out: &str, amount_in: Decimal) -> Result<Decimal> {
        let st = self.state.lock().await;
        let (token_in, token_out) = (key(token_in), key(token_out));
        if token_in == self.base_token {
            let pool = st
                .pools
                .get(&token_out)
                .ok_or_else(|| anyhow::anyhow!("No pool for {token_out}"))?;
            Ok(get_amount_out(amount_in, pool.base_reserve, pool.token_reserve))
        } else if token_out == self.base_token {
            let pool = st
                .pools
                .get(&token_in)
                .ok_or_else(|| anyhow::anyhow!("No pool for {token_in}"))?;
            Ok(get_amount_out(amount_in, pool.token_reserve, pool.base_reserve))
        } else {
            anyhow::bail!("Only base pairs are routed")
        }
    }

    async fn pool_price(&self, token: &str) -> Result<Decimal> {
        let st = self.state.lock().await;
        st.pools
            .get(&key(token))
            .map(Pool::price)
            .ok_or_else(|| anyhow::anyhow!("No pool for {token}"))
    }

    async fn allowance(&self, token: &str, owner: &str) -> Result<Decimal> {
        let st = self.state.lock().await;
        Ok(st
            .allowances
            .get(&(key(token), key(owner)))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn approve(&self, token: &str, owner: &str, amount: Decimal) -> Result<TxHandle> {
        let mut st = self.state.lock().await;
        let reference = st.next_ref();
        st.allowances.insert((key(token), key(owner)), amount);
        Ok(TxHandle::success(reference, Decimal::ZERO))
    }

    async fn native_balance(&self, address: &str) -> Result<Decimal> {
        Ok(self.state.lock().await.native_of(&key(address)))
    }

    async fn token_balance(&self, token: &str, address: &str) -> Result<Decimal> {
        Ok(self.state.lock().await.token_of(&key(token), &key(address)))
    }

    async fn transfer_native(&self, from: &str, to: &str, amount: Decimal) -> Result<TxHandle> {
        let mut st = self.state.lock().await;
        let reference = st.next_ref();
        let (from, to) = (key(from), key(to));
        let balance = st.native_of(&from);
        if balance < amount {
            return Ok(TxHandle::reverted(reference, "insufficient native balance"));
        }
        st.native.insert(from, balance - amount);
        *st.native.entry(to).or_default() += amount;
        Ok(TxHandle::success(reference, amount))
    }

    async fn transfer_token(&self, token: &str, from: &str, to: &str, amount: Decimal) -> Result<TxHandle> {
        let mut st = self.state.lock().await;
        let reference = st.next_ref();
        let (token, from, to) = (key(token), key(from), key(to));
        let balance = st.token_of(&token, &from);
        if balance < amount {
            return Ok(TxHandle::reverted(reference, "ERC20: transfer amount exceeds balance"));
        }
        st.tokens.insert((token.clone(), from), balance - amount);
        *st.tokens.entry((token, to)).or_default() += amount;
        Ok(TxHandle::success(reference, amount))
    }

    fn name(&self) -> &str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const BASE: &str = "0xBASE";
    const TOKEN: &str = "0xToken";
    const WALLET: &str = "0xWallet";

    async fn venue() -> PaperVenue {
        let v = PaperVenue::new(BASE);
        // 1000 base / 200 token → price 5
        v.add_pool(TOKEN, dec!(200), dec!(1000)).await;
        v.fund_native(WALLET, dec!(10)).await;
        v
    }

    fn buy(amount_in: Decimal, min_out: Decimal) -> SwapRequest {
        SwapRequest {
            token_in: BASE.to_string(),
            token_out: TOKEN.to_string(),
            amount_in,
            amount_out_min: min_out,
            sender: WALLET.to_string(),
            recipient: "0xAgent".to_string(),
            deadline: Utc::now() + Duration::minutes(20),
        }
    }

    #[test]
    fn test_get_amount_out() {
        // 10 in against 100/100: 9970 * 100 / (100000 + 9970)
        let out = get_amount_out(dec!(10), dec!(100), dec!(100));
        assert!((out - dec!(9.0661089388)).abs() < dec!(0.0000001));
        assert_eq!(get_amount_out(Decimal::ZERO, dec!(1), dec!(1)), Decimal::ZERO);
        assert_eq!(get_amount_out(dec!(1), Decimal::ZERO, dec!(1)), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_price_and_quote() {
        let v = venue().await;
        assert_eq!(v.pool_price(TOKEN).await.unwrap(), dec!(5));
        // Addresses are case-insensitive.
        assert_eq!(v.pool_price("0xtoken").await.unwrap(), dec!(5));
        let q = v.quote(BASE, TOKEN, dec!(1)).await.unwrap();
        assert!(q < dec!(0.2) && q > dec!(0.199));
        assert!(v.pool_price("0xnone").await.is_err());
    }

    #[tokio::test]
    async fn test_native_buy_moves_balances_and_price() {
        let v = venue().await;
        let tx = v.swap_exact_native_for_tokens(&buy(dec!(1), Decimal::ZERO)).await.unwrap();
        assert!(tx.succeeded);
        assert_eq!(v.native_balance(WALLET).await.unwrap(), dec!(9));
        assert_eq!(v.token_balance(TOKEN, "0xagent").await.unwrap(), tx.amount_out);
        assert!(v.pool_price(TOKEN).await.unwrap() > dec!(5));
    }

    #[tokio::test]
    async fn test_expired_deadline_reverts() {
        let v = venue().await;
        let mut req = buy(dec!(1), Decimal::ZERO);
        req.deadline = Utc::now() - Duration::seconds(1);
        let tx = v.swap_exact_native_for_tokens(&req).await.unwrap();
        assert!(!tx.succeeded);
        assert!(tx.revert_reason.unwrap().contains("EXPIRED"));
        assert_eq!(v.native_balance(WALLET).await.unwrap(), dec!(10));
    }

    #[tokio::test]
    async fn test_min_output_reverts() {
        let v = venue().await;
        let tx = v.swap_exact_native_for_tokens(&buy(dec!(1), dec!(0.2))).await.unwrap();
        assert!(!tx.succeeded);
        assert!(tx.revert_reason.unwrap().contains("INSUFFICIENT_OUTPUT_AMOUNT"));
    }

    #[tokio::test]
    async fn test_insufficient_native_reverts() {
        let v = venue().await;
        let tx = v.swap_exact_native_for_tokens(&buy(dec!(50), Decimal::ZERO)).await.unwrap();
        assert!(!tx.succeeded);
    }

    #[tokio::test]
    async fn test_sell_requires_allowance() {
        let v = venue().await;
        v.fund_token(TOKEN, WALLET, dec!(10)).await;
        let req = SwapRequest {
            token_in: TOKEN.to_string(),
            token_out: BASE.to_string(),
            amount_in: dec!(1),
            amount_out_min: Decimal::ZERO,
            sender: WALLET.to_string(),
            recipient: "0xAgent".to_string(),
            deadline: Utc::now() + Duration::minutes(20),
        };
        let tx = v.swap_exact_tokens_for_tokens(&req).await.unwrap();
        assert!(!tx.succeeded);

        v.approve(TOKEN, WALLET, dec!(1)).await.unwrap();
        let tx = v.swap_exact_tokens_for_tokens(&req).await.unwrap();
        assert!(tx.succeeded);
        assert_eq!(v.allowance(TOKEN, WALLET).await.unwrap(), Decimal::ZERO);
        assert_eq!(v.native_balance("0xagent").await.unwrap(), tx.amount_out);
        assert_eq!(v.token_balance(TOKEN, WALLET).await.unwrap(), dec!(9));
    }

    #[tokio::test]
    async fn test_native_path_must_start_at_base() {
        let v = venue().await;
        let mut req = buy(dec!(1), Decimal::ZERO);
        req.token_in = TOKEN.to_string();
        assert!(v.swap_exact_native_for_tokens(&req).await.is_err());
    }

    #[tokio::test]
    async fn test_transfers() {
        let v = venue().await;
        let tx = v.transfer_native(WALLET, "0xTreasury", dec!(4)).await.unwrap();
        assert!(tx.succeeded);
        assert_eq!(v.native_balance("0xtreasury").await.unwrap(), dec!(4));
        let tx = v.transfer_token(TOKEN, WALLET, "0xTreasury", dec!(1)).await.unwrap();
        assert!(!tx.succeeded);
    }

    #[tokio::test]
    async fn test_set_price() {
        let v = venue().await;
        v.set_price(TOKEN, dec!(2.5)).await;
        assert_eq!(v.pool_price(TOKEN).await.unwrap(), dec!(2.5));
    }

    #[tokio::test]
    async fn test_from_config() {
        let mut chain = ChainConfig::default();
        chain.tokens.insert(
            "ETH".to_string(),
            crate::config::TokenConfig {
                address: "0xEth".to_string(),
                decimals: 18,
            },
        );
        let mut paper = PaperConfig::default();
        paper.prices.insert("ETH".to_string(), dec!(5));
        paper.holdings.insert("ETH".to_string(), dec!(2));
        let v = PaperVenue::from_config(&chain, &paper);
        assert_eq!(v.pool_price("0xeth").await.unwrap(), dec!(5));
        assert_eq!(v.native_balance(&chain.wallet_address).await.unwrap(), dec!(10));
        assert_eq!(v.token_balance("0xEth", &chain.wallet_address).await.unwrap(), dec!(2));
    }
}
