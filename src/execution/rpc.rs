//! Minimal JSON-RPC probe for an EVM endpoint.
//!
//! Used at startup to verify connectivity (`eth_chainId`) and by the
//! operator surface to read the treasury balance (`eth_getBalance`).

use anyhow::{Context, Result};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// Native asset decimals on EVM chains.
const NATIVE_DECIMALS: u32 = 18;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

pub struct RpcProbe {
    http: Client,
    url: String,
}

impl RpcProbe {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build RPC HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<String> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp: RpcResponse = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("RPC request {method} failed"))?
            .error_for_status()
            .with_context(|| format!("RPC endpoint rejected {method}"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {method} response"))?;

        if let Some(err) = resp.error {
            anyhow::bail!("RPC error {} on {method}: {}", err.code, err.message);
        }
        resp.result
            .ok_or_else(|| anyhow::anyhow!("RPC {method} returned no result"))
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let hex = self.call("eth_chainId", json!([])).await?;
        let id = parse_hex_u128(&hex)?;
        u64::try_from(id).context("Chain id out of range")
    }

    /// Native balance of `address`, in whole units.
    pub async fn get_balance(&self, address: &str) -> Result<Decimal> {
        let hex = self.call("eth_getBalance", json!([address, "latest"])).await?;
        wei_to_decimal(parse_hex_u128(&hex)?)
    }

    /// Fails unless the endpoint answers `eth_chainId`.
    pub async fn verify(&self) -> Result<u64> {
        let chain_id = self
            .chain_id()
            .await
            .with_context(|| format!("RPC endpoint unreachable: {}", self.url))?;
        info!(chain_id, url = %self.url, "RPC endpoint connected");
        Ok(chain_id)
    }
}

pub fn parse_hex_u128(hex: &str) -> Result<u128> {
    let digits = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).with_context(|| format!("Invalid hex quantity: {hex}"))
}

pub fn wei_to_decimal(wei: u128) -> Result<Decimal> {
    let wei = i128::try_from(wei).context("Balance out of range")?;
    Decimal::try_from_i128_with_scale(wei, NATIVE_DECIMALS)
        .map(|d| d.normalize())
        .context("Balance exceeds decimal precision")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex_u128("0x38").unwrap(), 56);
        assert_eq!(parse_hex_u128("0x").unwrap(), 0);
        assert_eq!(parse_hex_u128("ff").unwrap(), 255);
        assert!(parse_hex_u128("0xzz").is_err());
    }

    #[test]
    fn test_wei_to_decimal() {
        assert_eq!(wei_to_decimal(1_500_000_000_000_000_000).unwrap(), dec!(1.5));
        assert_eq!(wei_to_decimal(0).unwrap(), Decimal::ZERO);
        assert_eq!(wei_to_decimal(1).unwrap(), dec!(0.000000000000000001));
    }

    #[test]
    fn test_response_shapes() {
        let ok: RpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0x38"}"#).unwrap();
        assert_eq!(ok.result.as_deref(), Some("0x38"));
        let err: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#).unwrap();
        assert_eq!(err.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_error() {
        let probe = RpcProbe::new("http://127.0.0.1:1").unwrap();
        assert!(probe.verify().await.is_err());
    }
}
