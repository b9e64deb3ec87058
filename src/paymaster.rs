use crate::bundler::decode_envelope;
use crate::encoding::{decode_canonical_hex, fmt_address, fmt_u256};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use serde_json::{json, Map, Value};
use std::time::Duration;

const GET_PAYMASTER_DATA: &str = "pm_getPaymasterData";

/// Source of `paymasterAndData` for sponsored operations.
#[async_trait]
pub trait Sponsor: Send + Sync {
    async fn sponsor(&self, user_op: Value, entry_point: Address, chain_id: u64) -> Result<Bytes>;
}

/// ERC-7677 paymaster service (Alchemy Gas Manager or compatible).
#[derive(Debug, Clone)]
pub struct PaymasterClient {
    url: String,
    policy_id: String,
    webhook_data: Option<String>,
    http: reqwest::Client,
}

impl PaymasterClient {
    pub fn new(
        url: String,
        policy_id: String,
        webhook_data: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build paymaster http client")?;
        Ok(Self {
            url,
            policy_id,
            webhook_data,
            http,
        })
    }

    fn context(&self) -> Value {
        let mut ctx = Map::new();
        ctx.insert("policyId".into(), Value::String(self.policy_id.clone()));
        if let Some(wd) = &self.webhook_data {
            ctx.insert("webhookData".into(), Value::String(wd.clone()));
        }
        Value::Object(ctx)
    }
}

#[async_trait]
impl Sponsor for PaymasterClient {
    async fn sponsor(&self, user_op: Value, entry_point: Address, chain_id: u64) -> Result<Bytes> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": GET_PAYMASTER_DATA,
            "params": [
                user_op,
                fmt_address(entry_point),
                fmt_u256(U256::from(chain_id)),
                self.context(),
            ],
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{GET_PAYMASTER_DATA} request failed"))?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .with_context(|| format!("{GET_PAYMASTER_DATA} response unreadable"))?;

        let result = decode_envelope(GET_PAYMASTER_DATA, status, &text)?;
        let data = paymaster_and_data(&result)?;
        tracing::debug!(chain_id, len = data.len(), "paymaster sponsored operation");
        Ok(data)
    }
}

/// The v0.6 `paymasterAndData` from a `pm_getPaymasterData` result. ERC-7677
/// puts it at the top level; Alchemy also nests it per EntryPoint version.
fn paymaster_and_data(result: &Value) -> Result<Bytes> {
    let nested = ["entrypointV06Response", "entryPointV06Response"]
        .iter()
        .find_map(|k| result.get(*k));
    let Some(hex) = result
        .get("paymasterAndData")
        .or_else(|| nested.and_then(|v| v.get("paymasterAndData")))
        .and_then(Value::as_str)
    else {
        bail!("paymaster result has no v0.6 paymasterAndData: {result}");
    };

    let bytes = decode_canonical_hex(hex)
        .with_context(|| format!("paymasterAndData is not hex: {hex}"))?;
    if bytes.len() < 20 {
        bail!(
            "paymasterAndData is {} bytes; it must start with the paymaster address",
            bytes.len()
        );
    }
    Ok(Bytes::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sponsored() -> Bytes {
        let mut v = vec![0x42; 20];
        v.extend_from_slice(&[0x01, 0x02, 0x03]);
        Bytes::from(v)
    }

    fn sponsored_hex() -> String {
        format!("0x{}", hex::encode(sponsored()))
    }

    #[test]
    fn reads_top_level_field() {
        let res = json!({ "paymasterAndData": sponsored_hex(), "sponsor": { "name": "x" } });
        assert_eq!(paymaster_and_data(&res).unwrap(), sponsored());
    }

    #[test]
    fn reads_alchemy_nested_field() {
        for key in ["entrypointV06Response", "entryPointV06Response"] {
            let res = json!({ key: { "paymasterAndData": sponsored_hex() } });
            assert_eq!(paymaster_and_data(&res).unwrap(), sponsored());
        }
    }

    #[test]
    fn rejects_v07_only_and_short_data() {
        let v07 = json!({ "entrypointV07Response": { "paymaster": "0x42" } });
        assert!(paymaster_and_data(&v07).is_err());
        let short = json!({ "paymasterAndData": "0x4242" });
        assert!(paymaster_and_data(&short).is_err());
        let bad = json!({ "paymasterAndData": "0xnothex" });
        assert!(paymaster_and_data(&bad).is_err());
    }

    #[test]
    fn context_carries_policy_and_webhook() {
        let client = PaymasterClient::new(
            "http://localhost".into(),
            "pol-1".into(),
            Some("hook".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.context(), json!({ "policyId": "pol-1", "webhookData": "hook" }));

        let client = PaymasterClient::new(
            "http://localhost".into(),
            "pol-2".into(),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.context(), json!({ "policyId": "pol-2" }));
    }
}
