use crate::chain::ReceiptSource;
use crate::encoding::{fmt_address, fmt_h256, parse_h256, parse_u256_quantity};
use crate::types::OperationReceipt;
use async_trait::async_trait;
use ethers::types::{Address, H256, U256, U64};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Why a JSON-RPC call to the bundler did not produce a result.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{method} request failed: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method}: HTTP {status}: {body}")]
    Http {
        method: String,
        status: u16,
        body: String,
    },

    #[error("{method}: RPC error: {error}")]
    Rpc {
        method: String,
        http_status: u16,
        error: Value,
        body: String,
    },

    #[error("{method}: malformed response: {reason}")]
    Malformed { method: String, reason: String },
}

impl RpcError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            RpcError::Http { status, .. } => Some(*status),
            RpcError::Rpc { http_status, .. } => Some(*http_status),
            RpcError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            RpcError::Malformed { .. } => None,
        }
    }

    /// JSON-RPC `error.code`, if the relay sent one.
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Rpc { error, .. } => error.get("code").and_then(|c| c.as_i64()),
            _ => None,
        }
    }

    /// The relay's own words: response body for HTTP/RPC failures, the
    /// transport error otherwise.
    pub fn raw(&self) -> String {
        match self {
            RpcError::Http { body, .. } | RpcError::Rpc { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

/// Submits signed operations.
#[async_trait]
pub trait Relay: Send + Sync {
    /// `eth_sendUserOperation`; returns the handle used for confirmation polling.
    async fn send_user_operation(&self, user_op: Value, entry_point: Address)
        -> Result<H256, RpcError>;
}

/// Finds the bundle transaction that included a user operation.
#[async_trait]
pub trait TransactionLookup: Send + Sync {
    /// `Ok(None)` while the operation is still in the mempool.
    async fn transaction_hash(&self, user_op_hash: H256) -> anyhow::Result<Option<H256>>;
}

#[derive(Debug, Clone)]
pub struct BundlerClient {
    url: String,
    http: reqwest::Client,
}

impl BundlerClient {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url, http })
    }

    pub async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<OperationReceipt>, RpcError> {
        let params = serde_json::json!([fmt_h256(user_op_hash)]);
        let res = self.rpc("eth_getUserOperationReceipt", params).await?;
        parse_user_op_receipt(&res).map_err(|reason| RpcError::Malformed {
            method: "eth_getUserOperationReceipt".to_string(),
            reason,
        })
    }

    /// `eth_getUserOperationByHash`; the transaction hash is absent until the
    /// operation lands in a bundle.
    pub async fn get_user_operation_by_hash(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<H256>, RpcError> {
        let params = serde_json::json!([fmt_h256(user_op_hash)]);
        let res = self.rpc("eth_getUserOperationByHash", params).await?;
        parse_bundle_transaction(&res).map_err(|reason| RpcError::Malformed {
            method: "eth_getUserOperationByHash".to_string(),
            reason,
        })
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let transport = |source| RpcError::Transport {
            method: method.to_string(),
            source,
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(transport)?;
        decode_envelope(method, status, &body)
    }
}

#[async_trait]
impl Relay for BundlerClient {
    async fn send_user_operation(
        &self,
        user_op: Value,
        entry_point: Address,
    ) -> Result<H256, RpcError> {
        let params = serde_json::json!([user_op, fmt_address(entry_point)]);
        let res = self.rpc("eth_sendUserOperation", params).await?;
        parse_userop_hash(&res).map_err(|reason| RpcError::Malformed {
            method: "eth_sendUserOperation".to_string(),
            reason,
        })
    }
}

#[async_trait]
impl ReceiptSource for BundlerClient {
    async fn receipt(&self, hash: H256) -> anyhow::Result<Option<OperationReceipt>> {
        Ok(self.get_user_operation_receipt(hash).await?)
    }
}

#[async_trait]
impl TransactionLookup for BundlerClient {
    async fn transaction_hash(&self, user_op_hash: H256) -> anyhow::Result<Option<H256>> {
        Ok(self.get_user_operation_by_hash(user_op_hash).await?)
    }
}

/// Split a JSON-RPC response into its result or a typed failure, keeping the
/// body text for diagnostics.
pub(crate) fn decode_envelope(method: &str, status: u16, body: &str) -> Result<Value, RpcError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if !(200..300).contains(&status) {
        // Some relays answer 4xx/5xx with a proper JSON-RPC error inside.
        if let Some(err) = parsed.as_ref().and_then(|v| v.get("error")) {
            return Err(RpcError::Rpc {
                method: method.to_string(),
                http_status: status,
                error: err.clone(),
                body: body.to_string(),
            });
        }
        return Err(RpcError::Http {
            method: method.to_string(),
            status,
            body: body.to_string(),
        });
    }

    let parsed = parsed.ok_or_else(|| RpcError::Malformed {
        method: method.to_string(),
        reason: format!("response is not JSON: {body}"),
    })?;

    if let Some(err) = parsed.get("error").filter(|e| !e.is_null()) {
        return Err(RpcError::Rpc {
            method: method.to_string(),
            http_status: status,
            error: err.clone(),
            body: body.to_string(),
        });
    }

    parsed
        .get("result")
        .cloned()
        .ok_or_else(|| RpcError::Malformed {
            method: method.to_string(),
            reason: "missing result field".to_string(),
        })
}

fn parse_userop_hash(res: &Value) -> Result<H256, String> {
    // Bundlers disagree on the shape: a bare hash string, or an object with the
    // hash under one of several keys.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = ["hash", "result", "userOpHash", "userOperationHash"]
        .iter()
        .find_map(|k| res.get(*k).and_then(|v| v.as_str()))
    {
        s
    } else {
        return Err(format!(
            "unexpected eth_sendUserOperation result shape (expected string or {{hash: ...}}): {res}"
        ));
    };

    parse_h256(hash_str).map_err(|e| format!("invalid user operation hash {hash_str}: {e}"))
}

fn parse_bundle_transaction(res: &Value) -> Result<Option<H256>, String> {
    match res.get("transactionHash") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(h)) => parse_h256(h)
            .map(Some)
            .map_err(|e| format!("invalid transactionHash {h}: {e}")),
        Some(other) => Err(format!("unexpected transactionHash: {other}")),
    }
}

fn parse_user_op_receipt(res: &Value) -> Result<Option<OperationReceipt>, String> {
    if res.is_null() {
        return Ok(None);
    }

    let inner = res.get("receipt");
    let status_ok = inner
        .and_then(|r| r.get("status"))
        .and_then(|s| s.as_str())
        .map(|s| parse_u256_quantity(s).map(|v| v == U256::one()).unwrap_or(false));
    let success = match res.get("success").and_then(|s| s.as_bool()) {
        Some(flag) => flag,
        None => status_ok.ok_or_else(|| format!("receipt has neither success nor status: {res}"))?,
    };

    let transaction_hash = inner
        .and_then(|r| r.get("transactionHash"))
        .and_then(|h| h.as_str())
        .map(parse_h256)
        .transpose()
        .map_err(|e| format!("invalid transactionHash: {e}"))?;
    let block_number = inner
        .and_then(|r| r.get("blockNumber"))
        .and_then(|b| b.as_str())
        .map(|b| parse_u256_quantity(b).map(|v| U64::from(v.low_u64())))
        .transpose()
        .map_err(|e| format!("invalid blockNumber: {e}"))?;
    let reason = res
        .get("reason")
        .and_then(|r| r.as_str())
        .filter(|r| !r.is_empty() && *r != "0x")
        .map(str::to_string);

    Ok(Some(OperationReceipt {
        success,
        transaction_hash,
        block_number,
        reason,
        raw: res.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::parse_h256;
    use serde_json::json;

    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
    const TX: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

    #[test]
    fn parse_userop_hash_from_string() {
        let res = json!(HASH);
        assert_eq!(parse_userop_hash(&res).unwrap(), parse_h256(HASH).unwrap());
    }

    #[test]
    fn parse_userop_hash_from_hash_object() {
        let res = json!({ "hash": HASH });
        assert_eq!(parse_userop_hash(&res).unwrap(), parse_h256(HASH).unwrap());
    }

    #[test]
    fn parse_userop_hash_from_wrapped_objects() {
        for key in ["result", "userOpHash", "userOperationHash"] {
            let res = json!({ key: HASH });
            assert_eq!(parse_userop_hash(&res).unwrap(), parse_h256(HASH).unwrap());
        }
    }

    #[test]
    fn parse_userop_hash_rejects_unknown_shape() {
        assert!(parse_userop_hash(&json!({ "foo": "bar" })).is_err());
        assert!(parse_userop_hash(&json!("0x1234")).is_err());
    }

    #[test]
    fn envelope_result() {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "result": HASH }).to_string();
        assert_eq!(decode_envelope("m", 200, &body).unwrap(), json!(HASH));
    }

    #[test]
    fn envelope_rpc_error_keeps_body() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32500,"message":"insufficient funds for gas"}}"#;
        let err = decode_envelope("eth_sendUserOperation", 200, body).unwrap_err();
        assert_eq!(err.code(), Some(-32500));
        assert_eq!(err.http_status(), Some(200));
        assert_eq!(err.raw(), body);
    }

    #[test]
    fn envelope_http_error() {
        let err = decode_envelope("m", 502, "Bad Gateway").unwrap_err();
        assert!(matches!(err, RpcError::Http { status: 502, .. }));
        assert_eq!(err.raw(), "Bad Gateway");

        let body = r#"{"error":{"message":"Unauthorized"}}"#;
        let err = decode_envelope("m", 401, body).unwrap_err();
        assert!(matches!(err, RpcError::Rpc { http_status: 401, .. }));
    }

    #[test]
    fn envelope_missing_result() {
        let err = decode_envelope("m", 200, r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert!(matches!(err, RpcError::Malformed { .. }));
        let err = decode_envelope("m", 200, "not json").unwrap_err();
        assert!(matches!(err, RpcError::Malformed { .. }));
    }

    #[test]
    fn bundle_transaction_from_lookup() {
        assert_eq!(parse_bundle_transaction(&Value::Null).unwrap(), None);
        assert_eq!(
            parse_bundle_transaction(&json!({ "userOperation": {}, "transactionHash": null }))
                .unwrap(),
            None
        );
        let res = json!({
            "userOperation": { "sender": "0x00" },
            "entryPoint": "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789",
            "transactionHash": TX,
            "blockNumber": "0x10",
        });
        assert_eq!(
            parse_bundle_transaction(&res).unwrap(),
            Some(parse_h256(TX).unwrap())
        );
        assert!(parse_bundle_transaction(&json!({ "transactionHash": "0x12" })).is_err());
    }

    #[test]
    fn receipt_pending() {
        assert_eq!(parse_user_op_receipt(&Value::Null).unwrap(), None);
    }

    #[test]
    fn receipt_success_flag() {
        let res = json!({
            "userOpHash": HASH,
            "success": true,
            "reason": "",
            "receipt": { "transactionHash": TX, "blockNumber": "0x10", "status": "0x1" }
        });
        let r = parse_user_op_receipt(&res).unwrap().unwrap();
        assert!(r.success);
        assert_eq!(r.transaction_hash, Some(parse_h256(TX).unwrap()));
        assert_eq!(r.block_number, Some(U64::from(16u64)));
        assert_eq!(r.reason, None);
    }

    #[test]
    fn receipt_reverted_with_reason() {
        let res = json!({
            "success": false,
            "reason": "ERC20: transfer amount exceeds balance",
            "receipt": { "transactionHash": TX, "status": "0x1" }
        });
        let r = parse_user_op_receipt(&res).unwrap().unwrap();
        assert!(!r.success);
        assert_eq!(r.reason.as_deref(), Some("ERC20: transfer amount exceeds balance"));
    }

    #[test]
    fn receipt_falls_back_to_status() {
        let res = json!({ "receipt": { "transactionHash": TX, "status": "0x0" } });
        assert!(!parse_user_op_receipt(&res).unwrap().unwrap().success);
        assert!(parse_user_op_receipt(&json!({ "foo": 1 })).is_err());
    }
}
