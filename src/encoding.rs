//! Hex/quantity formatting shared by the signer, the relay payloads and the CLI.
//!
//! Wire format rules: integers are `0x`-prefixed lower-case hex without leading
//! zeros (`0x0` for zero), byte strings are `0x`-prefixed hex of their natural
//! length (`0x` when empty).

use crate::error::{Error, Result};
use crate::types::UserOperation;
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::Value;

/// A numeric value in one of the shapes callers hand us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumericInput {
    /// Absent optional field; canonicalizes to the empty byte string `0x`.
    Empty,
    /// Base-10 digits, no sign, no prefix.
    Decimal(String),
    /// Already `0x`-prefixed. Passed through untouched.
    Hex(String),
    Integer(U256),
}

impl NumericInput {
    /// Classify a user-supplied string. `0x...` is taken as hex, all-digit
    /// strings as decimal; anything else is rejected.
    pub fn parse(s: &str) -> Result<Self> {
        if s.starts_with("0x") {
            return Ok(Self::Hex(s.to_string()));
        }
        if s.is_empty() {
            return Err(malformed(s, "empty string"));
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed(s, "expected decimal digits or a 0x-prefixed hex string"));
        }
        Ok(Self::Decimal(s.to_string()))
    }

    /// Accepts `null`, non-negative JSON integers and strings.
    pub fn from_json(v: &Value) -> Result<Self> {
        match v {
            Value::Null => Ok(Self::Empty),
            Value::String(s) => Self::parse(s),
            Value::Number(n) => n
                .as_u64()
                .map(|n| Self::Integer(U256::from(n)))
                .ok_or_else(|| malformed(&n.to_string(), "expected a non-negative integer")),
            other => Err(malformed(&other.to_string(), "expected a number or a string")),
        }
    }

    pub fn canonicalize(&self) -> Result<String> {
        match self {
            Self::Empty => Ok("0x".to_string()),
            Self::Hex(s) => Ok(s.clone()),
            Self::Integer(v) => Ok(fmt_u256(*v)),
            Self::Decimal(s) => {
                let v = U256::from_dec_str(s).map_err(|e| malformed(s, &e.to_string()))?;
                Ok(fmt_u256(v))
            }
        }
    }
}

impl From<U256> for NumericInput {
    fn from(v: U256) -> Self {
        Self::Integer(v)
    }
}

impl From<u64> for NumericInput {
    fn from(v: u64) -> Self {
        Self::Integer(U256::from(v))
    }
}

impl<T: Into<NumericInput>> From<Option<T>> for NumericInput {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Empty)
    }
}

pub fn canonicalize(input: impl Into<NumericInput>) -> Result<String> {
    input.into().canonicalize()
}

/// Parse any accepted numeric shape into an integer.
pub fn parse_numeric(s: &str) -> Result<U256> {
    let canonical = NumericInput::parse(s)?.canonicalize()?;
    parse_u256_quantity(&canonical).map_err(|e| malformed(s, &e.to_string()))
}

fn malformed(input: &str, reason: &str) -> Error {
    Error::MalformedNumericInput {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

/// Decode canonical hex to bytes. Odd-length digit strings get one leading
/// zero nibble, so `0x3e8` decodes to `[0x03, 0xe8]` and `0x` to `[]`.
pub fn decode_canonical_hex(s: &str) -> std::result::Result<Vec<u8>, hex::FromHexError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}"))
    } else {
        hex::decode(digits)
    }
}

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

pub fn user_op_to_json(op: &UserOperation) -> Value {
    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
    })
}

/// Read an operation written by another tool. Numeric fields are required and
/// may be JSON integers, decimal strings or hex quantities; missing byte fields
/// are empty.
pub fn user_op_from_json(v: &Value) -> anyhow::Result<UserOperation> {
    use anyhow::{anyhow, Context};

    let quantity = |key: &str| -> anyhow::Result<U256> {
        let raw = match v.get(key) {
            None | Some(Value::Null) => anyhow::bail!("missing {key}"),
            Some(raw) => raw,
        };
        let canonical = NumericInput::from_json(raw)
            .and_then(|n| n.canonicalize())
            .with_context(|| format!("invalid {key}"))?;
        parse_u256_quantity(&canonical).with_context(|| format!("invalid {key}"))
    };
    let bytes = |key: &str| -> anyhow::Result<Bytes> {
        match v.get(key).and_then(|x| x.as_str()) {
            None => Ok(Bytes::new()),
            Some(s) => decode_canonical_hex(s)
                .map(Bytes::from)
                .with_context(|| format!("invalid hex in {key}")),
        }
    };

    let sender = v
        .get("sender")
        .and_then(|x| x.as_str())
        .ok_or_else(|| anyhow!("missing sender"))?;
    let sender: Address = sender
        .parse()
        .map_err(|e| anyhow!("invalid sender {sender}: {e}"))?;

    Ok(UserOperation {
        sender,
        nonce: quantity("nonce")?,
        init_code: bytes("initCode")?,
        call_data: bytes("callData")?,
        call_gas_limit: quantity("callGasLimit")?,
        verification_gas_limit: quantity("verificationGasLimit")?,
        pre_verification_gas: quantity("preVerificationGas")?,
        max_fee_per_gas: quantity("maxFeePerGas")?,
        max_priority_fee_per_gas: quantity("maxPriorityFeePerGas")?,
        paymaster_and_data: bytes("paymasterAndData")?,
        signature: bytes("signature")?,
    })
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    Ok(H256::from_slice(&bytes))
}
