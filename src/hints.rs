//! Human-readable hints for relay rejections.
//!
//! Bundlers report failures as free text, sometimes a JSON document serialized
//! into the `message` string. We dig out the innermost message and match a few
//! well-known substrings; the raw text is always kept next to the hint.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayHint {
    InsufficientFunds,
    InvalidSignature,
    NonceIssue,
    AccountNotDeployed,
    AccountAlreadyDeployed,
    PaymasterRejected,
    FeeTooLow,
    Unknown,
}

impl RelayHint {
    pub fn title(self) -> &'static str {
        match self {
            RelayHint::InsufficientFunds => "Insufficient Funds",
            RelayHint::InvalidSignature => "Invalid Signature",
            RelayHint::NonceIssue => "Nonce Issue",
            RelayHint::AccountNotDeployed => "Smart Account Not Deployed",
            RelayHint::AccountAlreadyDeployed => "Smart Account Already Deployed",
            RelayHint::PaymasterRejected => "Paymaster Rejected",
            RelayHint::FeeTooLow => "Fee Too Low",
            RelayHint::Unknown => "Relay Error",
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            RelayHint::InsufficientFunds => {
                "The smart account cannot pay for gas. Fund it with the native token or enable gas sponsorship."
            }
            RelayHint::InvalidSignature => {
                "The signature does not match the operation. Reconnect the owner key and sign again."
            }
            RelayHint::NonceIssue => {
                "The nonce is stale or already used. Wait for pending operations to land and retry."
            }
            RelayHint::AccountNotDeployed => {
                "The sender has no code and the operation carries no initCode. Deploy the smart account first."
            }
            RelayHint::AccountAlreadyDeployed => {
                "The operation tries to deploy an account that already exists. Retry without initCode."
            }
            RelayHint::PaymasterRejected => {
                "The paymaster refused to sponsor this operation. Check the sponsorship policy or pay gas yourself."
            }
            RelayHint::FeeTooLow => {
                "The gas fees or limits are below what the relay accepts. Raise maxFeePerGas or the gas limits."
            }
            RelayHint::Unknown => "See the relay message for details.",
        }
    }
}

/// Pick a hint for a relay error message. Case-insensitive; the first matching
/// rule wins, so "insufficient funds for gas" is a funds problem, not a fee one.
pub fn classify(message: &str) -> RelayHint {
    let m = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| m.contains(n));

    if any(&["insufficient funds", "insufficient balance", "aa21", "didn't pay prefund"]) {
        RelayHint::InsufficientFunds
    } else if any(&["sender is not a contract and initcode is empty", "aa20"]) {
        RelayHint::AccountNotDeployed
    } else if any(&["aa10", "sender already constructed"]) {
        RelayHint::AccountAlreadyDeployed
    } else if any(&["invalid signature", "signature error", "aa23", "aa24"]) {
        RelayHint::InvalidSignature
    } else if any(&["nonce", "aa25"]) {
        RelayHint::NonceIssue
    } else if any(&["paymaster", "aa3"]) {
        RelayHint::PaymasterRejected
    } else if any(&[
        "underpriced",
        "fee too low",
        "maxfeepergas",
        "maxpriorityfeepergas",
        "preverificationgas",
        "gas too low",
    ]) {
        RelayHint::FeeTooLow
    } else {
        RelayHint::Unknown
    }
}

/// Best-effort extraction of the innermost error message from a relay error
/// object or response body. Falls back to the input text.
pub fn extract_message(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => message_of(&v, 0).unwrap_or_else(|| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

/// Same as [`extract_message`] for an already-parsed JSON-RPC `error` value.
pub fn extract_error_message(error: &Value) -> String {
    message_of(error, 0).unwrap_or_else(|| error.to_string())
}

const MAX_DEPTH: usize = 4;

fn message_of(v: &Value, depth: usize) -> Option<String> {
    if depth > MAX_DEPTH {
        return None;
    }
    match v {
        Value::String(s) => {
            // Some relays put a whole JSON error document inside the string.
            let trimmed = s.trim();
            if trimmed.starts_with('{') {
                if let Ok(inner) = serde_json::from_str::<Value>(trimmed) {
                    if let Some(m) = message_of(&inner, depth + 1) {
                        return Some(m);
                    }
                }
            }
            Some(s.clone())
        }
        Value::Object(obj) => {
            if let Some(err) = obj.get("error") {
                if let Some(m) = message_of(err, depth + 1) {
                    return Some(m);
                }
            }
            if let Some(m) = obj.get("message").and_then(|m| message_of(m, depth + 1)) {
                return Some(m);
            }
            ["details", "reason", "data"]
                .iter()
                .filter_map(|k| obj.get(*k))
                .find_map(|d| match d {
                    Value::String(_) | Value::Object(_) => message_of(d, depth + 1),
                    _ => None,
                })
        }
        _ => None,
    }
}
