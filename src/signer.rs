//! Operation digest and owner signature.
//!
//! The digest is Keccak-256 over `entryPoint || chainId || fields`, where every
//! part is the natural-length byte form of its canonical hex (no ABI padding).
//! The owner signs the raw 32-byte digest; no EIP-191 prefix is applied.

use crate::encoding::{self, decode_canonical_hex, NumericInput};
use crate::error::{Error, Result};
use crate::types::UserOperation;
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, RecoveryMessage, Signature, H256};
use ethers::utils::keccak256;
use serde_json::Value;

/// Wire keys in digest order.
const FIELDS: [&str; 10] = [
    "sender",
    "nonce",
    "initCode",
    "callData",
    "callGasLimit",
    "verificationGasLimit",
    "preVerificationGas",
    "maxFeePerGas",
    "maxPriorityFeePerGas",
    "paymasterAndData",
];

/// Bytes hashed into the operation digest.
pub fn pack_user_operation(
    op: &UserOperation,
    chain_id: u64,
    entry_point: Address,
) -> Result<Vec<u8>> {
    pack_wire(&encoding::user_op_to_json(op), chain_id, entry_point)
}

/// Quantity keys; these go through numeric canonicalization before packing.
const QUANTITY_FIELDS: [&str; 6] = [
    "nonce",
    "callGasLimit",
    "verificationGasLimit",
    "preVerificationGas",
    "maxFeePerGas",
    "maxPriorityFeePerGas",
];

/// Same as [`pack_user_operation`], over the wire JSON form. Quantities may be
/// JSON integers, decimal strings or hex; byte fields must already be
/// `0x`-prefixed hex, so a malformed value fails here rather than being
/// silently repaired.
pub fn pack_wire(wire: &Value, chain_id: u64, entry_point: Address) -> Result<Vec<u8>> {
    let chain_hex = encoding::canonicalize(chain_id)?;
    let mut out = entry_point.as_bytes().to_vec();
    out.extend(decode_field("chainId", &chain_hex)?);

    for field in FIELDS {
        let value = wire.get(field).unwrap_or(&Value::Null);
        let canonical = if QUANTITY_FIELDS.contains(&field) {
            NumericInput::from_json(value)
                .and_then(|n| n.canonicalize())
                .map_err(|e| Error::DigestComputationFailed {
                    field,
                    reason: e.to_string(),
                })?
        } else {
            match value {
                Value::Null => "0x".to_string(),
                Value::String(s) if s.starts_with("0x") => s.clone(),
                other => {
                    return Err(Error::DigestComputationFailed {
                        field,
                        reason: format!("{other} is not 0x-prefixed hex"),
                    })
                }
            }
        };
        out.extend(decode_field(field, &canonical)?);
    }
    Ok(out)
}

fn decode_field(field: &'static str, canonical: &str) -> Result<Vec<u8>> {
    decode_canonical_hex(canonical).map_err(|e| Error::DigestComputationFailed {
        field,
        reason: format!("{canonical:?}: {e}"),
    })
}

pub fn user_operation_digest(
    op: &UserOperation,
    chain_id: u64,
    entry_point: Address,
) -> Result<H256> {
    Ok(H256(keccak256(pack_user_operation(op, chain_id, entry_point)?)))
}

/// Sign `op` with the owner key. The returned operation carries a 65-byte
/// `r || s || v` signature with `v` in {27, 28}.
pub fn sign_user_operation(
    op: &UserOperation,
    chain_id: u64,
    entry_point: Address,
    wallet: &LocalWallet,
) -> Result<SignedUserOperation> {
    let digest = user_operation_digest(op, chain_id, entry_point)?;
    let signature = wallet
        .sign_hash(digest)
        .map_err(|source| Error::SigningFailed { digest, source })?;

    let mut signed = op.clone();
    signed.signature = Bytes::from(signature.to_vec());
    tracing::debug!(chain_id, digest = ?digest, "signed user operation");
    Ok(SignedUserOperation {
        op: signed,
        chain_id,
        entry_point,
        digest,
    })
}

/// An operation whose signature covers its current fields.
///
/// Fields are read-only; changing anything means assembling and signing again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUserOperation {
    op: UserOperation,
    chain_id: u64,
    entry_point: Address,
    digest: H256,
}

impl SignedUserOperation {
    pub fn op(&self) -> &UserOperation {
        &self.op
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub fn digest(&self) -> H256 {
        self.digest
    }

    pub fn signature(&self) -> &Bytes {
        &self.op.signature
    }

    /// Canonical-hex JSON, as sent to the relay.
    pub fn to_json(&self) -> Value {
        encoding::user_op_to_json(&self.op)
    }

    pub fn recover_signer(&self) -> anyhow::Result<Address> {
        let sig = Signature::try_from(self.op.signature.as_ref())?;
        Ok(sig.recover(RecoveryMessage::Hash(self.digest))?)
    }
}
