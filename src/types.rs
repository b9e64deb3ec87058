use ethers::types::{Address, Bytes, H256, U256, U64};

/// ERC-4337 UserOperation (EntryPoint v0.6 layout).
///
/// Built fresh for every request by the assembler; `signature` stays empty until
/// the operation goes through [`crate::signer::sign_user_operation`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    pub fn is_deploying(&self) -> bool {
        !self.init_code.is_empty()
    }

    pub fn is_sponsored(&self) -> bool {
        !self.paymaster_and_data.is_empty()
    }
}

/// Stages a submitted operation moves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Building,
    Signed,
    Submitted,
    Confirmed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Confirmed | Stage::Failed)
    }

    pub fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Building, Stage::Signed)
                | (Stage::Building, Stage::Failed)
                | (Stage::Signed, Stage::Submitted)
                | (Stage::Signed, Stage::Failed)
                | (Stage::Submitted, Stage::Confirmed)
                | (Stage::Submitted, Stage::Failed)
        )
    }
}

/// Inclusion result for a submitted operation.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationReceipt {
    pub success: bool,
    pub transaction_hash: Option<H256>,
    pub block_number: Option<U64>,
    /// Revert reason reported by the relay, if any.
    pub reason: Option<String>,
    pub raw: serde_json::Value,
}

/// A confirmed, successful operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Confirmation {
    pub network: String,
    pub chain_id: u64,
    pub user_op_hash: H256,
    pub transaction_hash: Option<H256>,
    pub block_number: Option<U64>,
    pub polls: u32,
}
