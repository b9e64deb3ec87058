use crate::account;
use crate::chain::ChainClient;
use crate::config::NetworkTable;
use crate::encoding;
use crate::error::{Error, Result};
use crate::paymaster::Sponsor;
use crate::types::UserOperation;
use ethers::types::{Address, Bytes, U256};

const GWEI: u64 = 1_000_000_000;

/// Gas fields applied to every assembled operation.
///
/// Fixed conservative values instead of live estimation; callers can swap in
/// their own numbers per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            call_gas_limit: U256::from(500_000u64),
            verification_gas_limit: U256::from(500_000u64),
            pre_verification_gas: U256::from(50_000u64),
            max_fee_per_gas: U256::from(5 * GWEI),
            max_priority_fee_per_gas: U256::from(5 * GWEI),
        }
    }
}

impl GasPolicy {
    /// Budgets for the deploy-only operation (empty call data).
    pub fn deployment() -> Self {
        Self {
            verification_gas_limit: U256::from(400_000u64),
            pre_verification_gas: U256::from(50_000u64),
            ..Self::default()
        }
    }

    pub fn with_fees(mut self, max_fee_per_gas: U256, max_priority_fee_per_gas: U256) -> Self {
        self.max_fee_per_gas = max_fee_per_gas;
        self.max_priority_fee_per_gas = max_priority_fee_per_gas;
        self
    }
}

/// Inputs for one operation.
#[derive(Debug, Clone)]
pub struct AssembleRequest {
    pub sender: Address,
    pub owner: Address,
    pub chain_id: u64,
    pub call_data: Bytes,
    pub is_deployed: bool,
    /// Ask the configured sponsor to pay for gas.
    pub sponsored: bool,
}

/// Builds unsigned operations. Reads the nonce (and, for sponsored requests,
/// the paymaster data); never submits anything.
pub struct Assembler<'a> {
    networks: &'a NetworkTable,
    chain: &'a dyn ChainClient,
    sponsor: Option<&'a dyn Sponsor>,
    gas: GasPolicy,
}

impl<'a> Assembler<'a> {
    pub fn new(networks: &'a NetworkTable, chain: &'a dyn ChainClient, gas: GasPolicy) -> Self {
        Self {
            networks,
            chain,
            sponsor: None,
            gas,
        }
    }

    pub fn with_sponsor(mut self, sponsor: Option<&'a dyn Sponsor>) -> Self {
        self.sponsor = sponsor;
        self
    }

    pub async fn assemble(&self, req: &AssembleRequest) -> Result<UserOperation> {
        let network = self.networks.get(req.chain_id)?;

        let init_code = if req.is_deployed {
            Bytes::new()
        } else {
            account::build_init_code(self.networks, req.owner, req.chain_id)?
        };

        let nonce = self
            .chain
            .entry_point_nonce(network.entry_point, req.sender)
            .await
            .map_err(|source| Error::NonceUnavailable {
                network: network.name.clone(),
                chain_id: req.chain_id,
                sender: req.sender,
                source,
            })?;

        let mut op = UserOperation {
            sender: req.sender,
            nonce,
            init_code,
            call_data: req.call_data.clone(),
            call_gas_limit: self.gas.call_gas_limit,
            verification_gas_limit: self.gas.verification_gas_limit,
            pre_verification_gas: self.gas.pre_verification_gas,
            max_fee_per_gas: self.gas.max_fee_per_gas,
            max_priority_fee_per_gas: self.gas.max_priority_fee_per_gas,
            paymaster_and_data: Bytes::new(),
            signature: Bytes::new(),
        };

        match (req.sponsored, self.sponsor) {
            (true, Some(sponsor)) => {
                // Paymasters simulate validation, so hand them a signature-shaped placeholder.
                let mut draft = op.clone();
                draft.signature = Bytes::from(vec![0u8; 65]);
                op.paymaster_and_data = sponsor
                    .sponsor(
                        encoding::user_op_to_json(&draft),
                        network.entry_point,
                        req.chain_id,
                    )
                    .await
                    .map_err(|source| Error::PaymasterUnavailable {
                        network: network.name.clone(),
                        chain_id: req.chain_id,
                        source,
                    })?;
            }
            (true, None) => {
                tracing::warn!(
                    chain_id = req.chain_id,
                    "gas sponsorship requested but no paymaster is configured; operation is self-funded"
                );
            }
            (false, _) => {}
        }

        tracing::info!(
            chain_id = req.chain_id,
            sender = ?op.sender,
            nonce = %op.nonce,
            deploying = op.is_deploying(),
            sponsored = op.is_sponsored(),
            "assembled user operation"
        );
        Ok(op)
    }
}
