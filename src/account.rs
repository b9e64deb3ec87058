//! Counterfactual smart account address and its deployment payload.
//!
//! One wallet per owner: the factory salt is always zero.

use crate::chain::ChainClient;
use crate::config::NetworkTable;
use crate::error::{Error, Result};
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;

pub const ACCOUNT_SALT: U256 = U256([0, 0, 0, 0]);

const CREATE_ACCOUNT: &str = "createAccount(address,uint256)";

/// Address the network's factory deploys (or deployed) for `owner`.
pub async fn resolve_address(
    networks: &NetworkTable,
    chain: &dyn ChainClient,
    owner: Address,
    chain_id: u64,
) -> Result<Address> {
    let network = networks.get(chain_id)?;
    let account = chain
        .counterfactual_address(network.factory, owner, ACCOUNT_SALT)
        .await
        .map_err(|source| Error::ResolutionFailed {
            network: network.name.clone(),
            chain_id,
            owner,
            source,
        })?;
    tracing::debug!(chain_id, ?owner, ?account, "resolved counterfactual account");
    Ok(account)
}

/// Deployment status of `account`; a failed read is a resolution failure.
pub async fn is_deployed(
    networks: &NetworkTable,
    chain: &dyn ChainClient,
    owner: Address,
    account: Address,
    chain_id: u64,
) -> Result<bool> {
    let network = networks.get(chain_id)?;
    chain
        .is_deployed(account)
        .await
        .map_err(|source| Error::ResolutionFailed {
            network: network.name.clone(),
            chain_id,
            owner,
            source,
        })
}

/// `factory || createAccount(owner, 0)` for the network of `chain_id`.
///
/// Always a real payload; whether it is used is the assembler's call.
pub fn build_init_code(networks: &NetworkTable, owner: Address, chain_id: u64) -> Result<Bytes> {
    let network = networks.get(chain_id)?;
    Ok(init_code_for(network.factory, owner))
}

fn init_code_for(factory: Address, owner: Address) -> Bytes {
    let args = encode(&[Token::Address(owner), Token::Uint(ACCOUNT_SALT)]);
    let mut v = Vec::with_capacity(20 + 4 + args.len());
    v.extend_from_slice(factory.as_bytes());
    v.extend_from_slice(&id(CREATE_ACCOUNT));
    v.extend_from_slice(&args);
    Bytes::from(v)
}
