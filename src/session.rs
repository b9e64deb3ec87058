use crate::error::{Error, Result};
use anyhow::Context;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

/// The connected owner key and the smart account it controls.
#[derive(Debug, Clone)]
pub struct WalletIdentity {
    signer: LocalWallet,
    smart_account: Address,
    chain_id: u64,
}

impl WalletIdentity {
    pub fn new(signer: LocalWallet, smart_account: Address, chain_id: u64) -> Self {
        Self {
            signer: signer.with_chain_id(chain_id),
            smart_account,
            chain_id,
        }
    }

    pub fn owner(&self) -> Address {
        self.signer.address()
    }

    pub fn signer(&self) -> &LocalWallet {
        &self.signer
    }

    /// Counterfactual account address, as resolved when the wallet connected.
    pub fn smart_account(&self) -> Address {
        self.smart_account
    }

    /// Chain the smart account was resolved on.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

pub fn wallet_from_private_key(private_key: &str) -> anyhow::Result<LocalWallet> {
    LocalWallet::from_str(private_key.trim()).context("invalid owner private key")
}

/// Process-wide holder of the connected wallet.
///
/// Single writer: `connect` and `disconnect` are the only mutations. Pipelines
/// read an `Arc` snapshot per operation, so a disconnect mid-flight does not
/// affect an operation that already started signing.
#[derive(Debug, Default)]
pub struct Session {
    identity: RwLock<Option<Arc<WalletIdentity>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, identity: WalletIdentity) -> Arc<WalletIdentity> {
        let identity = Arc::new(identity);
        let mut slot = self.identity.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(identity.clone());
        tracing::info!(
            owner = ?identity.owner(),
            smart_account = ?identity.smart_account(),
            chain_id = identity.chain_id(),
            "wallet connected"
        );
        identity
    }

    /// Clears the identity. Returns whether a wallet was connected.
    pub fn disconnect(&self) -> bool {
        let mut slot = self.identity.write().unwrap_or_else(PoisonError::into_inner);
        let was_connected = slot.take().is_some();
        if was_connected {
            tracing::info!("wallet disconnected");
        }
        was_connected
    }

    pub fn identity(&self) -> Result<Arc<WalletIdentity>> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::SigningKeyUnavailable)
    }

    pub fn is_connected(&self) -> bool {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
