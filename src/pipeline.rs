//! Build → sign → submit → confirm, one operation at a time.
//!
//! Steps inside one operation are strictly sequential. Independent lookups
//! (address resolution across networks) run concurrently. Nothing here guards
//! against two concurrent sends from the same sender reusing a nonce; the relay
//! rejects the loser.

use crate::account;
use crate::assembler::{AssembleRequest, Assembler, GasPolicy};
use crate::bundler::{Relay, RpcError};
use crate::calls::CallIntent;
use crate::chain::{ChainClient, ReceiptSource};
use crate::config::{NetworkDescriptor, NetworkTable};
use crate::connector::Connector;
use crate::encoding::fmt_h256;
use crate::error::{Error, RelayRejection, Result};
use crate::hints::{self, RelayHint};
use crate::paymaster::Sponsor;
use crate::session::{Session, WalletIdentity};
use crate::signer::{self, SignedUserOperation};
use crate::types::{Confirmation, Stage};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

/// Waiting and retry budgets. Use [`RetryPolicy::immediate`] in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause after submission before the first receipt poll.
    pub confirmation_grace: Duration,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    /// Total deployment attempts, the first one included.
    pub deployment_attempts: u32,
    pub deployment_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            confirmation_grace: Duration::from_secs(5),
            poll_attempts: 10,
            poll_interval: Duration::from_secs(2),
            deployment_attempts: 3,
            deployment_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Same budgets, no waiting.
    pub fn immediate() -> Self {
        Self {
            confirmation_grace: Duration::ZERO,
            poll_interval: Duration::ZERO,
            deployment_backoff: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Stages visited by one operation, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    history: Vec<Stage>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            history: vec![Stage::Building],
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.history.last().copied().unwrap_or(Stage::Building)
    }

    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn advance(&mut self, next: Stage) -> Result<()> {
        let from = self.stage();
        if !from.can_advance_to(next) {
            return Err(Error::InvalidTransition { from, to: next });
        }
        tracing::debug!(?from, to = ?next, "operation stage");
        self.history.push(next);
        Ok(())
    }

    /// Move to `Failed` unless already terminal.
    fn fail(&mut self) {
        if !self.stage().is_terminal() {
            self.history.push(Stage::Failed);
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    lifecycle: Lifecycle,
    signed: Option<SignedUserOperation>,
    user_op_hash: Option<H256>,
}

/// Everything known about one submission once it reached a terminal stage.
#[derive(Debug)]
pub struct TrackedOperation {
    network: String,
    chain_id: u64,
    progress: Progress,
    outcome: Result<Confirmation>,
}

impl TrackedOperation {
    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn stage(&self) -> Stage {
        self.progress.lifecycle.stage()
    }

    pub fn history(&self) -> &[Stage] {
        self.progress.lifecycle.history()
    }

    pub fn signed(&self) -> Option<&SignedUserOperation> {
        self.progress.signed.as_ref()
    }

    /// Relay handle; present once the operation reached `Submitted`.
    pub fn user_op_hash(&self) -> Option<H256> {
        self.progress.user_op_hash
    }

    pub fn outcome(&self) -> &Result<Confirmation> {
        &self.outcome
    }

    pub fn into_result(self) -> Result<Confirmation> {
        self.outcome
    }
}

/// Where an owner's smart account lives on one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountStatus {
    pub network: String,
    pub chain_id: u64,
    pub owner: Address,
    pub account: Address,
    pub deployed: bool,
}

#[derive(Debug)]
pub enum DeploymentOutcome {
    AlreadyDeployed {
        account: Address,
    },
    Deployed {
        account: Address,
        confirmation: Confirmation,
        attempts: u32,
    },
}

/// A relay-accepted operation that has not been confirmed yet.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub signed: SignedUserOperation,
    pub user_op_hash: H256,
}

struct Clients {
    chain: Arc<dyn ChainClient>,
    relay: Arc<dyn Relay>,
    receipts: Arc<dyn ReceiptSource>,
}

pub struct Pipeline {
    networks: Arc<NetworkTable>,
    connector: Arc<dyn Connector>,
    sponsor: Option<Arc<dyn Sponsor>>,
    gas: GasPolicy,
    deployment_gas: GasPolicy,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(networks: Arc<NetworkTable>, connector: Arc<dyn Connector>) -> Self {
        Self {
            networks,
            connector,
            sponsor: None,
            gas: GasPolicy::default(),
            deployment_gas: GasPolicy::deployment(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_sponsor(mut self, sponsor: Arc<dyn Sponsor>) -> Self {
        self.sponsor = Some(sponsor);
        self
    }

    pub fn with_gas_policy(mut self, gas: GasPolicy) -> Self {
        self.gas = gas;
        self
    }

    pub fn with_deployment_gas_policy(mut self, gas: GasPolicy) -> Self {
        self.deployment_gas = gas;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn networks(&self) -> &NetworkTable {
        &self.networks
    }

    fn clients(&self, network: &NetworkDescriptor) -> Result<Clients> {
        let unavailable = |source| Error::EndpointUnavailable {
            network: network.name.clone(),
            source,
        };
        Ok(Clients {
            chain: self.connector.chain(network).map_err(unavailable)?,
            relay: self.connector.relay(network).map_err(unavailable)?,
            receipts: self.connector.receipts(network).map_err(unavailable)?,
        })
    }

    fn chain_client(&self, network: &NetworkDescriptor) -> Result<Arc<dyn ChainClient>> {
        self.connector
            .chain(network)
            .map_err(|source| Error::EndpointUnavailable {
                network: network.name.clone(),
                source,
            })
    }

    /// Resolve the owner's account on `chain_id` and make it the session's wallet.
    pub async fn connect(
        &self,
        session: &Session,
        signer: LocalWallet,
        chain_id: u64,
    ) -> Result<Arc<WalletIdentity>> {
        let account = self.resolve_address(signer.address(), chain_id).await?;
        Ok(session.connect(WalletIdentity::new(signer, account, chain_id)))
    }

    pub async fn resolve_address(&self, owner: Address, chain_id: u64) -> Result<Address> {
        let network = self.networks.get(chain_id)?;
        let chain = self.chain_client(network)?;
        account::resolve_address(&self.networks, chain.as_ref(), owner, chain_id).await
    }

    pub async fn account_status(&self, owner: Address, chain_id: u64) -> Result<AccountStatus> {
        let network = self.networks.get(chain_id)?;
        let chain = self.chain_client(network)?;
        let account =
            account::resolve_address(&self.networks, chain.as_ref(), owner, chain_id).await?;
        let deployed =
            account::is_deployed(&self.networks, chain.as_ref(), owner, account, chain_id).await?;
        Ok(AccountStatus {
            network: network.name.clone(),
            chain_id,
            owner,
            account,
            deployed,
        })
    }

    /// [`Pipeline::account_status`] on every configured network at once.
    /// One network failing does not affect the others.
    pub async fn resolve_everywhere(&self, owner: Address) -> Vec<(u64, Result<AccountStatus>)> {
        let lookups = self.networks.iter().map(|network| async move {
            (network.chain_id, self.account_status(owner, network.chain_id).await)
        });
        join_all(lookups).await
    }

    /// Send `intent` from the session's smart account and wait for inclusion.
    pub async fn submit(
        &self,
        session: &Session,
        chain_id: u64,
        intent: &CallIntent,
        sponsored: bool,
    ) -> Result<Confirmation> {
        self.submit_tracked(session, chain_id, intent, sponsored)
            .await
            .into_result()
    }

    pub async fn submit_tracked(
        &self,
        session: &Session,
        chain_id: u64,
        intent: &CallIntent,
        sponsored: bool,
    ) -> TrackedOperation {
        let identity = session.identity();
        self.track(identity, chain_id, intent.encode(), sponsored, self.gas)
            .await
    }

    /// Build, sign and hand to the relay without waiting for inclusion.
    pub async fn submit_only(
        &self,
        session: &Session,
        chain_id: u64,
        intent: &CallIntent,
        sponsored: bool,
    ) -> Result<Submitted> {
        let identity = session.identity()?;
        let network = self.networks.get(chain_id)?;
        let clients = self.clients(network)?;
        let signed = self
            .build_and_sign(&identity, network, &clients, intent.encode(), sponsored, self.gas)
            .await?;
        let user_op_hash = self.send(network, clients.relay.as_ref(), &signed).await?;
        Ok(Submitted {
            signed,
            user_op_hash,
        })
    }

    /// Poll for the receipt of an already submitted operation.
    pub async fn confirm(&self, chain_id: u64, user_op_hash: H256) -> Result<Confirmation> {
        let network = self.networks.get(chain_id)?;
        let receipts = self
            .connector
            .receipts(network)
            .map_err(|source| Error::EndpointUnavailable {
                network: network.name.clone(),
                source,
            })?;
        self.await_confirmation(network, receipts.as_ref(), user_op_hash)
            .await
    }

    /// Deploy the session's smart account with an operation that carries only
    /// `initCode`. Failures before the relay accepts an attempt are retried.
    pub async fn deploy(
        &self,
        session: &Session,
        chain_id: u64,
        sponsored: bool,
    ) -> Result<DeploymentOutcome> {
        let identity = session.identity()?;
        let status = self.account_status(identity.owner(), chain_id).await?;
        if status.deployed {
            tracing::info!(chain_id, account = ?status.account, "smart account already deployed");
            return Ok(DeploymentOutcome::AlreadyDeployed {
                account: status.account,
            });
        }

        let max_attempts = self.retry.deployment_attempts.max(1);
        let mut attempt = 1;
        loop {
            tracing::info!(chain_id, attempt, max_attempts, "deploying smart account");
            let tracked = self
                .track(
                    Ok(identity.clone()),
                    chain_id,
                    Bytes::new(),
                    sponsored,
                    self.deployment_gas,
                )
                .await;
            let submitted = tracked.user_op_hash().is_some();
            match tracked.into_result() {
                Ok(confirmation) => {
                    return Ok(DeploymentOutcome::Deployed {
                        account: status.account,
                        confirmation,
                        attempts: attempt,
                    })
                }
                // Resubmitting after the relay accepted could deploy twice.
                Err(err) if submitted => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    return Err(Error::DeploymentFailed {
                        network: status.network,
                        chain_id,
                        attempts: attempt,
                        last: Box::new(err),
                    })
                }
                Err(err) => {
                    tracing::warn!(chain_id, attempt, error = %err, "deployment attempt failed; retrying");
                    tokio::time::sleep(self.retry.deployment_backoff).await;
                    // A failed attempt may still have landed the account.
                    match self.account_status(identity.owner(), chain_id).await {
                        Ok(now) if now.deployed => {
                            tracing::info!(chain_id, account = ?now.account, attempt, "smart account appeared before retry");
                            return Ok(DeploymentOutcome::AlreadyDeployed {
                                account: now.account,
                            });
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(chain_id, error = %e, "deployment status re-check failed")
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn track(
        &self,
        identity: Result<Arc<WalletIdentity>>,
        chain_id: u64,
        call_data: Bytes,
        sponsored: bool,
        gas: GasPolicy,
    ) -> TrackedOperation {
        let mut progress = Progress::default();
        let outcome = self
            .drive(&mut progress, identity, chain_id, call_data, sponsored, gas)
            .await;
        if let Err(err) = &outcome {
            tracing::error!(
                chain_id,
                stage = ?progress.lifecycle.stage(),
                kind = ?err.kind(),
                error = %err,
                "user operation failed"
            );
            progress.lifecycle.fail();
        }
        TrackedOperation {
            network: self
                .networks
                .get(chain_id)
                .map(|n| n.name.clone())
                .unwrap_or_default(),
            chain_id,
            progress,
            outcome,
        }
    }

    async fn drive(
        &self,
        progress: &mut Progress,
        identity: Result<Arc<WalletIdentity>>,
        chain_id: u64,
        call_data: Bytes,
        sponsored: bool,
        gas: GasPolicy,
    ) -> Result<Confirmation> {
        let network = self.networks.get(chain_id)?;
        let identity = identity?;
        let clients = self.clients(network)?;

        let signed = self
            .build_and_sign(&identity, network, &clients, call_data, sponsored, gas)
            .await?;
        progress.lifecycle.advance(Stage::Signed)?;
        progress.signed = Some(signed.clone());

        let user_op_hash = self.send(network, clients.relay.as_ref(), &signed).await?;
        progress.lifecycle.advance(Stage::Submitted)?;
        progress.user_op_hash = Some(user_op_hash);

        let confirmation = self
            .await_confirmation(network, clients.receipts.as_ref(), user_op_hash)
            .await?;
        progress.lifecycle.advance(Stage::Confirmed)?;
        Ok(confirmation)
    }

    async fn build_and_sign(
        &self,
        identity: &WalletIdentity,
        network: &NetworkDescriptor,
        clients: &Clients,
        call_data: Bytes,
        sponsored: bool,
        gas: GasPolicy,
    ) -> Result<SignedUserOperation> {
        let owner = identity.owner();
        let chain = clients.chain.as_ref();
        let sender =
            account::resolve_address(&self.networks, chain, owner, network.chain_id).await?;
        let is_deployed =
            account::is_deployed(&self.networks, chain, owner, sender, network.chain_id).await?;

        let op = Assembler::new(&self.networks, chain, gas)
            .with_sponsor(self.sponsor.as_deref())
            .assemble(&AssembleRequest {
                sender,
                owner,
                chain_id: network.chain_id,
                call_data,
                is_deployed,
                sponsored,
            })
            .await?;

        signer::sign_user_operation(&op, network.chain_id, network.entry_point, identity.signer())
    }

    /// The only path to the relay; it takes a signed operation.
    async fn send(
        &self,
        network: &NetworkDescriptor,
        relay: &dyn Relay,
        signed: &SignedUserOperation,
    ) -> Result<H256> {
        let user_op = signed.to_json();
        match relay
            .send_user_operation(user_op.clone(), network.entry_point)
            .await
        {
            Ok(hash) => {
                tracing::info!(
                    chain_id = network.chain_id,
                    user_op_hash = %fmt_h256(hash),
                    "user operation submitted"
                );
                Ok(hash)
            }
            Err(err) => Err(Error::RelayRejected(Box::new(rejection(
                network, err, user_op,
            )))),
        }
    }

    async fn await_confirmation(
        &self,
        network: &NetworkDescriptor,
        receipts: &dyn ReceiptSource,
        user_op_hash: H256,
    ) -> Result<Confirmation> {
        tokio::time::sleep(self.retry.confirmation_grace).await;

        let mut last_poll_error = None;
        for attempt in 1..=self.retry.poll_attempts {
            match receipts.receipt(user_op_hash).await {
                Ok(Some(receipt)) if receipt.success => {
                    tracing::info!(
                        chain_id = network.chain_id,
                        user_op_hash = %fmt_h256(user_op_hash),
                        tx = ?receipt.transaction_hash,
                        polls = attempt,
                        "user operation confirmed"
                    );
                    return Ok(Confirmation {
                        network: network.name.clone(),
                        chain_id: network.chain_id,
                        user_op_hash,
                        transaction_hash: receipt.transaction_hash,
                        block_number: receipt.block_number,
                        polls: attempt,
                    });
                }
                Ok(Some(receipt)) => {
                    return Err(Error::ExecutionReverted {
                        network: network.name.clone(),
                        chain_id: network.chain_id,
                        user_op_hash,
                        transaction_hash: receipt.transaction_hash,
                        reason: receipt.reason,
                    });
                }
                Ok(None) => {
                    tracing::debug!(chain_id = network.chain_id, attempt, "receipt not available yet");
                }
                Err(e) => {
                    tracing::warn!(chain_id = network.chain_id, attempt, error = %e, "receipt poll failed");
                    last_poll_error = Some(format!("{e:#}"));
                }
            }
            if attempt < self.retry.poll_attempts {
                tokio::time::sleep(self.retry.poll_interval).await;
            }
        }

        Err(Error::ConfirmationTimeout {
            network: network.name.clone(),
            chain_id: network.chain_id,
            user_op_hash,
            attempts: self.retry.poll_attempts,
            last_poll_error,
        })
    }
}

fn rejection(
    network: &NetworkDescriptor,
    err: RpcError,
    user_op: serde_json::Value,
) -> RelayRejection {
    let message = match &err {
        RpcError::Rpc { error, .. } => hints::extract_error_message(error),
        RpcError::Http { body, .. } => hints::extract_message(body),
        other => other.to_string(),
    };
    let raw = err.raw();
    let hint = match hints::classify(&message) {
        RelayHint::Unknown => hints::classify(&raw),
        hint => hint,
    };
    tracing::warn!(
        chain_id = network.chain_id,
        hint = hint.title(),
        message = %message,
        "relay rejected user operation"
    );
    RelayRejection {
        network: network.name.clone(),
        chain_id: network.chain_id,
        entry_point: network.entry_point,
        http_status: err.http_status(),
        code: err.code(),
        message,
        raw,
        hint,
        user_op,
    }
}
