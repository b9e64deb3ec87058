use crate::hints::RelayHint;
use crate::types::Stage;
use ethers::types::{Address, H256};
use std::fmt;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of [`Error`], for callers that branch on the failure
/// type without caring about the attached context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedNumericInput,
    UnsupportedChain,
    ResolutionFailed,
    NonceUnavailable,
    PaymasterUnavailable,
    SigningKeyUnavailable,
    SigningFailed,
    DigestComputationFailed,
    EndpointUnavailable,
    RelayRejected,
    ConfirmationTimeout,
    ExecutionReverted,
    DeploymentFailed,
    InvalidTransition,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed numeric input {input:?}: {reason}")]
    MalformedNumericInput { input: String, reason: String },

    #[error("unsupported chain id {chain_id}")]
    UnsupportedChain { chain_id: u64 },

    #[error("failed to resolve smart account of {owner:?} on {network} (chainId {chain_id})")]
    ResolutionFailed {
        network: String,
        chain_id: u64,
        owner: Address,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to fetch EntryPoint nonce of {sender:?} on {network} (chainId {chain_id})")]
    NonceUnavailable {
        network: String,
        chain_id: u64,
        sender: Address,
        #[source]
        source: anyhow::Error,
    },

    #[error("paymaster sponsorship unavailable on {network} (chainId {chain_id})")]
    PaymasterUnavailable {
        network: String,
        chain_id: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("no signing key loaded; connect a wallet first")]
    SigningKeyUnavailable,

    #[error("failed to sign user operation digest {digest:?}")]
    SigningFailed {
        digest: H256,
        #[source]
        source: ethers::signers::WalletError,
    },

    #[error("cannot compute user operation digest: field {field} is invalid: {reason}")]
    DigestComputationFailed { field: &'static str, reason: String },

    #[error("cannot reach {network} endpoints")]
    EndpointUnavailable {
        network: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    RelayRejected(Box<RelayRejection>),

    #[error(
        "outcome unknown: no receipt for user operation {user_op_hash:?} on {network} after {attempts} polls"
    )]
    ConfirmationTimeout {
        network: String,
        chain_id: u64,
        user_op_hash: H256,
        attempts: u32,
        last_poll_error: Option<String>,
    },

    #[error("user operation {user_op_hash:?} was included on {network} but reverted{}", reason_suffix(.reason))]
    ExecutionReverted {
        network: String,
        chain_id: u64,
        user_op_hash: H256,
        transaction_hash: Option<H256>,
        reason: Option<String>,
    },

    #[error("smart account deployment on {network} failed after {attempts} attempts")]
    DeploymentFailed {
        network: String,
        chain_id: u64,
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("invalid operation state transition {from:?} -> {to:?}")]
    InvalidTransition { from: Stage, to: Stage },
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedNumericInput { .. } => ErrorKind::MalformedNumericInput,
            Error::UnsupportedChain { .. } => ErrorKind::UnsupportedChain,
            Error::ResolutionFailed { .. } => ErrorKind::ResolutionFailed,
            Error::NonceUnavailable { .. } => ErrorKind::NonceUnavailable,
            Error::PaymasterUnavailable { .. } => ErrorKind::PaymasterUnavailable,
            Error::SigningKeyUnavailable => ErrorKind::SigningKeyUnavailable,
            Error::SigningFailed { .. } => ErrorKind::SigningFailed,
            Error::DigestComputationFailed { .. } => ErrorKind::DigestComputationFailed,
            Error::EndpointUnavailable { .. } => ErrorKind::EndpointUnavailable,
            Error::RelayRejected(_) => ErrorKind::RelayRejected,
            Error::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
            Error::ExecutionReverted { .. } => ErrorKind::ExecutionReverted,
            Error::DeploymentFailed { .. } => ErrorKind::DeploymentFailed,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
        }
    }

    /// True when the operation may still land on-chain later.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, Error::ConfirmationTimeout { .. })
    }

    /// The relay rejection behind this error, looking through a failed deployment.
    pub fn relay_rejection(&self) -> Option<&RelayRejection> {
        match self {
            Error::RelayRejected(rejection) => Some(rejection),
            Error::DeploymentFailed { last, .. } => last.relay_rejection(),
            _ => None,
        }
    }
}

/// Everything the relay told us when it refused an operation.
#[derive(Debug, Clone)]
pub struct RelayRejection {
    pub network: String,
    pub chain_id: u64,
    pub entry_point: Address,
    /// HTTP status, when the relay answered at all.
    pub http_status: Option<u16>,
    /// JSON-RPC error code, when present.
    pub code: Option<i64>,
    /// Best-effort unwrapped message.
    pub message: String,
    /// Untouched response body or transport error text.
    pub raw: String,
    pub hint: RelayHint,
    /// The operation as it was sent.
    pub user_op: serde_json::Value,
}

impl fmt::Display for RelayRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relay rejected user operation on {} (chainId {}): {}",
            self.network, self.chain_id, self.message
        )?;
        if self.hint != RelayHint::Unknown {
            write!(f, " [{}]", self.hint.title())?;
        }
        Ok(())
    }
}

impl std::error::Error for RelayRejection {}
