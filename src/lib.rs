//! ERC-4337 (EntryPoint v0.6) smart wallet operations for SimpleAccount
//! wallets: counterfactual addresses, UserOperation assembly and signing,
//! bundler submission and confirmation tracking.

pub mod account;
pub mod assembler;
pub mod bundler;
pub mod calls;
pub mod chain;
pub mod config;
pub mod connector;
pub mod encoding;
pub mod error;
pub mod hints;
pub mod paymaster;
pub mod pipeline;
pub mod session;
pub mod signer;
pub mod types;

#[cfg(test)]
mod testing;

pub use assembler::{AssembleRequest, Assembler, GasPolicy};
pub use calls::CallIntent;
pub use config::{NetworkDescriptor, NetworkTable, ENTRY_POINT_V06, SIMPLE_ACCOUNT_FACTORY_V06};
pub use connector::{ChainReceipts, ConfirmVia, Connector, HttpConnector};
pub use encoding::NumericInput;
pub use error::{Error, ErrorKind, RelayRejection, Result};
pub use hints::RelayHint;
pub use pipeline::{
    AccountStatus, DeploymentOutcome, Lifecycle, Pipeline, RetryPolicy, Submitted,
    TrackedOperation,
};
pub use session::{Session, WalletIdentity};
pub use signer::SignedUserOperation;
pub use types::{Confirmation, OperationReceipt, Stage, UserOperation};
