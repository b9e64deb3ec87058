use crate::bundler::{BundlerClient, Relay, TransactionLookup};
use crate::chain::{ChainClient, EthersChain, ReceiptSource};
use crate::config::NetworkDescriptor;
use crate::types::OperationReceipt;
use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;

/// Builds the per-network clients a pipeline talks to.
pub trait Connector: Send + Sync {
    fn chain(&self, network: &NetworkDescriptor) -> Result<Arc<dyn ChainClient>>;

    fn relay(&self, network: &NetworkDescriptor) -> Result<Arc<dyn Relay>>;

    fn receipts(&self, network: &NetworkDescriptor) -> Result<Arc<dyn ReceiptSource>>;
}

/// Where inclusion is checked after submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmVia {
    /// `eth_getUserOperationReceipt` on the bundler.
    #[default]
    Relay,
    /// Bundle transaction from `eth_getUserOperationByHash` on the bundler,
    /// then `eth_getTransactionReceipt` on the RPC node.
    Chain,
}

/// Receipts read from the chain for user-operation hashes.
///
/// The node only knows the bundle transaction, so its status says whether the
/// bundle landed, not whether this operation's call succeeded.
pub struct ChainReceipts {
    lookup: Arc<dyn TransactionLookup>,
    chain: Arc<dyn ReceiptSource>,
}

impl ChainReceipts {
    pub fn new(lookup: Arc<dyn TransactionLookup>, chain: Arc<dyn ReceiptSource>) -> Self {
        Self { lookup, chain }
    }
}

#[async_trait]
impl ReceiptSource for ChainReceipts {
    async fn receipt(&self, user_op_hash: H256) -> Result<Option<OperationReceipt>> {
        let Some(tx) = self.lookup.transaction_hash(user_op_hash).await? else {
            return Ok(None);
        };
        tracing::debug!(user_op_hash = ?user_op_hash, tx = ?tx, "operation bundled");
        self.chain.receipt(tx).await
    }
}

/// Connects over HTTP: ethers `Provider<Http>` for reads, JSON-RPC bundler
/// client for submission.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    timeout: Duration,
    confirm_via: ConfirmVia,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            confirm_via: ConfirmVia::default(),
        }
    }

    pub fn confirm_via(mut self, confirm_via: ConfirmVia) -> Self {
        self.confirm_via = confirm_via;
        self
    }

    fn bundler(&self, network: &NetworkDescriptor) -> Result<BundlerClient> {
        BundlerClient::new(network.bundler_url.clone(), self.timeout)
            .with_context(|| format!("bundler client for {}", network.name))
    }

    fn provider(&self, network: &NetworkDescriptor) -> Result<EthersChain<Provider<Http>>> {
        EthersChain::connect(&network.rpc_url, self.timeout)
            .with_context(|| format!("rpc provider for {}", network.name))
    }
}

impl Connector for HttpConnector {
    fn chain(&self, network: &NetworkDescriptor) -> Result<Arc<dyn ChainClient>> {
        Ok(Arc::new(self.provider(network)?))
    }

    fn relay(&self, network: &NetworkDescriptor) -> Result<Arc<dyn Relay>> {
        Ok(Arc::new(self.bundler(network)?))
    }

    fn receipts(&self, network: &NetworkDescriptor) -> Result<Arc<dyn ReceiptSource>> {
        match self.confirm_via {
            ConfirmVia::Relay => Ok(Arc::new(self.bundler(network)?)),
            ConfirmVia::Chain => Ok(Arc::new(ChainReceipts::new(
                Arc::new(self.bundler(network)?),
                Arc::new(self.provider(network)?),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkTable;
    use ethers::providers::MockProvider;
    use ethers::types::{TransactionReceipt, U64};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedLookup {
        answer: Option<H256>,
        asked: Mutex<Vec<H256>>,
    }

    #[async_trait]
    impl TransactionLookup for ScriptedLookup {
        async fn transaction_hash(&self, user_op_hash: H256) -> Result<Option<H256>> {
            self.asked.lock().unwrap().push(user_op_hash);
            Ok(self.answer)
        }
    }

    fn mocked_chain() -> (Arc<EthersChain<Provider<MockProvider>>>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        (Arc::new(EthersChain::new(Arc::new(provider))), mock)
    }

    #[tokio::test]
    async fn chain_receipts_follow_the_bundle_transaction() {
        let user_op_hash = H256::repeat_byte(0x11);
        let tx = H256::repeat_byte(0x22);
        let lookup = Arc::new(ScriptedLookup {
            answer: Some(tx),
            ..ScriptedLookup::default()
        });
        let (chain, mock) = mocked_chain();
        mock.push(TransactionReceipt {
            transaction_hash: tx,
            block_number: Some(U64::from(42u64)),
            status: Some(U64::from(1u64)),
            ..TransactionReceipt::default()
        })
        .unwrap();

        let receipts = ChainReceipts::new(lookup.clone(), chain);
        let receipt = receipts.receipt(user_op_hash).await.unwrap().unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.transaction_hash, Some(tx));
        assert_eq!(receipt.block_number, Some(U64::from(42u64)));
        assert_eq!(*lookup.asked.lock().unwrap(), vec![user_op_hash]);
    }

    #[tokio::test]
    async fn chain_receipts_pending_until_bundled() {
        let lookup = Arc::new(ScriptedLookup::default());
        // nothing pushed: touching the node would fail
        let (chain, _mock) = mocked_chain();
        let receipts = ChainReceipts::new(lookup, chain);
        assert!(receipts.receipt(H256::repeat_byte(0x11)).await.unwrap().is_none());
    }

    #[test]
    fn builds_clients_for_builtin_networks() {
        let networks = NetworkTable::builtin("k");
        let connector = HttpConnector::new(Duration::from_secs(5)).confirm_via(ConfirmVia::Chain);
        for network in networks.iter() {
            assert!(connector.chain(network).is_ok());
            assert!(connector.relay(network).is_ok());
            assert!(connector.receipts(network).is_ok());
        }
    }

    #[test]
    fn bad_rpc_url_is_an_error() {
        let mut network = NetworkTable::builtin("k").get(137).unwrap().clone();
        network.rpc_url = "not a url".to_string();
        let err = HttpConnector::new(Duration::from_secs(5))
            .chain(&network)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("polygon"));
    }
}
