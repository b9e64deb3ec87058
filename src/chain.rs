//! Read-only contract access: factory address lookups, deployment status,
//! EntryPoint nonces and transaction receipts.

use crate::types::OperationReceipt;
use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::abi::AbiParser;
use ethers::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `factory.getAddress(owner, salt)`: the CREATE2 address the factory
    /// would deploy, whether or not it exists yet.
    async fn counterfactual_address(
        &self,
        factory: Address,
        owner: Address,
        salt: U256,
    ) -> Result<Address>;

    async fn is_deployed(&self, account: Address) -> Result<bool>;

    /// `entryPoint.getNonce(sender, 0)`.
    async fn entry_point_nonce(&self, entry_point: Address, sender: Address) -> Result<U256>;
}

/// Where inclusion of a submitted operation is looked up.
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    /// `Ok(None)` while the operation is not included yet.
    async fn receipt(&self, hash: H256) -> Result<Option<OperationReceipt>>;
}

/// [`ChainClient`] over any ethers middleware.
#[derive(Debug, Clone)]
pub struct EthersChain<M> {
    client: Arc<M>,
}

impl<M: Middleware + 'static> EthersChain<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

impl EthersChain<Provider<Http>> {
    /// HTTP provider whose requests give up after `timeout`.
    pub fn connect(rpc_url: &str, timeout: Duration) -> Result<Self> {
        let url = reqwest::Url::parse(rpc_url).context("invalid rpc url")?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        let provider = Provider::new(Http::new_with_client(url, http))
            .interval(Duration::from_millis(350));
        Ok(Self::new(Arc::new(provider)))
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainClient for EthersChain<M> {
    async fn counterfactual_address(
        &self,
        factory: Address,
        owner: Address,
        salt: U256,
    ) -> Result<Address> {
        let factory_abi = AbiParser::default()
            .parse(&["function getAddress(address owner, uint256 salt) view returns (address)"])?;
        let factory = Contract::new(factory, factory_abi, self.client.clone());

        let account: Address = factory
            .method("getAddress", (owner, salt))?
            .call()
            .await
            .context("factory.getAddress failed")?;
        Ok(account)
    }

    async fn is_deployed(&self, account: Address) -> Result<bool> {
        let code = self
            .client
            .get_code(account, None)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("eth_getCode failed")?;
        Ok(!code.as_ref().is_empty())
    }

    async fn entry_point_nonce(&self, entry_point: Address, sender: Address) -> Result<U256> {
        let entrypoint_abi = AbiParser::default()
            .parse(&["function getNonce(address sender, uint192 key) view returns (uint256)"])?;
        let entrypoint_c = Contract::new(entry_point, entrypoint_abi, self.client.clone());

        let nonce: U256 = entrypoint_c
            .method("getNonce", (sender, U256::zero()))?
            .call()
            .await
            .context("entryPoint.getNonce failed")?;
        Ok(nonce)
    }
}

#[async_trait]
impl<M: Middleware + 'static> ReceiptSource for EthersChain<M> {
    async fn receipt(&self, hash: H256) -> Result<Option<OperationReceipt>> {
        let receipt = self
            .client
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("eth_getTransactionReceipt failed")?;

        Ok(receipt.map(|r| OperationReceipt {
            success: r.status.map(|s| s.as_u64() == 1).unwrap_or(false),
            transaction_hash: Some(r.transaction_hash),
            block_number: r.block_number,
            reason: None,
            raw: serde_json::to_value(&r).unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::{encode, Token};

    fn mocked() -> (EthersChain<Provider<MockProvider>>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        (EthersChain::new(Arc::new(provider)), mock)
    }

    #[tokio::test]
    async fn reads_factory_address() {
        let (chain, mock) = mocked();
        let account = Address::repeat_byte(0x5a);
        let ret = Bytes::from(encode(&[Token::Address(account)]));
        mock.push::<Bytes, _>(ret).unwrap();

        let got = chain
            .counterfactual_address(Address::repeat_byte(1), Address::repeat_byte(2), U256::zero())
            .await
            .unwrap();
        assert_eq!(got, account);
    }

    #[tokio::test]
    async fn empty_code_means_not_deployed() {
        let (chain, mock) = mocked();
        mock.push::<Bytes, _>(Bytes::new()).unwrap();
        assert!(!chain.is_deployed(Address::repeat_byte(3)).await.unwrap());

        mock.push::<Bytes, _>(Bytes::from(vec![0x60, 0x80])).unwrap();
        assert!(chain.is_deployed(Address::repeat_byte(3)).await.unwrap());
    }

    #[tokio::test]
    async fn reads_entry_point_nonce() {
        let (chain, mock) = mocked();
        let ret = Bytes::from(encode(&[Token::Uint(U256::from(7u64))]));
        mock.push::<Bytes, _>(ret).unwrap();
        let nonce = chain
            .entry_point_nonce(Address::repeat_byte(4), Address::repeat_byte(5))
            .await
            .unwrap();
        assert_eq!(nonce, U256::from(7u64));
    }

    #[tokio::test]
    async fn missing_receipt_is_none() {
        let (chain, mock) = mocked();
        mock.push(serde_json::Value::Null).unwrap();
        assert!(chain.receipt(H256::repeat_byte(9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transport_errors_surface() {
        // nothing pushed: the mock provider errors out
        let (chain, _mock) = mocked();
        assert!(chain.is_deployed(Address::repeat_byte(3)).await.is_err());
    }
}
