//! In-memory stand-ins for the network seams.

use crate::bundler::{Relay, RpcError};
use crate::chain::{ChainClient, ReceiptSource};
use crate::config::NetworkDescriptor;
use crate::connector::Connector;
use crate::paymaster::Sponsor;
use crate::types::OperationReceipt;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256, U64};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct FakeChain {
    account: Address,
    deployed: AtomicBool,
    deployed_after: Mutex<Option<u32>>,
    code_checks: AtomicU32,
    nonce: Mutex<U256>,
    resolution_error: Mutex<Option<String>>,
    nonce_error: Mutex<Option<String>>,
    factory_calls: Mutex<Vec<(Address, Address)>>,
}

impl FakeChain {
    /// Every owner resolves to `account`, which starts undeployed with nonce 0.
    pub fn new(account: Address) -> Self {
        Self {
            account,
            ..Self::default()
        }
    }

    pub fn with_nonce(self, nonce: u64) -> Self {
        *self.nonce.lock().unwrap() = U256::from(nonce);
        self
    }

    pub fn set_deployed(&self, deployed: bool) {
        self.deployed.store(deployed, Ordering::SeqCst);
    }

    /// The first `checks` code lookups see no account; later ones see it deployed.
    pub fn deployed_after(&self, checks: u32) {
        *self.deployed_after.lock().unwrap() = Some(checks);
    }

    pub fn fail_resolution(&self, msg: &str) {
        *self.resolution_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn fail_nonce(&self, msg: &str) {
        *self.nonce_error.lock().unwrap() = Some(msg.to_string());
    }

    /// `(factory, owner)` of every address lookup.
    pub fn factory_calls(&self) -> Vec<(Address, Address)> {
        self.factory_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn counterfactual_address(
        &self,
        factory: Address,
        owner: Address,
        _salt: U256,
    ) -> Result<Address> {
        if let Some(msg) = self.resolution_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        self.factory_calls.lock().unwrap().push((factory, owner));
        Ok(self.account)
    }

    async fn is_deployed(&self, _account: Address) -> Result<bool> {
        if let Some(msg) = self.resolution_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        let checks = self.code_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(after) = *self.deployed_after.lock().unwrap() {
            return Ok(checks >= after);
        }
        Ok(self.deployed.load(Ordering::SeqCst))
    }

    async fn entry_point_nonce(&self, _entry_point: Address, _sender: Address) -> Result<U256> {
        if let Some(msg) = self.nonce_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        Ok(*self.nonce.lock().unwrap())
    }
}

#[derive(Debug, Clone)]
pub enum RelayScript {
    Accept(H256),
    Reject { code: i64, message: String },
    Down(u16, String),
}

/// Answers from a script; accepts with a fixed hash once the script runs out.
#[derive(Debug, Default)]
pub struct FakeRelay {
    script: Mutex<VecDeque<RelayScript>>,
    sent: Mutex<Vec<(Value, Address)>>,
}

pub const ACCEPTED_HASH: H256 = H256([0x11; 32]);

impl FakeRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, step: RelayScript) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    pub fn rejecting(message: &str) -> Self {
        Self::new().then(RelayScript::Reject {
            code: -32500,
            message: message.to_string(),
        })
    }

    pub fn sent(&self) -> Vec<(Value, Address)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Relay for FakeRelay {
    async fn send_user_operation(
        &self,
        user_op: Value,
        entry_point: Address,
    ) -> Result<H256, RpcError> {
        self.sent.lock().unwrap().push((user_op, entry_point));
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RelayScript::Accept(ACCEPTED_HASH));
        match step {
            RelayScript::Accept(hash) => Ok(hash),
            RelayScript::Reject { code, message } => {
                let body = json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": code, "message": message },
                });
                Err(RpcError::Rpc {
                    method: "eth_sendUserOperation".to_string(),
                    http_status: 200,
                    error: body["error"].clone(),
                    body: body.to_string(),
                })
            }
            RelayScript::Down(status, body) => Err(RpcError::Http {
                method: "eth_sendUserOperation".to_string(),
                status,
                body,
            }),
        }
    }
}

/// Receipt lookups from a queue; `Ok(None)` once it runs out.
#[derive(Debug, Default)]
pub struct FakeReceipts {
    queue: Mutex<VecDeque<std::result::Result<Option<OperationReceipt>, String>>>,
    polls: AtomicU32,
}

impl FakeReceipts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(self, times: usize) -> Self {
        for _ in 0..times {
            self.queue.lock().unwrap().push_back(Ok(None));
        }
        self
    }

    pub fn included(self, success: bool, reason: Option<&str>) -> Self {
        self.queue.lock().unwrap().push_back(Ok(Some(receipt(success, reason))));
        self
    }

    pub fn failing(self, times: usize, msg: &str) -> Self {
        for _ in 0..times {
            self.queue.lock().unwrap().push_back(Err(msg.to_string()));
        }
        self
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

pub fn receipt(success: bool, reason: Option<&str>) -> OperationReceipt {
    OperationReceipt {
        success,
        transaction_hash: Some(H256::repeat_byte(0x22)),
        block_number: Some(U64::from(100u64)),
        reason: reason.map(str::to_string),
        raw: json!({ "success": success }),
    }
}

#[async_trait]
impl ReceiptSource for FakeReceipts {
    async fn receipt(&self, _hash: H256) -> Result<Option<OperationReceipt>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match self.queue.lock().unwrap().pop_front() {
            None => Ok(None),
            Some(Ok(r)) => Ok(r),
            Some(Err(msg)) => Err(anyhow!(msg)),
        }
    }
}

#[derive(Debug)]
pub struct FakeSponsor {
    answer: std::result::Result<Vec<u8>, String>,
    requests: Mutex<Vec<Value>>,
}

impl FakeSponsor {
    pub fn approving(paymaster_and_data: Vec<u8>) -> Self {
        Self {
            answer: Ok(paymaster_and_data),
            requests: Mutex::default(),
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            answer: Err(msg.to_string()),
            requests: Mutex::default(),
        }
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sponsor for FakeSponsor {
    async fn sponsor(&self, user_op: Value, _entry_point: Address, _chain_id: u64) -> Result<Bytes> {
        self.requests.lock().unwrap().push(user_op);
        match &self.answer {
            Ok(data) => Ok(Bytes::from(data.clone())),
            Err(msg) => Err(anyhow!(msg.clone())),
        }
    }
}

/// Hands out the same fakes for every network.
#[derive(Debug, Clone)]
pub struct FakeConnector {
    pub chain: Arc<FakeChain>,
    pub relay: Arc<FakeRelay>,
    pub receipts: Arc<FakeReceipts>,
    pub unreachable: bool,
}

impl FakeConnector {
    pub fn new(chain: FakeChain, relay: FakeRelay, receipts: FakeReceipts) -> Self {
        Self {
            chain: Arc::new(chain),
            relay: Arc::new(relay),
            receipts: Arc::new(receipts),
            unreachable: false,
        }
    }

    fn check(&self, network: &NetworkDescriptor) -> Result<()> {
        if self.unreachable {
            return Err(anyhow!("{} is unreachable", network.rpc_url));
        }
        Ok(())
    }
}

impl Connector for FakeConnector {
    fn chain(&self, network: &NetworkDescriptor) -> Result<Arc<dyn ChainClient>> {
        self.check(network)?;
        Ok(self.chain.clone())
    }

    fn relay(&self, network: &NetworkDescriptor) -> Result<Arc<dyn Relay>> {
        self.check(network)?;
        Ok(self.relay.clone())
    }

    fn receipts(&self, network: &NetworkDescriptor) -> Result<Arc<dyn ReceiptSource>> {
        self.check(network)?;
        Ok(self.receipts.clone())
    }
}
