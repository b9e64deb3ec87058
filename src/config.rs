use crate::error::{Error, Result};
use anyhow::{anyhow, Context};
use ethers::types::{Address, H160};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::{env, fs, path::Path};

/// ERC-4337 EntryPoint v0.6 (same address on every supported chain).
pub const ENTRY_POINT_V06: Address = H160([
    0x5f, 0xf1, 0x37, 0xd4, 0xb0, 0xfd, 0xcd, 0x49, 0xdc, 0xa3, 0x0c, 0x7c, 0xf5, 0x7e, 0x57,
    0x8a, 0x02, 0x6d, 0x27, 0x89,
]);

/// eth-infinitism SimpleAccountFactory for EntryPoint v0.6.
pub const SIMPLE_ACCOUNT_FACTORY_V06: Address = H160([
    0x94, 0x06, 0xcc, 0x61, 0x85, 0xa3, 0x46, 0x90, 0x62, 0x96, 0x84, 0x07, 0x46, 0x12, 0x5a,
    0x0e, 0x44, 0x97, 0x64, 0x54,
]);

const API_KEY_PLACEHOLDER: &str = "{apiKey}";

const BUILTIN: &[(u64, &str, &str)] = &[
    (1, "ethereum", "https://eth-mainnet.g.alchemy.com/v2/{apiKey}"),
    (11155111, "sepolia", "https://eth-sepolia.g.alchemy.com/v2/{apiKey}"),
    (137, "polygon", "https://polygon-mainnet.g.alchemy.com/v2/{apiKey}"),
    (80002, "polygon-amoy", "https://polygon-amoy.g.alchemy.com/v2/{apiKey}"),
    (8453, "base", "https://base-mainnet.g.alchemy.com/v2/{apiKey}"),
    (84532, "base-sepolia", "https://base-sepolia.g.alchemy.com/v2/{apiKey}"),
    (42161, "arbitrum", "https://arb-mainnet.g.alchemy.com/v2/{apiKey}"),
    (10, "optimism", "https://opt-mainnet.g.alchemy.com/v2/{apiKey}"),
];

/// Static per-chain configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDescriptor {
    pub chain_id: u64,
    pub name: String,
    pub factory: Address,
    pub entry_point: Address,
    pub rpc_url: String,
    /// Bundler endpoint; Alchemy serves the ERC-4337 methods on the RPC URL.
    pub bundler_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkRaw {
    chain_id: u64,
    name: String,
    rpc: String,
    #[serde(default)]
    rpc_env_var: Option<String>,
    #[serde(default)]
    bundler: Option<String>,
    #[serde(default)]
    factory: Option<String>,
    #[serde(default)]
    entry_point: Option<String>,
}

/// Read-only table of supported networks, keyed by chain id.
#[derive(Debug, Clone, Default)]
pub struct NetworkTable {
    networks: BTreeMap<u64, NetworkDescriptor>,
}

impl NetworkTable {
    /// The built-in Alchemy-backed networks.
    pub fn builtin(api_key: &str) -> Self {
        let networks = BUILTIN
            .iter()
            .map(|(chain_id, name, url)| {
                let url = url.replace(API_KEY_PLACEHOLDER, api_key);
                let descriptor = NetworkDescriptor {
                    chain_id: *chain_id,
                    name: name.to_string(),
                    factory: SIMPLE_ACCOUNT_FACTORY_V06,
                    entry_point: ENTRY_POINT_V06,
                    rpc_url: url.clone(),
                    bundler_url: url,
                };
                (*chain_id, descriptor)
            })
            .collect();
        Self { networks }
    }

    /// Load a JSON array of networks. `rpc`/`bundler` may contain `{apiKey}`;
    /// `rpcEnvVar` names an env var that overrides `rpc` when set.
    pub fn load(path: &Path, api_key: Option<&str>) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read networks json at {}", path.display()))?;
        Self::from_json(&raw, api_key)
            .with_context(|| format!("failed to parse networks json at {}", path.display()))
    }

    pub fn from_json(raw: &str, api_key: Option<&str>) -> anyhow::Result<Self> {
        let raw: Vec<NetworkRaw> = serde_json::from_str(raw)?;
        let mut networks = BTreeMap::new();
        for net in raw {
            let descriptor = net.resolve(api_key)?;
            if networks.insert(descriptor.chain_id, descriptor).is_some() {
                return Err(anyhow!("duplicate chainId {} in networks json", net.chain_id));
            }
        }
        Ok(Self { networks })
    }

    pub fn with_rpc_override(mut self, chain_id: u64, rpc_url: String) -> Result<Self> {
        let net = self
            .networks
            .get_mut(&chain_id)
            .ok_or(Error::UnsupportedChain { chain_id })?;
        if net.bundler_url == net.rpc_url {
            net.bundler_url = rpc_url.clone();
        }
        net.rpc_url = rpc_url;
        Ok(self)
    }

    pub fn get(&self, chain_id: u64) -> Result<&NetworkDescriptor> {
        self.networks
            .get(&chain_id)
            .ok_or(Error::UnsupportedChain { chain_id })
    }

    /// Look up by chain id (`137`) or by name (`polygon`).
    pub fn find(&self, id_or_name: &str) -> anyhow::Result<&NetworkDescriptor> {
        if let Ok(chain_id) = id_or_name.parse::<u64>() {
            return Ok(self.get(chain_id)?);
        }
        self.networks
            .values()
            .find(|n| n.name.eq_ignore_ascii_case(id_or_name))
            .ok_or_else(|| anyhow!("unknown network {id_or_name:?}"))
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkDescriptor> {
        self.networks.values()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl NetworkRaw {
    fn resolve(&self, api_key: Option<&str>) -> anyhow::Result<NetworkDescriptor> {
        let rpc = match self.rpc_env_var.as_ref().and_then(|k| env::var(k).ok()) {
            Some(url) => url,
            None => self.rpc.clone(),
        };
        let rpc_url = fill_api_key(&rpc, api_key)
            .with_context(|| format!("rpc url of {}", self.name))?;
        let bundler_url = match &self.bundler {
            Some(url) => fill_api_key(url, api_key)
                .with_context(|| format!("bundler url of {}", self.name))?,
            None => rpc_url.clone(),
        };

        let factory = match &self.factory {
            Some(s) => parse_addr(s).context("invalid factory address")?,
            None => SIMPLE_ACCOUNT_FACTORY_V06,
        };
        let entry_point = match &self.entry_point {
            Some(s) => parse_addr(s).context("invalid entryPoint address")?,
            None => ENTRY_POINT_V06,
        };

        Ok(NetworkDescriptor {
            chain_id: self.chain_id,
            name: self.name.clone(),
            factory,
            entry_point,
            rpc_url,
            bundler_url,
        })
    }
}

fn fill_api_key(url: &str, api_key: Option<&str>) -> anyhow::Result<String> {
    if !url.contains(API_KEY_PLACEHOLDER) {
        return Ok(url.to_string());
    }
    let key = api_key.ok_or_else(|| anyhow!("{url} needs an API key (set ALCHEMY_API_KEY)"))?;
    Ok(url.replace(API_KEY_PLACEHOLDER, key))
}

fn parse_addr(s: &str) -> anyhow::Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::str::FromStr;

    #[test]
    fn builtin_constants_match_published_addresses() {
        assert_eq!(
            ENTRY_POINT_V06,
            Address::from_str("0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789").unwrap()
        );
        assert_eq!(
            SIMPLE_ACCOUNT_FACTORY_V06,
            Address::from_str("0x9406Cc6185a346906296840746125a0E44976454").unwrap()
        );
    }

    #[test]
    fn builtin_table_fills_api_key() {
        let table = NetworkTable::builtin("k3y");
        let polygon = table.get(137).unwrap();
        assert_eq!(polygon.name, "polygon");
        assert_eq!(polygon.rpc_url, "https://polygon-mainnet.g.alchemy.com/v2/k3y");
        assert_eq!(polygon.bundler_url, polygon.rpc_url);
        assert_eq!(polygon.factory, SIMPLE_ACCOUNT_FACTORY_V06);
        assert_eq!(table.find("Base-Sepolia").unwrap().chain_id, 84532);
        assert_eq!(table.len(), 8);
    }

    #[test]
    fn unknown_chain_is_unsupported() {
        let table = NetworkTable::builtin("k");
        assert_eq!(table.get(999).unwrap_err().kind(), ErrorKind::UnsupportedChain);
        assert!(table.find("solana").is_err());
    }

    #[test]
    fn json_table_with_defaults_and_placeholders() {
        let raw = r#"[
            { "chainId": 31337, "name": "anvil", "rpc": "http://127.0.0.1:8545",
              "bundler": "http://127.0.0.1:4337",
              "factory": "0x1111111111111111111111111111111111111111" },
            { "chainId": 137, "name": "polygon", "rpc": "https://polygon-mainnet.g.alchemy.com/v2/{apiKey}" }
        ]"#;
        let table = NetworkTable::from_json(raw, Some("abc")).unwrap();
        let anvil = table.get(31337).unwrap();
        assert_eq!(anvil.bundler_url, "http://127.0.0.1:4337");
        assert_eq!(anvil.entry_point, ENTRY_POINT_V06);
        assert_eq!(
            anvil.factory,
            Address::from_str("0x1111111111111111111111111111111111111111").unwrap()
        );
        assert!(table.get(137).unwrap().rpc_url.ends_with("/v2/abc"));
    }

    #[test]
    fn placeholder_without_key_fails() {
        let raw = r#"[{ "chainId": 137, "name": "polygon", "rpc": "https://x/{apiKey}" }]"#;
        assert!(NetworkTable::from_json(raw, None).is_err());
    }

    #[test]
    fn duplicate_chain_ids_fail() {
        let raw = r#"[
            { "chainId": 1, "name": "a", "rpc": "http://a" },
            { "chainId": 1, "name": "b", "rpc": "http://b" }
        ]"#;
        assert!(NetworkTable::from_json(raw, None).is_err());
    }

    #[test]
    fn rpc_override_moves_shared_bundler_url() {
        let table = NetworkTable::builtin("k")
            .with_rpc_override(8453, "http://localhost:8545".into())
            .unwrap();
        let base = table.get(8453).unwrap();
        assert_eq!(base.rpc_url, "http://localhost:8545");
        assert_eq!(base.bundler_url, "http://localhost:8545");
    }
}
