use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use smartwallet_aa::encoding::{self, fmt_address, fmt_h256};
use smartwallet_aa::paymaster::PaymasterClient;
use smartwallet_aa::session::wallet_from_private_key;
use smartwallet_aa::{
    signer, AccountStatus, CallIntent, ConfirmVia, DeploymentOutcome, Error, HttpConnector,
    NetworkTable, Pipeline, RelayHint, Session,
};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "smartwallet-aa", version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the supported networks.
    Networks,

    /// Print the owner, its counterfactual smart account and deployment status.
    Account(AccountArgs),

    /// Send native currency or an ERC-20 transfer from the smart account.
    Send(SendArgs),

    /// Deploy the smart account with an initCode-only UserOperation.
    Deploy(DeployArgs),

    /// Sign a UserOperation JSON file offline and print digest + signature.
    Sign(SignArgs),
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Alchemy API key used in the built-in RPC/bundler URLs.
    #[arg(long, global = true, env = "ALCHEMY_API_KEY", hide_env_values = true, default_value = "")]
    api_key: String,

    /// JSON file replacing the built-in network table.
    #[arg(long, global = true, env = "SMARTWALLET_NETWORKS")]
    networks: Option<PathBuf>,

    /// Override the RPC (and bundler) URL of the selected chain.
    #[arg(long, global = true, env = "SMARTWALLET_RPC_URL")]
    rpc: Option<String>,

    /// Smart account owner private key.
    ///
    /// Recommended: set via env var SMARTWALLET_OWNER_PRIVATE_KEY.
    #[arg(long, global = true, env = "SMARTWALLET_OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: Option<String>,

    /// ERC-7677 paymaster endpoint used with --sponsor-gas.
    #[arg(long, global = true, env = "SMARTWALLET_PAYMASTER_URL")]
    paymaster_url: Option<String>,

    /// Gas Manager policy id sent in the paymaster request context.
    #[arg(long, global = true, env = "SMARTWALLET_PAYMASTER_POLICY_ID")]
    paymaster_policy_id: Option<String>,

    /// Optional webhook data forwarded to the paymaster.
    #[arg(long, global = true, env = "SMARTWALLET_PAYMASTER_WEBHOOK_DATA")]
    paymaster_webhook_data: Option<String>,

    /// Timeout for every HTTP request (RPC, bundler, paymaster).
    #[arg(long, global = true, env = "SMARTWALLET_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    http_timeout_secs: u64,

    /// Where to look for inclusion after submission.
    #[arg(long, global = true, value_enum, default_value_t = ReceiptVia::Bundler)]
    receipts: ReceiptVia,

    /// Print a single JSON object to stdout instead of the human summary.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ReceiptVia {
    /// eth_getUserOperationReceipt on the bundler.
    Bundler,
    /// Bundle transaction from the bundler, its receipt from the RPC node.
    Rpc,
}

#[derive(Args, Debug)]
struct AccountArgs {
    /// Chain id or network name; every network when omitted.
    #[arg(long)]
    chain: Option<String>,
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Chain id or network name.
    #[arg(long)]
    chain: String,

    /// Recipient address.
    #[arg(long)]
    to: String,

    /// Amount in base units (wei / token units), decimal or 0x-hex.
    #[arg(long)]
    amount: String,

    /// ERC-20 token address; native currency when omitted.
    #[arg(long)]
    token: Option<String>,

    /// Ask the paymaster to sponsor gas.
    #[arg(long, default_value_t = false)]
    sponsor_gas: bool,

    /// Return after the bundler accepts the operation.
    #[arg(long, default_value_t = false)]
    no_wait: bool,
}

#[derive(Args, Debug)]
struct DeployArgs {
    /// Chain id or network name.
    #[arg(long)]
    chain: String,

    /// Ask the paymaster to sponsor gas.
    #[arg(long, default_value_t = false)]
    sponsor_gas: bool,
}

#[derive(Args, Debug)]
struct SignArgs {
    /// Chain id or network name.
    #[arg(long)]
    chain: String,

    /// UserOperation JSON file.
    #[arg(long)]
    user_op: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // stdout is reserved for command output.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let global = cli.global;

    let res = match cli.cmd {
        Command::Networks => cmd_networks(&global),
        Command::Account(args) => cmd_account(&global, args).await,
        Command::Send(args) => cmd_send(&global, args).await,
        Command::Deploy(args) => cmd_deploy(&global, args).await,
        Command::Sign(args) => cmd_sign(&global, args),
    };

    if let Err(e) = &res {
        if let Some(err) = e.downcast_ref::<Error>() {
            report(err);
        }
    }
    res
}

fn load_networks(global: &GlobalArgs) -> Result<NetworkTable> {
    let api_key = (!global.api_key.is_empty()).then_some(global.api_key.as_str());
    match &global.networks {
        Some(path) => NetworkTable::load(path, api_key),
        None => {
            if api_key.is_none() {
                tracing::warn!("ALCHEMY_API_KEY is not set; built-in endpoints will reject requests");
            }
            Ok(NetworkTable::builtin(&global.api_key))
        }
    }
}

/// Network table plus the chain id `--chain` names, with `--rpc` applied to it.
fn select_chain(global: &GlobalArgs, chain: &str) -> Result<(NetworkTable, u64)> {
    let networks = load_networks(global)?;
    let chain_id = networks.find(chain)?.chain_id;
    let networks = match &global.rpc {
        Some(url) => networks.with_rpc_override(chain_id, url.clone())?,
        None => networks,
    };
    Ok((networks, chain_id))
}

fn owner_wallet(global: &GlobalArgs) -> Result<LocalWallet> {
    let key = global.owner_private_key.as_deref().ok_or_else(|| {
        anyhow!("missing owner key: pass --owner-private-key or set SMARTWALLET_OWNER_PRIVATE_KEY")
    })?;
    wallet_from_private_key(key)
}

fn pipeline(global: &GlobalArgs, networks: NetworkTable) -> Result<Pipeline> {
    let timeout = Duration::from_secs(global.http_timeout_secs);
    let confirm_via = match global.receipts {
        ReceiptVia::Bundler => ConfirmVia::Relay,
        ReceiptVia::Rpc => ConfirmVia::Chain,
    };
    let connector = HttpConnector::new(timeout).confirm_via(confirm_via);
    let mut pipeline = Pipeline::new(Arc::new(networks), Arc::new(connector));

    if let Some(url) = global.paymaster_url.clone() {
        let policy_id = global.paymaster_policy_id.clone().ok_or_else(|| {
            anyhow!("--paymaster-url requires --paymaster-policy-id (or SMARTWALLET_PAYMASTER_POLICY_ID)")
        })?;
        let paymaster = PaymasterClient::new(
            url,
            policy_id,
            global.paymaster_webhook_data.clone(),
            timeout,
        )?;
        pipeline = pipeline.with_sponsor(Arc::new(paymaster));
    }
    Ok(pipeline)
}

fn cmd_networks(global: &GlobalArgs) -> Result<()> {
    let networks = load_networks(global)?;
    if global.json {
        let out: Vec<_> = networks
            .iter()
            .map(|n| {
                serde_json::json!({
                    "chainId": n.chain_id,
                    "name": n.name,
                    "entryPoint": fmt_address(n.entry_point),
                    "factory": fmt_address(n.factory),
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(out));
        return Ok(());
    }

    println!("{:<10} {:<14} {:<44} factory", "chainId", "name", "entryPoint");
    for n in networks.iter() {
        println!(
            "{:<10} {:<14} {:<44} {}",
            n.chain_id,
            n.name,
            fmt_address(n.entry_point),
            fmt_address(n.factory)
        );
    }
    Ok(())
}

async fn cmd_account(global: &GlobalArgs, args: AccountArgs) -> Result<()> {
    let wallet = owner_wallet(global)?;
    let owner = wallet.address();

    let results = match &args.chain {
        Some(chain) => {
            let (networks, chain_id) = select_chain(global, chain)?;
            let status = pipeline(global, networks)?
                .account_status(owner, chain_id)
                .await?;
            vec![(chain_id, Ok(status))]
        }
        None => {
            if global.rpc.is_some() {
                tracing::warn!("--rpc is ignored without --chain");
            }
            pipeline(global, load_networks(global)?)?
                .resolve_everywhere(owner)
                .await
        }
    };

    if global.json {
        let accounts: Vec<_> = results
            .iter()
            .map(|(chain_id, res)| match res {
                Ok(s) => account_json(s),
                Err(e) => serde_json::json!({ "chainId": chain_id, "error": e.to_string() }),
            })
            .collect();
        let out = serde_json::json!({
            "owner": fmt_address(owner),
            "accounts": accounts,
        });
        println!("{}", out);
        return Ok(());
    }

    println!("owner:          {}", fmt_address(owner));
    for (chain_id, res) in &results {
        match res {
            Ok(s) => println!(
                "{:<14} {:<10} {} ({})",
                s.network,
                s.chain_id,
                fmt_address(s.account),
                if s.deployed { "deployed" } else { "not deployed" }
            ),
            Err(e) => println!("{:<14} {:<10} error: {}", "", chain_id, e),
        }
    }
    Ok(())
}

fn account_json(s: &AccountStatus) -> serde_json::Value {
    serde_json::json!({
        "network": s.network,
        "chainId": s.chain_id,
        "smartAccount": fmt_address(s.account),
        "deployed": s.deployed,
    })
}

async fn cmd_send(global: &GlobalArgs, args: SendArgs) -> Result<()> {
    let (networks, chain_id) = select_chain(global, &args.chain)?;
    let to = Address::from_str(&args.to).context("invalid --to address")?;
    let amount = encoding::parse_numeric(&args.amount)?;
    let intent = match &args.token {
        Some(token) => CallIntent::TokenTransfer {
            token: Address::from_str(token).context("invalid --token address")?,
            to,
            amount,
        },
        None => CallIntent::NativeTransfer { to, value: amount },
    };

    let pipeline = pipeline(global, networks)?;
    let session = Session::new();
    let identity = pipeline
        .connect(&session, owner_wallet(global)?, chain_id)
        .await?;
    tracing::info!(
        chain_id,
        smart_account = %fmt_address(identity.smart_account()),
        "sending from smart account"
    );

    if args.no_wait {
        let submitted = pipeline
            .submit_only(&session, chain_id, &intent, args.sponsor_gas)
            .await?;
        if global.json {
            let out = serde_json::json!({
                "userOpHash": fmt_h256(submitted.user_op_hash),
                "userOp": submitted.signed.to_json(),
            });
            println!("{}", out);
        } else {
            println!("userOpHash:     {}", fmt_h256(submitted.user_op_hash));
        }
        return Ok(());
    }

    let tracked = pipeline
        .submit_tracked(&session, chain_id, &intent, args.sponsor_gas)
        .await;
    let stages: Vec<String> = tracked.history().iter().map(|s| format!("{s:?}")).collect();
    let user_op_hash = tracked.user_op_hash();
    let confirmation = tracked.into_result()?;

    if global.json {
        let out = serde_json::json!({
            "network": confirmation.network,
            "chainId": confirmation.chain_id,
            "userOpHash": fmt_h256(confirmation.user_op_hash),
            "transactionHash": confirmation.transaction_hash.map(fmt_h256),
            "blockNumber": confirmation.block_number.map(|b| b.as_u64()),
            "stages": stages,
        });
        println!("{}", out);
        return Ok(());
    }

    println!("network:        {} ({})", confirmation.network, confirmation.chain_id);
    if let Some(hash) = user_op_hash {
        println!("userOpHash:     {}", fmt_h256(hash));
    }
    if let Some(tx) = confirmation.transaction_hash {
        println!("transaction:    {}", fmt_h256(tx));
    }
    if let Some(block) = confirmation.block_number {
        println!("block:          {}", block);
    }
    println!("stages:         {}", stages.join(" -> "));
    Ok(())
}

async fn cmd_deploy(global: &GlobalArgs, args: DeployArgs) -> Result<()> {
    let (networks, chain_id) = select_chain(global, &args.chain)?;
    let pipeline = pipeline(global, networks)?;
    let session = Session::new();
    pipeline
        .connect(&session, owner_wallet(global)?, chain_id)
        .await?;

    match pipeline.deploy(&session, chain_id, args.sponsor_gas).await? {
        DeploymentOutcome::AlreadyDeployed { account } => {
            if global.json {
                let out = serde_json::json!({
                    "smartAccount": fmt_address(account),
                    "alreadyDeployed": true,
                });
                println!("{}", out);
            } else {
                println!("smart account {} is already deployed", fmt_address(account));
            }
        }
        DeploymentOutcome::Deployed {
            account,
            confirmation,
            attempts,
        } => {
            if global.json {
                let out = serde_json::json!({
                    "smartAccount": fmt_address(account),
                    "alreadyDeployed": false,
                    "userOpHash": fmt_h256(confirmation.user_op_hash),
                    "transactionHash": confirmation.transaction_hash.map(fmt_h256),
                    "attempts": attempts,
                });
                println!("{}", out);
            } else {
                println!("smartAccount:   {}", fmt_address(account));
                println!("userOpHash:     {}", fmt_h256(confirmation.user_op_hash));
                if let Some(tx) = confirmation.transaction_hash {
                    println!("transaction:    {}", fmt_h256(tx));
                }
                println!("attempts:       {}", attempts);
            }
        }
    }
    Ok(())
}

fn cmd_sign(global: &GlobalArgs, args: SignArgs) -> Result<()> {
    let networks = load_networks(global)?;
    let network = networks.find(&args.chain)?;
    let raw = fs::read_to_string(&args.user_op)
        .with_context(|| format!("failed to read {}", args.user_op.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not JSON", args.user_op.display()))?;
    let op = encoding::user_op_from_json(&value)
        .with_context(|| format!("{} is not a UserOperation", args.user_op.display()))?;

    let wallet = owner_wallet(global)?;
    let signed =
        signer::sign_user_operation(&op, network.chain_id, network.entry_point, &wallet)?;

    if global.json {
        let out = serde_json::json!({
            "chainId": network.chain_id,
            "entryPoint": fmt_address(network.entry_point),
            "digest": fmt_h256(signed.digest()),
            "signer": fmt_address(wallet.address()),
            "userOp": signed.to_json(),
        });
        println!("{}", out);
        return Ok(());
    }

    println!("chainId:        {}", network.chain_id);
    println!("entryPoint:     {}", fmt_address(network.entry_point));
    println!("signer:         {}", fmt_address(wallet.address()));
    println!("digest:         {}", fmt_h256(signed.digest()));
    println!("signature:      {}", encoding::fmt_bytes(signed.signature()));
    Ok(())
}

/// Human diagnostic for a pipeline failure, on stderr.
fn report(err: &Error) {
    eprintln!("error kind:     {:?}", err.kind());
    if err.is_outcome_unknown() {
        eprintln!("outcome:        unknown (the operation may still be included later)");
    }
    if let Some(rejection) = err.relay_rejection() {
        if rejection.hint != RelayHint::Unknown {
            eprintln!("hint:           {}", rejection.hint.title());
        }
        eprintln!("advice:         {}", rejection.hint.advice());
        if let Some(status) = rejection.http_status {
            eprintln!("http status:    {}", status);
        }
        if let Some(code) = rejection.code {
            eprintln!("rpc code:       {}", code);
        }
        eprintln!("relay message:  {}", rejection.message);
        eprintln!("relay response: {}", rejection.raw);
    }
}
