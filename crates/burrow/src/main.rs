#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use burrow::{
    assets::{assets_on, resolve_assets, Asset, Selection},
    chains::{
        evm::RpcTransports,
        tokens::{StaticTokenDirectory, TokenDirectory as _},
        ChainKey,
    },
    cli_output::{self, PASSCODE_ENV, THEFT_PASSCODE_ENV},
    config::BurrowConfig,
    custody::Custody,
    dispatch::{Dispatcher, NativeSend, TokenSend},
    envelope::Envelope,
    errors::{ErrorReport, WalletError},
    kv::FileKvStore,
    onramp::{offered_assets, OnrampClient, Region, SessionRequest},
    paths::{BurrowPaths, CustodyLock},
    store::ConfigStore,
};
use clap::{Parser, Subcommand, ValueEnum};
use eyre::Context as _;
use serde_json::json;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliChain {
    Base,
    Ethereum,
    Optimism,
    Arbitrum,
    Polygon,
}

impl From<CliChain> for ChainKey {
    fn from(v: CliChain) -> Self {
        match v {
            CliChain::Base => Self::Base,
            CliChain::Ethereum => Self::Ethereum,
            CliChain::Optimism => Self::Optimism,
            CliChain::Arbitrum => Self::Arbitrum,
            CliChain::Polygon => Self::Polygon,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "burrow", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved paths (useful for debugging).
    Paths,

    /// Wallet, theft-protection and selection state. Never prompts.
    Status,

    /// Generate a new wallet. The recovery phrase is printed exactly once.
    Create,

    /// Restore a wallet from its recovery phrase (`BURROW_MNEMONIC` or a prompt).
    Import,

    /// Check the passcode and report the unlocked address.
    Unlock,

    /// Drop the in-memory key. A one-shot process never keeps one, so this only reports.
    Lock,

    /// Configure the theft passcode (`BURROW_THEFT_PASSCODE` or a prompt).
    SetTheftPasscode,

    /// Dismiss the theft-passcode setup step without configuring one.
    SkipTheftSetup,

    /// Delete the encrypted wallet and the theft passcode. Irreversible.
    Reset {
        /// Skip the confirmation prompt (required for non-interactive shells).
        #[arg(long, default_value_t = false)]
        yes: bool,
    },

    /// EIP-191 sign a UTF-8 message with the wallet key.
    SignMessage { message: String },

    /// Send the chain's native currency. Amount is in whole units, e.g. `0.01`.
    SendNative {
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
        /// Defaults to the selected chain.
        #[arg(long, value_enum)]
        chain: Option<CliChain>,
    },

    /// Send an ERC-20 token. `--token` is a contract address or a known symbol (USDC, USDT, DAI).
    SendToken {
        #[arg(long)]
        token: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
        #[arg(long, value_enum)]
        chain: Option<CliChain>,
    },

    /// Native or token balance of the wallet (or `--address`).
    Balance {
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long, value_enum)]
        chain: Option<CliChain>,
    },

    /// List supported networks.
    Chains,

    /// Assets purchasable in a region, on the selected chain.
    Assets {
        #[command(flatten)]
        region: RegionArgs,
        /// Use the built-in asset list instead of the onramp feed.
        #[arg(long, default_value_t = false)]
        offline: bool,
    },

    /// Change the selected chain and/or asset.
    Select {
        #[arg(long, value_enum)]
        chain: Option<CliChain>,
        #[arg(long)]
        asset: Option<String>,
        #[command(flatten)]
        region: RegionArgs,
        #[arg(long, default_value_t = false)]
        offline: bool,
    },

    /// Create a hosted-checkout session funding this wallet and print its URL.
    BuyUrl {
        /// Defaults to the selected asset.
        #[arg(long)]
        asset: Option<String>,
        #[arg(long, value_enum)]
        chain: Option<CliChain>,
        #[arg(long)]
        redirect_url: Option<String>,
        #[command(flatten)]
        region: RegionArgs,
    },
}

#[derive(clap::Args, Debug, Default)]
struct RegionArgs {
    /// ISO country code; defaults to the configured country.
    #[arg(long)]
    country: Option<String>,
    /// State or province; US buyers default to the configured subdivision.
    #[arg(long)]
    subdivision: Option<String>,
}

struct Host {
    paths: BurrowPaths,
    cfg: BurrowConfig,
    custody: Custody<FileKvStore>,
}

impl Host {
    fn open(paths: BurrowPaths) -> eyre::Result<Self> {
        let cfg = ConfigStore::new(&paths).load_or_init_default()?;
        let store = FileKvStore::open(paths.kv_dir())?;
        let envelope = Envelope::new(cfg.pbkdf2_iterations())?;
        Ok(Self {
            paths,
            cfg,
            custody: Custody::new(store, envelope),
        })
    }

    fn store(&self) -> &FileKvStore {
        self.custody.store()
    }

    fn lock(&self) -> eyre::Result<CustodyLock> {
        self.paths.lock_custody()
    }

    fn selected_chain(&self, chain: Option<CliChain>) -> eyre::Result<ChainKey> {
        match chain {
            Some(c) => Ok(c.into()),
            None => Ok(Selection::load(self.store())?.chain),
        }
    }

    fn dispatcher(&self) -> Dispatcher<RpcTransports> {
        Dispatcher::new(RpcTransports::new(self.cfg.rpc_endpoints()))
    }

    fn region(&self, args: &RegionArgs) -> Region {
        Region::resolve(
            args.country.as_deref(),
            args.subdivision.as_deref(),
            &self.cfg.onramp,
        )
    }

    async fn assets(&self, region: &Region, offline: bool) -> eyre::Result<Vec<Asset>> {
        if offline {
            return Ok(resolve_assets(None, &StaticTokenDirectory));
        }
        let client = OnrampClient::new(&self.cfg.onramp)?;
        Ok(offered_assets(&client, region, &StaticTokenDirectory).await)
    }

    /// One-shot processes start locked; signing commands unlock first.
    async fn unlock(&self) -> eyre::Result<String> {
        let passcode = cli_output::read_passcode("Passcode: ")?;
        self.custody.unlock(&passcode).await
    }
}

/// A contract address, or a symbol known to the built-in token directory.
fn resolve_token(token: &str, chain: ChainKey) -> eyre::Result<String> {
    let t = token.trim();
    if t.starts_with("0x") {
        return Ok(t.to_owned());
    }
    StaticTokenDirectory
        .contract(&t.to_ascii_uppercase(), chain)
        .map(str::to_owned)
        .ok_or_else(|| WalletError::InvalidContract.into())
}

fn find_asset<'a>(assets: &'a [Asset], id: &str) -> eyre::Result<&'a Asset> {
    assets
        .iter()
        .find(|a| a.id.eq_ignore_ascii_case(id.trim()))
        .ok_or_else(|| eyre::eyre!("asset is not offered: {id}"))
}

fn region_json(region: &Region) -> serde_json::Value {
    json!({ "country": region.country, "subdivision": region.subdivision })
}

async fn cmd_create(host: &Host) -> eyre::Result<()> {
    let _lock = host.lock()?;
    if host.custody.has_wallet()? {
        eyre::bail!("a wallet already exists; run `burrow reset` first");
    }
    let passcode = cli_output::read_new_passcode("Passcode", PASSCODE_ENV)?;
    let created = host.custody.create(&passcode).await?;
    let pending = host.custody.theft_setup_pending()?;
    cli_output::print_mnemonic_notice();
    cli_output::write_json(&json!({
        "address": created.address,
        "mnemonic": created.mnemonic.as_str(),
        "theft_setup_pending": pending,
    }))?;
    if pending {
        cli_output::print_theft_setup_hint();
    }
    Ok(())
}

async fn cmd_import(host: &Host) -> eyre::Result<()> {
    let _lock = host.lock()?;
    let phrase = cli_output::read_mnemonic()?;
    let passcode = cli_output::read_new_passcode("Passcode", PASSCODE_ENV)?;
    let created = host.custody.import(&phrase, &passcode).await?;
    let pending = host.custody.theft_setup_pending()?;
    cli_output::write_json(&json!({
        "address": created.address,
        "theft_setup_pending": pending,
    }))?;
    if pending {
        cli_output::print_theft_setup_hint();
    }
    Ok(())
}

fn cmd_status(host: &Host) -> eyre::Result<()> {
    let status = host.custody.status()?;
    let selection = Selection::load(host.store())?;
    let assets = resolve_assets(None, &StaticTokenDirectory);
    let address_url = status
        .address
        .as_deref()
        .map(|a| selection.chain.info().address_url(a));
    cli_output::write_json(&json!({
        "custody": status,
        "selected_chain": selection.chain,
        "selected_asset_id": selection.asset_id,
        "selected": selection.describe(&assets),
        "address_url": address_url,
    }))
}

async fn cmd_send_native(
    host: &Host,
    to: &str,
    amount: &str,
    chain: Option<CliChain>,
) -> eyre::Result<()> {
    let _lock = host.lock()?;
    let chain = host.selected_chain(chain)?;
    host.unlock().await?;
    let sent = host
        .dispatcher()
        .send_native(&host.custody, NativeSend { to, amount, chain })
        .await?;
    cli_output::write_json(&sent)
}

async fn cmd_send_token(
    host: &Host,
    token: &str,
    to: &str,
    amount: &str,
    chain: Option<CliChain>,
) -> eyre::Result<()> {
    let _lock = host.lock()?;
    let chain = host.selected_chain(chain)?;
    let token = resolve_token(token, chain)?;
    host.unlock().await?;
    let sent = host
        .dispatcher()
        .send_token(
            &host.custody,
            TokenSend {
                token: &token,
                to,
                amount,
                chain,
            },
        )
        .await?;
    cli_output::write_json(&sent)
}

async fn cmd_balance(
    host: &Host,
    address: Option<String>,
    token: Option<&str>,
    chain: Option<CliChain>,
) -> eyre::Result<()> {
    let chain = host.selected_chain(chain)?;
    let owner = match address {
        Some(a) => a,
        None => host.custody.address()?.ok_or(WalletError::NoWallet)?,
    };
    let dispatcher = host.dispatcher();
    let balance = match token {
        Some(t) => {
            let token = resolve_token(t, chain)?;
            dispatcher
                .token_balance(host.store(), &owner, chain, &token)
                .await?
        }
        None => dispatcher.native_balance(&owner, chain).await?,
    };
    cli_output::write_json(&balance)
}

fn cmd_paths(paths: &BurrowPaths) -> eyre::Result<()> {
    cli_output::write_json(&json!({
        "config_dir": paths.config_dir,
        "config_file": paths.config_file(),
        "data_dir": paths.data_dir,
        "kv_dir": paths.kv_dir(),
        "log_file": paths.log_file,
    }))
}

fn cmd_chains() -> eyre::Result<()> {
    let chains: Vec<_> = ChainKey::ALL
        .into_iter()
        .map(|k| {
            let info = k.info();
            json!({
                "key": k,
                "chain_id": info.chain_id,
                "display_name": info.display_name,
                "native_symbol": info.native_symbol,
                "explorer_url": info.explorer_url,
            })
        })
        .collect();
    cli_output::write_json(&chains)
}

async fn cmd_assets(host: &Host, region: &RegionArgs, offline: bool) -> eyre::Result<()> {
    let region = host.region(region);
    let assets = host.assets(&region, offline).await?;
    let mut selection = Selection::load(host.store())?;
    selection.revalidate(host.store(), &assets)?;
    cli_output::write_json(&json!({
        "region": region_json(&region),
        "chain": selection.chain,
        "assets": assets_on(&assets, selection.chain),
        "selected": selection.describe(&assets),
    }))
}

async fn cmd_select(
    host: &Host,
    chain: Option<CliChain>,
    asset: Option<&str>,
    region: &RegionArgs,
    offline: bool,
) -> eyre::Result<()> {
    let region = host.region(region);
    let assets = host.assets(&region, offline).await?;
    let mut selection = Selection::load(host.store())?;
    if let Some(c) = chain {
        selection.set_chain(host.store(), c.into())?;
    }
    if let Some(id) = asset {
        let found = find_asset(&assets, id)?;
        selection.set_asset(host.store(), &found.id)?;
    }
    let reselected = selection.revalidate(host.store(), &assets)?;
    cli_output::write_json(&json!({
        "selected": selection.describe(&assets),
        "reselected": reselected,
    }))
}

async fn cmd_buy_url(
    host: &Host,
    asset: Option<&str>,
    chain: Option<CliChain>,
    redirect_url: Option<String>,
    region: &RegionArgs,
) -> eyre::Result<()> {
    let address = host.custody.address()?.ok_or(WalletError::NoWallet)?;
    let region = host.region(region);
    let chain = host.selected_chain(chain)?;
    let client = OnrampClient::new(&host.cfg.onramp)?;
    let assets = offered_assets(&client, &region, &StaticTokenDirectory).await;
    let picked = match asset {
        Some(id) => find_asset(&assets, id)?,
        None => Selection::load(host.store())?
            .resolve(&assets)
            .ok_or_else(|| eyre::eyre!("no asset is offered on {chain}"))?,
    };
    if picked.on(chain).is_none() {
        eyre::bail!("{} is not offered on {chain}", picked.symbol);
    }
    let onramp_url = client
        .create_session(&SessionRequest {
            destination_address: address,
            purchase_currency: picked.symbol.clone(),
            destination_network: chain.info().onramp_network.to_owned(),
            redirect_url,
            partner_user_ref: None,
        })
        .await?;
    cli_output::write_json(&json!({ "onramp_url": onramp_url }))
}

async fn run(cmd: Command, paths: BurrowPaths) -> eyre::Result<()> {
    // Paths must work even when config.toml is unreadable.
    if matches!(cmd, Command::Paths) {
        return cmd_paths(&paths);
    }
    let host = Host::open(paths)?;

    match cmd {
        Command::Paths => cmd_paths(&host.paths),
        Command::Chains => cmd_chains(),
        Command::Status => cmd_status(&host),
        Command::Create => cmd_create(&host).await,
        Command::Import => cmd_import(&host).await,
        Command::Unlock => {
            let _lock = host.lock()?;
            let address = host.unlock().await?;
            cli_output::write_json(&json!({ "address": address, "unlocked": true }))
        }
        Command::Lock => {
            host.custody.lock().await?;
            cli_output::write_json(&json!({ "unlocked": false }))
        }
        Command::SetTheftPasscode => {
            let _lock = host.lock()?;
            let passcode = cli_output::read_new_passcode("Theft passcode", THEFT_PASSCODE_ENV)?;
            host.custody.set_theft_passcode(&passcode).await?;
            cli_output::write_json(&json!({ "has_theft_passcode": true }))
        }
        Command::SkipTheftSetup => {
            let _lock = host.lock()?;
            host.custody.skip_theft_setup().await?;
            cli_output::write_json(&json!({ "theft_setup_pending": false }))
        }
        Command::Reset { yes } => {
            let _lock = host.lock()?;
            cli_output::confirm_reset_or_bail(yes)?;
            host.custody.reset().await?;
            cli_output::write_json(&json!({ "has_wallet": false }))
        }
        Command::SignMessage { message } => {
            let _lock = host.lock()?;
            let address = host.unlock().await?;
            let signature = host.custody.sign_message(message.as_bytes())?;
            cli_output::write_json(&json!({ "address": address, "signature": signature }))
        }
        Command::SendNative { to, amount, chain } => {
            cmd_send_native(&host, &to, &amount, chain).await
        }
        Command::SendToken {
            token,
            to,
            amount,
            chain,
        } => cmd_send_token(&host, &token, &to, &amount, chain).await,
        Command::Balance {
            address,
            token,
            chain,
        } => cmd_balance(&host, address, token.as_deref(), chain).await,
        Command::Assets { region, offline } => cmd_assets(&host, &region, offline).await,
        Command::Select {
            chain,
            asset,
            region,
            offline,
        } => cmd_select(&host, chain, asset.as_deref(), &region, offline).await,
        Command::BuyUrl {
            asset,
            chain,
            redirect_url,
            region,
        } => cmd_buy_url(&host, asset.as_deref(), chain, redirect_url, &region).await,
    }
}

fn init_logging(paths: &BurrowPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("burrow.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = BurrowPaths::discover()?;
    paths.ensure_private_dirs().context("create burrow dirs")?;
    let _log_guard = init_logging(&paths);

    match run(cli.cmd, paths).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "command failed");
            cli_output::write_json(&json!({ "error": ErrorReport::from_report(&e) }))?;
            Ok(ExitCode::FAILURE)
        }
    }
}
