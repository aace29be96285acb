//! Native and ERC-20 transfers against the selected chain.
//!
//! Every send checks its preconditions locally before touching the network, then verifies
//! that the endpoint really serves the requested chain before anything is signed.

use crate::{
    amount,
    chains::ChainKey,
    custody::Custody,
    errors::WalletError,
    kv::{self, KvStore},
    mnemonic::parse_address,
    records::ERC20_DECIMALS_KEY,
};
use alloy::{
    primitives::{Address, B256, U256},
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const NATIVE_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Native {
        to: Address,
        value: U256,
    },
    Erc20 {
        token: Address,
        to: Address,
        value: U256,
    },
}

/// JSON-RPC access to one chain. Implementations own endpoint selection and retries.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    /// The chain id the connected endpoint reports (`eth_chainId`).
    async fn chain_id(&self) -> eyre::Result<u64>;

    async fn native_balance(&self, owner: Address) -> eyre::Result<U256>;

    async fn erc20_balance(&self, token: Address, owner: Address) -> eyre::Result<U256>;

    async fn erc20_decimals(&self, token: Address) -> eyre::Result<u8>;

    /// Fill fees, nonce and gas, sign once, broadcast. Returns the transaction hash.
    async fn submit(&self, signer: &PrivateKeySigner, transfer: &Transfer)
        -> eyre::Result<B256>;
}

/// Hands out a transport per chain.
pub trait TransportProvider: Send + Sync {
    fn transport(&self, chain: ChainKey) -> eyre::Result<Box<dyn ChainTransport>>;
}

#[derive(Debug, Clone, Copy)]
pub struct NativeSend<'a> {
    pub to: &'a str,
    pub amount: &'a str,
    pub chain: ChainKey,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenSend<'a> {
    pub token: &'a str,
    pub to: &'a str,
    pub amount: &'a str,
    pub chain: ChainKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct Sent {
    pub chain: ChainKey,
    pub tx_hash: String,
    pub explorer_url: String,
}

impl Sent {
    fn new(chain: ChainKey, hash: B256) -> Self {
        let tx_hash = hash.to_string();
        Self {
            chain,
            explorer_url: chain.info().tx_url(&tx_hash),
            tx_hash,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Balance {
    pub chain: ChainKey,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub base_units: String,
    pub decimals: u8,
    pub formatted: String,
}

/// Turn a transport failure into the host-visible taxonomy, keeping the node's message.
pub fn classify_transport_error(e: eyre::Report) -> eyre::Report {
    if e.downcast_ref::<WalletError>().is_some() {
        return e;
    }
    let msg = format!("{e:#}");
    if msg.to_ascii_lowercase().contains("insufficient funds") {
        WalletError::InsufficientFunds(msg).into()
    } else {
        WalletError::Transport(msg).into()
    }
}

async fn ensure_network(transport: &dyn ChainTransport, chain: ChainKey) -> eyre::Result<()> {
    let info = chain.info();
    let actual = transport
        .chain_id()
        .await
        .map_err(classify_transport_error)?;
    if actual != info.chain_id {
        warn!(chain = %chain, expected = info.chain_id, actual, "endpoint serves the wrong network");
        return Err(WalletError::WrongNetwork {
            display_name: info.display_name,
            expected: info.chain_id,
            actual,
        }
        .into());
    }
    Ok(())
}

fn decimals_cache_key(chain: ChainKey, token: Address) -> String {
    format!("{}:0x{}", chain.info().chain_id, hex::encode(token))
}

/// Decimals from the durable cache, else `decimals()` on chain. Cache failures only warn.
async fn token_decimals(
    store: &impl KvStore,
    transport: &dyn ChainTransport,
    chain: ChainKey,
    token: Address,
) -> eyre::Result<u8> {
    let key = decimals_cache_key(chain, token);
    let mut cache: BTreeMap<String, u8> =
        match kv::get_json::<BTreeMap<String, u8>>(store, ERC20_DECIMALS_KEY) {
            Ok(m) => m.unwrap_or_default(),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "erc20 decimals cache unreadable");
                BTreeMap::new()
            }
        };
    if let Some(d) = cache.get(&key) {
        return Ok(*d);
    }

    let d = transport
        .erc20_decimals(token)
        .await
        .map_err(classify_transport_error)?;
    cache.insert(key, d);
    if let Err(e) = kv::put_json(store, ERC20_DECIMALS_KEY, &cache) {
        warn!(error = %format!("{e:#}"), "erc20 decimals cache not saved");
    }
    Ok(d)
}

fn owner_address(owner: &str) -> eyre::Result<Address> {
    parse_address(owner).ok_or_else(|| WalletError::InvalidAddress.into())
}

pub struct Dispatcher<P> {
    transports: P,
}

impl<P: TransportProvider> Dispatcher<P> {
    pub const fn new(transports: P) -> Self {
        Self { transports }
    }

    pub async fn send_native<S: KvStore>(
        &self,
        custody: &Custody<S>,
        req: NativeSend<'_>,
    ) -> eyre::Result<Sent> {
        let signer = custody.signer()?;
        let to = parse_address(req.to).ok_or(WalletError::InvalidAddress)?;
        let value = amount::parse_units(req.amount, NATIVE_DECIMALS)?;

        let transport = self.transports.transport(req.chain)?;
        ensure_network(transport.as_ref(), req.chain).await?;

        let hash = transport
            .submit(&signer, &Transfer::Native { to, value })
            .await
            .map_err(classify_transport_error)?;
        info!(chain = %req.chain, tx = %hash, "native transfer broadcast");
        Ok(Sent::new(req.chain, hash))
    }

    pub async fn send_token<S: KvStore>(
        &self,
        custody: &Custody<S>,
        req: TokenSend<'_>,
    ) -> eyre::Result<Sent> {
        let signer = custody.signer()?;
        let to = parse_address(req.to).ok_or(WalletError::InvalidAddress)?;
        let token = parse_address(req.token).ok_or(WalletError::InvalidContract)?;
        let human = amount::parse_decimal(req.amount)?;

        let transport = self.transports.transport(req.chain)?;
        ensure_network(transport.as_ref(), req.chain).await?;

        let decimals = token_decimals(custody.store(), transport.as_ref(), req.chain, token).await?;
        let value = human.to_base_units(decimals)?;
        if value.is_zero() {
            return Err(WalletError::InvalidAmount("Amount must be greater than 0".to_owned()).into());
        }

        let hash = transport
            .submit(&signer, &Transfer::Erc20 { token, to, value })
            .await
            .map_err(classify_transport_error)?;
        info!(chain = %req.chain, tx = %hash, token = %token, "token transfer broadcast");
        Ok(Sent::new(req.chain, hash))
    }

    pub async fn native_balance(&self, owner: &str, chain: ChainKey) -> eyre::Result<Balance> {
        let owner_addr = owner_address(owner)?;
        let transport = self.transports.transport(chain)?;
        let v = transport
            .native_balance(owner_addr)
            .await
            .map_err(classify_transport_error)?;
        debug!(chain = %chain, "native balance read");
        Ok(Balance {
            chain,
            owner: owner_addr.to_checksum(None),
            token: None,
            base_units: v.to_string(),
            decimals: NATIVE_DECIMALS,
            formatted: amount::format_units(v, NATIVE_DECIMALS),
        })
    }

    pub async fn token_balance(
        &self,
        store: &impl KvStore,
        owner: &str,
        chain: ChainKey,
        token: &str,
    ) -> eyre::Result<Balance> {
        let owner_addr = owner_address(owner)?;
        let token_addr = parse_address(token).ok_or(WalletError::InvalidContract)?;
        let transport = self.transports.transport(chain)?;
        let decimals = token_decimals(store, transport.as_ref(), chain, token_addr).await?;
        let v = transport
            .erc20_balance(token_addr, owner_addr)
            .await
            .map_err(classify_transport_error)?;
        Ok(Balance {
            chain,
            owner: owner_addr.to_checksum(None),
            token: Some(token_addr.to_checksum(None)),
            base_units: v.to_string(),
            decimals,
            formatted: amount::format_units(v, decimals),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{envelope::Envelope, kv::MemoryKvStore};
    use eyre::ContextCompat as _;
    use secrecy::SecretString;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    const DEV_PHRASE: &str = "test test test test test test test test test test test junk";
    const RECIPIENT: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
    const USDC_BASE: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

    #[derive(Clone, Default)]
    struct Shared {
        sent: Arc<Mutex<Vec<Transfer>>>,
        decimals_calls: Arc<AtomicUsize>,
    }

    #[derive(Clone)]
    struct MockTransports {
        reported_chain_id: Option<u64>,
        decimals: u8,
        balance: U256,
        submit_error: Option<&'static str>,
        shared: Shared,
    }

    impl MockTransports {
        fn honest() -> Self {
            Self {
                reported_chain_id: None,
                decimals: 6,
                balance: U256::from(1_500_000_u64),
                submit_error: None,
                shared: Shared::default(),
            }
        }

        fn sent(&self) -> eyre::Result<Vec<Transfer>> {
            Ok(self
                .shared
                .sent
                .lock()
                .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
                .clone())
        }
    }

    struct MockTransport {
        chain_id: u64,
        cfg: MockTransports,
    }

    #[async_trait]
    impl ChainTransport for MockTransport {
        async fn chain_id(&self) -> eyre::Result<u64> {
            Ok(self.chain_id)
        }

        async fn native_balance(&self, _owner: Address) -> eyre::Result<U256> {
            Ok(self.cfg.balance)
        }

        async fn erc20_balance(&self, _token: Address, _owner: Address) -> eyre::Result<U256> {
            Ok(self.cfg.balance)
        }

        async fn erc20_decimals(&self, _token: Address) -> eyre::Result<u8> {
            self.cfg.shared.decimals_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.cfg.decimals)
        }

        async fn submit(
            &self,
            _signer: &PrivateKeySigner,
            transfer: &Transfer,
        ) -> eyre::Result<B256> {
            if let Some(msg) = self.cfg.submit_error {
                eyre::bail!("{msg}");
            }
            self.cfg
                .shared
                .sent
                .lock()
                .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
                .push(transfer.clone());
            Ok(B256::repeat_byte(0xab))
        }
    }

    impl TransportProvider for MockTransports {
        fn transport(&self, chain: ChainKey) -> eyre::Result<Box<dyn ChainTransport>> {
            Ok(Box::new(MockTransport {
                chain_id: self.reported_chain_id.unwrap_or(chain.info().chain_id),
                cfg: self.clone(),
            }))
        }
    }

    async fn unlocked() -> eyre::Result<Custody<MemoryKvStore>> {
        let c = Custody::new(MemoryKvStore::new(), Envelope::insecure_for_tests(1_000));
        c.import(DEV_PHRASE, &SecretString::new("secret6".to_owned().into()))
            .await?;
        Ok(c)
    }

    fn kind(e: &eyre::Report) -> Option<&WalletError> {
        e.downcast_ref::<WalletError>()
    }

    fn native(to: &'static str, amount: &'static str) -> NativeSend<'static> {
        NativeSend {
            to,
            amount,
            chain: ChainKey::Base,
        }
    }

    fn usdc(amount: &'static str) -> TokenSend<'static> {
        TokenSend {
            token: USDC_BASE,
            to: RECIPIENT,
            amount,
            chain: ChainKey::Base,
        }
    }

    #[tokio::test]
    async fn native_send_broadcasts_wei() -> eyre::Result<()> {
        let c = unlocked().await?;
        let mock = MockTransports::honest();
        let d = Dispatcher::new(mock.clone());

        let sent = d.send_native(&c, native(RECIPIENT, "0.5")).await?;
        assert!(sent.explorer_url.starts_with("https://basescan.org/tx/0xabab"));
        let to = parse_address(RECIPIENT).context("recipient")?;
        assert_eq!(
            mock.sent()?,
            vec![Transfer::Native {
                to,
                value: U256::from(500_000_000_000_000_000_u128)
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn wrong_network_blocks_the_broadcast() -> eyre::Result<()> {
        let c = unlocked().await?;
        let mock = MockTransports {
            reported_chain_id: Some(1),
            ..MockTransports::honest()
        };
        let d = Dispatcher::new(mock.clone());

        let err = d
            .send_native(&c, native(RECIPIENT, "1"))
            .await
            .err()
            .context("mismatch must fail")?;
        assert!(matches!(
            kind(&err),
            Some(WalletError::WrongNetwork {
                expected: 8453,
                actual: 1,
                ..
            })
        ));
        let msg = err.to_string();
        assert!(msg.contains("8453") && msg.contains("got 1"), "{msg}");
        assert!(mock.sent()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn preconditions_are_checked_in_order() -> eyre::Result<()> {
        let c = unlocked().await?;
        let mock = MockTransports::honest();
        let d = Dispatcher::new(mock.clone());

        let e = d.send_native(&c, native("0xnope", "-1")).await.err().context("bad to")?;
        assert_eq!(kind(&e), Some(&WalletError::InvalidAddress));

        let e = d.send_native(&c, native(RECIPIENT, "0")).await.err().context("zero")?;
        assert!(matches!(kind(&e), Some(WalletError::InvalidAmount(_))));

        let e = d
            .send_token(
                &c,
                TokenSend {
                    token: "usdc",
                    ..usdc("abc")
                },
            )
            .await
            .err()
            .context("bad contract")?;
        assert_eq!(kind(&e), Some(&WalletError::InvalidContract));

        c.lock().await?;
        let e = d.send_native(&c, native("0xnope", "1")).await.err().context("locked")?;
        assert_eq!(kind(&e), Some(&WalletError::WalletLocked));
        assert!(mock.sent()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn token_send_scales_by_cached_decimals() -> eyre::Result<()> {
        let c = unlocked().await?;
        let mock = MockTransports::honest();
        let d = Dispatcher::new(mock.clone());

        d.send_token(&c, usdc("1.5")).await?;
        d.send_token(&c, usdc("2")).await?;
        assert_eq!(mock.shared.decimals_calls.load(Ordering::SeqCst), 1);

        let token = parse_address(USDC_BASE).context("token")?;
        let to = parse_address(RECIPIENT).context("recipient")?;
        assert_eq!(
            mock.sent()?,
            vec![
                Transfer::Erc20 {
                    token,
                    to,
                    value: U256::from(1_500_000_u64)
                },
                Transfer::Erc20 {
                    token,
                    to,
                    value: U256::from(2_000_000_u64)
                },
            ]
        );

        let cache: BTreeMap<String, u8> =
            kv::get_json(c.store(), ERC20_DECIMALS_KEY)?.context("cache written")?;
        assert_eq!(
            cache.get("8453:0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"),
            Some(&6)
        );
        Ok(())
    }

    #[tokio::test]
    async fn token_precision_beyond_decimals_is_rejected() -> eyre::Result<()> {
        let c = unlocked().await?;
        let mock = MockTransports::honest();
        let d = Dispatcher::new(mock.clone());

        let e = d
            .send_token(&c, usdc("0.0000001"))
            .await
            .err()
            .context("too precise")?;
        assert!(matches!(kind(&e), Some(WalletError::InvalidAmount(_))));
        assert!(mock.sent()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn node_errors_are_classified_with_their_message() -> eyre::Result<()> {
        let c = unlocked().await?;
        let broke = MockTransports {
            submit_error: Some("insufficient funds for gas * price + value"),
            ..MockTransports::honest()
        };
        let e = Dispatcher::new(broke)
            .send_native(&c, native(RECIPIENT, "1"))
            .await
            .err()
            .context("must fail")?;
        assert!(
            matches!(kind(&e), Some(WalletError::InsufficientFunds(m)) if m.contains("gas * price"))
        );

        let flaky = MockTransports {
            submit_error: Some("connection reset"),
            ..MockTransports::honest()
        };
        let e = Dispatcher::new(flaky)
            .send_native(&c, native(RECIPIENT, "1"))
            .await
            .err()
            .context("must fail")?;
        assert!(matches!(kind(&e), Some(WalletError::Transport(m)) if m.contains("connection reset")));
        Ok(())
    }

    #[tokio::test]
    async fn balances_are_formatted() -> eyre::Result<()> {
        let store = MemoryKvStore::new();
        let d = Dispatcher::new(MockTransports::honest());

        let b = d.token_balance(&store, RECIPIENT, ChainKey::Base, USDC_BASE).await?;
        assert_eq!(b.formatted, "1.5");
        assert_eq!(b.decimals, 6);

        let n = d.native_balance(RECIPIENT, ChainKey::Polygon).await?;
        assert_eq!(n.base_units, "1500000");
        assert_eq!(n.formatted, "0.0000000000015");
        Ok(())
    }
}
