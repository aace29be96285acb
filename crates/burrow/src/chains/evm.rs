use crate::{
    chains::ChainKey,
    dispatch::{ChainTransport, Transfer, TransportProvider},
    errors::WalletError,
    retry::{first_success, Backoff},
};
use alloy::{
    consensus::{SignableTransaction as _, TxEip1559, TxEnvelope, TxLegacy},
    eips::eip2718::Encodable2718 as _,
    network::TransactionBuilder as _,
    primitives::{Address, Bytes, TxKind, B256, U256},
    providers::{Provider as _, RootProvider},
    rpc::types::{BlockNumberOrTag, TransactionRequest},
    signers::{local::PrivateKeySigner, SignerSync as _},
    sol,
    sol_types::SolCall as _,
};
use async_trait::async_trait;
use eyre::{Context as _, ContextCompat as _};
use reqwest::Client;
use std::{collections::BTreeMap, time::Duration};
use tracing::{debug, warn};

const RPC_TIMEOUT: Duration = Duration::from_secs(20);
const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_PRIORITY_FEE_WEI: u128 = 1_500_000_000;
const GAS_BUFFER_PERCENT: u64 = 120;

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function transfer(address to, uint256 value) returns (bool);
    }
}

/// `(max_fee_per_gas, max_priority_fee_per_gas)`.
///
/// Priority is `max(1.5 gwei, gas_price / 10)`; the max fee covers a doubling of the base fee.
pub fn eip1559_fees(base_fee: u128, gas_price: u128) -> (u128, u128) {
    let priority = MIN_PRIORITY_FEE_WEI.max(gas_price / 10);
    let max_fee = base_fee
        .saturating_mul(2)
        .saturating_add(priority)
        .max(base_fee.saturating_add(priority));
    (max_fee, priority)
}

/// Set EIP-1559 fields when the chain reports a base fee, otherwise a legacy gas price.
/// Explicit fee fields already on `tx` win.
pub fn with_fee_policy(
    mut tx: TransactionRequest,
    base_fee: Option<u128>,
    gas_price: u128,
) -> TransactionRequest {
    if tx.max_fee_per_gas.is_some() || tx.gas_price.is_some() {
        return tx;
    }
    match base_fee {
        Some(base) => {
            let (max_fee, priority) = eip1559_fees(base, gas_price);
            tx.max_fee_per_gas = Some(max_fee);
            tx.max_priority_fee_per_gas = Some(priority);
        }
        None => tx.gas_price = Some(gas_price),
    }
    tx
}

/// Node replies that mean the raw transaction is already in the mempool.
fn already_broadcast(err: &eyre::Report) -> bool {
    let s = format!("{err:#}").to_ascii_lowercase();
    ["already known", "known transaction", "already imported", "already in mempool"]
        .iter()
        .any(|needle| s.contains(needle))
}

pub fn transfer_request(from: Address, transfer: &Transfer) -> TransactionRequest {
    match transfer {
        Transfer::Native { to, value } => TransactionRequest::default()
            .with_from(from)
            .with_to(*to)
            .with_value(*value),
        Transfer::Erc20 { token, to, value } => {
            let calldata = IERC20::transferCall {
                to: *to,
                value: *value,
            }
            .abi_encode();
            TransactionRequest::default()
                .with_from(from)
                .with_to(*token)
                .with_input(Bytes::from(calldata))
        }
    }
}

/// Fails with `WrongNetwork` unless the endpoint reports `chain`'s id.
async fn ensure_endpoint_chain(p: &RootProvider, chain: ChainKey) -> eyre::Result<()> {
    let info = chain.info();
    let actual = p.get_chain_id().await.context("eth_chainId")?;
    if actual != info.chain_id {
        warn!(chain = %chain, expected = info.chain_id, actual, "skipping endpoint on the wrong network");
        return Err(WalletError::WrongNetwork {
            display_name: info.display_name,
            expected: info.chain_id,
            actual,
        }
        .into());
    }
    Ok(())
}

/// Sign a fully populated request. Returns the envelope and its hash.
fn sign_request(
    signer: &PrivateKeySigner,
    chain_id: u64,
    tx: &TransactionRequest,
) -> eyre::Result<(TxEnvelope, B256)> {
    let to = tx.to.unwrap_or(TxKind::Create);
    let value = tx.value.unwrap_or(U256::ZERO);
    let input = tx.input.clone().into_input().unwrap_or_default();
    let nonce = tx.nonce.context("nonce not set")?;
    let gas_limit = tx.gas.context("gas limit not set")?;

    if let Some(max_fee_per_gas) = tx.max_fee_per_gas {
        let unsigned = TxEip1559 {
            chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas.unwrap_or(0),
            to,
            value,
            input,
            access_list: tx.access_list.clone().unwrap_or_default(),
        };
        let sig = signer
            .sign_hash_sync(&unsigned.signature_hash())
            .context("sign eip1559")?;
        let signed = unsigned.into_signed(sig);
        let hash = *signed.hash();
        Ok((TxEnvelope::Eip1559(signed), hash))
    } else {
        let unsigned = TxLegacy {
            chain_id: Some(chain_id),
            nonce,
            gas_price: tx.gas_price.context("gas price not set")?,
            gas_limit,
            to,
            value,
            input,
        };
        let sig = signer
            .sign_hash_sync(&unsigned.signature_hash())
            .context("sign legacy")?;
        let signed = unsigned.into_signed(sig);
        let hash = *signed.hash();
        Ok((TxEnvelope::Legacy(signed), hash))
    }
}

/// JSON-RPC transport for one chain over a primary endpoint plus fallbacks.
#[derive(Debug, Clone)]
pub struct RpcTransport {
    chain: ChainKey,
    urls: Vec<String>,
    backoff: Backoff,
}

impl RpcTransport {
    /// Blank and duplicate URLs are dropped; order is kept.
    pub fn new(chain: ChainKey, urls: impl IntoIterator<Item = String>) -> Self {
        let mut out: Vec<String> = Vec::new();
        for u in urls {
            let t = u.trim();
            if !t.is_empty() && !out.iter().any(|x| x == t) {
                out.push(t.to_owned());
            }
        }
        Self {
            chain,
            urls: out,
            backoff: Backoff::default(),
        }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    fn provider_for_url(url: &str) -> eyre::Result<RootProvider> {
        let u: reqwest::Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;
        let client = Client::builder()
            .timeout(RPC_TIMEOUT)
            .connect_timeout(RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")?;
        let http = alloy::transports::http::Http::with_client(client, u);
        Ok(RootProvider::new(alloy::rpc::client::RpcClient::new(
            http, false,
        )))
    }

    async fn read<T, Fut>(
        &self,
        label: &'static str,
        f: impl Fn(RootProvider) -> Fut + Send + Sync,
    ) -> eyre::Result<T>
    where
        T: Send,
        Fut: std::future::Future<Output = eyre::Result<T>> + Send,
    {
        first_success(&self.urls, &self.backoff, label, |u| {
            let f = &f;
            async move { f(Self::provider_for_url(&u)?).await }
        })
        .await
    }

    /// First endpoint that answers and serves this transport's chain.
    async fn healthy_provider(&self) -> eyre::Result<RootProvider> {
        let chain = self.chain;
        self.read("select rpc", |p| async move {
            ensure_endpoint_chain(&p, chain).await?;
            Ok(p)
        })
        .await
    }

    /// Every endpoint is checked for the chain id before it receives the raw transaction.
    async fn broadcast(&self, raw: Vec<u8>) -> eyre::Result<()> {
        let chain = self.chain;
        first_success(&self.urls, &self.backoff, "send transaction", |u| {
            let raw = raw.clone();
            async move {
                let p = Self::provider_for_url(&u)?;
                ensure_endpoint_chain(&p, chain).await?;
                match p.send_raw_transaction(&raw).await {
                    Ok(_pending) => Ok(()),
                    Err(e) => {
                        let report: eyre::Report = e.into();
                        if already_broadcast(&report) {
                            debug!(endpoint = %u, "transaction already known");
                            Ok(())
                        } else {
                            Err(report).context("broadcast raw tx")
                        }
                    }
                }
            }
        })
        .await
    }
}

#[async_trait]
impl ChainTransport for RpcTransport {
    async fn chain_id(&self) -> eyre::Result<u64> {
        self.read("get chain id", |p| async move {
            p.get_chain_id().await.context("eth_chainId")
        })
        .await
    }

    async fn native_balance(&self, owner: Address) -> eyre::Result<U256> {
        self.read("get balance", |p| async move {
            p.get_balance(owner).await.context("eth_getBalance")
        })
        .await
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> eyre::Result<U256> {
        self.read("erc20 balance", |p| async move {
            IERC20::new(token, &p)
                .balanceOf(owner)
                .call()
                .await
                .context("erc20 balanceOf")
        })
        .await
    }

    async fn erc20_decimals(&self, token: Address) -> eyre::Result<u8> {
        self.read("erc20 decimals", |p| async move {
            IERC20::new(token, &p)
                .decimals()
                .call()
                .await
                .context("erc20 decimals")
        })
        .await
    }

    async fn submit(
        &self,
        signer: &PrivateKeySigner,
        transfer: &Transfer,
    ) -> eyre::Result<B256> {
        let chain_id = self.chain.info().chain_id;
        let provider = self.healthy_provider().await?;
        let from = signer.address();
        let mut tx = transfer_request(from, transfer).with_chain_id(chain_id);

        let base_fee = provider
            .get_block_by_number(BlockNumberOrTag::Pending)
            .await
            .ok()
            .flatten()
            .and_then(|b| b.header.base_fee_per_gas.map(u128::from));
        let gas_price = provider.get_gas_price().await.context("eth_gasPrice")?;
        tx = with_fee_policy(tx, base_fee, gas_price);

        let nonce = provider
            .get_transaction_count(from)
            .pending()
            .await
            .context("eth_getTransactionCount")?;
        tx.nonce = Some(nonce);

        let estimate = provider
            .estimate_gas(tx.clone())
            .await
            .context("eth_estimateGas")?;
        tx.gas = Some(estimate.saturating_mul(GAS_BUFFER_PERCENT) / 100);

        let (envelope, hash) = sign_request(signer, chain_id, &tx)?;
        self.broadcast(envelope.encoded_2718()).await?;
        Ok(hash)
    }
}

/// Per-chain endpoint lists, resolved once from config.
#[derive(Debug, Clone, Default)]
pub struct RpcTransports {
    endpoints: BTreeMap<ChainKey, Vec<String>>,
}

impl RpcTransports {
    pub const fn new(endpoints: BTreeMap<ChainKey, Vec<String>>) -> Self {
        Self { endpoints }
    }
}

impl TransportProvider for RpcTransports {
    fn transport(&self, chain: ChainKey) -> eyre::Result<Box<dyn ChainTransport>> {
        let urls = self.endpoints.get(&chain).cloned().unwrap_or_else(|| {
            let info = chain.info();
            std::iter::once(info.rpc_url)
                .chain(info.fallback_rpc_urls.iter().copied())
                .map(str::to_owned)
                .collect()
        });
        let t = RpcTransport::new(chain, urls);
        if t.urls().is_empty() {
            eyre::bail!("no rpc endpoints configured for {chain}");
        }
        Ok(Box::new(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::{json, Value};

    const GWEI: u128 = 1_000_000_000;

    /// JSON-RPC reply echoing the request id.
    fn rpc_result(result: Value) -> impl Fn(&mockito::Request) -> Vec<u8> + Send + Sync + 'static {
        move |req| {
            let id = req
                .body()
                .ok()
                .and_then(|b| serde_json::from_slice::<Value>(b).ok())
                .and_then(|v| v.get("id").cloned())
                .unwrap_or_else(|| json!(0));
            json!({ "jsonrpc": "2.0", "id": id, "result": result })
                .to_string()
                .into_bytes()
        }
    }

    async fn mock_rpc(
        server: &mut mockito::ServerGuard,
        method: &str,
        result: Value,
        hits: usize,
    ) -> mockito::Mock {
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": method })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(rpc_result(result))
            .expect(hits)
            .create_async()
            .await
    }

    fn transport(chain: ChainKey, urls: Vec<String>) -> RpcTransport {
        RpcTransport {
            backoff: Backoff::immediate(1),
            ..RpcTransport::new(chain, urls)
        }
    }

    #[tokio::test]
    async fn broadcast_skips_an_endpoint_on_another_chain() -> eyre::Result<()> {
        use eyre::ContextCompat as _;
        let mut server = mockito::Server::new_async().await;
        let chain_id = mock_rpc(&mut server, "eth_chainId", json!("0x1"), 1).await;
        let send = mock_rpc(&mut server, "eth_sendRawTransaction", json!(B256::ZERO), 0).await;

        let t = transport(ChainKey::Base, vec![server.url()]);
        let err = t.broadcast(vec![0x02, 0xc0]).await.err().context("must refuse")?;
        assert_eq!(
            err.downcast_ref::<WalletError>(),
            Some(&WalletError::WrongNetwork {
                display_name: "Base",
                expected: 8453,
                actual: 1,
            })
        );
        chain_id.assert_async().await;
        send.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn provider_selection_passes_over_a_wrong_chain_endpoint() -> eyre::Result<()> {
        let mut wrong = mockito::Server::new_async().await;
        let mut right = mockito::Server::new_async().await;
        let wrong_id = mock_rpc(&mut wrong, "eth_chainId", json!("0x1"), 1).await;
        let right_id = mock_rpc(&mut right, "eth_chainId", json!("0x2105"), 1).await;

        let t = transport(ChainKey::Base, vec![wrong.url(), right.url()]);
        t.healthy_provider().await?;
        wrong_id.assert_async().await;
        right_id.assert_async().await;
        Ok(())
    }

    #[test]
    fn priority_fee_tracks_gas_price_above_the_floor() {
        let (max_fee, priority) = eip1559_fees(10 * GWEI, 20 * GWEI);
        assert_eq!(priority, 2 * GWEI);
        assert_eq!(max_fee, 22 * GWEI);
    }

    #[test]
    fn priority_fee_never_drops_below_floor() {
        let (max_fee, priority) = eip1559_fees(GWEI, 5 * GWEI);
        assert_eq!(priority, MIN_PRIORITY_FEE_WEI);
        assert!(max_fee >= GWEI + priority);
    }

    #[test]
    fn base_fee_selects_eip1559() {
        let tx = transfer_request(
            Address::ZERO,
            &Transfer::Native {
                to: Address::ZERO,
                value: U256::from(1_u64),
            },
        );
        let out = with_fee_policy(tx, Some(10 * GWEI), 20 * GWEI);
        assert!(out.max_fee_per_gas.is_some());
        assert!(out.max_priority_fee_per_gas.is_some());
        assert!(out.gas_price.is_none());
    }

    #[test]
    fn missing_base_fee_selects_legacy() {
        let out = with_fee_policy(TransactionRequest::default(), None, 7);
        assert_eq!(out.gas_price, Some(7));
        assert!(out.max_fee_per_gas.is_none());
    }

    #[test]
    fn erc20_transfer_targets_the_token_contract() -> eyre::Result<()> {
        let token = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);
        let tx = transfer_request(
            Address::ZERO,
            &Transfer::Erc20 {
                token,
                to,
                value: U256::from(5_u64),
            },
        );
        assert_eq!(tx.to, Some(TxKind::Call(token)));
        assert!(tx.value.is_none());
        let input = tx.input.into_input().unwrap_or_default();
        let call = IERC20::transferCall::abi_decode(&input)?;
        assert_eq!(call.to, to);
        assert_eq!(call.value, U256::from(5_u64));
        Ok(())
    }

    #[test]
    fn signing_uses_the_requested_chain() -> eyre::Result<()> {
        let signer = PrivateKeySigner::random();
        let tx = with_fee_policy(
            transfer_request(
                signer.address(),
                &Transfer::Native {
                    to: Address::repeat_byte(0x33),
                    value: U256::from(1_u64),
                },
            ),
            Some(GWEI),
            GWEI,
        );
        let tx = TransactionRequest {
            nonce: Some(3),
            gas: Some(21_000),
            ..tx
        };
        let (envelope, hash) = sign_request(&signer, 8453, &tx)?;
        assert_eq!(*envelope.tx_hash(), hash);
        assert!(matches!(envelope, TxEnvelope::Eip1559(ref s) if s.tx().chain_id == 8453));
        Ok(())
    }

    #[test]
    fn unfilled_request_refuses_to_sign() {
        let signer = PrivateKeySigner::random();
        assert!(sign_request(&signer, 1, &TransactionRequest::default()).is_err());
    }

    #[test]
    fn already_known_replies_count_as_broadcast() {
        assert!(already_broadcast(&eyre::eyre!("ALREADY KNOWN")));
        assert!(already_broadcast(&eyre::eyre!("tx already in mempool")));
        assert!(!already_broadcast(&eyre::eyre!("nonce too low")));
    }

    #[test]
    fn transport_dedupes_endpoints() -> eyre::Result<()> {
        let t = RpcTransport::new(
            ChainKey::Base,
            ["https://a ".to_owned(), String::new(), "https://a".to_owned(), "https://b".to_owned()],
        );
        assert_eq!(t.urls(), ["https://a".to_owned(), "https://b".to_owned()]);

        let from_defaults = RpcTransports::default();
        from_defaults.transport(ChainKey::Polygon)?;
        Ok(())
    }
}
