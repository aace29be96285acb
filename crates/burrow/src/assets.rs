//! Which assets are offered on which chain, and the sticky chain/asset selection.
//!
//! The purchase-options feed is untrusted: every entry is decoded on its own and anything
//! malformed is skipped rather than failing the whole list.

use crate::{
    chains::{tokens::TokenDirectory, ChainKey},
    kv::{self, KvStore},
    records::{SELECTED_ASSET_KEY, SELECTED_CHAIN_KEY},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_CHAIN: ChainKey = ChainKey::Base;
pub const DEFAULT_ASSET_ID: &str = "ETH";

/// Raw `buy-options` response. Currencies stay as JSON until normalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyOptions {
    #[serde(default)]
    pub purchase_currencies: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct FeedCurrency {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "icon", alias = "iconUrl")]
    icon_url: Option<String>,
    #[serde(default)]
    networks: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct FeedNetwork {
    #[serde(default)]
    chain_id: Option<Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    contract_address: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

/// An asset's presence on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetNetwork {
    pub chain_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub by_chain: BTreeMap<ChainKey, AssetNetwork>,
}

impl Asset {
    pub fn on(&self, chain: ChainKey) -> Option<&AssetNetwork> {
        self.by_chain.get(&chain)
    }

    pub fn token_address(&self, chain: ChainKey) -> Option<&str> {
        self.on(chain)?.contract_address.as_deref()
    }

    /// The chain's base currency: same symbol as the chain's native asset and no contract.
    pub fn is_native(&self, chain: ChainKey) -> bool {
        self.symbol
            .eq_ignore_ascii_case(chain.info().native_symbol)
            && self.token_address(chain).is_none()
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

/// `base-mainnet`, `Base_Mainnet` and `base` all name the Base chain.
fn chain_for_network_name(raw: &str) -> Option<ChainKey> {
    let lower = raw.trim().to_ascii_lowercase();
    let name = lower
        .strip_suffix("-mainnet")
        .or_else(|| lower.strip_suffix("_mainnet"))
        .unwrap_or(&lower);
    name.parse().ok()
}

fn chain_id_of(v: Option<&Value>) -> Option<u64> {
    match v? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

fn normalize_currency(raw: &Value, tokens: &dyn TokenDirectory) -> Option<Asset> {
    let c: FeedCurrency = match serde_json::from_value(raw.clone()) {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "skipping malformed purchase currency");
            return None;
        }
    };
    let symbol_field = non_empty(c.symbol);
    let id = non_empty(c.id).or_else(|| symbol_field.clone())?;
    let symbol = symbol_field.unwrap_or_else(|| id.clone());
    let name = non_empty(c.name).unwrap_or_else(|| symbol.clone());

    let mut by_chain = BTreeMap::new();
    for n in &c.networks {
        let Ok(net) = serde_json::from_value::<FeedNetwork>(n.clone()) else {
            continue;
        };
        let Some(chain) = net.name.as_deref().and_then(chain_for_network_name) else {
            continue;
        };
        let contract_address = non_empty(net.contract_address)
            .or_else(|| tokens.contract(&symbol, chain).map(str::to_owned));
        by_chain.insert(
            chain,
            AssetNetwork {
                chain_id: chain_id_of(net.chain_id.as_ref()).unwrap_or(chain.info().chain_id),
                display_name: non_empty(net.display_name),
                contract_address,
            },
        );
    }
    if by_chain.is_empty() {
        return None;
    }
    Some(Asset {
        id,
        symbol,
        name,
        icon_url: non_empty(c.icon_url),
        by_chain,
    })
}

/// Map the feed onto supported chains. Pure; the token directory backfills missing contracts.
pub fn normalize_assets(feed: &BuyOptions, tokens: &dyn TokenDirectory) -> Vec<Asset> {
    feed.purchase_currencies
        .iter()
        .filter_map(|c| normalize_currency(c, tokens))
        .collect()
}

fn native_on(chains: &[ChainKey]) -> BTreeMap<ChainKey, AssetNetwork> {
    chains
        .iter()
        .map(|&k| {
            (
                k,
                AssetNetwork {
                    chain_id: k.info().chain_id,
                    display_name: None,
                    contract_address: None,
                },
            )
        })
        .collect()
}

/// ETH on the rollups and mainnet, MATIC on Polygon, USDC everywhere.
pub fn fallback_assets(tokens: &dyn TokenDirectory) -> Vec<Asset> {
    let usdc = ChainKey::ALL
        .into_iter()
        .map(|k| {
            (
                k,
                AssetNetwork {
                    chain_id: k.info().chain_id,
                    display_name: None,
                    contract_address: tokens.contract("USDC", k).map(str::to_owned),
                },
            )
        })
        .collect();
    vec![
        Asset {
            id: "ETH".to_owned(),
            symbol: "ETH".to_owned(),
            name: "Ethereum".to_owned(),
            icon_url: None,
            by_chain: native_on(&[
                ChainKey::Base,
                ChainKey::Ethereum,
                ChainKey::Optimism,
                ChainKey::Arbitrum,
            ]),
        },
        Asset {
            id: "MATIC".to_owned(),
            symbol: "MATIC".to_owned(),
            name: "Polygon".to_owned(),
            icon_url: None,
            by_chain: native_on(&[ChainKey::Polygon]),
        },
        Asset {
            id: "USDC".to_owned(),
            symbol: "USDC".to_owned(),
            name: "USD Coin".to_owned(),
            icon_url: None,
            by_chain: usdc,
        },
    ]
}

/// Normalized feed, or the fallback list when the feed is missing or yields nothing usable.
pub fn resolve_assets(feed: Option<&BuyOptions>, tokens: &dyn TokenDirectory) -> Vec<Asset> {
    let normalized = feed
        .map(|f| normalize_assets(f, tokens))
        .unwrap_or_default();
    if normalized.is_empty() {
        fallback_assets(tokens)
    } else {
        normalized
    }
}

pub fn assets_on(assets: &[Asset], chain: ChainKey) -> Vec<&Asset> {
    assets.iter().filter(|a| a.on(chain).is_some()).collect()
}

/// Persisted chain + asset choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub chain: ChainKey,
    pub asset_id: String,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            chain: DEFAULT_CHAIN,
            asset_id: DEFAULT_ASSET_ID.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectedAsset {
    pub chain: ChainKey,
    pub chain_id: u64,
    pub asset_id: String,
    pub symbol: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    pub is_native: bool,
}

impl Selection {
    /// Unknown or blank stored values fall back to the defaults.
    pub fn load(store: &impl KvStore) -> eyre::Result<Self> {
        let chain = kv::get_json::<String>(store, SELECTED_CHAIN_KEY)?
            .and_then(|s| s.parse::<ChainKey>().ok())
            .unwrap_or(DEFAULT_CHAIN);
        let asset_id = kv::get_json::<String>(store, SELECTED_ASSET_KEY)?
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ASSET_ID.to_owned());
        Ok(Self { chain, asset_id })
    }

    pub fn set_chain(&mut self, store: &impl KvStore, chain: ChainKey) -> eyre::Result<()> {
        kv::put_json(store, SELECTED_CHAIN_KEY, &chain.as_str())?;
        self.chain = chain;
        Ok(())
    }

    pub fn set_asset(&mut self, store: &impl KvStore, asset_id: &str) -> eyre::Result<()> {
        kv::put_json(store, SELECTED_ASSET_KEY, &asset_id)?;
        asset_id.clone_into(&mut self.asset_id);
        Ok(())
    }

    /// If the selected asset is not offered on the selected chain, switch to the chain's
    /// first asset. Returns whether the selection changed.
    pub fn revalidate(&mut self, store: &impl KvStore, assets: &[Asset]) -> eyre::Result<bool> {
        let on_chain = assets_on(assets, self.chain);
        let Some(first) = on_chain.first() else {
            return Ok(false);
        };
        if on_chain.iter().any(|a| a.id == self.asset_id) {
            return Ok(false);
        }
        let next = first.id.clone();
        debug!(chain = %self.chain, from = %self.asset_id, to = %next, "reselecting asset");
        self.set_asset(store, &next)?;
        Ok(true)
    }

    /// The selected asset, or the chain's first asset when the id is not in the list.
    pub fn resolve<'a>(&self, assets: &'a [Asset]) -> Option<&'a Asset> {
        assets
            .iter()
            .find(|a| a.id == self.asset_id)
            .or_else(|| assets_on(assets, self.chain).into_iter().next())
    }

    pub fn describe(&self, assets: &[Asset]) -> Option<SelectedAsset> {
        let asset = self.resolve(assets)?;
        Some(SelectedAsset {
            chain: self.chain,
            chain_id: self.chain.info().chain_id,
            asset_id: asset.id.clone(),
            symbol: asset.symbol.clone(),
            name: asset.name.clone(),
            token_address: asset.token_address(self.chain).map(str::to_owned),
            is_native: asset.is_native(self.chain),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chains::tokens::StaticTokenDirectory, kv::MemoryKvStore};
    use eyre::ContextCompat as _;
    use serde_json::json;

    fn feed(v: Value) -> eyre::Result<BuyOptions> {
        Ok(serde_json::from_value(v)?)
    }

    #[test]
    fn empty_feed_resolves_to_the_fallback_list() -> eyre::Result<()> {
        let dir = StaticTokenDirectory;
        let empty = feed(json!({ "purchaseCurrencies": [] }))?;
        assert_eq!(resolve_assets(Some(&empty), &dir), fallback_assets(&dir));
        assert_eq!(resolve_assets(None, &dir), fallback_assets(&dir));

        let ids: Vec<_> = fallback_assets(&dir).into_iter().map(|a| a.id).collect();
        assert_eq!(ids, ["ETH", "MATIC", "USDC"]);

        let usdc = fallback_assets(&dir)
            .into_iter()
            .find(|a| a.id == "USDC")
            .context("usdc")?;
        assert_eq!(usdc.by_chain.len(), 5);
        assert!(usdc.by_chain.values().all(|n| n.contract_address.is_some()));
        Ok(())
    }

    #[test]
    fn feed_networks_are_normalized_and_backfilled() -> eyre::Result<()> {
        let f = feed(json!({
            "purchaseCurrencies": [
                {
                    "id": "usdc-id",
                    "symbol": "USDC",
                    "name": "USD Coin",
                    "icon_url": "https://icons/usdc.png",
                    "networks": [
                        { "name": "Base-Mainnet", "chain_id": "8453" },
                        { "name": "ethereum_mainnet", "chain_id": 1,
                          "contract_address": "0xfeed", "display_name": "Ethereum" },
                        { "name": "solana", "chain_id": "0" }
                    ]
                },
                { "symbol": "DOGE", "networks": [{ "name": "dogecoin" }] },
                { "id": 7, "networks": "nope" },
                "garbage"
            ]
        }))?;
        let assets = normalize_assets(&f, &StaticTokenDirectory);
        assert_eq!(assets.len(), 1);
        let usdc = assets.first().context("usdc")?;
        assert_eq!(usdc.id, "usdc-id");
        assert_eq!(usdc.icon_url.as_deref(), Some("https://icons/usdc.png"));
        assert_eq!(usdc.by_chain.len(), 2);

        let base = usdc.on(ChainKey::Base).context("base")?;
        assert_eq!(base.chain_id, 8453);
        assert_eq!(
            base.contract_address.as_deref(),
            Some("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")
        );
        assert_eq!(usdc.token_address(ChainKey::Ethereum), Some("0xfeed"));
        Ok(())
    }

    #[test]
    fn missing_fields_fall_back_to_each_other() -> eyre::Result<()> {
        let f = feed(json!({
            "purchaseCurrencies": [
                { "symbol": "ETH", "networks": [{ "name": "optimism" }] },
                { "id": "POL", "networks": [{ "name": "polygon", "chain_id": "x" }] }
            ]
        }))?;
        let assets = normalize_assets(&f, &StaticTokenDirectory);
        let eth = assets.first().context("eth")?;
        assert_eq!((eth.id.as_str(), eth.name.as_str()), ("ETH", "ETH"));
        assert!(eth.is_native(ChainKey::Optimism));

        let pol = assets.get(1).context("pol")?;
        assert_eq!(pol.symbol, "POL");
        assert_eq!(pol.on(ChainKey::Polygon).map(|n| n.chain_id), Some(137));
        assert!(!pol.is_native(ChainKey::Polygon));
        Ok(())
    }

    #[test]
    fn nativeness_depends_on_chain() -> eyre::Result<()> {
        let assets = fallback_assets(&StaticTokenDirectory);
        let matic = assets.iter().find(|a| a.id == "MATIC").context("matic")?;
        let usdc = assets.iter().find(|a| a.id == "USDC").context("usdc")?;
        assert!(matic.is_native(ChainKey::Polygon));
        assert!(!usdc.is_native(ChainKey::Base));
        assert_eq!(assets_on(&assets, ChainKey::Polygon).len(), 2);
        Ok(())
    }

    #[test]
    fn selection_defaults_and_persists() -> eyre::Result<()> {
        let store = MemoryKvStore::new();
        let assets = fallback_assets(&StaticTokenDirectory);

        let mut sel = Selection::load(&store)?;
        assert_eq!(sel, Selection::default());
        let d = sel.describe(&assets).context("default selection")?;
        assert_eq!((d.chain, d.asset_id.as_str(), d.is_native), (ChainKey::Base, "ETH", true));

        sel.set_chain(&store, ChainKey::Polygon)?;
        assert!(sel.revalidate(&store, &assets)?);
        assert_eq!(sel.asset_id, "MATIC");

        let reloaded = Selection::load(&store)?;
        assert_eq!(reloaded, sel);
        Ok(())
    }

    #[test]
    fn revalidation_keeps_a_valid_choice() -> eyre::Result<()> {
        let store = MemoryKvStore::new();
        let assets = fallback_assets(&StaticTokenDirectory);
        let mut sel = Selection::default();
        sel.set_asset(&store, "USDC")?;
        sel.set_chain(&store, ChainKey::Arbitrum)?;
        assert!(!sel.revalidate(&store, &assets)?);
        let d = sel.describe(&assets).context("usdc")?;
        assert_eq!(
            d.token_address.as_deref(),
            Some("0xaf88d065e77c8cC2239327C5EDb3A432268e5831")
        );
        Ok(())
    }

    #[test]
    fn unknown_stored_chain_falls_back_to_default() -> eyre::Result<()> {
        let store = MemoryKvStore::new();
        kv::put_json(&store, SELECTED_CHAIN_KEY, &"zksync")?;
        assert_eq!(Selection::load(&store)?.chain, DEFAULT_CHAIN);
        Ok(())
    }
}
