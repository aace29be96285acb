use crate::{chains::ChainKey, envelope::MIN_PBKDF2_ITERATIONS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Primary RPC endpoint keyed by chain name, replacing the built-in default.
    pub urls: BTreeMap<String, String>,
    /// Extra endpoints tried after the primary. An entry replaces the built-in fallbacks.
    pub fallback_urls: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2 rounds for newly sealed records. Values below the floor are raised to it.
    pub pbkdf2_iterations: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: MIN_PBKDF2_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnrampConfig {
    /// Backend serving `/api/onramp/*`. Must be https except on loopback; the default is the
    /// local development server.
    pub base_url: String,
    pub default_country: String,
    /// Used only when the country is US and no subdivision was given.
    pub default_subdivision: String,
    pub buy_options_cache_seconds: u64,
}

impl Default for OnrampConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".into(),
            default_country: "US".into(),
            default_subdivision: "NY".into(),
            buy_options_cache_seconds: 10 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BurrowConfig {
    pub rpc: RpcConfig,
    pub crypto: CryptoConfig,
    pub onramp: OnrampConfig,
}

impl BurrowConfig {
    pub fn pbkdf2_iterations(&self) -> u32 {
        self.crypto.pbkdf2_iterations.max(MIN_PBKDF2_ITERATIONS)
    }

    /// Primary endpoint first, then fallbacks, for one chain.
    pub fn endpoints_for(&self, chain: ChainKey) -> Vec<String> {
        let info = chain.info();
        let primary = self
            .rpc
            .urls
            .get(chain.as_str())
            .map_or(info.rpc_url, String::as_str);
        let mut out = vec![primary.to_owned()];
        match self.rpc.fallback_urls.get(chain.as_str()) {
            Some(list) => out.extend(list.iter().cloned()),
            None => out.extend(info.fallback_rpc_urls.iter().map(|s| (*s).to_owned())),
        }
        out
    }

    pub fn rpc_endpoints(&self) -> BTreeMap<ChainKey, Vec<String>> {
        ChainKey::ALL
            .into_iter()
            .map(|k| (k, self.endpoints_for(k)))
            .collect()
    }
}
