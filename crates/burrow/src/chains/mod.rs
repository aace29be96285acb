//! Static directory of supported EVM networks.

pub mod evm;
pub mod tokens;

use crate::errors::WalletError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKey {
    Base,
    Ethereum,
    Optimism,
    Arbitrum,
    Polygon,
}

#[derive(Debug)]
pub struct ChainInfo {
    pub key: ChainKey,
    pub chain_id: u64,
    pub display_name: &'static str,
    pub native_symbol: &'static str,
    /// Network name the onramp uses for this chain.
    pub onramp_network: &'static str,
    pub rpc_url: &'static str,
    pub fallback_rpc_urls: &'static [&'static str],
    pub explorer_url: &'static str,
}

const BASE: ChainInfo = ChainInfo {
    key: ChainKey::Base,
    chain_id: 8453,
    display_name: "Base",
    native_symbol: "ETH",
    onramp_network: "base",
    rpc_url: "https://mainnet.base.org",
    fallback_rpc_urls: &["https://base-rpc.publicnode.com"],
    explorer_url: "https://basescan.org",
};

const ETHEREUM: ChainInfo = ChainInfo {
    key: ChainKey::Ethereum,
    chain_id: 1,
    display_name: "Ethereum",
    native_symbol: "ETH",
    onramp_network: "ethereum",
    rpc_url: "https://cloudflare-eth.com",
    fallback_rpc_urls: &["https://ethereum-rpc.publicnode.com"],
    explorer_url: "https://etherscan.io",
};

const OPTIMISM: ChainInfo = ChainInfo {
    key: ChainKey::Optimism,
    chain_id: 10,
    display_name: "Optimism",
    native_symbol: "ETH",
    onramp_network: "optimism",
    rpc_url: "https://mainnet.optimism.io",
    fallback_rpc_urls: &["https://optimism-rpc.publicnode.com"],
    explorer_url: "https://optimistic.etherscan.io",
};

const ARBITRUM: ChainInfo = ChainInfo {
    key: ChainKey::Arbitrum,
    chain_id: 42161,
    display_name: "Arbitrum",
    native_symbol: "ETH",
    onramp_network: "arbitrum",
    rpc_url: "https://arb1.arbitrum.io/rpc",
    fallback_rpc_urls: &["https://arbitrum-rpc.publicnode.com"],
    explorer_url: "https://arbiscan.io",
};

const POLYGON: ChainInfo = ChainInfo {
    key: ChainKey::Polygon,
    chain_id: 137,
    display_name: "Polygon",
    native_symbol: "MATIC",
    onramp_network: "polygon",
    rpc_url: "https://polygon-rpc.com",
    fallback_rpc_urls: &["https://polygon-bor-rpc.publicnode.com"],
    explorer_url: "https://polygonscan.com",
};

impl ChainKey {
    pub const ALL: [Self; 5] = [
        Self::Base,
        Self::Ethereum,
        Self::Optimism,
        Self::Arbitrum,
        Self::Polygon,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Ethereum => "ethereum",
            Self::Optimism => "optimism",
            Self::Arbitrum => "arbitrum",
            Self::Polygon => "polygon",
        }
    }

    pub const fn info(self) -> &'static ChainInfo {
        match self {
            Self::Base => &BASE,
            Self::Ethereum => &ETHEREUM,
            Self::Optimism => &OPTIMISM,
            Self::Arbitrum => &ARBITRUM,
            Self::Polygon => &POLYGON,
        }
    }

    /// Env var that overrides the primary RPC endpoint, e.g. `BURROW_BASE_RPC_URL`.
    pub fn rpc_env_var(self) -> String {
        format!("BURROW_{}_RPC_URL", self.as_str().to_ascii_uppercase())
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainKey {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == t)
            .ok_or_else(|| WalletError::UnknownChain(s.trim().to_owned()))
    }
}

impl ChainInfo {
    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{tx_hash}", self.explorer_url)
    }

    pub fn address_url(&self, address: &str) -> String {
        format!("{}/address/{address}", self.explorer_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_variants() {
        for k in ChainKey::ALL {
            assert_eq!(k.info().key, k, "wrong row for {k}");
        }
        assert_eq!(ChainKey::Base.info().chain_id, 8453);
        assert_eq!(ChainKey::Ethereum.info().chain_id, 1);
        assert_eq!(ChainKey::Optimism.info().chain_id, 10);
        assert_eq!(ChainKey::Arbitrum.info().chain_id, 42161);
        assert_eq!(ChainKey::Polygon.info().chain_id, 137);
        assert_eq!(ChainKey::Polygon.info().native_symbol, "MATIC");
    }

    #[test]
    fn parses_case_insensitively() -> eyre::Result<()> {
        assert_eq!(" Base ".parse::<ChainKey>()?, ChainKey::Base);
        assert_eq!("POLYGON".parse::<ChainKey>()?, ChainKey::Polygon);
        assert!("solana".parse::<ChainKey>().is_err());
        Ok(())
    }

    #[test]
    fn explorer_links() {
        let base = ChainKey::Base.info();
        assert_eq!(base.tx_url("0xabc"), "https://basescan.org/tx/0xabc");
        assert_eq!(
            ChainKey::Optimism.info().address_url("0x1"),
            "https://optimistic.etherscan.io/address/0x1"
        );
    }

    #[test]
    fn rpc_override_env_var() {
        assert_eq!(ChainKey::Base.rpc_env_var(), "BURROW_BASE_RPC_URL");
    }
}
