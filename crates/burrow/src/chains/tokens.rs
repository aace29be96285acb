use super::ChainKey;

/// Resolves well-known token symbols to per-chain contract addresses.
pub trait TokenDirectory {
    fn contract(&self, symbol: &str, chain: ChainKey) -> Option<&'static str>;
}

/// Built-in contracts for USDC, USDT and DAI on the supported mainnets.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTokenDirectory;

const TOKEN_CONTRACTS: &[(&str, ChainKey, &str)] = &[
    (
        "USDC",
        ChainKey::Ethereum,
        "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
    ),
    (
        "USDC",
        ChainKey::Base,
        "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
    ),
    (
        "USDC",
        ChainKey::Optimism,
        "0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85",
    ),
    (
        "USDC",
        ChainKey::Arbitrum,
        "0xaf88d065e77c8cC2239327C5EDb3A432268e5831",
    ),
    (
        "USDC",
        ChainKey::Polygon,
        "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174",
    ),
    (
        "USDT",
        ChainKey::Ethereum,
        "0xdAC17F958D2ee523a2206206994597C13D831ec7",
    ),
    (
        "USDT",
        ChainKey::Polygon,
        "0xc2132D05D31c914a87C6611C10748AEb04B58e8F",
    ),
    (
        "DAI",
        ChainKey::Ethereum,
        "0x6B175474E89094C44Da98b954EedeAC495271d0F",
    ),
    (
        "DAI",
        ChainKey::Optimism,
        "0xDA10009cBd5D07dd0CeCc66161FC93D7c9000da1",
    ),
    (
        "DAI",
        ChainKey::Arbitrum,
        "0xDA10009cBd5D07dd0CeCc66161FC93D7c9000da1",
    ),
    (
        "DAI",
        ChainKey::Polygon,
        "0x8f3Cf7ad23Cd3CaDbD9735AFf958023239c6A063",
    ),
];

impl TokenDirectory for StaticTokenDirectory {
    fn contract(&self, symbol: &str, chain: ChainKey) -> Option<&'static str> {
        TOKEN_CONTRACTS
            .iter()
            .find(|(sym, c, _)| *c == chain && sym.eq_ignore_ascii_case(symbol.trim()))
            .map(|&(_, _, addr)| addr)
    }
}
