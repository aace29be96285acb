use crate::errors::WalletError;
use alloy::{
    primitives::Address,
    signers::local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner},
};
use bip39::{Language, Mnemonic};
use eyre::Context as _;
use std::str::FromStr as _;
use zeroize::Zeroizing;

pub const GENERATED_WORD_COUNT: usize = 12;

/// Fresh 12-word English phrase.
pub fn generate_phrase() -> eyre::Result<Zeroizing<String>> {
    let m = Mnemonic::generate_in(Language::English, GENERATED_WORD_COUNT)
        .context("generate mnemonic")?;
    Ok(Zeroizing::new(m.to_string()))
}

/// Trim and collapse internal whitespace runs to single spaces.
pub fn normalize_phrase(raw: &str) -> Zeroizing<String> {
    let mut out = Zeroizing::new(String::with_capacity(raw.len()));
    for w in raw.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(w);
    }
    out
}

/// Derive the signer at `m/44'/60'/0'/0/0`. Any phrase that fails BIP-39 validation is
/// an `InvalidSeedPhrase`.
pub fn signer_from_phrase(phrase: &str) -> eyre::Result<PrivateKeySigner> {
    Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|_e| WalletError::InvalidSeedPhrase)?;
    let signer = MnemonicBuilder::<English>::default()
        .phrase(phrase)
        .index(0)
        .context("evm index")?
        .build()
        .map_err(|_e| WalletError::InvalidSeedPhrase)?;
    Ok(signer)
}

/// Accepts all-lowercase or all-uppercase hex, and mixed case only with a valid checksum.
pub fn parse_address(s: &str) -> Option<Address> {
    let t = s.trim();
    let hex = t.strip_prefix("0x")?;
    let has_lower = hex.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = hex.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        return Address::parse_checksummed(t, None).ok();
    }
    Address::from_str(t).ok()
}
