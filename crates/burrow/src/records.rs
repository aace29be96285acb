//! Persisted record shapes and their storage keys.

use crate::{
    envelope::EncryptedPayload,
    errors::WalletError,
    kv::{self, KvStore},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const WALLET_KEY: &str = "wallet_v1";
pub const THEFT_VERIFIER_KEY: &str = "theft_passcode_verifier_v1";
pub const THEFT_SETUP_PENDING_KEY: &str = "theft_setup_pending_v1";

pub const ERC20_DECIMALS_KEY: &str = "erc20_decimals_v1";
pub const SELECTED_CHAIN_KEY: &str = "selected_chain_key_v1";
pub const SELECTED_ASSET_KEY: &str = "selected_asset_id_v1";

pub const RECORD_VERSION: u32 = 1;

/// Plaintext sealed inside the duress verifier.
pub const THEFT_SENTINEL: &str = "THEFT_PASSCODE_OK_v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredWallet {
    pub version: u32,
    /// Checksummed, cleartext so a locked wallet can still receive.
    pub address: String,
    pub encrypted_mnemonic: EncryptedPayload,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TheftVerifier {
    pub version: u32,
    pub verifier: EncryptedPayload,
    pub created_at: i64,
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn check_version(key: &str, version: u32) -> eyre::Result<()> {
    if version == RECORD_VERSION {
        return Ok(());
    }
    warn!(key, version, "stored record has an unknown version");
    Err(WalletError::CorruptRecord(key.to_owned()).into())
}

pub fn load_wallet(store: &impl KvStore) -> eyre::Result<Option<StoredWallet>> {
    let w: Option<StoredWallet> = kv::get_json(store, WALLET_KEY)?;
    if let Some(w) = &w {
        check_version(WALLET_KEY, w.version)?;
    }
    Ok(w)
}

pub fn save_wallet(store: &impl KvStore, w: &StoredWallet) -> eyre::Result<()> {
    kv::put_json(store, WALLET_KEY, w)
}

pub fn load_theft_verifier(store: &impl KvStore) -> eyre::Result<Option<TheftVerifier>> {
    let v: Option<TheftVerifier> = kv::get_json(store, THEFT_VERIFIER_KEY)?;
    if let Some(v) = &v {
        check_version(THEFT_VERIFIER_KEY, v.version)?;
    }
    Ok(v)
}

pub fn save_theft_verifier(store: &impl KvStore, v: &TheftVerifier) -> eyre::Result<()> {
    kv::put_json(store, THEFT_VERIFIER_KEY, v)
}

pub fn theft_setup_pending(store: &impl KvStore) -> eyre::Result<bool> {
    Ok(kv::get_json::<bool>(store, THEFT_SETUP_PENDING_KEY)?.unwrap_or(false))
}

pub fn set_theft_setup_pending(store: &impl KvStore, pending: bool) -> eyre::Result<()> {
    if pending {
        kv::put_json(store, THEFT_SETUP_PENDING_KEY, &true)
    } else {
        store.delete(THEFT_SETUP_PENDING_KEY)
    }
}

/// Removes the three custody records. Host preferences are left alone.
pub fn clear_custody(store: &impl KvStore) -> eyre::Result<()> {
    store.delete(WALLET_KEY)?;
    store.delete(THEFT_VERIFIER_KEY)?;
    store.delete(THEFT_SETUP_PENDING_KEY)
}
