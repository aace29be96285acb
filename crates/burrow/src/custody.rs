//! Wallet custody: create/import/unlock/lock/reset and the duress passcode.
//!
//! The decrypted signer lives only in memory and only while unlocked. Every custody-affecting
//! operation goes through a single-flight gate; a second caller gets
//! `CustodyOperationInProgress` instead of queueing.

use crate::{
    envelope::{self, Envelope, SealingKey},
    errors::WalletError,
    kv::KvStore,
    mnemonic,
    records::{self, StoredWallet, TheftVerifier, RECORD_VERSION, THEFT_SENTINEL},
};
use alloy::signers::{local::PrivateKeySigner, SignerSync as _};
use eyre::Context as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;
use std::sync::Mutex;
use tracing::info;
use zeroize::Zeroizing;

pub const MIN_PASSCODE_CHARS: usize = 6;

/// Returned exactly once, by create and import.
#[derive(Debug)]
pub struct CreatedWallet {
    pub address: String,
    pub mnemonic: Zeroizing<String>,
}

/// Outcome of checking an unlock passcode, duress stage first. A duress match carries the
/// verifier's key, which seals the replacement wallet.
#[derive(Debug)]
pub enum PasscodeMatch {
    Duress(SealingKey),
    Normal(PrivateKeySigner),
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustodyStatus {
    pub has_wallet: bool,
    pub is_unlocked: bool,
    pub has_theft_passcode: bool,
    pub theft_setup_pending: bool,
    pub address: Option<String>,
}

#[derive(Debug)]
pub struct Custody<S> {
    store: S,
    envelope: Envelope,
    gate: tokio::sync::Mutex<()>,
    signer: Mutex<Option<PrivateKeySigner>>,
}

fn dup_secret(s: &SecretString) -> SecretString {
    SecretString::new(s.expose_secret().to_owned().into())
}

fn is_decryption_failure(e: &eyre::Report) -> bool {
    matches!(e.downcast_ref::<WalletError>(), Some(WalletError::Decryption))
}

fn check_passcode_len(p: &SecretString, label: &str) -> eyre::Result<()> {
    if p.expose_secret().chars().count() < MIN_PASSCODE_CHARS {
        return Err(WalletError::InvalidPasscode(format!(
            "{label} must be at least {MIN_PASSCODE_CHARS} characters"
        ))
        .into());
    }
    Ok(())
}

impl<S: KvStore> Custody<S> {
    pub fn new(store: S, envelope: Envelope) -> Self {
        Self {
            store,
            envelope,
            gate: tokio::sync::Mutex::new(()),
            signer: Mutex::new(None),
        }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    fn begin(&self) -> eyre::Result<tokio::sync::MutexGuard<'_, ()>> {
        self.gate
            .try_lock()
            .map_err(|_e| WalletError::CustodyOperationInProgress.into())
    }

    fn set_signer(&self, next: Option<PrivateKeySigner>) -> eyre::Result<()> {
        let mut guard = self
            .signer
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
        *guard = next;
        Ok(())
    }

    pub async fn create(&self, passcode: &SecretString) -> eyre::Result<CreatedWallet> {
        let _gate = self.begin()?;
        self.create_inner(passcode).await
    }

    async fn create_inner(&self, passcode: &SecretString) -> eyre::Result<CreatedWallet> {
        check_passcode_len(passcode, "Passcode")?;
        let phrase = mnemonic::generate_phrase()?;
        let created = self.seal_and_store(phrase, passcode).await?;
        info!(address = %created.address, "wallet created");
        Ok(created)
    }

    pub async fn import(&self, phrase: &str, passcode: &SecretString) -> eyre::Result<CreatedWallet> {
        let _gate = self.begin()?;
        check_passcode_len(passcode, "Passcode")?;
        let normalized = mnemonic::normalize_phrase(phrase);
        let created = self.seal_and_store(normalized, passcode).await?;
        info!(address = %created.address, "wallet imported");
        Ok(created)
    }

    async fn seal_and_store(
        &self,
        phrase: Zeroizing<String>,
        passcode: &SecretString,
    ) -> eyre::Result<CreatedWallet> {
        let signer = mnemonic::signer_from_phrase(&phrase)?;
        let sealed = self
            .envelope
            .encrypt_blocking(
                dup_secret(passcode),
                Zeroizing::new(phrase.as_bytes().to_vec()),
            )
            .await
            .context("seal mnemonic")?;
        self.store_wallet(signer, phrase, sealed)
    }

    /// A fresh wallet sealed under the duress key. Costs no PBKDF2 pass.
    fn replace_wallet(&self, key: &SealingKey) -> eyre::Result<CreatedWallet> {
        let phrase = mnemonic::generate_phrase()?;
        let signer = mnemonic::signer_from_phrase(&phrase)?;
        let sealed = key.seal(phrase.as_bytes()).context("seal mnemonic")?;
        self.store_wallet(signer, phrase, sealed)
    }

    fn store_wallet(
        &self,
        signer: PrivateKeySigner,
        phrase: Zeroizing<String>,
        sealed: envelope::EncryptedPayload,
    ) -> eyre::Result<CreatedWallet> {
        let address = signer.address().to_checksum(None);
        records::save_wallet(
            &self.store,
            &StoredWallet {
                version: RECORD_VERSION,
                address: address.clone(),
                encrypted_mnemonic: sealed,
                created_at: records::now_millis(),
            },
        )?;
        if records::load_theft_verifier(&self.store)?.is_none() {
            records::set_theft_setup_pending(&self.store, true)?;
        }
        self.set_signer(Some(signer))?;
        Ok(CreatedWallet {
            address,
            mnemonic: phrase,
        })
    }

    /// Returns the address now unlocked. Wrong passcodes leave the wallet locked.
    pub async fn unlock(&self, passcode: &SecretString) -> eyre::Result<String> {
        let _gate = self.begin()?;
        let wallet = records::load_wallet(&self.store)?.ok_or(WalletError::NoWallet)?;
        if passcode.expose_secret().is_empty() {
            return Err(WalletError::InvalidPasscode("Passcode is required".to_owned()).into());
        }

        match self.classify_passcode(&wallet, passcode).await? {
            PasscodeMatch::Duress(key) => {
                self.store.delete(records::WALLET_KEY)?;
                self.set_signer(None)?;
                let created = self.replace_wallet(&key)?;
                info!(address = %created.address, "wallet unlocked");
                Ok(created.address)
            }
            PasscodeMatch::Normal(signer) => {
                self.set_signer(Some(signer))?;
                info!(address = %wallet.address, "wallet unlocked");
                Ok(wallet.address)
            }
            PasscodeMatch::NoMatch => {
                self.set_signer(None)?;
                Err(WalletError::WrongPasscode.into())
            }
        }
    }

    /// Duress stage first: a passcode that opens the verifier is a duress event, unless it also
    /// opens the stored wallet (which is then the replacement created by an earlier duress).
    ///
    /// Both stages always run, one PBKDF2 pass each, whichever way the check goes.
    pub async fn classify_passcode(
        &self,
        wallet: &StoredWallet,
        passcode: &SecretString,
    ) -> eyre::Result<PasscodeMatch> {
        let duress_key = match records::load_theft_verifier(&self.store)? {
            Some(v) => Self::verifier_key(&v, passcode).await?,
            None => None,
        };
        let signer = Self::open_wallet(wallet, passcode).await?;
        Ok(match (signer, duress_key) {
            (Some(signer), _) => PasscodeMatch::Normal(signer),
            (None, Some(key)) => PasscodeMatch::Duress(key),
            (None, None) => PasscodeMatch::NoMatch,
        })
    }

    /// The verifier's key when `passcode` opens it to the sentinel.
    async fn verifier_key(
        v: &TheftVerifier,
        passcode: &SecretString,
    ) -> eyre::Result<Option<SealingKey>> {
        let key =
            match SealingKey::for_payload_blocking(dup_secret(passcode), v.verifier.clone()).await
            {
                Ok(key) => key,
                Err(e) if is_decryption_failure(&e) => return Ok(None),
                Err(e) => return Err(e),
            };
        match key.open(&v.verifier) {
            Ok(pt) => Ok((pt.as_slice() == THEFT_SENTINEL.as_bytes()).then_some(key)),
            Err(e) if is_decryption_failure(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `Ok(None)` when the passcode does not open the record.
    async fn open_wallet(
        wallet: &StoredWallet,
        passcode: &SecretString,
    ) -> eyre::Result<Option<PrivateKeySigner>> {
        let pt = match envelope::decrypt_blocking(
            dup_secret(passcode),
            wallet.encrypted_mnemonic.clone(),
        )
        .await
        {
            Ok(pt) => pt,
            Err(e) if is_decryption_failure(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        let phrase = Zeroizing::new(
            String::from_utf8(pt.to_vec()).map_err(|_e| WalletError::StorageCorrupted)?,
        );
        let signer =
            mnemonic::signer_from_phrase(&phrase).map_err(|_e| WalletError::StorageCorrupted)?;
        if !signer
            .address()
            .to_checksum(None)
            .eq_ignore_ascii_case(&wallet.address)
        {
            return Err(WalletError::StorageCorrupted.into());
        }
        Ok(Some(signer))
    }

    pub async fn lock(&self) -> eyre::Result<()> {
        let _gate = self.begin()?;
        self.set_signer(None)?;
        info!("wallet locked");
        Ok(())
    }

    pub async fn set_theft_passcode(&self, passcode: &SecretString) -> eyre::Result<()> {
        let _gate = self.begin()?;
        check_passcode_len(passcode, "Theft passcode")?;
        if let Some(w) = records::load_wallet(&self.store)? {
            if Self::open_wallet(&w, passcode).await?.is_some() {
                return Err(WalletError::TheftPasscodeMatchesPrimary.into());
            }
        }

        let verifier = self
            .envelope
            .encrypt_blocking(
                dup_secret(passcode),
                Zeroizing::new(THEFT_SENTINEL.as_bytes().to_vec()),
            )
            .await
            .context("seal theft verifier")?;
        records::save_theft_verifier(
            &self.store,
            &TheftVerifier {
                version: RECORD_VERSION,
                verifier,
                created_at: records::now_millis(),
            },
        )?;
        records::set_theft_setup_pending(&self.store, false)?;
        info!("theft passcode configured");
        Ok(())
    }

    pub async fn skip_theft_setup(&self) -> eyre::Result<()> {
        let _gate = self.begin()?;
        records::set_theft_setup_pending(&self.store, false)
    }

    /// Irreversible.
    pub async fn reset(&self) -> eyre::Result<()> {
        let _gate = self.begin()?;
        records::clear_custody(&self.store)?;
        self.set_signer(None)?;
        info!("wallet reset");
        Ok(())
    }

    pub fn is_unlocked(&self) -> eyre::Result<bool> {
        let guard = self
            .signer
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
        Ok(guard.is_some())
    }

    /// The in-memory signer, or `WalletLocked`.
    pub fn signer(&self) -> eyre::Result<PrivateKeySigner> {
        let guard = self
            .signer
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
        guard.clone().ok_or_else(|| WalletError::WalletLocked.into())
    }

    /// EIP-191 personal-sign; 0x-prefixed 65-byte hex.
    pub fn sign_message(&self, message: &[u8]) -> eyre::Result<String> {
        let signer = self.signer()?;
        let sig = signer.sign_message_sync(message).context("sign message")?;
        Ok(format!("0x{}", hex::encode(sig.as_bytes())))
    }

    pub fn has_wallet(&self) -> eyre::Result<bool> {
        Ok(records::load_wallet(&self.store)?.is_some())
    }

    pub fn address(&self) -> eyre::Result<Option<String>> {
        Ok(records::load_wallet(&self.store)?.map(|w| w.address))
    }

    pub fn has_theft_passcode(&self) -> eyre::Result<bool> {
        Ok(records::load_theft_verifier(&self.store)?.is_some())
    }

    pub fn theft_setup_pending(&self) -> eyre::Result<bool> {
        records::theft_setup_pending(&self.store)
    }

    pub fn status(&self) -> eyre::Result<CustodyStatus> {
        let wallet = records::load_wallet(&self.store)?;
        Ok(CustodyStatus {
            has_wallet: wallet.is_some(),
            is_unlocked: self.is_unlocked()?,
            has_theft_passcode: self.has_theft_passcode()?,
            theft_setup_pending: self.theft_setup_pending()?,
            address: wallet.map(|w| w.address),
        })
    }
}
