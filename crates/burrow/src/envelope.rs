//! Passcode-sealed envelopes: PBKDF2-HMAC-SHA256 key derivation and AES-256-GCM.
//!
//! Every payload carries its own salt, nonce and iteration count so the work factor can be
//! raised later without breaking records written today.

use crate::errors::WalletError;
use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use base64::Engine as _;
use eyre::Context as _;
use rand::Rng as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

pub const MIN_PBKDF2_ITERATIONS: u32 = 150_000;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub salt_b64: String,
    pub iv_b64: String,
    pub ciphertext_b64: String,
    pub iterations: u32,
}

/// Encryption parameters. Decryption never consults these; it reads the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    iterations: u32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            iterations: MIN_PBKDF2_ITERATIONS,
        }
    }
}

impl Envelope {
    pub fn new(iterations: u32) -> eyre::Result<Self> {
        if iterations < MIN_PBKDF2_ITERATIONS {
            eyre::bail!(
                "pbkdf2 iterations must be at least {MIN_PBKDF2_ITERATIONS} (got {iterations})"
            );
        }
        Ok(Self { iterations })
    }

    /// Cheap parameters so unit tests don't spend seconds in PBKDF2.
    #[cfg(test)]
    pub(crate) const fn insecure_for_tests(iterations: u32) -> Self {
        Self { iterations }
    }

    pub const fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn encrypt(
        &self,
        passcode: &SecretString,
        plaintext: &[u8],
    ) -> eyre::Result<EncryptedPayload> {
        let mut salt = [0_u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        SealingKey::derive(passcode, salt, self.iterations).seal(plaintext)
    }

    /// Runs [`Envelope::encrypt`] on the blocking pool.
    pub async fn encrypt_blocking(
        self,
        passcode: SecretString,
        plaintext: Zeroizing<Vec<u8>>,
    ) -> eyre::Result<EncryptedPayload> {
        count_derivation();
        tokio::task::spawn_blocking(move || self.encrypt(&passcode, &plaintext))
            .await
            .context("encrypt task")?
    }
}

/// A derived AES key bound to the salt and work factor it came from. Sealing with it reuses
/// the salt under a fresh IV, so no further PBKDF2 pass is needed.
pub struct SealingKey {
    key: Zeroizing<[u8; 32]>,
    salt: [u8; SALT_LEN],
    iterations: u32,
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealingKey")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl SealingKey {
    fn derive(passcode: &SecretString, salt: [u8; SALT_LEN], iterations: u32) -> Self {
        let mut key = Zeroizing::new([0_u8; 32]);
        pbkdf2::pbkdf2_hmac::<Sha256>(
            passcode.expose_secret().as_bytes(),
            &salt,
            iterations,
            key.as_mut_slice(),
        );
        Self {
            key,
            salt,
            iterations,
        }
    }

    /// Derive with the salt and iteration count recorded in `payload`.
    pub fn for_payload(passcode: &SecretString, payload: &EncryptedPayload) -> eyre::Result<Self> {
        let b64 = base64::engine::general_purpose::STANDARD;
        if payload.iterations == 0 {
            return Err(WalletError::Decryption.into());
        }
        let salt: [u8; SALT_LEN] = b64
            .decode(&payload.salt_b64)
            .map_err(|_e| WalletError::Decryption)?
            .try_into()
            .map_err(|_e| WalletError::Decryption)?;
        Ok(Self::derive(passcode, salt, payload.iterations))
    }

    /// Runs [`SealingKey::for_payload`] on the blocking pool.
    pub async fn for_payload_blocking(
        passcode: SecretString,
        payload: EncryptedPayload,
    ) -> eyre::Result<Self> {
        count_derivation();
        tokio::task::spawn_blocking(move || Self::for_payload(&passcode, &payload))
            .await
            .context("derive task")?
    }

    fn cipher(&self) -> eyre::Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.key.as_slice()).context("aes init")
    }

    pub fn seal(&self, plaintext: &[u8]) -> eyre::Result<EncryptedPayload> {
        let mut iv = [0_u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);
        let ct = self
            .cipher()?
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| eyre::eyre!("aes encrypt: {e}"))?;

        let b64 = base64::engine::general_purpose::STANDARD;
        Ok(EncryptedPayload {
            salt_b64: b64.encode(self.salt),
            iv_b64: b64.encode(iv),
            ciphertext_b64: b64.encode(ct),
            iterations: self.iterations,
        })
    }

    /// A payload sealed under another salt or work factor is a `WalletError::Decryption`.
    pub fn open(&self, payload: &EncryptedPayload) -> eyre::Result<Zeroizing<Vec<u8>>> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let salt = b64
            .decode(&payload.salt_b64)
            .map_err(|_e| WalletError::Decryption)?;
        if payload.iterations != self.iterations || salt.as_slice() != self.salt.as_slice() {
            return Err(WalletError::Decryption.into());
        }
        let iv = b64
            .decode(&payload.iv_b64)
            .map_err(|_e| WalletError::Decryption)?;
        let ct = b64
            .decode(&payload.ciphertext_b64)
            .map_err(|_e| WalletError::Decryption)?;
        if iv.len() != IV_LEN {
            return Err(WalletError::Decryption.into());
        }
        let pt = self
            .cipher()?
            .decrypt(Nonce::from_slice(&iv), ct.as_ref())
            .map_err(|_e| WalletError::Decryption)?;
        Ok(Zeroizing::new(pt))
    }
}

/// Every failure mode (bad encoding, bad lengths, tag mismatch) is a `WalletError::Decryption`.
pub fn decrypt(
    passcode: &SecretString,
    payload: &EncryptedPayload,
) -> eyre::Result<Zeroizing<Vec<u8>>> {
    SealingKey::for_payload(passcode, payload)?.open(payload)
}

/// Runs [`decrypt`] on the blocking pool.
pub async fn decrypt_blocking(
    passcode: SecretString,
    payload: EncryptedPayload,
) -> eyre::Result<Zeroizing<Vec<u8>>> {
    count_derivation();
    tokio::task::spawn_blocking(move || decrypt(&passcode, &payload))
        .await
        .context("decrypt task")?
}

#[cfg(test)]
thread_local! {
    static DERIVATIONS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// PBKDF2 passes started from this thread by the async entry points.
#[cfg(test)]
pub(crate) fn derivations() -> usize {
    DERIVATIONS.with(std::cell::Cell::get)
}

#[cfg(test)]
fn count_derivation() {
    DERIVATIONS.with(|c| c.set(c.get() + 1));
}

#[cfg(not(test))]
const fn count_derivation() {}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::ContextCompat as _;

    const TEST_ITERATIONS: u32 = 1_000;

    fn pass(s: &str) -> SecretString {
        SecretString::new(s.to_owned().into())
    }

    #[test]
    fn roundtrip() -> eyre::Result<()> {
        let env = Envelope::insecure_for_tests(TEST_ITERATIONS);
        let p = env.encrypt(&pass("secret6"), b"abandon ability")?;
        assert_eq!(p.iterations, TEST_ITERATIONS);
        let out = decrypt(&pass("secret6"), &p)?;
        assert_eq!(out.as_slice(), b"abandon ability");
        Ok(())
    }

    #[test]
    fn wrong_passcode_is_a_decryption_error() -> eyre::Result<()> {
        let env = Envelope::insecure_for_tests(TEST_ITERATIONS);
        let p = env.encrypt(&pass("secret6"), b"payload")?;
        let err = decrypt(&pass("secret7"), &p)
            .err()
            .context("wrong passcode must fail")?;
        assert_eq!(
            err.downcast_ref::<WalletError>(),
            Some(&WalletError::Decryption)
        );
        Ok(())
    }

    #[test]
    fn each_encryption_uses_fresh_salt_and_iv() -> eyre::Result<()> {
        let env = Envelope::insecure_for_tests(TEST_ITERATIONS);
        let a = env.encrypt(&pass("secret6"), b"same")?;
        let b = env.encrypt(&pass("secret6"), b"same")?;
        assert_ne!(a.salt_b64, b.salt_b64);
        assert_ne!(a.iv_b64, b.iv_b64);
        assert_ne!(a.ciphertext_b64, b.ciphertext_b64);
        Ok(())
    }

    #[test]
    fn malformed_payloads_are_decryption_errors() -> eyre::Result<()> {
        let env = Envelope::insecure_for_tests(TEST_ITERATIONS);
        let good = env.encrypt(&pass("secret6"), b"x")?;

        let zero_iter = EncryptedPayload {
            iterations: 0,
            ..good.clone()
        };
        let short_iv = EncryptedPayload {
            iv_b64: base64::engine::general_purpose::STANDARD.encode([0_u8; 8]),
            ..good.clone()
        };
        let bad_b64 = EncryptedPayload {
            salt_b64: "***".to_owned(),
            ..good
        };
        for p in [zero_iter, short_iv, bad_b64] {
            let err = decrypt(&pass("secret6"), &p)
                .err()
                .context("malformed payload must fail")?;
            assert_eq!(
                err.downcast_ref::<WalletError>(),
                Some(&WalletError::Decryption)
            );
        }
        Ok(())
    }

    #[test]
    fn payload_json_uses_camel_case_base64_fields() -> eyre::Result<()> {
        let env = Envelope::insecure_for_tests(TEST_ITERATIONS);
        let p = env.encrypt(&pass("secret6"), b"x")?;
        let v = serde_json::to_value(&p)?;
        assert!(v.get("saltB64").is_some());
        assert!(v.get("ivB64").is_some());
        assert!(v.get("ciphertextB64").is_some());
        assert_eq!(
            v.get("iterations").and_then(serde_json::Value::as_u64),
            Some(u64::from(TEST_ITERATIONS))
        );
        Ok(())
    }

    #[test]
    fn derived_key_reseals_under_the_same_salt() -> eyre::Result<()> {
        let env = Envelope::insecure_for_tests(TEST_ITERATIONS);
        let first = env.encrypt(&pass("secret6"), b"sentinel")?;
        let key = SealingKey::for_payload(&pass("secret6"), &first)?;
        assert_eq!(key.open(&first)?.as_slice(), b"sentinel");

        let second = key.seal(b"phrase")?;
        assert_eq!(second.salt_b64, first.salt_b64);
        assert_ne!(second.iv_b64, first.iv_b64);
        assert_eq!(decrypt(&pass("secret6"), &second)?.as_slice(), b"phrase");

        let other = env.encrypt(&pass("secret6"), b"x")?;
        let err = key.open(&other).err().context("foreign salt must fail")?;
        assert_eq!(
            err.downcast_ref::<WalletError>(),
            Some(&WalletError::Decryption)
        );
        Ok(())
    }

    #[test]
    fn production_constructor_enforces_floor() {
        assert!(Envelope::new(MIN_PBKDF2_ITERATIONS - 1).is_err());
        assert!(Envelope::new(MIN_PBKDF2_ITERATIONS).is_ok());
        assert_eq!(Envelope::default().iterations(), MIN_PBKDF2_ITERATIONS);
    }
}
