#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ignite-crypto** – envelope encryption for event payloads at rest.
//!
//! Two keys are derived deterministically (spec §4.2): the *activation key*
//! from the device's activation qualifier (VIN/serial), used to encrypt
//! event payloads, and the *passcode key* from `device_id + serial`, used to
//! encrypt the passcode persisted in local config. Both derivations use
//! HKDF-SHA256 so the same inputs always yield the same key across restarts
//! (testable property 6).
//!
//! Encryption is AES-256-GCM (AEAD). The envelope's nonce is a persisted
//! 4-byte process prefix (the "per-process random IV" from spec §4.2)
//! concatenated with an 8-byte per-message random suffix, so no persisted
//! counter state is required to avoid nonce reuse; the full nonce is stored
//! alongside the ciphertext. See `DESIGN.md` for why this shape was chosen
//! over a persisted monotonic counter.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

/// Length in bytes of a derived key.
const KEY_LEN: usize = 32;
/// Length in bytes of the persisted per-process nonce prefix.
pub const IV_PREFIX_LEN: usize = 4;
/// Length in bytes of the per-message random nonce suffix.
const NONCE_SUFFIX_LEN: usize = 8;
/// Full AES-GCM nonce length.
const NONCE_LEN: usize = IV_PREFIX_LEN + NONCE_SUFFIX_LEN;

/// Errors produced by the crypto envelope.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Key derivation failed (HKDF output length is fixed and valid, so
    /// this should not occur in practice but is surfaced rather than
    /// unwrapped).
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    /// Encryption failed.
    #[error("seal failed")]
    Seal,
    /// Decryption failed or authentication tag mismatch — the row should be
    /// treated as corrupted, not as a fatal error (spec §4.2).
    #[error("open failed: ciphertext corrupt, undecryptable, or wrong key")]
    Open,
    /// The ciphertext was too short to contain a nonce.
    #[error("ciphertext shorter than nonce")]
    Truncated,
}

/// Derive the activation key from the device's activation qualifier.
pub fn derive_activation_key(qualifier_id: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    derive_key(b"ignite-client/activation-key/v1", qualifier_id.as_bytes())
}

/// Derive the passcode key from `device_id + serial`.
pub fn derive_passcode_key(device_id: &str, serial: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let mut ikm = Vec::with_capacity(device_id.len() + serial.len());
    ikm.extend_from_slice(device_id.as_bytes());
    ikm.extend_from_slice(serial.as_bytes());
    derive_key(b"ignite-client/passcode-key/v1", &ikm)
}

fn derive_key(info: &[u8], ikm: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// Generate a fresh 4-byte per-process nonce prefix to persist in local
/// config (`envelopeIv`).
pub fn generate_iv_prefix() -> [u8; IV_PREFIX_LEN] {
    let mut buf = [0u8; IV_PREFIX_LEN];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// An AEAD envelope bound to one derived key and one persisted IV prefix.
///
/// Key rotation (a new activation) means constructing a new `Envelope` with
/// the freshly derived key — the caller is responsible for clearing the
/// event store at that point since old rows become undecryptable anyway.
pub struct Envelope {
    cipher: Aes256Gcm,
    iv_prefix: [u8; IV_PREFIX_LEN],
}

impl Envelope {
    /// Build an envelope from a derived key and the persisted IV prefix.
    pub fn new(key: [u8; KEY_LEN], iv_prefix: [u8; IV_PREFIX_LEN]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(&key);
        Self {
            cipher: Aes256Gcm::new(key),
            iv_prefix,
        }
    }

    /// Encrypt `plaintext`, optionally binding `aad` as associated data.
    /// Returns `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes[..IV_PREFIX_LEN].copy_from_slice(&self.iv_prefix);
        rand::thread_rng().fill_bytes(&mut nonce_bytes[IV_PREFIX_LEN..]);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let payload = Payload {
            msg: plaintext,
            aad: aad.unwrap_or(&[]),
        };
        let mut ciphertext = self
            .cipher
            .encrypt(nonce, payload)
            .map_err(|_| CryptoError::Seal)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.append(&mut ciphertext);
        Ok(out)
    }

    /// Decrypt a blob produced by [`Envelope::seal`]. Returns
    /// [`CryptoError::Open`] on any authentication/decryption failure —
    /// callers should treat this as "row is corrupted", not as fatal.
    pub fn open(&self, blob: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let payload = Payload {
            msg: ciphertext,
            aad: aad.unwrap_or(&[]),
        };
        self.cipher.decrypt(nonce, payload).map_err(|_| CryptoError::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_key_derivation_is_pure() {
        let k1 = derive_activation_key("VIN123").unwrap();
        let k2 = derive_activation_key("VIN123").unwrap();
        assert_eq!(k1, k2);
        let k3 = derive_activation_key("VIN999").unwrap();
        assert_ne!(k1, k3);
    }

    #[test]
    fn passcode_key_derivation_is_pure() {
        let k1 = derive_passcode_key("dev-1", "serial-1").unwrap();
        let k2 = derive_passcode_key("dev-1", "serial-1").unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn seal_then_open_roundtrips() {
        let key = derive_activation_key("VIN123").unwrap();
        let env = Envelope::new(key, generate_iv_prefix());
        let plaintext = b"{\"eventID\":\"Speed\",\"value\":42}";
        let sealed = env.seal(plaintext, None).unwrap();
        let opened = env.open(&sealed, None).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn open_fails_with_wrong_key() {
        let key_a = derive_activation_key("VIN123").unwrap();
        let key_b = derive_activation_key("VIN999").unwrap();
        let prefix = generate_iv_prefix();
        let env_a = Envelope::new(key_a, prefix);
        let env_b = Envelope::new(key_b, prefix);

        let sealed = env_a.seal(b"payload", None).unwrap();
        let result = env_b.open(&sealed, None);
        assert!(matches!(result, Err(CryptoError::Open)));
    }

    #[test]
    fn open_fails_on_truncated_blob() {
        let key = derive_activation_key("VIN123").unwrap();
        let env = Envelope::new(key, generate_iv_prefix());
        let result = env.open(&[0u8; 2], None);
        assert!(matches!(result, Err(CryptoError::Truncated)));
    }

    #[test]
    fn aad_mismatch_fails_to_open() {
        let key = derive_activation_key("VIN123").unwrap();
        let env = Envelope::new(key, generate_iv_prefix());
        let sealed = env.seal(b"payload", Some(b"event:Speed")).unwrap();
        assert!(env.open(&sealed, Some(b"event:RPM")).is_err());
        assert!(env.open(&sealed, Some(b"event:Speed")).is_ok());
    }
}
