//! Credential encryption.
//!
//! AES-256-GCM under a process-wide master key. The data key is derived
//! once from the master key via HKDF-SHA256 with a fixed context string,
//! so any process holding the master key can decrypt any tenant's
//! envelope.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{CredentialError, CredentialResult};

/// Length of an AES-256 key in bytes.
const KEY_LENGTH: usize = 32;

/// Length of a GCM nonce in bytes.
const NONCE_LENGTH: usize = 12;

/// Length of the GCM authentication tag in bytes.
const TAG_LENGTH: usize = 16;

/// Context string for HKDF key derivation.
const HKDF_INFO: &[u8] = b"clinsync-credentials-v1";

/// Cipher for credential envelopes.
///
/// Encrypted payload layout: `nonce || ciphertext || tag`.
#[derive(Clone)]
pub struct CredentialCipher {
    data_key: [u8; KEY_LENGTH],
}

impl CredentialCipher {
    /// Create a cipher from a 32-byte master key.
    #[must_use]
    pub fn new(master_key: [u8; KEY_LENGTH]) -> Self {
        let hkdf = Hkdf::<Sha256>::new(None, &master_key);
        let mut data_key = [0u8; KEY_LENGTH];
        hkdf.expand(HKDF_INFO, &mut data_key)
            .expect("HKDF-SHA256 supports 32-byte output");
        Self { data_key }
    }

    /// Create a cipher from a hex-encoded master key.
    pub fn from_hex(hex_key: &str) -> CredentialResult<Self> {
        let bytes = hex::decode(hex_key).map_err(|e| CredentialError::EncryptFailed {
            message: format!("invalid hex key: {e}"),
        })?;
        Self::from_bytes(&bytes)
    }

    /// Create a cipher from a base64-encoded master key.
    pub fn from_base64(base64_key: &str) -> CredentialResult<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let bytes = STANDARD
            .decode(base64_key)
            .map_err(|e| CredentialError::EncryptFailed {
                message: format!("invalid base64 key: {e}"),
            })?;
        Self::from_bytes(&bytes)
    }

    fn from_bytes(bytes: &[u8]) -> CredentialResult<Self> {
        if bytes.len() != KEY_LENGTH {
            return Err(CredentialError::EncryptFailed {
                message: format!("key must be {} bytes, got {}", KEY_LENGTH, bytes.len()),
            });
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self::new(key))
    }

    /// Encrypt a plaintext, returning `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> CredentialResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.data_key).map_err(|e| {
            CredentialError::EncryptFailed {
                message: format!("failed to create cipher: {e}"),
            }
        })?;

        // Random nonce from the OS CSPRNG.
        use rand::rngs::OsRng;
        use rand::RngCore;
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext =
            cipher
                .encrypt(nonce, plaintext)
                .map_err(|e| CredentialError::EncryptFailed {
                    message: format!("encryption failed: {e}"),
                })?;

        let mut result = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt a `nonce || ciphertext || tag` payload.
    pub fn decrypt(&self, payload: &[u8]) -> CredentialResult<Vec<u8>> {
        if payload.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(CredentialError::DecryptFailed {
                message: "ciphertext too short".to_string(),
            });
        }

        let cipher = Aes256Gcm::new_from_slice(&self.data_key).map_err(|e| {
            CredentialError::DecryptFailed {
                message: format!("failed to create cipher: {e}"),
            }
        })?;

        let (nonce_bytes, encrypted) = payload.split_at(NONCE_LENGTH);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, encrypted)
            .map_err(|e| CredentialError::DecryptFailed {
                message: format!("decryption failed: {e}"),
            })
    }

    /// Encrypt a serializable value as JSON.
    pub fn encrypt_json<T: serde::Serialize>(&self, value: &T) -> CredentialResult<Vec<u8>> {
        let json = serde_json::to_vec(value).map_err(|e| CredentialError::EncryptFailed {
            message: format!("failed to serialize credentials: {e}"),
        })?;
        self.encrypt(&json)
    }

    /// Decrypt a payload and parse the plaintext as JSON.
    pub fn decrypt_json<T: serde::de::DeserializeOwned>(
        &self,
        payload: &[u8],
    ) -> CredentialResult<T> {
        let plaintext = self.decrypt(payload)?;
        serde_json::from_slice(&plaintext).map_err(|e| CredentialError::DecryptFailed {
            message: format!("decrypted data is not valid credential JSON: {e}"),
        })
    }
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("data_key", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random master key.
///
/// Intended for initial setup and tests only.
#[must_use]
pub fn generate_master_key() -> [u8; KEY_LENGTH] {
    use rand::rngs::OsRng;
    use rand::RngCore;
    let mut key = [0u8; KEY_LENGTH];
    OsRng.fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinsync_core::ApiCredentials;

    fn test_cipher() -> CredentialCipher {
        CredentialCipher::new([0x42u8; KEY_LENGTH])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let plaintext = b"my-secret-api-key";

        let payload = cipher.encrypt(plaintext).unwrap();
        let decrypted = cipher.decrypt(&payload).unwrap();

        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_encrypt_decrypt_json() {
        let cipher = test_cipher();
        let creds = ApiCredentials::new("key", "https://api.example.com", "au1");

        let payload = cipher.encrypt_json(&creds).unwrap();
        let decrypted: ApiCredentials = cipher.decrypt_json(&payload).unwrap();

        assert_eq!(creds, decrypted);
    }

    #[test]
    fn test_decrypt_json_non_json_plaintext() {
        let cipher = test_cipher();
        let payload = cipher.encrypt(b"not json at all").unwrap();

        let result: CredentialResult<ApiCredentials> = cipher.decrypt_json(&payload);
        assert!(matches!(
            result,
            Err(CredentialError::DecryptFailed { .. })
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = test_cipher();
        let other = CredentialCipher::new([0x43u8; KEY_LENGTH]);

        let payload = cipher.encrypt(b"secret").unwrap();
        assert!(other.decrypt(&payload).is_err());
    }

    #[test]
    fn test_ciphertext_too_short() {
        let cipher = test_cipher();
        let result = cipher.decrypt(&[0u8; 10]);
        assert!(matches!(result, Err(CredentialError::DecryptFailed { .. })));
    }

    #[test]
    fn test_corrupted_ciphertext() {
        let cipher = test_cipher();
        let mut payload = cipher.encrypt(b"secret").unwrap();
        payload[NONCE_LENGTH] ^= 0xFF;

        assert!(cipher.decrypt(&payload).is_err());
    }

    #[test]
    fn test_from_hex() {
        let hex_key = "0".repeat(64);
        let cipher = CredentialCipher::from_hex(&hex_key).unwrap();

        let payload = cipher.encrypt(b"test").unwrap();
        assert_eq!(cipher.decrypt(&payload).unwrap(), b"test");
    }

    #[test]
    fn test_from_hex_invalid_length() {
        assert!(CredentialCipher::from_hex("00112233").is_err());
    }

    #[test]
    fn test_from_base64_invalid() {
        assert!(CredentialCipher::from_base64("!!not-base64!!").is_err());
    }

    #[test]
    fn test_generate_master_key() {
        let key1 = generate_master_key();
        let key2 = generate_master_key();
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_debug_redacts_key() {
        let cipher = test_cipher();
        let debug = format!("{cipher:?}");
        assert!(debug.contains("[REDACTED]"));
    }
}
