use aes_gcm::aead::{rand_core::RngCore, Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::config::{ENCRYPTION_KEY_VAR, MIN_ENCRYPTION_KEY_LEN};
use crate::errors::{ConfigError, VaultError};

const NONCE_LEN: usize = 12;
const DELIMITER: char = ':';

/// AES-256-GCM cipher for secret fields.
///
/// Text form of a ciphertext is `hex(nonce):hex(ciphertext || tag)`. The key is
/// the SHA-256 digest of the externally supplied secret and is read-only once
/// the process has booted.
pub struct Cipher {
    key: [u8; 32],
}

impl Cipher {
    pub fn from_secret(secret: &str) -> Result<Self, ConfigError> {
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret(ENCRYPTION_KEY_VAR));
        }
        if secret.len() < MIN_ENCRYPTION_KEY_LEN {
            return Err(ConfigError::InvalidSecret {
                name: ENCRYPTION_KEY_VAR,
                reason: format!("must be at least {} bytes", MIN_ENCRYPTION_KEY_LEN),
            });
        }
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encrypt)?;
        Ok(format!(
            "{}{}{}",
            hex::encode(nonce_bytes),
            DELIMITER,
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, VaultError> {
        let (nonce_hex, data_hex) = encoded
            .split_once(DELIMITER)
            .ok_or_else(|| VaultError::Decrypt("missing nonce delimiter".to_string()))?;
        let nonce_bytes =
            hex::decode(nonce_hex).map_err(|e| VaultError::Decrypt(format!("nonce: {}", e)))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(VaultError::Decrypt("nonce has wrong length".to_string()));
        }
        let data =
            hex::decode(data_hex).map_err(|e| VaultError::Decrypt(format!("payload: {}", e)))?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), data.as_slice())
            .map_err(|_| VaultError::Decrypt("authentication failed".to_string()))?;
        String::from_utf8(plaintext).map_err(|e| VaultError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> Cipher {
        Cipher::from_secret("unit-test-secret-0123456789").expect("cipher")
    }

    #[test]
    fn test_roundtrip_including_empty_and_delimiter() {
        let cipher = cipher();
        for plaintext in ["", "hunter2", "a:b:c", ":", "pässwörd ✓", &"x".repeat(4096)] {
            let encrypted = cipher.encrypt(plaintext).expect("encrypt");
            assert_ne!(encrypted, plaintext);
            assert_eq!(cipher.decrypt(&encrypted).expect("decrypt"), plaintext);
        }
    }

    #[test]
    fn test_same_plaintext_encrypts_differently() {
        let cipher = cipher();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let cipher = cipher();
        let encrypted = cipher.encrypt("integrity matters").unwrap();
        let (nonce, data) = encrypted.split_once(':').unwrap();
        let mut bytes = hex::decode(data).unwrap();
        bytes[0] ^= 0x01;
        let tampered = format!("{}:{}", nonce, hex::encode(bytes));
        assert!(matches!(cipher.decrypt(&tampered), Err(VaultError::Decrypt(_))));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let encrypted = cipher().encrypt("hello").unwrap();
        let other = Cipher::from_secret("another-secret-9876543210").unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_malformed_input_rejected() {
        let cipher = cipher();
        assert!(cipher.decrypt("no-delimiter").is_err());
        assert!(cipher.decrypt("zz:00").is_err());
        assert!(cipher.decrypt("0011:00").is_err());
    }

    #[test]
    fn test_missing_or_short_secret_is_configuration_error() {
        assert!(matches!(
            Cipher::from_secret(""),
            Err(ConfigError::MissingSecret(_))
        ));
        assert!(matches!(
            Cipher::from_secret("short"),
            Err(ConfigError::InvalidSecret { .. })
        ));
    }
}
