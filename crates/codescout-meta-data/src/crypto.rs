//! AEAD cipher for stored repository tokens
//!
//! Tokens are sealed with AES-256-GCM. The random 96-bit nonce is
//! prepended to the ciphertext, so two encryptions of the same plaintext
//! never produce the same bytes.

use crate::error::{MetaDataError, MetaDataResult};
use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};

const NONCE_LEN: usize = 12;

/// Symmetric cipher over repository access tokens
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Build the cipher from a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`MetaDataError::Crypto`] for any other key length.
    pub fn new(key: &[u8]) -> MetaDataResult<Self> {
        if key.len() != 32 {
            return Err(MetaDataError::Crypto(format!(
                "credential key must be 32 bytes, got {}",
                key.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Seal a plaintext; output is `nonce || ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns [`MetaDataError::Crypto`] if encryption fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> MetaDataResult<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| MetaDataError::Crypto(format!("encrypt failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN.saturating_add(ciphertext.len()));
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed token.
    ///
    /// # Errors
    ///
    /// Returns [`MetaDataError::Crypto`] if the input is too short or
    /// authentication fails.
    pub fn decrypt(&self, sealed: &[u8]) -> MetaDataResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(MetaDataError::Crypto("sealed token too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| MetaDataError::Crypto(format!("decrypt failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> TokenCipher {
        TokenCipher::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cipher = cipher();
        let token = b"ghp_example_token_value";
        let sealed = cipher.encrypt(token).unwrap();
        let opened = cipher.decrypt(&sealed).unwrap();
        assert_eq!(opened, token);
    }

    #[test]
    fn test_nonce_randomness() {
        let cipher = cipher();
        let a = cipher.encrypt(b"same plaintext").unwrap();
        let b = cipher.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b, "two encryptions must differ (random IV)");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = cipher().encrypt(b"secret").unwrap();
        let other = TokenCipher::new(&[8u8; 32]).unwrap();
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = cipher();
        let mut sealed = cipher.encrypt(b"secret").unwrap();
        if let Some(last) = sealed.last_mut() {
            *last ^= 0xff;
        }
        assert!(cipher.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_key_length_enforced() {
        assert!(TokenCipher::new(&[0u8; 16]).is_err());
        assert!(TokenCipher::new(&[0u8; 32]).is_ok());
    }
}
