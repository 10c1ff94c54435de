//! AES-256-GCM secret cipher.
//!
//! Each call to [`SecretCipher::encrypt`] draws a fresh 96-bit nonce from the OS
//! RNG, so identical plaintexts never produce identical ciphertexts. The tag is
//! kept detached from the ciphertext so the three parts can be stored and
//! tampered-with independently; any change to any of them fails decryption.

use crate::error::{CloudError, Result};
use aes_gcm::{
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
    aead::generic_array::GenericArray,
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// An encrypted secret: ciphertext, the IV used, and the detached auth tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
}

impl EncryptedSecret {
    /// Base64-encodes the three parts for text storage columns.
    pub fn to_base64(&self) -> (String, String, String) {
        (
            BASE64.encode(&self.ciphertext),
            BASE64.encode(&self.iv),
            BASE64.encode(&self.auth_tag),
        )
    }

    /// Decodes the three base64 parts produced by [`EncryptedSecret::to_base64`].
    ///
    /// Undecodable input is reported as an authentication failure: a corrupted
    /// column is indistinguishable from tampering.
    pub fn from_base64(ciphertext: &str, iv: &str, auth_tag: &str) -> Result<Self> {
        let decode = |value: &str| {
            BASE64
                .decode(value)
                .map_err(|_| CloudError::Authentication("secret could not be decrypted".into()))
        };
        Ok(Self {
            ciphertext: decode(ciphertext)?,
            iv: decode(iv)?,
            auth_tag: decode(auth_tag)?,
        })
    }
}

/// Symmetric authenticated cipher for small secrets (tokens).
///
/// Holds the 32-byte master key in memory only; the key is zeroed on drop.
pub struct SecretCipher {
    key: Zeroizing<Vec<u8>>,
}

impl SecretCipher {
    /// Builds a cipher from raw key bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(CloudError::validation(
                "encryption_key",
                format!(
                    "must be {} bytes (256 bits), got {} bytes",
                    KEY_SIZE,
                    key.len()
                ),
            ));
        }
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
        })
    }

    /// Builds a cipher from a base64-encoded 32-byte master key.
    pub fn from_base64_key(key_base64: &str) -> Result<Self> {
        let key_bytes = Zeroizing::new(BASE64.decode(key_base64.trim()).map_err(|_| {
            CloudError::validation("encryption_key", "is not valid base64")
        })?);
        Self::new(&key_bytes)
    }

    /// Generates a fresh random master key, base64-encoded.
    pub fn generate_key() -> String {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut key[..]);
        BASE64.encode(&key[..])
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key[..])
            .map_err(|_| CloudError::validation("encryption_key", "invalid key length"))
    }

    /// Encrypts `plaintext` under a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedSecret> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut buffer = plaintext.to_vec();

        let tag = self
            .cipher()?
            .encrypt_in_place_detached(&nonce, b"", buffer.as_mut_slice())
            .map_err(|_| CloudError::Authentication("encryption failed".into()))?;

        Ok(EncryptedSecret {
            ciphertext: buffer,
            iv: nonce.to_vec(),
            auth_tag: tag.to_vec(),
        })
    }

    /// Verifies the tag and decrypts.
    ///
    /// Every failure, including malformed IV or tag lengths, is an
    /// `Authentication` error with the same message. Tag comparison inside
    /// `aes-gcm` is constant time.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<Zeroizing<Vec<u8>>> {
        let rejected = || CloudError::Authentication("secret could not be decrypted".into());

        if secret.iv.len() != NONCE_SIZE || secret.auth_tag.len() != TAG_SIZE {
            return Err(rejected());
        }

        let nonce = Nonce::from_slice(&secret.iv);
        let tag = GenericArray::from_slice(&secret.auth_tag);
        let mut buffer = Zeroizing::new(secret.ciphertext.clone());

        self.cipher()?
            .decrypt_in_place_detached(nonce, b"", &mut buffer[..], tag)
            .map_err(|_| rejected())?;

        Ok(buffer)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<EncryptedSecret> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_to_string(&self, secret: &EncryptedSecret) -> Result<Zeroizing<String>> {
        let bytes = self.decrypt(secret)?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| CloudError::Authentication("decrypted secret is not valid UTF-8".into()))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}
