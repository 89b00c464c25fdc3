//! AES-256-GCM sealing for secret payloads.
//!
//! Every sealed value carries its own random 96-bit nonce. The master key is
//! 32 bytes, supplied base64-encoded from the environment and held in memory
//! only.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// Decoded master key for the secret store.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    /// Decodes a base64 master key, which must be exactly 32 bytes long.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .context("Master key is not valid base64")?;
        let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            anyhow!(
                "Master key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                bytes.len()
            )
        })?;
        Ok(Self(key))
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|e| anyhow!("Failed to create cipher: {}", e))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// A sealed secret, both parts base64-encoded for storage in text columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: String,
    pub nonce: String,
}

/// Encrypts `plaintext` under a fresh random nonce.
pub fn seal(plaintext: &str, key: &MasterKey) -> Result<Sealed> {
    let cipher = key.cipher()?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok(Sealed {
        ciphertext: BASE64.encode(ciphertext),
        nonce: BASE64.encode(nonce),
    })
}

/// Decrypts a sealed value. Fails on a wrong key, a wrong nonce or tampering.
pub fn open(sealed: &Sealed, key: &MasterKey) -> Result<String> {
    let ciphertext = BASE64
        .decode(&sealed.ciphertext)
        .context("Failed to decode ciphertext")?;
    let nonce = BASE64
        .decode(&sealed.nonce)
        .context("Failed to decode nonce")?;
    if nonce.len() != NONCE_SIZE {
        return Err(anyhow!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce.len()
        ));
    }

    let plaintext = key
        .cipher()?
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

    String::from_utf8(plaintext).context("Decrypted secret is not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> MasterKey {
        MasterKey::from_base64(&BASE64.encode([byte; KEY_SIZE])).unwrap()
    }

    #[test]
    fn test_master_key_length() {
        assert!(MasterKey::from_base64(&BASE64.encode([0u8; 32])).is_ok());
        assert!(MasterKey::from_base64(&BASE64.encode([0u8; 16])).is_err());
        assert!(MasterKey::from_base64(&BASE64.encode([0u8; 64])).is_err());
        assert!(MasterKey::from_base64("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_master_key_debug_hides_bytes() {
        assert_eq!(format!("{:?}", key(7)), "MasterKey(..)");
    }

    #[test]
    fn test_seal_and_open() {
        let key = key(0);
        let secret = r#"{"client_id":"abc","client_secret":"xyz"}"#;

        let sealed = seal(secret, &key).unwrap();
        assert!(!sealed.ciphertext.contains("client_secret"));
        assert_eq!(open(&sealed, &key).unwrap(), secret);
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let key = key(0);
        let first = seal("same", &key).unwrap();
        let second = seal("same", &key).unwrap();
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let sealed = seal("secret", &key(0)).unwrap();
        assert!(open(&sealed, &key(1)).is_err());
    }

    #[test]
    fn test_open_tampered_fails() {
        let key = key(0);
        let mut sealed = seal("secret", &key).unwrap();
        let other = seal("other", &key).unwrap();
        sealed.nonce = other.nonce;
        assert!(open(&sealed, &key).is_err());
    }
}
