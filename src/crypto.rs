//! Fernet symmetric encryption for credentials at rest.
//!
//! Token layout (all fields big-endian, then URL-safe base64):
//! `0x80 | timestamp (8) | IV (16) | AES-128-CBC ciphertext | HMAC-SHA256 (32)`.
//! The 32-byte key splits into a signing half and an encryption half.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 0x80;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;
/// version + timestamp + IV
const HEADER_LEN: usize = 1 + 8 + IV_LEN;
const BLOCK_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CryptoError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token signature does not match")]
    BadSignature,

    #[error("random source unavailable: {0}")]
    Random(String),
}

/// A Fernet key: 16 bytes for HMAC signing, 16 bytes for AES encryption.
#[derive(Clone)]
pub struct Fernet {
    signing_key: [u8; 16],
    encryption_key: [u8; 16],
}

impl std::fmt::Debug for Fernet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fernet").finish_non_exhaustive()
    }
}

impl Fernet {
    /// Parse a URL-safe base64 key as written to `.env` by the setup command.
    pub fn new(key: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE
            .decode(key.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }

        let mut signing_key = [0u8; 16];
        let mut encryption_key = [0u8; 16];
        signing_key.copy_from_slice(&bytes[..16]);
        encryption_key.copy_from_slice(&bytes[16..]);

        Ok(Self {
            signing_key,
            encryption_key,
        })
    }

    /// Generate a fresh random key, encoded for storage.
    pub fn generate_key() -> Result<String, CryptoError> {
        let mut key = [0u8; KEY_LEN];
        getrandom::getrandom(&mut key).map_err(|e| CryptoError::Random(e.to_string()))?;
        Ok(URL_SAFE.encode(key))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        getrandom::getrandom(&mut iv).map_err(|e| CryptoError::Random(e.to_string()))?;
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        self.encrypt_with(plaintext, timestamp, iv)
    }

    fn encrypt_with(
        &self,
        plaintext: &[u8],
        timestamp: u64,
        iv: [u8; IV_LEN],
    ) -> Result<String, CryptoError> {
        let ciphertext = Aes128CbcEnc::new(&self.encryption_key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut token = Vec::with_capacity(HEADER_LEN + ciphertext.len() + TAG_LEN);
        token.push(VERSION);
        token.extend_from_slice(&timestamp.to_be_bytes());
        token.extend_from_slice(&iv);
        token.extend_from_slice(&ciphertext);

        let mut mac = self.mac()?;
        mac.update(&token);
        token.extend_from_slice(&mac.finalize().into_bytes());

        Ok(URL_SAFE.encode(token))
    }

    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, CryptoError> {
        let data = URL_SAFE
            .decode(token.trim())
            .map_err(|e| CryptoError::InvalidToken(e.to_string()))?;

        if data.len() < HEADER_LEN + BLOCK_LEN + TAG_LEN {
            return Err(CryptoError::InvalidToken("token too short".to_string()));
        }
        if data[0] != VERSION {
            return Err(CryptoError::InvalidToken(format!(
                "unsupported version byte 0x{:02x}",
                data[0]
            )));
        }

        let (signed, tag) = data.split_at(data.len() - TAG_LEN);
        let mut mac = self.mac()?;
        mac.update(signed);
        mac.verify_slice(tag).map_err(|_| CryptoError::BadSignature)?;

        let iv = &signed[9..HEADER_LEN];
        let ciphertext = &signed[HEADER_LEN..];
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::InvalidToken(
                "ciphertext is not block aligned".to_string(),
            ));
        }

        Aes128CbcDec::new_from_slices(&self.encryption_key, iv)
            .map_err(|e| CryptoError::InvalidToken(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::InvalidToken("invalid padding".to_string()))
    }

    fn mac(&self) -> Result<HmacSha256, CryptoError> {
        HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Published Fernet test vector (generate.json)
    const SPEC_KEY: &str = "cw_0x689RpI-jtRR7oE8h_eQsKImvJapLeSbXpwF4e4=";
    const SPEC_TOKEN: &str = "gAAAAAAdwJ6wAAECAwQFBgcICQoLDA0ODy021cpGVWKZ_eEwCGM4BLLF_5CV9dOPmrhuVUPgJobwOz7JcbmrR64jVmpU4IwqDA==";

    #[test]
    fn test_decrypt_reference_token() {
        let fernet = Fernet::new(SPEC_KEY).unwrap();
        let plaintext = fernet.decrypt(SPEC_TOKEN).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn test_encrypt_matches_reference_token() {
        let fernet = Fernet::new(SPEC_KEY).unwrap();
        let iv: [u8; 16] = core::array::from_fn(|i| i as u8);
        let token = fernet.encrypt_with(b"hello", 499162800, iv).unwrap();
        assert_eq!(token, SPEC_TOKEN);
    }

    #[test]
    fn test_encrypt_then_decrypt_credentials() {
        let key = Fernet::generate_key().unwrap();
        let fernet = Fernet::new(&key).unwrap();
        let payload = br#"{"client_id":"abc","client_secret":"xyz"}"#;
        let token = fernet.encrypt(payload).unwrap();
        assert_eq!(fernet.decrypt(&token).unwrap(), payload);
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let token = Fernet::new(SPEC_KEY).unwrap().encrypt(b"secret").unwrap();
        let other = Fernet::new(&Fernet::generate_key().unwrap()).unwrap();
        assert_eq!(other.decrypt(&token), Err(CryptoError::BadSignature));
    }

    #[test]
    fn test_tampered_token_is_rejected() {
        let fernet = Fernet::new(SPEC_KEY).unwrap();
        let mut raw = URL_SAFE.decode(SPEC_TOKEN).unwrap();
        raw[30] ^= 0x01;
        let tampered = URL_SAFE.encode(raw);
        assert_eq!(fernet.decrypt(&tampered), Err(CryptoError::BadSignature));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            Fernet::new("not base64!!"),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(matches!(
            Fernet::new(&URL_SAFE.encode([0u8; 16])),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_short_token() {
        let fernet = Fernet::new(SPEC_KEY).unwrap();
        assert!(matches!(
            fernet.decrypt(&URL_SAFE.encode([VERSION; 10])),
            Err(CryptoError::InvalidToken(_))
        ));
    }
}
