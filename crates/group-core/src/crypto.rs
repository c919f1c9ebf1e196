//! Group and node cryptography.
//!
//! - [`GroupKey`]: symmetric ChaCha20-Poly1305 key derived from a group
//!   password. Output is `nonce(12) || ciphertext+tag`.
//! - [`NodeKeyPair`]: secp256k1 key pair; payloads for a node are
//!   ECIES-encrypted to its public key.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, AeadCore, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit};
use libsecp256k1::{PublicKey, SecretKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const KEY_DERIVATION_TAG: &[u8] = b"group-fabric/password-key/v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed")]
    Encrypt,
    #[error("Decryption failed")]
    Decrypt,
    #[error("Ciphertext too short")]
    TooShort,
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Decrypted token is not UTF-8")]
    NotUtf8,
    #[error("Public-key operation failed: {0}")]
    PublicKey(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Symmetric key shared by everyone who knows a group password.
#[derive(Clone, PartialEq, Eq)]
pub struct GroupKey([u8; 32]);

impl GroupKey {
    pub fn derive(password: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DERIVATION_TAG);
        hasher.update(password.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::TooShort);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .decrypt(nonce.into(), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }

    /// Encrypt a string into a base64 token suitable for a C-string field.
    pub fn encrypt_token(&self, plaintext: &str) -> Result<String> {
        Ok(BASE64.encode(self.encrypt(plaintext.as_bytes())?))
    }

    pub fn decrypt_token(&self, token: &str) -> Result<String> {
        let bytes = self.decrypt(&BASE64.decode(token)?)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::NotUtf8)
    }

    /// True when `token` decrypts under this key to exactly `expected`.
    pub fn token_matches(&self, token: &str, expected: &str) -> bool {
        self.decrypt_token(token)
            .map(|plain| plain == expected)
            .unwrap_or(false)
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GroupKey(..)")
    }
}

/// Long-lived node key pair.
#[derive(Clone)]
pub struct NodeKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl NodeKeyPair {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut bytes = [0u8; 32];
        // Rejection-sample until the bytes form a valid scalar
        loop {
            rng.fill_bytes(&mut bytes);
            if let Ok(secret) = SecretKey::parse(&bytes) {
                let public = PublicKey::from_secret_key(&secret);
                return Self { secret, public };
            }
        }
    }

    /// Rebuild from a persisted base64 secret key.
    pub fn from_secret_base64(secret: &str) -> Result<Self> {
        let bytes = BASE64.decode(secret)?;
        let secret = SecretKey::parse_slice(&bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("{e:?}")))?;
        let public = PublicKey::from_secret_key(&secret);
        Ok(Self { secret, public })
    }

    /// Base64 of the 65-byte uncompressed public key.
    pub fn public_base64(&self) -> String {
        BASE64.encode(self.public.serialize())
    }

    pub fn secret_base64(&self) -> String {
        BASE64.encode(self.secret.serialize())
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        ecies::decrypt(&self.secret.serialize(), data)
            .map_err(|e| CryptoError::PublicKey(format!("{e:?}")))
    }
}

impl fmt::Debug for NodeKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKeyPair")
            .field("public", &self.public_base64())
            .finish_non_exhaustive()
    }
}

/// ECIES-encrypt `data` for the holder of a base64 public key.
pub fn encrypt_for(public_key: &str, data: &[u8]) -> Result<Vec<u8>> {
    let bytes = BASE64.decode(public_key)?;
    PublicKey::parse_slice(&bytes, None)
        .map_err(|e| CryptoError::InvalidKey(format!("{e:?}")))?;
    ecies::encrypt(&bytes, data).map_err(|e| CryptoError::PublicKey(format!("{e:?}")))
}

/// Fresh per-run group nonce.
pub fn generate_nonce() -> String {
    uuid::Uuid::new_v4().to_string()
}
