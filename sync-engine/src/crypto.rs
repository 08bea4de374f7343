//! Cryptographic primitives for lanclip.
//!
//! This module provides:
//! - Argon2id passphrase derivation with a per-install salt
//! - A ChaCha20-Poly1305 envelope key derived from it via HKDF-SHA256
//! - Sealing and opening of envelope bytes
//!
//! # Security Notes
//!
//! - Nonces are 96 bits, freshly drawn from the OS RNG for every call
//! - Argon2id parameters come from configuration, not from the device, so
//!   every device holding the same passphrase and salt derives the same key
//! - Decryption fails closed: no partial plaintext is ever returned
//!
//! Sealed layout: `nonce (12) || ciphertext || tag (16)`.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce size for ChaCha20-Poly1305 (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Shortest salt accepted for passphrase derivation.
pub const MIN_SALT_LEN: usize = 8;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error).
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Sealed input too short to hold a nonce and tag.
    #[error("sealed message too short: {0} bytes")]
    Malformed(usize),

    /// Salt too short.
    #[error("salt too short: expected at least {MIN_SALT_LEN} bytes, got {0}")]
    SaltTooShort(usize),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),
}

/// Argon2id parameters for passphrase derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    memory_kib: u32,
    iterations: u32,
}

impl KdfParams {
    /// Create parameters from configuration.
    pub fn new(memory_kib: u32, iterations: u32) -> Self {
        Self {
            memory_kib,
            iterations,
        }
    }

    /// Get memory in KiB.
    pub fn memory_kib(&self) -> u32 {
        self.memory_kib
    }

    /// Get iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn to_argon2_params(self) -> Result<Params, CryptoError> {
        Params::new(self.memory_kib, self.iterations, 1, Some(KEY_SIZE))
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))
    }
}

impl Default for KdfParams {
    /// 19 MiB, 2 iterations.
    fn default() -> Self {
        Self::new(19 * 1024, 2)
    }
}

/// The shared root secret, derived from the passphrase.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SyncSecret([u8; KEY_SIZE]);

impl SyncSecret {
    /// Derive the secret from a passphrase and salt using Argon2id.
    pub fn from_passphrase(
        passphrase: &str,
        salt: &[u8],
        params: KdfParams,
    ) -> Result<Self, CryptoError> {
        if salt.len() < MIN_SALT_LEN {
            return Err(CryptoError::SaltTooShort(salt.len()));
        }
        let argon2 = Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            params.to_argon2_params()?,
        );

        let mut output = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut output)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self(output))
    }

    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a random secret (for testing).
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_SIZE];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SyncSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SyncSecret([REDACTED])")
    }
}

/// The envelope encryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SyncKey {
    key: [u8; KEY_SIZE],
}

impl SyncKey {
    /// Derive the key straight from passphrase and salt.
    pub fn derive(passphrase: &str, salt: &[u8], params: KdfParams) -> Result<Self, CryptoError> {
        Self::from_secret(&SyncSecret::from_passphrase(passphrase, salt, params)?)
    }

    /// Derive the key from a secret with HKDF-SHA256.
    pub fn from_secret(secret: &SyncSecret) -> Result<Self, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(b"lanclip-sync-key-v1"), secret.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        hkdf.expand(b"envelope-encryption", &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self { key })
    }

    /// Seal `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed message.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Malformed(sealed.len()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SyncKey([REDACTED])")
    }
}
