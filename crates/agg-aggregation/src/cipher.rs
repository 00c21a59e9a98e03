//! Credential encryption at rest
//!
//! Ciphertext layout: `salt(32) || nonce(12) || ciphertext+tag`. The
//! per-value key is derived from the master key with PBKDF2-HMAC-SHA256.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use agg_core::{Error, Result};
use base64::Engine;
use rand::RngCore;
use sha2::Sha256;
use std::path::Path;
use tracing::debug;

pub const SALT_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Symmetric encryption of endpoint and plugin passwords
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

pub struct Pbkdf2AesGcmCipher {
    master_key: Vec<u8>,
    iterations: u32,
}

impl Pbkdf2AesGcmCipher {
    pub fn new(master_key: Vec<u8>, iterations: u32) -> Self {
        Self {
            master_key,
            iterations: iterations.max(1),
        }
    }

    /// Read a base64 master key from `path`
    pub fn from_key_file(path: impl AsRef<Path>, iterations: u32) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let master_key = base64::engine::general_purpose::STANDARD
            .decode(raw.trim())
            .map_err(|e| Error::internal(format!("invalid master key in {}: {}", path.display(), e)))?;
        if master_key.is_empty() {
            return Err(Error::internal(format!("empty master key in {}", path.display())));
        }
        debug!(path = %path.display(), "Loaded master key");
        Ok(Self::new(master_key, iterations))
    }

    fn derive(&self, salt: &[u8]) -> Result<Aes256Gcm> {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(&self.master_key, salt, self.iterations, &mut key);
        Aes256Gcm::new_from_slice(&key).map_err(|e| Error::internal(e.to_string()))
    }
}

impl CredentialCipher for Pbkdf2AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let sealed = self
            .derive(&salt)?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| Error::internal(format!("encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < SALT_LEN {
            return Err(Error::decryption_failed("ciphertext shorter than salt"));
        }
        if ciphertext.len() < SALT_LEN + NONCE_LEN {
            return Err(Error::decryption_failed("ciphertext shorter than salt and nonce"));
        }
        let (salt, rest) = ciphertext.split_at(SALT_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);
        self.derive(salt)?
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| Error::decryption_failed("authentication tag mismatch: corrupted payload or wrong master key"))
    }
}
